use std::collections::HashSet;
use std::ops::Range;

use bitflags::bitflags;
use memory_reader::{
    BoundedPointer, MemoryAccess, OwnedBytes, Pointer, ReadTypedPointer,
    TypedPointer,
};

use crate::{unpack_fields, BitField, Error, MethodTable, RelativePointer};

/// A contiguous block of method descriptors that share their upper
/// token bits and owning `MethodTable`.
pub struct MethodDescChunk {
    bytes: OwnedBytes,
}

/// A single method of a type.
///
/// Not `Clone`: the containing chunk is found from the descriptor's
/// own address.
pub struct MethodDesc {
    bytes: OwnedBytes,
}

/// Kind of method, from the low bits of [`MethodDesc::flags`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MethodClassification {
    IL,
    FCall,
    NDirect,
    EEImpl,
    Array,
    Instantiated,
    ComInterop,
    Dynamic,
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct MethodDescFlags: u16 {
        const CLASSIFICATION = 0x0007;
        const HAS_NON_VTABLE_SLOT = 0x0008;
        const METHOD_IMPL = 0x0010;
        const HAS_NATIVE_CODE_SLOT = 0x0020;
        const STATIC = 0x0080;
        const DUPLICATE = 0x0400;
        const SYNCHRONIZED = 0x4000;
        const REQUIRES_FULL_SLOT_NUMBER = 0x8000;
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct MethodDescFlags2: u8 {
        const HAS_STABLE_ENTRY_POINT = 0x01;
        const HAS_PRECODE = 0x02;
        const IS_UNBOXING_STUB = 0x04;
        const IS_JIT_INTRINSIC = 0x10;
        const IS_ELIGIBLE_FOR_TIERED_COMPILATION = 0x20;
        const REQUIRES_COVARIANT_RETURN_TYPE_CHECKING = 0x40;
    }
}

impl MethodDescChunk {
    pub const HEADER_SIZE: usize = 24;

    /// Granularity of [`Self::size_bytes`] and of the chunk index
    /// stored in each descriptor.
    pub const ALIGNMENT: usize = 8;

    pub const TOKEN_RANGE: BitField = BitField::new(0, 12);

    unpack_fields! {
        raw_method_table: {isize, 0..8},
        raw_next: {isize, 8..16},
        raw_size: {u8, 16..17},
        raw_count: {u8, 17..18},
        token_range: {u16, 18..20, Self::TOKEN_RANGE},
    }

    pub fn read(ptr: Pointer, mem: &dyn MemoryAccess) -> Result<Self, Error> {
        let bytes = mem.read_bytes(ptr..ptr + Self::HEADER_SIZE)?;
        Ok(Self { bytes })
    }

    pub fn ptr(&self) -> TypedPointer<Self> {
        self.bytes.start().into()
    }

    pub fn ptr_range(&self) -> Range<Pointer> {
        (&self.bytes).into()
    }

    pub fn method_table(&self) -> Result<Option<TypedPointer<MethodTable>>, Error> {
        let slot = self.raw_method_table_location().start;
        Ok(RelativePointer::new(slot, self.raw_method_table()?).target())
    }

    pub fn next(&self) -> Result<Option<TypedPointer<MethodDescChunk>>, Error> {
        let slot = self.raw_next_location().start;
        Ok(RelativePointer::new(slot, self.raw_next()?).target())
    }

    /// Bytes of descriptors following the header.
    pub fn size_bytes(&self) -> Result<usize, Error> {
        Ok((self.raw_size()? as usize + 1) * Self::ALIGNMENT)
    }

    pub fn count(&self) -> Result<usize, Error> {
        Ok(self.raw_count()? as usize + 1)
    }

    /// The descriptors of this chunk.  Each is treated as a fixed
    /// [`MethodDesc::SIZE`] record, and the records must fit within
    /// [`Self::size_bytes`].
    pub fn descriptors(&self) -> Result<BoundedPointer<MethodDesc>, Error> {
        let count = self.count()?;
        let size = self.size_bytes()?;
        if count * MethodDesc::SIZE > size {
            return Err(Error::InconsistentMethodDescChunk {
                chunk: self.ptr().as_ptr(),
                count,
                size,
            });
        }

        let origin: TypedPointer<MethodDesc> =
            (self.ptr().as_ptr() + Self::HEADER_SIZE).into();
        Ok(BoundedPointer::strict(origin, count))
    }

    /// Read every descriptor of the chunk.
    pub fn iter_descriptors<'a>(
        &self,
        mem: &'a dyn MemoryAccess,
    ) -> Result<impl Iterator<Item = Result<MethodDesc, Error>> + 'a, Error> {
        Ok(self.descriptors()?.iter(mem))
    }

    /// Follow the `next` links from `first` until a null link.  A
    /// link back to a chunk already visited ends the chain with
    /// [`Error::CyclicMethodDescChunks`].
    pub fn iter_chain<'a>(
        first: Option<TypedPointer<MethodDescChunk>>,
        mem: &'a dyn MemoryAccess,
    ) -> impl Iterator<Item = Result<MethodDescChunk, Error>> + 'a {
        let mut next = first.map(Ok);
        let mut visited = HashSet::new();
        std::iter::from_fn(move || {
            let ptr = match next.take()? {
                Ok(ptr) => ptr,
                Err(err) => return Some(Err(err)),
            };
            if !visited.insert(ptr.as_ptr()) {
                return Some(Err(Error::CyclicMethodDescChunks(ptr.as_ptr())));
            }
            let chunk = match ptr.read(mem) {
                Ok(chunk) => chunk,
                Err(err) => return Some(Err(err)),
            };
            next = chunk.next().transpose();
            Some(Ok(chunk))
        })
    }
}

impl ReadTypedPointer for MethodDescChunk {
    const SIZE: usize = MethodDescChunk::HEADER_SIZE;
    type Error = Error;

    fn read_typed_ptr(
        ptr: Pointer,
        mem: &dyn MemoryAccess,
    ) -> Result<Self, Self::Error> {
        MethodDescChunk::read(ptr, mem)
    }
}

impl MethodDesc {
    pub const SIZE: usize = 16;

    pub const TOKEN_REMAINDER: BitField = BitField::new(0, 14);
    pub const SLOT: BitField = BitField::new(0, 10);

    unpack_fields! {
        token_remainder: {u16, 0..2, Self::TOKEN_REMAINDER},
        chunk_index: {u8, 2..3},
        raw_flags_2: {u8, 3..4},
        raw_slot: {u16, 4..6},
        raw_flags: {u16, 6..8},
        function_pointer: {Pointer, 8..16},
    }

    pub fn read(ptr: Pointer, mem: &dyn MemoryAccess) -> Result<Self, Error> {
        let bytes = mem.read_bytes(ptr..ptr + Self::SIZE)?;
        Ok(Self { bytes })
    }

    pub fn ptr(&self) -> TypedPointer<Self> {
        self.bytes.start().into()
    }

    pub fn ptr_range(&self) -> Range<Pointer> {
        (&self.bytes).into()
    }

    pub fn flags(&self) -> Result<MethodDescFlags, Error> {
        Ok(MethodDescFlags::from_bits_retain(self.raw_flags()?))
    }

    pub fn flags_2(&self) -> Result<MethodDescFlags2, Error> {
        Ok(MethodDescFlags2::from_bits_retain(self.raw_flags_2()?))
    }

    pub fn classification(&self) -> Result<MethodClassification, Error> {
        let raw = self.flags()?.bits() & MethodDescFlags::CLASSIFICATION.bits();
        Ok(match raw {
            0 => MethodClassification::IL,
            1 => MethodClassification::FCall,
            2 => MethodClassification::NDirect,
            3 => MethodClassification::EEImpl,
            4 => MethodClassification::Array,
            5 => MethodClassification::Instantiated,
            6 => MethodClassification::ComInterop,
            _ => MethodClassification::Dynamic,
        })
    }

    pub fn is_static(&self) -> Result<bool, Error> {
        Ok(self.flags()?.contains(MethodDescFlags::STATIC))
    }

    pub fn slot(&self) -> Result<usize, Error> {
        let raw = self.raw_slot()?;
        let slot = if self
            .flags()?
            .contains(MethodDescFlags::REQUIRES_FULL_SLOT_NUMBER)
        {
            raw as u64
        } else {
            Self::SLOT.decode(raw as u64)
        };
        Ok(slot as usize)
    }

    /// Location of the chunk containing this descriptor.
    pub fn chunk_ptr(&self) -> Result<TypedPointer<MethodDescChunk>, Error> {
        let index = self.chunk_index()? as usize;
        let ptr = self
            .ptr()
            .as_ptr()
            .try_sub(index * MethodDescChunk::ALIGNMENT)?
            .try_sub(MethodDescChunk::HEADER_SIZE)?;
        Ok(ptr.into())
    }

    pub fn chunk(&self, mem: &dyn MemoryAccess) -> Result<MethodDescChunk, Error> {
        self.chunk_ptr()?.read(mem)
    }

    /// Full metadata token, combining the chunk's token range with
    /// the descriptor's own low bits.
    pub fn token(&self, chunk: &MethodDescChunk) -> Result<u32, Error> {
        let upper = (chunk.token_range()? as u32) << Self::TOKEN_REMAINDER.width;
        Ok(0x0600_0000 | upper | self.token_remainder()? as u32)
    }

    /// Address to call to invoke the method.
    ///
    /// Virtual methods are dispatched through the owner's vtable.
    /// Other methods use the descriptor's own function pointer, which
    /// is null until the method has been prepared.
    pub fn entry_point(
        &self,
        owner: &MethodTable,
        mem: &dyn MemoryAccess,
    ) -> Result<Pointer, Error> {
        let slot = self.slot()?;
        let ptr = if slot < owner.num_virtuals()? as usize {
            owner.virtual_slot(slot, mem)?
        } else {
            self.function_pointer()?
        };

        if ptr.is_null() {
            Err(Error::NoEntryPoint(self.ptr().as_ptr()))
        } else {
            Ok(ptr)
        }
    }
}

impl ReadTypedPointer for MethodDesc {
    const SIZE: usize = MethodDesc::SIZE;
    type Error = Error;

    fn read_typed_ptr(
        ptr: Pointer,
        mem: &dyn MemoryAccess,
    ) -> Result<Self, Self::Error> {
        MethodDesc::read(ptr, mem)
    }
}

#[cfg(test)]
mod test {
    use memory_reader::SnapshotMemory;

    use super::*;

    fn chunk_bytes(size: u8, count: u8, token_range: u16) -> Vec<u8> {
        let mut bytes = vec![0u8; MethodDescChunk::HEADER_SIZE];
        bytes[16] = size;
        bytes[17] = count;
        bytes[18..20].copy_from_slice(&token_range.to_le_bytes());
        bytes
    }

    fn desc_bytes(token: u16, chunk_index: u8, slot: u16, flags: u16) -> Vec<u8> {
        let mut bytes = vec![0u8; MethodDesc::SIZE];
        bytes[0..2].copy_from_slice(&token.to_le_bytes());
        bytes[2] = chunk_index;
        bytes[4..6].copy_from_slice(&slot.to_le_bytes());
        bytes[6..8].copy_from_slice(&flags.to_le_bytes());
        bytes[8..16].copy_from_slice(&0xabcd_0000usize.to_le_bytes());
        bytes
    }

    #[test]
    fn descriptors_and_tokens() -> Result<(), Error> {
        let mut bytes = chunk_bytes(3, 1, 0x0002);
        bytes.extend(desc_bytes(0x0011, 0, 4, 0x0080));
        bytes.extend(desc_bytes(0x0012, 2, 0x0405, 0));
        let mem = SnapshotMemory::new().with_region(0x4000usize, bytes);

        let chunk = MethodDescChunk::read(Pointer::new(0x4000usize), &mem)?;
        assert_eq!(chunk.count()?, 2);
        assert_eq!(chunk.size_bytes()?, 32);
        assert_eq!(chunk.next()?, None);

        let descs = chunk
            .iter_descriptors(&mem)?
            .collect::<Result<Vec<_>, _>>()?;
        assert_eq!(descs.len(), 2);
        assert_eq!(descs[0].token(&chunk)?, 0x0600_8011);
        assert!(descs[0].is_static()?);
        assert_eq!(descs[1].slot()?, 5);
        assert_eq!(descs[1].chunk_ptr()?, Pointer::new(0x4000usize));
        Ok(())
    }

    #[test]
    fn count_must_fit_size() -> Result<(), Error> {
        let mem = SnapshotMemory::new().with_region(0x4000usize, chunk_bytes(1, 3, 0));
        let chunk = MethodDescChunk::read(Pointer::new(0x4000usize), &mem)?;
        assert!(matches!(
            chunk.descriptors(),
            Err(Error::InconsistentMethodDescChunk {
                count: 4,
                size: 16,
                ..
            })
        ));
        Ok(())
    }

    #[test]
    fn chain_follows_relative_links() -> Result<(), Error> {
        let mut first = chunk_bytes(1, 0, 0);
        first[8..16].copy_from_slice(&0x100isize.to_le_bytes());
        let mut second = chunk_bytes(1, 0, 1);
        second[8..16].copy_from_slice(&0x100isize.to_le_bytes());
        let third = chunk_bytes(1, 0, 2);

        let mem = SnapshotMemory::new()
            .with_region(0x4000usize, first)
            .with_region(0x4108usize, second)
            .with_region(0x4210usize, third);

        let ranges = MethodDescChunk::iter_chain(Some(Pointer::new(0x4000usize).into()), &mem)
            .map(|chunk| chunk?.token_range())
            .collect::<Result<Vec<_>, _>>()?;
        assert_eq!(ranges, vec![0, 1, 2]);
        Ok(())
    }

    #[test]
    fn chain_stops_at_cycle() -> Result<(), Error> {
        let mut first = chunk_bytes(1, 0, 0);
        first[8..16].copy_from_slice(&0x100isize.to_le_bytes());
        let mut second = chunk_bytes(1, 0, 1);
        // Relative to the link's own address, back to the first chunk.
        second[8..16].copy_from_slice(&(-0x110isize).to_le_bytes());

        let mem = SnapshotMemory::new()
            .with_region(0x4000usize, first)
            .with_region(0x4108usize, second);

        let chain: Vec<_> =
            MethodDescChunk::iter_chain(Some(Pointer::new(0x4000usize).into()), &mem)
                .collect();
        assert_eq!(chain.len(), 3);
        assert!(chain[0].is_ok());
        assert!(chain[1].is_ok());
        assert!(matches!(
            &chain[2],
            Err(Error::CyclicMethodDescChunks(ptr)) if *ptr == Pointer::new(0x4000usize)
        ));
        Ok(())
    }

    #[test]
    fn chunk_before_address_zero() -> Result<(), Error> {
        let mem = SnapshotMemory::new()
            .with_region(0x10usize, desc_bytes(0x0011, 4, 0, 0));
        let desc = MethodDesc::read(Pointer::new(0x10usize), &mem)?;
        assert!(matches!(desc.chunk_ptr(), Err(Error::MemoryReader { .. })));
        Ok(())
    }
}
