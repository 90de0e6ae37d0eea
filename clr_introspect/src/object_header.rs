use bitflags::bitflags;
use log::debug;
use memory_reader::{MemoryAccess, Pointer, TypedPointer};

use crate::{BitField, Error};

bitflags! {
    /// Flag bits of the sync-block word that precedes each heap
    /// object.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct SyncBlockFlags: u32 {
        const AGILE_IN_PROGRESS = 0x8000_0000;
        const FINALIZER_RUN = 0x4000_0000;
        const GC_RESERVE = 0x2000_0000;
        const SPIN_LOCK = 0x1000_0000;
        const IS_HASH_OR_SYNCBLKINDEX = 0x0800_0000;
        const IS_HASHCODE = 0x0400_0000;
    }
}

/// The header word of a heap object, located just before the
/// object's `MethodTable` pointer.
///
/// On 64-bit targets, the header is a 4-byte value preceded by 4
/// bytes of padding.  Only the 4-byte value is accessed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObjectHeader {
    ptr: TypedPointer<u32>,
}

/// Interpretation of the low bits of the sync-block word.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncBlockValue {
    /// No hash code or sync block has been assigned.
    Empty,
    HashCode(u32),
    SyncBlockIndex(u32),
    /// Thin lock state, not decoded.
    ThinLock(u32),
}

impl ObjectHeader {
    pub const SIZE: usize = 4;

    pub const HASH_OR_INDEX: BitField = BitField::new(0, 26);

    /// Header of the object at `object`.
    pub fn of(object: Pointer) -> Result<Self, Error> {
        Ok(Self {
            ptr: object.try_sub(Self::SIZE)?.into(),
        })
    }

    pub fn ptr(&self) -> TypedPointer<u32> {
        self.ptr
    }

    pub fn raw(&self, mem: &dyn MemoryAccess) -> Result<u32, Error> {
        Ok(self.ptr.read(mem)?)
    }

    pub fn flags(&self, mem: &dyn MemoryAccess) -> Result<SyncBlockFlags, Error> {
        Ok(SyncBlockFlags::from_bits_truncate(self.raw(mem)?))
    }

    pub fn value(&self, mem: &dyn MemoryAccess) -> Result<SyncBlockValue, Error> {
        Ok(Self::decode_value(self.raw(mem)?))
    }

    pub fn decode_value(raw: u32) -> SyncBlockValue {
        let flags = SyncBlockFlags::from_bits_truncate(raw);
        let low_bits = Self::HASH_OR_INDEX.decode(raw as u64) as u32;
        if flags.contains(SyncBlockFlags::IS_HASH_OR_SYNCBLKINDEX) {
            if flags.contains(SyncBlockFlags::IS_HASHCODE) {
                SyncBlockValue::HashCode(low_bits)
            } else {
                SyncBlockValue::SyncBlockIndex(low_bits)
            }
        } else if low_bits == 0 {
            SyncBlockValue::Empty
        } else {
            SyncBlockValue::ThinLock(low_bits)
        }
    }

    pub fn hash_code(&self, mem: &dyn MemoryAccess) -> Result<Option<u32>, Error> {
        Ok(match self.value(mem)? {
            SyncBlockValue::HashCode(hash) => Some(hash),
            _ => None,
        })
    }

    pub fn sync_block_index(
        &self,
        mem: &dyn MemoryAccess,
    ) -> Result<Option<u32>, Error> {
        Ok(match self.value(mem)? {
            SyncBlockValue::SyncBlockIndex(index) => Some(index),
            _ => None,
        })
    }

    /// Atomically set `flags`, leaving all other bits unchanged.
    /// Returns the flags that were set beforehand.
    pub fn set_flags(
        &self,
        flags: SyncBlockFlags,
        mem: &dyn MemoryAccess,
    ) -> Result<SyncBlockFlags, Error> {
        self.update(mem, |raw| raw | flags.bits())
    }

    /// Atomically clear `flags`, leaving all other bits unchanged.
    /// Returns the flags that were set beforehand.
    pub fn clear_flags(
        &self,
        flags: SyncBlockFlags,
        mem: &dyn MemoryAccess,
    ) -> Result<SyncBlockFlags, Error> {
        self.update(mem, |raw| raw & !flags.bits())
    }

    fn update(
        &self,
        mem: &dyn MemoryAccess,
        func: impl Fn(u32) -> u32,
    ) -> Result<SyncBlockFlags, Error> {
        let ptr = self.ptr.as_ptr();
        let mut current = self.raw(mem)?;
        loop {
            match mem.compare_exchange_u32(ptr, current, func(current))? {
                Ok(previous) => {
                    return Ok(SyncBlockFlags::from_bits_truncate(previous));
                }
                Err(observed) => {
                    debug!(
                        "Object header at {ptr} changed from {current:#x} \
                         to {observed:#x}, retrying"
                    );
                    current = observed;
                }
            }
        }
    }
}

#[cfg(test)]
mod test {
    use memory_reader::SnapshotMemory;

    use super::*;

    fn header_with(raw: u32) -> Result<(SnapshotMemory, ObjectHeader), Error> {
        let mut bytes = vec![0u8; 16];
        bytes[4..8].copy_from_slice(&raw.to_le_bytes());
        let mem = SnapshotMemory::new().with_region(0x2000usize, bytes);
        Ok((mem, ObjectHeader::of(Pointer::new(0x2008usize))?))
    }

    #[test]
    fn header_precedes_object() -> Result<(), Error> {
        let header = ObjectHeader::of(Pointer::new(0x2008usize))?;
        assert_eq!(header.ptr(), Pointer::new(0x2004usize));

        assert!(matches!(
            ObjectHeader::of(Pointer::new(2usize)),
            Err(Error::MemoryReader { .. })
        ));
        Ok(())
    }

    #[test]
    fn decode_hash_and_index() {
        assert_eq!(
            ObjectHeader::decode_value(0x0C00_1234),
            SyncBlockValue::HashCode(0x1234)
        );
        assert_eq!(
            ObjectHeader::decode_value(0x0800_0042),
            SyncBlockValue::SyncBlockIndex(0x42)
        );
        assert_eq!(ObjectHeader::decode_value(0x4000_0000), SyncBlockValue::Empty);
        assert_eq!(
            ObjectHeader::decode_value(0x0000_0101),
            SyncBlockValue::ThinLock(0x101)
        );
    }

    #[test]
    fn set_and_clear_preserve_other_bits() -> Result<(), Error> {
        let (mem, header) = header_with(0x0C00_1234)?;

        let before = header.set_flags(SyncBlockFlags::GC_RESERVE, &mem)?;
        assert!(!before.contains(SyncBlockFlags::GC_RESERVE));
        assert_eq!(header.raw(&mem)?, 0x2C00_1234);
        assert_eq!(header.hash_code(&mem)?, Some(0x1234));

        let before = header.clear_flags(SyncBlockFlags::GC_RESERVE, &mem)?;
        assert!(before.contains(SyncBlockFlags::GC_RESERVE));
        assert_eq!(header.raw(&mem)?, 0x0C00_1234);
        Ok(())
    }
}
