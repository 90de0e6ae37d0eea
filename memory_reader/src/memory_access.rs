use std::cell::RefCell;
use std::ops::Range;
use std::sync::atomic::{AtomicU32, Ordering};

use crate::{Error, OwnedBytes, Pointer, Result};

/// Raw access to an address space.
///
/// None of the implementations can tell whether an address refers to
/// the structure the caller expects.  The caller is responsible for
/// address validity; the best an implementation can do is report
/// that an address is unmapped.
pub trait MemoryAccess {
    fn read_exact(&self, ptr: Pointer, buffer: &mut [u8]) -> Result<()>;

    fn write_all(&self, ptr: Pointer, bytes: &[u8]) -> Result<()>;

    fn read_bytes(&self, range: Range<Pointer>) -> Result<OwnedBytes> {
        let len = range
            .end
            .as_usize()
            .checked_sub(range.start.as_usize())
            .ok_or(Error::ReversedRange(range.start, range.end))?;
        let mut buffer = vec![0u8; len];
        self.read_exact(range.start, &mut buffer)?;
        Ok(OwnedBytes::new(range.start, buffer))
    }

    fn read_byte_array<const N: usize>(&self, ptr: Pointer) -> Result<[u8; N]>
    where
        Self: Sized,
    {
        let mut buffer = [0u8; N];
        self.read_exact(ptr, &mut buffer)?;
        Ok(buffer)
    }

    /// Atomically replace the `u32` at `ptr` with `new`, if it
    /// currently holds `current`.  The inner result holds the value
    /// observed in memory, as `Ok` on success and `Err` on mismatch.
    fn compare_exchange_u32(
        &self,
        ptr: Pointer,
        _current: u32,
        _new: u32,
    ) -> Result<std::result::Result<u32, u32>> {
        Err(Error::AtomicAccessUnsupported(ptr))
    }
}

impl<M: MemoryAccess + ?Sized> MemoryAccess for &M {
    fn read_exact(&self, ptr: Pointer, buffer: &mut [u8]) -> Result<()> {
        (**self).read_exact(ptr, buffer)
    }

    fn write_all(&self, ptr: Pointer, bytes: &[u8]) -> Result<()> {
        (**self).write_all(ptr, bytes)
    }

    fn compare_exchange_u32(
        &self,
        ptr: Pointer,
        current: u32,
        new: u32,
    ) -> Result<std::result::Result<u32, u32>> {
        (**self).compare_exchange_u32(ptr, current, new)
    }
}

impl<M: MemoryAccess + ?Sized> MemoryAccess for Box<M> {
    fn read_exact(&self, ptr: Pointer, buffer: &mut [u8]) -> Result<()> {
        (**self).read_exact(ptr, buffer)
    }

    fn write_all(&self, ptr: Pointer, bytes: &[u8]) -> Result<()> {
        (**self).write_all(ptr, bytes)
    }

    fn compare_exchange_u32(
        &self,
        ptr: Pointer,
        current: u32,
        new: u32,
    ) -> Result<std::result::Result<u32, u32>> {
        (**self).compare_exchange_u32(ptr, current, new)
    }
}

/// The address space of the current process.
///
/// Reads and writes are unchecked copies.  Touching an unmapped
/// address is a segmentation fault, not an error.
pub struct LocalMemory {
    _private: (),
}

impl LocalMemory {
    /// # Safety
    ///
    /// Every pointer later passed to this backend must be valid for
    /// the requested access, for the duration of that access.
    pub unsafe fn new() -> Self {
        Self { _private: () }
    }
}

impl MemoryAccess for LocalMemory {
    fn read_exact(&self, ptr: Pointer, buffer: &mut [u8]) -> Result<()> {
        if ptr.is_null() {
            return Err(Error::MemoryReadNullPointer);
        }
        unsafe {
            std::ptr::copy_nonoverlapping(
                ptr.as_usize() as *const u8,
                buffer.as_mut_ptr(),
                buffer.len(),
            );
        }
        Ok(())
    }

    fn write_all(&self, ptr: Pointer, bytes: &[u8]) -> Result<()> {
        if ptr.is_null() {
            return Err(Error::MemoryReadNullPointer);
        }
        unsafe {
            std::ptr::copy_nonoverlapping(
                bytes.as_ptr(),
                ptr.as_usize() as *mut u8,
                bytes.len(),
            );
        }
        Ok(())
    }

    fn compare_exchange_u32(
        &self,
        ptr: Pointer,
        current: u32,
        new: u32,
    ) -> Result<std::result::Result<u32, u32>> {
        if ptr.is_null() {
            return Err(Error::MemoryReadNullPointer);
        }
        if !ptr.is_aligned(std::mem::align_of::<AtomicU32>()) {
            return Err(Error::MisalignedAtomic(ptr));
        }
        let atomic = unsafe { &*(ptr.as_usize() as *const AtomicU32) };
        Ok(atomic.compare_exchange(
            current,
            new,
            Ordering::SeqCst,
            Ordering::SeqCst,
        ))
    }
}

/// An address space assembled from byte blobs placed at chosen
/// addresses.  Used to decode structures captured from another
/// process, and in tests.
#[derive(Default)]
pub struct SnapshotMemory {
    regions: RefCell<Vec<SnapshotRegion>>,
}

struct SnapshotRegion {
    start: Pointer,
    bytes: Vec<u8>,
}

impl SnapshotRegion {
    fn contains(&self, range: &Range<Pointer>) -> bool {
        self.start <= range.start && range.end <= self.start + self.bytes.len()
    }
}

impl SnapshotMemory {
    pub fn new() -> Self {
        Default::default()
    }

    /// Place `bytes` at `start`.  Later regions shadow earlier ones
    /// where they overlap.
    pub fn with_region(
        self,
        start: impl Into<Pointer>,
        bytes: Vec<u8>,
    ) -> Self {
        self.add_region(start, bytes);
        self
    }

    pub fn add_region(&self, start: impl Into<Pointer>, bytes: Vec<u8>) {
        let start = start.into();
        self.regions
            .borrow_mut()
            .push(SnapshotRegion { start, bytes });
    }

    fn locate(&self, ptr: Pointer, len: usize) -> Result<(usize, usize)> {
        if ptr.is_null() {
            return Err(Error::MemoryReadNullPointer);
        }
        let range = ptr..ptr.try_add(len)?;
        self.regions
            .borrow()
            .iter()
            .enumerate()
            .rev()
            .find(|(_, region)| region.contains(&range))
            .map(|(index, region)| (index, ptr - region.start))
            .ok_or(Error::MemoryReadBadAddress(ptr, len))
    }
}

impl MemoryAccess for SnapshotMemory {
    fn read_exact(&self, ptr: Pointer, buffer: &mut [u8]) -> Result<()> {
        let (index, offset) = self.locate(ptr, buffer.len())?;
        let regions = self.regions.borrow();
        let bytes = &regions[index].bytes[offset..offset + buffer.len()];
        buffer.copy_from_slice(bytes);
        Ok(())
    }

    fn write_all(&self, ptr: Pointer, bytes: &[u8]) -> Result<()> {
        let (index, offset) = self.locate(ptr, bytes.len())?;
        let mut regions = self.regions.borrow_mut();
        regions[index].bytes[offset..offset + bytes.len()]
            .copy_from_slice(bytes);
        Ok(())
    }

    fn compare_exchange_u32(
        &self,
        ptr: Pointer,
        current: u32,
        new: u32,
    ) -> Result<std::result::Result<u32, u32>> {
        // SnapshotMemory is !Sync, so nothing can interleave between
        // the read and the write.
        let mut buffer = [0u8; 4];
        self.read_exact(ptr, &mut buffer)?;
        let observed = u32::from_le_bytes(buffer);
        if observed == current {
            self.write_all(ptr, &new.to_le_bytes())?;
            Ok(Ok(observed))
        } else {
            Ok(Err(observed))
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn snapshot_read_write() -> Result<()> {
        let mem = SnapshotMemory::new().with_region(0x1000usize, vec![0u8; 16]);

        mem.write_all(Pointer::new(0x1004usize), &[1, 2, 3, 4])?;
        let bytes = mem.read_bytes(Pointer::new(0x1002usize)..Pointer::new(0x1008usize))?;
        assert_eq!(&*bytes, &[0, 0, 1, 2, 3, 4]);
        Ok(())
    }

    #[test]
    fn snapshot_unmapped() {
        let mem = SnapshotMemory::new().with_region(0x1000usize, vec![0u8; 16]);
        let mut buffer = [0u8; 8];

        assert!(matches!(
            mem.read_exact(Pointer::new(0x100cusize), &mut buffer),
            Err(Error::MemoryReadBadAddress(_, 8))
        ));
        assert!(matches!(
            mem.read_exact(Pointer::null(), &mut buffer),
            Err(Error::MemoryReadNullPointer)
        ));
    }

    #[test]
    fn reversed_range_is_an_error() {
        let mem = SnapshotMemory::new().with_region(0x1000usize, vec![0u8; 16]);
        assert!(matches!(
            mem.read_bytes(Pointer::new(0x1008usize)..Pointer::new(0x1004usize)),
            Err(Error::ReversedRange(..))
        ));
    }

    #[test]
    fn local_compare_exchange() -> Result<()> {
        let value = AtomicU32::new(5);
        let mem = unsafe { LocalMemory::new() };
        let ptr: Pointer = (&value as *const AtomicU32).into();

        assert_eq!(mem.compare_exchange_u32(ptr, 5, 7)?, Ok(5));
        assert_eq!(mem.compare_exchange_u32(ptr, 5, 9)?, Err(7));
        assert_eq!(value.load(Ordering::SeqCst), 7);
        Ok(())
    }
}
