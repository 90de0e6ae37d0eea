use memory_reader::{MemoryAccess, Pointer, TypedPointer};

use crate::{DispatchTable, Error};

/// Address range reserved for the garbage-collected heap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GcHeapBounds {
    pub lowest: Pointer,
    pub highest: Pointer,
}

impl GcHeapBounds {
    /// Name of the dispatch table entry that checks whether an
    /// address is the start of a live heap object.
    pub const IS_HEAP_POINTER: &'static str = "GCHeap::IsHeapPointer";

    /// Read the bounds from the runtime's global variables.
    pub fn read(
        lowest: TypedPointer<Pointer>,
        highest: TypedPointer<Pointer>,
        mem: &dyn MemoryAccess,
    ) -> Result<Self, Error> {
        Ok(Self {
            lowest: lowest.read(mem)?,
            highest: highest.read(mem)?,
        })
    }

    /// True if `ptr` lies within the heap's address range, inclusive
    /// of both bounds.
    pub fn contains(&self, ptr: Pointer) -> bool {
        self.lowest <= ptr && ptr <= self.highest
    }

    /// True if `ptr` refers to a heap object, as determined by the
    /// runtime.  This is stronger than [`Self::contains`], which
    /// only checks the address range.
    pub fn is_heap_pointer(
        &self,
        ptr: Pointer,
        dispatch: &DispatchTable,
    ) -> Result<bool, Error> {
        if !self.contains(ptr) {
            return Ok(false);
        }
        let result = dispatch.call(Self::IS_HEAP_POINTER, &[ptr.as_usize()])?;
        Ok(result != 0)
    }

    /// As [`Self::is_heap_pointer`], but also accepts a native
    /// predicate, such as the runtime's own `IsHeapPointer`.
    ///
    /// # Safety
    ///
    /// A native target must be a function of the current process
    /// taking one word-sized argument, as for
    /// [`DispatchTable::call_native`].
    pub unsafe fn is_heap_pointer_native(
        &self,
        ptr: Pointer,
        dispatch: &DispatchTable,
    ) -> Result<bool, Error> {
        if !self.contains(ptr) {
            return Ok(false);
        }
        let result =
            dispatch.call_native(Self::IS_HEAP_POINTER, &[ptr.as_usize()])?;
        Ok(result != 0)
    }
}

#[cfg(test)]
mod test {
    use memory_reader::SnapshotMemory;

    use super::*;
    use crate::Callable;

    fn bounds() -> GcHeapBounds {
        GcHeapBounds {
            lowest: Pointer::new(0x10_0000usize),
            highest: Pointer::new(0x20_0000usize),
        }
    }

    #[test]
    fn read_globals() -> Result<(), Error> {
        let mut bytes = 0x10_0000usize.to_le_bytes().to_vec();
        bytes.extend(0x20_0000usize.to_le_bytes());
        let mem = SnapshotMemory::new().with_region(0x5000usize, bytes);

        let read = GcHeapBounds::read(
            Pointer::new(0x5000usize).into(),
            Pointer::new(0x5008usize).into(),
            &mem,
        )?;
        assert_eq!(read, bounds());
        Ok(())
    }

    #[test]
    fn inclusive_bounds() {
        let bounds = bounds();
        assert!(bounds.contains(bounds.lowest));
        assert!(bounds.contains(bounds.highest));
        assert!(!bounds.contains(bounds.lowest - 1));
        assert!(!bounds.contains(bounds.highest + 1));
    }

    #[test]
    fn runtime_predicate() -> Result<(), Error> {
        let bounds = bounds();
        let mut dispatch = DispatchTable::new();
        assert!(matches!(
            bounds.is_heap_pointer(Pointer::new(0x10_0010usize), &dispatch),
            Err(Error::NotBound(_))
        ));

        dispatch.register(
            GcHeapBounds::IS_HEAP_POINTER,
            Callable::rust(|args| (args[0] % 16 == 0) as usize),
        );
        assert!(bounds.is_heap_pointer(Pointer::new(0x10_0010usize), &dispatch)?);
        assert!(!bounds.is_heap_pointer(Pointer::new(0x10_0011usize), &dispatch)?);
        assert!(!bounds.is_heap_pointer(Pointer::new(0x30_0000usize), &dispatch)?);
        Ok(())
    }

    extern "C" fn aligned_to_page(ptr: usize) -> usize {
        (ptr % 0x1000 == 0) as usize
    }

    #[test]
    fn native_predicate() -> Result<(), Error> {
        let bounds = bounds();
        let mut dispatch = DispatchTable::new();
        let func: extern "C" fn(usize) -> usize = aligned_to_page;
        dispatch.register(GcHeapBounds::IS_HEAP_POINTER, Pointer::new(func as usize));

        assert!(matches!(
            bounds.is_heap_pointer(Pointer::new(0x18_0000usize), &dispatch),
            Err(Error::NativeCallRequiresUnsafe(_))
        ));
        unsafe {
            assert!(bounds
                .is_heap_pointer_native(Pointer::new(0x18_0000usize), &dispatch)?);
            assert!(!bounds
                .is_heap_pointer_native(Pointer::new(0x18_0010usize), &dispatch)?);
            assert!(!bounds
                .is_heap_pointer_native(Pointer::new(0x30_0000usize), &dispatch)?);
        }
        Ok(())
    }
}
