use std::marker::PhantomData;

use crate::{
    BoundedPointer, BoundsMode, Error, LocalMemory, MemoryAccess, Pointer,
    ReadTypedPointer, TypedPointer, WriteTypedPointer,
};

/// Zero-initialised native storage for `count` elements of `T`, with
/// a bounds-tracking cursor into it.
///
/// Every access checks that the storage has not been released.  After
/// [`Self::free`], all accessors fail with [`Error::UseAfterFree`]
/// instead of returning a default value.
pub struct LocalAllocation<T> {
    storage: Option<Vec<u8>>,
    cursor: BoundedPointer<T>,
    _phantom: PhantomData<T>,
}

impl<T: ReadTypedPointer> LocalAllocation<T> {
    pub fn new(count: usize) -> Self {
        Self::with_mode(count, BoundsMode::Strict)
    }

    pub fn with_mode(count: usize, mode: BoundsMode) -> Self {
        let storage = vec![0u8; count * T::SIZE];
        let origin = Self::origin_of(&storage);
        Self {
            storage: Some(storage),
            cursor: BoundedPointer::new(origin, count, mode),
            _phantom: PhantomData,
        }
    }

    fn origin_of(storage: &[u8]) -> TypedPointer<T> {
        Pointer::from(storage.as_ptr()).into()
    }

    fn memory(&self) -> Result<LocalMemory, Error> {
        if self.storage.is_none() {
            return Err(Error::UseAfterFree(self.cursor.origin().as_ptr()));
        }
        // Every access through this handle is first validated by
        // `self.cursor`, which never leaves the live storage.
        Ok(unsafe { LocalMemory::new() })
    }

    pub fn is_freed(&self) -> bool {
        self.storage.is_none()
    }

    pub fn count(&self) -> Result<usize, Error> {
        self.memory()?;
        Ok(self.cursor.count())
    }

    pub fn cursor(&self) -> Result<&BoundedPointer<T>, Error> {
        self.memory()?;
        Ok(&self.cursor)
    }

    /// A fresh pointer over the whole allocation, positioned at the
    /// first element.  It is invalidated by `set_count` and `free`.
    pub fn bounded(&self, mode: BoundsMode) -> Result<BoundedPointer<T>, Error> {
        self.memory()?;
        Ok(BoundedPointer::new(self.cursor.origin(), self.cursor.count(), mode))
    }

    pub fn cursor_mut(&mut self) -> Result<&mut BoundedPointer<T>, Error> {
        self.memory()?;
        Ok(&mut self.cursor)
    }

    pub fn get(&self, index: isize) -> Result<T, T::Error> {
        let mem = self.memory()?;
        self.cursor.get(index, &mem)
    }

    pub fn read(&self) -> Result<T, T::Error> {
        self.get(0)
    }

    pub fn set(&mut self, index: isize, value: &T) -> Result<(), T::Error>
    where
        T: WriteTypedPointer,
    {
        let mem = self.memory()?;
        self.cursor.set(index, value, &mem)
    }

    pub fn increment(&mut self) -> Result<(), Error> {
        self.memory()?;
        self.cursor.increment()
    }

    pub fn decrement(&mut self) -> Result<(), Error> {
        self.memory()?;
        self.cursor.decrement()
    }

    /// Resize to `count` elements.  Existing elements are preserved,
    /// new elements are zeroed, and the cursor returns to the first
    /// element.  Any pointer previously taken from this allocation is
    /// invalidated.
    pub fn set_count(&mut self, count: usize) -> Result<(), Error> {
        let mode = self.cursor.mode();
        let origin = self.cursor.origin().as_ptr();
        let storage = self.storage.as_mut().ok_or(Error::UseAfterFree(origin))?;

        let mut resized = vec![0u8; count * T::SIZE];
        let preserved = storage.len().min(resized.len());
        resized[..preserved].copy_from_slice(&storage[..preserved]);
        *storage = resized;

        self.cursor = BoundedPointer::new(Self::origin_of(storage), count, mode);
        Ok(())
    }

    /// Release the storage.  Freeing twice is an error, since it
    /// indicates the caller lost track of the allocation's lifetime.
    pub fn free(&mut self) -> Result<(), Error> {
        match self.storage.take() {
            Some(_) => Ok(()),
            None => Err(Error::UseAfterFree(self.cursor.origin().as_ptr())),
        }
    }

    /// Copy of every element, in order.
    pub fn to_vec(&self) -> Result<Vec<T>, T::Error> {
        let mem = self.memory()?;
        let mem: &dyn MemoryAccess = &mem;
        self.cursor.iter(mem).collect()
    }
}
