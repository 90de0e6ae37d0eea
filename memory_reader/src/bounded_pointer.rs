use std::ops::RangeInclusive;

use crate::{
    Error, MemoryAccess, Pointer, ReadTypedPointer, TypedPointer,
    WriteTypedPointer,
};

/// How a [`BoundedPointer`] reacts to stepping off either end of its
/// region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BoundsMode {
    /// Any step outside of the region is an error.
    #[default]
    Strict,

    /// A step exactly one element past either end is accepted, and
    /// the pointer keeps referring to the boundary element.  Stepping
    /// a second element past is an error.  Stepping back in from the
    /// one-past position returns to the boundary element.
    ///
    /// This suits `do { ... } while (p++ != end)` style loops, but
    /// means that `current()` alone cannot distinguish "at the last
    /// element" from "one past the last element"; see
    /// [`BoundedPointer::is_past_end`].
    LoopTolerant,
}

/// A typed cursor over `count` contiguous elements starting at
/// `origin`.
///
/// Invariant: the element returned by [`Self::current`] always lies
/// within `[origin, origin + (count - 1) * T::SIZE]`.
pub struct BoundedPointer<T> {
    origin: TypedPointer<T>,
    count: usize,
    /// Logical offset from `origin`, in elements.  Only
    /// `BoundsMode::LoopTolerant` allows this to reach `-1` or
    /// `count`.
    offset: isize,
    mode: BoundsMode,
}

impl<T> Clone for BoundedPointer<T> {
    fn clone(&self) -> Self {
        *self
    }
}
impl<T> Copy for BoundedPointer<T> {}

impl<T> std::fmt::Debug for BoundedPointer<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoundedPointer")
            .field("origin", &self.origin.as_ptr())
            .field("count", &self.count)
            .field("offset", &self.offset)
            .field("mode", &self.mode)
            .finish()
    }
}

impl<T: ReadTypedPointer> BoundedPointer<T> {
    pub fn new(origin: TypedPointer<T>, count: usize, mode: BoundsMode) -> Self {
        Self {
            origin,
            count,
            offset: 0,
            mode,
        }
    }

    pub fn strict(origin: TypedPointer<T>, count: usize) -> Self {
        Self::new(origin, count, BoundsMode::Strict)
    }

    pub fn loop_tolerant(origin: TypedPointer<T>, count: usize) -> Self {
        Self::new(origin, count, BoundsMode::LoopTolerant)
    }

    pub fn origin(&self) -> TypedPointer<T> {
        self.origin
    }

    pub fn count(&self) -> usize {
        self.count
    }

    pub fn mode(&self) -> BoundsMode {
        self.mode
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    fn last_offset(&self) -> isize {
        self.count as isize - 1
    }

    /// Offset of the current element from the origin, in elements.
    pub fn offset(&self) -> isize {
        self.offset.clamp(0, self.last_offset().max(0))
    }

    /// True if the logical position is one element beyond the last
    /// element.  Only possible in `BoundsMode::LoopTolerant`.
    pub fn is_past_end(&self) -> bool {
        self.offset > self.last_offset()
    }

    /// True if the logical position is one element before the first
    /// element.  Only possible in `BoundsMode::LoopTolerant`.
    pub fn is_before_start(&self) -> bool {
        self.offset < 0
    }

    pub fn current(&self) -> TypedPointer<T> {
        self.origin.element(self.offset())
    }

    pub fn first(&self) -> TypedPointer<T> {
        self.origin
    }

    pub fn last(&self) -> TypedPointer<T> {
        self.origin.element(self.last_offset().max(0))
    }

    /// Indices accepted by [`Self::get`] and [`Self::set`], relative
    /// to the current element.
    pub fn index_range(&self) -> RangeInclusive<isize> {
        let start = -self.offset();
        let end = start + self.last_offset();
        start..=end
    }

    /// Location of the element `index` elements from the current one.
    pub fn element(&self, index: isize) -> Result<TypedPointer<T>, Error> {
        let valid = self.index_range();
        if self.is_empty() || !valid.contains(&index) {
            return Err(Error::IndexOutOfBounds { index, valid });
        }
        Ok(self.current().element(index))
    }

    pub fn get(
        &self,
        index: isize,
        mem: &dyn MemoryAccess,
    ) -> Result<T, T::Error> {
        self.element(index)?.read(mem)
    }

    pub fn read(&self, mem: &dyn MemoryAccess) -> Result<T, T::Error> {
        self.get(0, mem)
    }

    pub fn set(
        &self,
        index: isize,
        value: &T,
        mem: &dyn MemoryAccess,
    ) -> Result<(), T::Error>
    where
        T: WriteTypedPointer,
    {
        self.element(index)?.write(value, mem)
    }

    /// Move by `delta` elements, subject to the bounds mode.  On
    /// error, the position is unchanged.
    pub fn step(&mut self, delta: isize) -> Result<(), Error> {
        let target = self.offset + delta;
        let (min, max) = match self.mode {
            BoundsMode::Strict => (0, self.last_offset()),
            BoundsMode::LoopTolerant => (-1, self.count as isize),
        };

        if self.is_empty() || target < min || target > max {
            return Err(Error::PointerOutOfBounds {
                attempted: self.origin.element(target).as_ptr(),
                first: self.first().as_ptr(),
                last: self.last().as_ptr(),
            });
        }

        self.offset = target;
        Ok(())
    }

    pub fn increment(&mut self) -> Result<(), Error> {
        self.step(1)
    }

    pub fn decrement(&mut self) -> Result<(), Error> {
        self.step(-1)
    }

    /// Return to the first element.
    pub fn reset(&mut self) {
        self.offset = 0;
    }

    /// Every element of the region, in order from the origin.
    pub fn iter<'a>(
        &self,
        mem: &'a dyn MemoryAccess,
    ) -> impl Iterator<Item = Result<T, T::Error>> + 'a
    where
        T: 'a,
    {
        let origin = self.origin;
        (0..self.count as isize).map(move |i| origin.read_at(i, mem))
    }

    pub fn contains(&self, ptr: Pointer) -> bool {
        !self.is_empty()
            && self.first().as_ptr() <= ptr
            && ptr < self.last().as_ptr() + T::SIZE
    }
}
