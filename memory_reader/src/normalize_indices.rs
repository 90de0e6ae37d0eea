use std::ops::{Range, RangeFrom, RangeFull, RangeTo};

use crate::Pointer;

/// A location within a buffer, expressed either as a byte offset
/// from the start of the buffer or as an absolute address.
pub trait NormalizeOffset: Copy {
    fn as_offset(self, start: Pointer) -> usize;
    fn as_ptr(self, start: Pointer) -> Pointer;
}

impl NormalizeOffset for usize {
    fn as_offset(self, _start: Pointer) -> usize {
        self
    }

    fn as_ptr(self, start: Pointer) -> Pointer {
        start + self
    }
}

impl NormalizeOffset for Pointer {
    fn as_offset(self, start: Pointer) -> usize {
        self - start
    }

    fn as_ptr(self, _start: Pointer) -> Pointer {
        self
    }
}

/// A range within a buffer, whose endpoints may be offsets or
/// addresses.  Open endpoints extend to the edge of the buffer.
pub trait NormalizeRange: Sized {
    type Index: NormalizeOffset;

    fn endpoints(self) -> (Option<Self::Index>, Option<Self::Index>);

    fn as_offset(self, buf_range: Range<Pointer>) -> Range<usize> {
        let (start, end) = self.endpoints();
        let start = start.map_or(0, |start| start.as_offset(buf_range.start));
        let end = end.map_or(buf_range.end - buf_range.start, |end| {
            end.as_offset(buf_range.start)
        });
        start..end
    }

    fn as_ptr(self, buf_range: Range<Pointer>) -> Range<Pointer> {
        let (start, end) = self.endpoints();
        let start = start.map_or(buf_range.start, |start| start.as_ptr(buf_range.start));
        let end = end.map_or(buf_range.end, |end| end.as_ptr(buf_range.start));
        start..end
    }
}

impl<T: NormalizeOffset> NormalizeRange for Range<T> {
    type Index = T;
    fn endpoints(self) -> (Option<T>, Option<T>) {
        (Some(self.start), Some(self.end))
    }
}

impl<T: NormalizeOffset> NormalizeRange for RangeFrom<T> {
    type Index = T;
    fn endpoints(self) -> (Option<T>, Option<T>) {
        (Some(self.start), None)
    }
}

impl<T: NormalizeOffset> NormalizeRange for RangeTo<T> {
    type Index = T;
    fn endpoints(self) -> (Option<T>, Option<T>) {
        (None, Some(self.end))
    }
}

impl NormalizeRange for RangeFull {
    type Index = usize;
    fn endpoints(self) -> (Option<usize>, Option<usize>) {
        (None, None)
    }
}
