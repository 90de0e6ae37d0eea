use std::ops::{Deref, Range};

use crate::{ByteRange, NormalizeOffset, NormalizeRange, Pointer};

/// Bytes copied out of a target address space, together with the
/// address they were copied from.
#[derive(Clone)]
pub struct OwnedBytes {
    start: Pointer,
    bytes: Vec<u8>,
}

impl OwnedBytes {
    pub fn new(start: Pointer, bytes: Vec<u8>) -> Self {
        Self { start, bytes }
    }

    pub fn ptr_range(&self) -> Range<Pointer> {
        self.start..self.end()
    }

    pub fn as_range(&self) -> ByteRange<'_> {
        self.into()
    }

    pub fn subrange(&self, range: impl NormalizeRange) -> ByteRange<'_> {
        self.as_range().subrange(range)
    }

    pub fn get_subrange(
        &self,
        range: impl NormalizeRange,
    ) -> Option<ByteRange<'_>> {
        self.as_range().get_subrange(range)
    }

    pub fn start(&self) -> Pointer {
        self.start
    }

    pub fn end(&self) -> Pointer {
        self.start + self.bytes.len()
    }

    pub fn take(self) -> Vec<u8> {
        self.bytes
    }
}

impl<'a> From<&'a OwnedBytes> for ByteRange<'a> {
    fn from(val: &'a OwnedBytes) -> Self {
        ByteRange::new(val.start, &val.bytes)
    }
}

impl From<&OwnedBytes> for Range<Pointer> {
    fn from(val: &OwnedBytes) -> Self {
        val.ptr_range()
    }
}

impl Deref for OwnedBytes {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        &self.bytes
    }
}

impl<T: NormalizeOffset> std::ops::Index<T> for OwnedBytes {
    type Output = u8;

    fn index(&self, index: T) -> &Self::Output {
        &self.bytes[index.as_offset(self.start)]
    }
}
