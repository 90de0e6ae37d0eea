use std::ops::Range;

use crate::{Error, NormalizeOffset, NormalizeRange, Pointer};

/// A borrowed view of bytes that were copied out of a target address
/// space, remembering the address they were copied from.
#[derive(Clone, Copy)]
pub struct ByteRange<'a> {
    pub(crate) start: Pointer,
    pub(crate) bytes: &'a [u8],
}

/// Decode a value from little-endian bytes.
pub trait UnpackBytes<'a>: Sized {
    type Error;
    fn unpack(bytes: ByteRange<'a>) -> Result<Self, Self::Error>;
}

impl<'a> ByteRange<'a> {
    pub fn new(start: Pointer, bytes: &'a [u8]) -> Self {
        Self { start, bytes }
    }

    pub fn null() -> Self {
        Self {
            start: Pointer::null(),
            bytes: &[],
        }
    }

    pub fn ptr_range(&self) -> Range<Pointer> {
        self.start..self.end()
    }

    pub fn bytes(&self) -> &'a [u8] {
        self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn start(&self) -> Pointer {
        self.start
    }

    pub fn end(&self) -> Pointer {
        self.start + self.bytes.len()
    }

    pub fn unpack<T>(&self) -> Result<T, T::Error>
    where
        T: UnpackBytes<'a>,
    {
        T::unpack(*self)
    }

    pub fn contains_range(&self, range: impl NormalizeRange) -> bool {
        let range = range.as_offset(self.ptr_range());
        range.start <= range.end && range.end <= self.bytes.len()
    }

    /// Sub-view of the bytes.  Panics if the range lies outside of
    /// the view, as with slice indexing.
    pub fn subrange(&self, range: impl NormalizeRange) -> Self {
        let range = range.as_offset(self.ptr_range());
        Self {
            start: self.start + range.start,
            bytes: &self.bytes[range],
        }
    }

    /// Sub-view of the bytes, or `None` if the range lies outside of
    /// the view.
    pub fn get_subrange(&self, range: impl NormalizeRange) -> Option<Self> {
        let range = range.as_offset(self.ptr_range());
        let bytes = self.bytes.get(range.clone())?;
        Some(Self {
            start: self.start + range.start,
            bytes,
        })
    }

    pub fn address_range(&self, range: impl NormalizeRange) -> Range<Pointer> {
        range.as_ptr(self.ptr_range())
    }

    pub fn is_all_zero(&self) -> bool {
        self.bytes.iter().all(|&byte| byte == 0)
    }
}

impl<'a> From<ByteRange<'a>> for Range<Pointer> {
    fn from(val: ByteRange<'a>) -> Self {
        val.ptr_range()
    }
}

impl<'a> From<ByteRange<'a>> for &'a [u8] {
    fn from(val: ByteRange<'a>) -> Self {
        val.bytes
    }
}

impl<'a, T: NormalizeOffset> std::ops::Index<T> for ByteRange<'a> {
    type Output = u8;

    fn index(&self, index: T) -> &Self::Output {
        &self.bytes[index.as_offset(self.start)]
    }
}

fn fixed_bytes<const N: usize>(bytes: ByteRange) -> Result<[u8; N], Error> {
    bytes.bytes.try_into().map_err(|_| Error::UnexpectedByteCount {
        expected: N,
        provided: bytes.len(),
    })
}

macro_rules! from_bytes_prim {
    ($($prim:ident),* $(,)?) => {
        $(
            impl<'a> UnpackBytes<'a> for $prim {
                type Error = Error;
                fn unpack(bytes: ByteRange<'a>) -> Result<Self, Self::Error> {
                    Ok($prim::from_le_bytes(fixed_bytes(bytes)?))
                }
            }
        )*
    };
}

from_bytes_prim! {u8, u16, u32, u64, u128, i8, i16, i32, i64, f32, f64, usize, isize}

impl<'a> UnpackBytes<'a> for bool {
    type Error = Error;
    fn unpack(bytes: ByteRange<'a>) -> Result<Self, Self::Error> {
        let byte: u8 = bytes.unpack()?;
        Ok(byte > 0)
    }
}

impl<'a> UnpackBytes<'a> for Pointer {
    type Error = Error;
    fn unpack(bytes: ByteRange<'a>) -> Result<Self, Self::Error> {
        let arr: [u8; Pointer::SIZE] = fixed_bytes(bytes)?;
        Ok(usize::from_le_bytes(arr).into())
    }
}

impl<'a, const N: usize> UnpackBytes<'a> for [u8; N] {
    type Error = Error;
    fn unpack(bytes: ByteRange<'a>) -> Result<Self, Self::Error> {
        fixed_bytes(bytes)
    }
}
