use std::fmt::{Debug, Display};

use crate::Error;

/// A single machine word holding an address, either in the current
/// process or in a remote one.
///
/// `Pointer` never owns what it points to, and carries no provenance.
/// Whether the address is mapped, aligned, or refers to the structure
/// the caller believes it does is the caller's responsibility.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(transparent)]
pub struct Pointer {
    pub(crate) address: usize,
}

impl std::cmp::PartialOrd for Pointer {
    #[inline]
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl std::cmp::Ord for Pointer {
    #[inline]
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.address.cmp(&other.address)
    }
}

impl Pointer {
    pub const SIZE: usize = std::mem::size_of::<Self>();

    #[inline]
    pub fn new(address: impl Into<Self>) -> Self {
        address.into()
    }

    #[inline]
    pub fn as_usize(self) -> usize {
        self.address
    }

    #[inline]
    pub fn as_non_null(self) -> Option<Self> {
        if self.is_null() {
            None
        } else {
            Some(self)
        }
    }

    #[inline]
    pub fn null() -> Self {
        Self { address: 0 }
    }

    #[inline]
    pub fn is_null(&self) -> bool {
        self.address == 0
    }

    #[inline]
    pub fn is_aligned(&self, alignment: usize) -> bool {
        self.address % alignment == 0
    }

    #[inline]
    pub fn as_aligned(self, alignment: usize) -> Option<Self> {
        self.is_aligned(alignment).then_some(self)
    }

    #[inline]
    pub fn prev_multiple_of(self, alignment: usize) -> Self {
        let aligned = (self.address / alignment) * alignment;
        aligned.into()
    }

    #[inline]
    pub fn next_multiple_of(self, alignment: usize) -> Self {
        self.address.next_multiple_of(alignment).into()
    }

    /// The low bits of the address, selected by `mask`.  Used to
    /// recover tags stored in the spare bits of aligned pointers.
    #[inline]
    pub fn low_bits(self, mask: usize) -> usize {
        self.address & mask
    }

    #[inline]
    pub fn checked_add(self, rhs: usize) -> Option<Self> {
        self.address
            .checked_add(rhs)
            .map(|address| Self { address })
    }

    #[inline]
    pub fn checked_sub(self, rhs: usize) -> Option<Self> {
        self.address
            .checked_sub(rhs)
            .map(|address| Self { address })
    }

    /// Apply a signed byte offset, returning `None` on wraparound.
    #[inline]
    pub fn checked_offset(self, offset: isize) -> Option<Self> {
        self.address
            .checked_add_signed(offset)
            .map(|address| Self { address })
    }

    #[inline]
    pub fn try_add(self, offset: usize) -> Result<Self, Error> {
        self.checked_add(offset)
            .ok_or(Error::PointerOverflow(self, offset as isize))
    }

    #[inline]
    pub fn try_sub(self, offset: usize) -> Result<Self, Error> {
        self.checked_sub(offset)
            .ok_or(Error::PointerOverflow(self, (offset as isize).wrapping_neg()))
    }

    #[inline]
    pub fn try_offset(self, offset: isize) -> Result<Self, Error> {
        self.checked_offset(offset)
            .ok_or(Error::PointerOverflow(self, offset))
    }

    /// Signed distance in bytes from `origin` to `self`.
    #[inline]
    pub fn signed_distance_from(self, origin: Pointer) -> isize {
        self.address.wrapping_sub(origin.address) as isize
    }
}

impl std::ops::Add<usize> for Pointer {
    type Output = Pointer;

    #[inline]
    fn add(self, rhs: usize) -> Self::Output {
        Self {
            address: self.address + rhs,
        }
    }
}

impl std::ops::Sub<usize> for Pointer {
    type Output = Pointer;

    #[inline]
    fn sub(self, rhs: usize) -> Self::Output {
        Self {
            address: self.address - rhs,
        }
    }
}

impl std::ops::Sub for Pointer {
    type Output = usize;

    #[inline]
    fn sub(self, rhs: Self) -> Self::Output {
        self.address - rhs.address
    }
}

/// Frequently, flags are stored in the low bits of pointers.  This
/// overload exists to allow them to be masked out.
impl std::ops::BitAnd<usize> for Pointer {
    type Output = Pointer;

    fn bitand(self, mask: usize) -> Self::Output {
        (self.address & mask).into()
    }
}

impl Debug for Pointer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Pointer(0x{:016x})", self.address)
    }
}

impl Display for Pointer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "0x{:016x}", self.address)
    }
}

impl From<usize> for Pointer {
    #[inline]
    fn from(address: usize) -> Self {
        Self { address }
    }
}

impl From<Pointer> for usize {
    #[inline]
    fn from(ptr: Pointer) -> Self {
        ptr.address
    }
}

impl<T> From<*const T> for Pointer {
    #[inline]
    fn from(ptr: *const T) -> Self {
        Self {
            address: ptr as usize,
        }
    }
}

impl<T> From<*mut T> for Pointer {
    #[inline]
    fn from(ptr: *mut T) -> Self {
        Self {
            address: ptr as usize,
        }
    }
}

impl From<[u8; Pointer::SIZE]> for Pointer {
    #[inline]
    fn from(bytes: [u8; Pointer::SIZE]) -> Self {
        let address = usize::from_ne_bytes(bytes);
        Self { address }
    }
}

impl TryFrom<&[u8]> for Pointer {
    type Error = std::array::TryFromSliceError;

    #[inline]
    fn try_from(bytes: &[u8]) -> std::result::Result<Self, Self::Error> {
        let address = usize::from_ne_bytes(bytes.try_into()?);
        Ok(Self { address })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn pointer_is_one_word() {
        assert_eq!(std::mem::size_of::<Pointer>(), std::mem::size_of::<usize>());
        assert_eq!(
            std::mem::align_of::<Pointer>(),
            std::mem::align_of::<usize>()
        );
    }

    #[test]
    fn signed_offsets() {
        let ptr = Pointer::new(0x1000usize);
        assert_eq!(ptr.checked_offset(-0x10), Some(Pointer::new(0xff0usize)));
        assert_eq!(ptr.checked_offset(0x10), Some(Pointer::new(0x1010usize)));
        assert_eq!(Pointer::new(4usize).checked_offset(-8), None);
        assert_eq!(Pointer::new(0xff0usize).signed_distance_from(ptr), -0x10);
    }

    #[test]
    fn checked_subtraction() -> Result<(), Error> {
        assert_eq!(Pointer::new(0x10usize).try_sub(8)?, Pointer::new(8usize));
        assert!(matches!(
            Pointer::new(4usize).try_sub(8),
            Err(Error::PointerOverflow(_, -8))
        ));
        Ok(())
    }

    #[test]
    fn tag_bits() {
        let ptr = Pointer::new(0x1002usize);
        assert_eq!(ptr.low_bits(3), 2);
        assert_eq!(ptr & !3usize, Pointer::new(0x1000usize));
    }

    #[test]
    fn formatting() {
        let ptr = Pointer::new(0xabcusize);
        assert_eq!(format!("{ptr}"), "0x0000000000000abc");
        assert_eq!(format!("{ptr:?}"), "Pointer(0x0000000000000abc)");
    }
}
