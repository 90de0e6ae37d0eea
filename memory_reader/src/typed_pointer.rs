use std::marker::PhantomData;

use crate::{ByteRange, Error, MemoryAccess, Pointer, UnpackBytes};

/// A [`Pointer`] annotated with the type it points to.
///
/// Like `Pointer`, this is a single machine word with no ownership
/// and no validity checks.  Element-wise arithmetic uses the size of
/// `T` in the target address space, [`ReadTypedPointer::SIZE`], which
/// need not match the size of the Rust type used to decode it.
#[repr(transparent)]
pub struct TypedPointer<T> {
    ptr: Pointer,
    _phantom: PhantomData<T>,
}

/// A type that can be decoded from a location in a target address
/// space.
pub trait ReadTypedPointer: Sized {
    /// Number of bytes occupied by one element in the target address
    /// space.
    const SIZE: usize;

    type Error: From<Error>;

    fn read_typed_ptr(
        ptr: Pointer,
        mem: &dyn MemoryAccess,
    ) -> Result<Self, Self::Error>;
}

/// A type that can be encoded into a location in a target address
/// space.
pub trait WriteTypedPointer: ReadTypedPointer {
    fn write_typed_ptr(
        &self,
        ptr: Pointer,
        mem: &dyn MemoryAccess,
    ) -> Result<(), Self::Error>;
}

/// Display modes for [`TypedPointer::format_with`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PointerFormat {
    /// The address as a decimal integer.
    Integer,
    /// The address in hexadecimal.
    Hex,
    /// The pointed-to value.
    Object,
    /// Hexadecimal address, followed by the pointed-to value.
    Both,
}

impl<T> TypedPointer<T> {
    #[inline]
    pub const fn new(ptr: Pointer) -> Self {
        Self {
            ptr,
            _phantom: PhantomData,
        }
    }

    #[inline]
    pub fn null() -> Self {
        Self::new(Pointer::null())
    }

    #[inline]
    pub fn as_ptr(&self) -> Pointer {
        self.ptr
    }

    #[inline]
    pub fn is_null(&self) -> bool {
        self.ptr.is_null()
    }

    /// Reinterpret the address as pointing to a `U`.
    #[inline]
    pub fn cast<U>(self) -> TypedPointer<U> {
        TypedPointer::new(self.ptr)
    }

    /// Pointer `bytes` bytes further along.  Wraps on overflow, as
    /// pointer arithmetic in the target process would.
    #[inline]
    pub fn add_bytes(self, bytes: usize) -> Self {
        Self::new(self.ptr.as_usize().wrapping_add(bytes).into())
    }

    #[inline]
    pub fn sub_bytes(self, bytes: usize) -> Self {
        Self::new(self.ptr.as_usize().wrapping_sub(bytes).into())
    }

    #[inline]
    pub fn offset_bytes(self, bytes: isize) -> Self {
        Self::new(self.ptr.as_usize().wrapping_add_signed(bytes).into())
    }
}

impl<T: ReadTypedPointer> TypedPointer<T> {
    /// Location of the element `index` elements away.
    #[inline]
    pub fn element(self, index: isize) -> Self {
        self.offset_bytes(index.wrapping_mul(T::SIZE as isize))
    }

    /// Advance by `n` elements.
    #[inline]
    pub fn increment(&mut self, n: usize) -> &mut Self {
        *self = self.add_bytes(n.wrapping_mul(T::SIZE));
        self
    }

    /// Retreat by `n` elements.
    #[inline]
    pub fn decrement(&mut self, n: usize) -> &mut Self {
        *self = self.sub_bytes(n.wrapping_mul(T::SIZE));
        self
    }

    pub fn read(&self, mem: &dyn MemoryAccess) -> Result<T, T::Error> {
        T::read_typed_ptr(self.ptr, mem)
    }

    pub fn read_at(
        &self,
        index: isize,
        mem: &dyn MemoryAccess,
    ) -> Result<T, T::Error> {
        T::read_typed_ptr(self.element(index).ptr, mem)
    }

    /// True if the pointer is null, or if every byte of the value it
    /// points to is zero.
    pub fn is_nil(&self, mem: &dyn MemoryAccess) -> Result<bool, Error> {
        if self.is_null() {
            return Ok(true);
        }
        let bytes = mem.read_bytes(self.ptr..self.ptr + T::SIZE)?;
        Ok(bytes.iter().all(|&byte| byte == 0))
    }

    pub fn format_with(
        &self,
        mode: PointerFormat,
        mem: &dyn MemoryAccess,
    ) -> Result<String, T::Error>
    where
        T: std::fmt::Display,
    {
        let formatted = match mode {
            PointerFormat::Integer => format!("{}", self.ptr.as_usize()),
            PointerFormat::Hex => format!("{}", self.ptr),
            PointerFormat::Object => format!("{}", self.read(mem)?),
            PointerFormat::Both => {
                format!("{} -> {}", self.ptr, self.read(mem)?)
            }
        };
        Ok(formatted)
    }
}

impl<T: WriteTypedPointer> TypedPointer<T> {
    pub fn write(
        &self,
        value: &T,
        mem: &dyn MemoryAccess,
    ) -> Result<(), T::Error> {
        value.write_typed_ptr(self.ptr, mem)
    }

    pub fn write_at(
        &self,
        index: isize,
        value: &T,
        mem: &dyn MemoryAccess,
    ) -> Result<(), T::Error> {
        value.write_typed_ptr(self.element(index).ptr, mem)
    }
}

macro_rules! scalar_typed_pointer {
    ($($prim:ty),* $(,)?) => {
        $(
            impl ReadTypedPointer for $prim {
                const SIZE: usize = std::mem::size_of::<$prim>();
                type Error = Error;

                fn read_typed_ptr(
                    ptr: Pointer,
                    mem: &dyn MemoryAccess,
                ) -> Result<Self, Self::Error> {
                    let bytes = mem.read_bytes(ptr..ptr + Self::SIZE)?;
                    bytes.as_range().unpack()
                }
            }

            impl WriteTypedPointer for $prim {
                fn write_typed_ptr(
                    &self,
                    ptr: Pointer,
                    mem: &dyn MemoryAccess,
                ) -> Result<(), Self::Error> {
                    mem.write_all(ptr, &self.to_le_bytes())
                }
            }
        )*
    };
}

scalar_typed_pointer! {u8, u16, u32, u64, u128, i8, i16, i32, i64, f32, f64, usize, isize}

impl ReadTypedPointer for bool {
    const SIZE: usize = 1;
    type Error = Error;

    fn read_typed_ptr(
        ptr: Pointer,
        mem: &dyn MemoryAccess,
    ) -> Result<Self, Self::Error> {
        Ok(u8::read_typed_ptr(ptr, mem)? > 0)
    }
}

impl WriteTypedPointer for bool {
    fn write_typed_ptr(
        &self,
        ptr: Pointer,
        mem: &dyn MemoryAccess,
    ) -> Result<(), Self::Error> {
        mem.write_all(ptr, &[*self as u8])
    }
}

impl ReadTypedPointer for Pointer {
    const SIZE: usize = std::mem::size_of::<usize>();
    type Error = Error;

    fn read_typed_ptr(
        ptr: Pointer,
        mem: &dyn MemoryAccess,
    ) -> Result<Self, Self::Error> {
        Ok(usize::read_typed_ptr(ptr, mem)?.into())
    }
}

impl WriteTypedPointer for Pointer {
    fn write_typed_ptr(
        &self,
        ptr: Pointer,
        mem: &dyn MemoryAccess,
    ) -> Result<(), Self::Error> {
        self.as_usize().write_typed_ptr(ptr, mem)
    }
}

impl<U> ReadTypedPointer for TypedPointer<U> {
    const SIZE: usize = std::mem::size_of::<usize>();
    type Error = Error;

    fn read_typed_ptr(
        ptr: Pointer,
        mem: &dyn MemoryAccess,
    ) -> Result<Self, Self::Error> {
        Ok(Pointer::read_typed_ptr(ptr, mem)?.into())
    }
}

impl<U> WriteTypedPointer for TypedPointer<U> {
    fn write_typed_ptr(
        &self,
        ptr: Pointer,
        mem: &dyn MemoryAccess,
    ) -> Result<(), Self::Error> {
        self.ptr.write_typed_ptr(ptr, mem)
    }
}

impl<T> std::fmt::Debug for TypedPointer<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TypedPointer")
            .field("ptr", &self.ptr)
            .finish()
    }
}

impl<T> std::fmt::Display for TypedPointer<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.ptr)
    }
}

impl<T> std::ops::Deref for TypedPointer<T> {
    type Target = Pointer;

    fn deref(&self) -> &Self::Target {
        &self.ptr
    }
}

impl<T> Clone for TypedPointer<T> {
    fn clone(&self) -> Self {
        *self
    }
}
impl<T> Copy for TypedPointer<T> {}

impl<T> PartialEq for TypedPointer<T> {
    fn eq(&self, other: &Self) -> bool {
        self.ptr == other.ptr
    }
}
impl<T> Eq for TypedPointer<T> {}
impl<T> PartialEq<Pointer> for TypedPointer<T> {
    fn eq(&self, other: &Pointer) -> bool {
        self.ptr == *other
    }
}
impl<T> PartialEq<TypedPointer<T>> for Pointer {
    fn eq(&self, other: &TypedPointer<T>) -> bool {
        *self == other.ptr
    }
}

impl<T> PartialOrd for TypedPointer<T> {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}
impl<T> Ord for TypedPointer<T> {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.ptr.cmp(&other.ptr)
    }
}

impl<T> std::hash::Hash for TypedPointer<T> {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.ptr.hash(state);
    }
}

impl<T> From<Pointer> for TypedPointer<T> {
    fn from(ptr: Pointer) -> Self {
        Self::new(ptr)
    }
}

impl<T> From<TypedPointer<T>> for Pointer {
    fn from(ptr: TypedPointer<T>) -> Pointer {
        ptr.ptr
    }
}

impl<'a, T> UnpackBytes<'a> for TypedPointer<T> {
    type Error = <Pointer as UnpackBytes<'a>>::Error;

    fn unpack(bytes: ByteRange<'a>) -> Result<Self, Self::Error> {
        let ptr: Pointer = bytes.unpack()?;
        Ok(ptr.into())
    }
}
