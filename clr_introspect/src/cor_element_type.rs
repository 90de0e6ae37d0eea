use memory_reader::Pointer;

use crate::Error;

/// Primitive types with a fixed size and no managed references.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PrimType {
    Bool,
    Char,

    U8,
    U16,
    U32,
    U64,
    NativeUInt,

    I8,
    I16,
    I32,
    I64,
    NativeInt,

    F32,
    F64,

    Ptr,
}

impl PrimType {
    pub fn size_bytes(&self) -> usize {
        match self {
            PrimType::Bool | PrimType::U8 | PrimType::I8 => 1,
            PrimType::Char | PrimType::U16 | PrimType::I16 => 2,
            PrimType::U32 | PrimType::I32 | PrimType::F32 => 4,
            PrimType::U64 | PrimType::I64 | PrimType::F64 => 8,
            PrimType::NativeUInt | PrimType::NativeInt | PrimType::Ptr => {
                Pointer::SIZE
            }
        }
    }
}

/// Element type tag of a field or type, as used by the runtime's
/// `CorElementType`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CorElementType {
    End,
    Void,
    Prim(PrimType),
    String,
    ByRef,
    ValueType,
    Class,
    Var,
    Array,
    GenericInst,
    TypedByRef,
    FunctionPtr,
    Object,
    SizeArray,
    MethodType,
    RequiredCModifier,
    OptionalCModifier,
    Internal,
    Modifier,
    Sentinel,
    Pinned,
}

impl CorElementType {
    /// True for types whose values are references into the GC heap.
    pub fn is_object_reference(&self) -> bool {
        matches!(
            self,
            Self::String
                | Self::Class
                | Self::Array
                | Self::Object
                | Self::SizeArray
                | Self::GenericInst
                | Self::Var
        )
    }

    pub fn is_ptr(&self) -> bool {
        matches!(self, Self::Prim(PrimType::Ptr) | Self::FunctionPtr)
    }

    /// Size of a field of this type, where it does not depend on
    /// the type's definition.
    pub fn field_size(&self) -> Option<usize> {
        match self {
            Self::Prim(prim) => Some(prim.size_bytes()),
            ty if ty.is_object_reference() || ty.is_ptr() => Some(Pointer::SIZE),
            _ => None,
        }
    }
}

impl std::fmt::Display for CorElementType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Prim(prim) => write!(f, "{prim:?}"),
            other => write!(f, "{other:?}"),
        }
    }
}

impl TryFrom<u8> for CorElementType {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x00 => Ok(Self::End),
            0x01 => Ok(Self::Void),
            0x02 => Ok(Self::Prim(PrimType::Bool)),
            0x03 => Ok(Self::Prim(PrimType::Char)),
            0x04 => Ok(Self::Prim(PrimType::I8)),
            0x05 => Ok(Self::Prim(PrimType::U8)),
            0x06 => Ok(Self::Prim(PrimType::I16)),
            0x07 => Ok(Self::Prim(PrimType::U16)),
            0x08 => Ok(Self::Prim(PrimType::I32)),
            0x09 => Ok(Self::Prim(PrimType::U32)),
            0x0a => Ok(Self::Prim(PrimType::I64)),
            0x0b => Ok(Self::Prim(PrimType::U64)),
            0x0c => Ok(Self::Prim(PrimType::F32)),
            0x0d => Ok(Self::Prim(PrimType::F64)),
            0x0e => Ok(Self::String),
            0x0f => Ok(Self::Prim(PrimType::Ptr)),
            0x10 => Ok(Self::ByRef),
            0x11 => Ok(Self::ValueType),
            0x12 => Ok(Self::Class),
            0x13 => Ok(Self::Var),
            0x14 => Ok(Self::Array),
            0x15 => Ok(Self::GenericInst),
            0x16 => Ok(Self::TypedByRef),
            0x18 => Ok(Self::Prim(PrimType::NativeInt)),
            0x19 => Ok(Self::Prim(PrimType::NativeUInt)),
            0x1b => Ok(Self::FunctionPtr),
            0x1c => Ok(Self::Object),
            0x1d => Ok(Self::SizeArray),
            0x1e => Ok(Self::MethodType),
            0x1f => Ok(Self::RequiredCModifier),
            0x20 => Ok(Self::OptionalCModifier),
            0x21 => Ok(Self::Internal),
            0x40 => Ok(Self::Modifier),
            0x41 => Ok(Self::Sentinel),
            0x45 => Ok(Self::Pinned),
            value => Err(Error::InvalidRuntimeType(value)),
        }
    }
}
