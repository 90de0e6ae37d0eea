use std::ops::Range;

use bitflags::bitflags;
use memory_reader::{
    MemoryAccess, OwnedBytes, Pointer, ReadTypedPointer, TypedPointer,
};

use crate::{
    unpack_fields, BitField, EEClass, Error, FieldDescription,
    FieldDescriptions, MethodDescChunk,
};

/// The runtime's per-type header, pointed to by the first word of
/// every object.
///
/// Not `Clone`: the vtable indirections that follow the fixed record
/// are located relative to the address the record was read from.
pub struct MethodTable {
    bytes: OwnedBytes,
}

bitflags! {
    /// Flags in the high half of the first word.  The low half holds
    /// either the component size or further flags, see
    /// [`MethodTable::HAS_COMPONENT_SIZE`].
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct MethodTableFlags: u32 {
        const HAS_FINALIZER = 0x0010_0000;
        const CONTAINS_POINTERS = 0x0100_0000;
        const HAS_TYPE_EQUIVALENCE = 0x0200_0000;
        const IS_HFA = 0x0800_0000;
        const IS_BYREF_LIKE = 0x1000_0000;
        const HAS_COMPONENT_SIZE = 0x8000_0000;
    }
}

/// The kind of type, from bits 16-19 of the flags word.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TypeCategory {
    Class,
    ValueType,
    Nullable,
    PrimitiveValueType,
    TruePrimitive,
    Array,
    SzArray,
    Interface,
    Unknown(u32),
}

impl TypeCategory {
    pub fn from_raw(raw: u32) -> Self {
        match raw {
            0x0 => Self::Class,
            0x4 => Self::ValueType,
            0x5 => Self::Nullable,
            0x6 => Self::PrimitiveValueType,
            0x7 => Self::TruePrimitive,
            0x8 => Self::Array,
            0xA => Self::SzArray,
            0xC => Self::Interface,
            other => Self::Unknown(other),
        }
    }

    pub fn is_value_type(&self) -> bool {
        matches!(
            self,
            Self::ValueType
                | Self::Nullable
                | Self::PrimitiveValueType
                | Self::TruePrimitive
        )
    }
}

/// The decoded class-info union of a [`MethodTable`].
///
/// The runtime stores either a pointer to the type's [`EEClass`], or
/// a pointer to the canonical `MethodTable` of a generic
/// instantiation, and uses the two low bits of the pointer to tell
/// them apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EEClassOrCanonical {
    EEClass(TypedPointer<EEClass>),
    Canonical(TypedPointer<MethodTable>),
}

impl EEClassOrCanonical {
    pub const TAG: BitField = BitField::new(0, 2);
    pub const TAG_EE_CLASS: usize = 0;
    pub const TAG_INVALID: usize = 1;
    pub const TAG_CANONICAL: usize = 2;
    pub const TAG_INDIRECTION: usize = 3;

    /// Decode the union stored at `method_table`.  The tag is
    /// resolved here and nowhere else; tags other than the EEClass
    /// and canonical tags are rejected rather than guessed at.
    pub fn decode(method_table: Pointer, raw: Pointer) -> Result<Self, Error> {
        let tag = Self::TAG.decode(raw.as_usize() as u64) as usize;
        match tag {
            Self::TAG_EE_CLASS => Ok(Self::EEClass(raw.into())),
            Self::TAG_CANONICAL => Ok(Self::Canonical((raw - tag).into())),
            _ => Err(Error::UnsupportedTypeUnion {
                method_table,
                raw,
                tag,
            }),
        }
    }
}

impl MethodTable {
    pub const SIZE: usize = 64;

    pub const COMPONENT_SIZE: BitField = BitField::new(0, 16);
    pub const HAS_COMPONENT_SIZE: BitField = BitField::flag(31);
    pub const TYPE_CATEGORY: BitField = BitField::new(16, 4);

    /// Slots per vtable chunk.  The fixed record is followed by one
    /// pointer per chunk.
    pub const VTABLE_SLOTS_PER_CHUNK: usize = 8;

    unpack_fields! {
        flags: {u32, 0..4},
        raw_base_size: {u32, 4..8},
        flags_2: {u16, 8..10},
        raw_token: {u16, 10..12},
        num_virtuals: {u16, 12..14},
        num_interfaces: {u16, 14..16},
        parent_method_table: {TypedPointer<MethodTable>, 16..24},
        module: {Pointer, 24..32},
        writable_data: {Pointer, 32..40},
        ee_class_or_canonical_table: {Pointer, 40..48},
        element_type_handle: {TypedPointer<MethodTable>, 48..56},
        interface_map: {Pointer, 56..64},
    }

    pub fn read(ptr: Pointer, mem: &dyn MemoryAccess) -> Result<Self, Error> {
        let bytes = mem.read_bytes(ptr..ptr + Self::SIZE)?;
        Ok(Self { bytes })
    }

    pub fn from_bytes(bytes: OwnedBytes) -> Self {
        Self { bytes }
    }

    pub fn ptr(&self) -> TypedPointer<Self> {
        self.bytes.start().into()
    }

    pub fn ptr_range(&self) -> Range<Pointer> {
        (&self.bytes).into()
    }

    pub fn base_size(&self) -> Result<usize, Error> {
        Ok(self.raw_base_size()? as usize)
    }

    pub fn type_flags(&self) -> Result<MethodTableFlags, Error> {
        Ok(MethodTableFlags::from_bits_truncate(self.flags()?))
    }

    pub fn has_finalizer(&self) -> Result<bool, Error> {
        Ok(self.type_flags()?.contains(MethodTableFlags::HAS_FINALIZER))
    }

    pub fn has_dynamic_statics(&self) -> Result<bool, Error> {
        Ok(self.flags_2()? & 0x0002 > 0)
    }

    /// Size of each element of an array or string, or zero for types
    /// without elements.
    pub fn component_size(&self) -> Result<usize, Error> {
        let flags = self.flags()? as u64;
        let size = if Self::HAS_COMPONENT_SIZE.is_set(flags) {
            Self::COMPONENT_SIZE.decode(flags)
        } else {
            0
        };
        Ok(size as usize)
    }

    pub fn category(&self) -> Result<TypeCategory, Error> {
        let raw = Self::TYPE_CATEGORY.decode(self.flags()? as u64);
        Ok(TypeCategory::from_raw(raw as u32))
    }

    pub fn is_array(&self) -> Result<bool, Error> {
        Ok(matches!(
            self.category()?,
            TypeCategory::Array | TypeCategory::SzArray
        ))
    }

    pub fn is_string(&self) -> Result<bool, Error> {
        Ok(matches!(self.category()?, TypeCategory::Class)
            && self.component_size()? == 2)
    }

    /// The metadata token of the type definition, if the type has
    /// one.
    pub fn type_def_token(&self) -> Result<Option<u32>, Error> {
        let rid = self.raw_token()? as u32;
        Ok((rid > 0).then_some(0x0200_0000 | rid))
    }

    pub fn array_element_type(
        &self,
    ) -> Result<Option<TypedPointer<MethodTable>>, Error> {
        Ok(if self.is_array()? {
            Some(self.element_type_handle()?)
        } else {
            None
        })
    }

    pub fn ee_class_or_canonical(&self) -> Result<EEClassOrCanonical, Error> {
        let raw = self.ee_class_or_canonical_table()?;
        EEClassOrCanonical::decode(self.ptr().as_ptr(), raw)
    }

    /// Location of the type's EEClass.  For a generic instantiation,
    /// the canonical `MethodTable` is followed once; it must point
    /// directly at its EEClass.
    pub fn ee_class_ptr(
        &self,
        mem: &dyn MemoryAccess,
    ) -> Result<TypedPointer<EEClass>, Error> {
        match self.ee_class_or_canonical()? {
            EEClassOrCanonical::EEClass(ptr) => Ok(ptr),
            EEClassOrCanonical::Canonical(canonical) => {
                match canonical.read(mem)?.ee_class_or_canonical()? {
                    EEClassOrCanonical::EEClass(ptr) => Ok(ptr),
                    EEClassOrCanonical::Canonical(_) => {
                        Err(Error::NotImplementedYet(format!(
                            "Canonical MethodTable {canonical} \
                             of {} is itself non-canonical",
                            self.ptr()
                        )))
                    }
                }
            }
        }
    }

    pub fn ee_class(&self, mem: &dyn MemoryAccess) -> Result<EEClass, Error> {
        self.ee_class_ptr(mem)?.read(mem)
    }

    pub fn parent(
        &self,
        mem: &dyn MemoryAccess,
    ) -> Result<Option<Self>, Error> {
        let ptr = self.parent_method_table()?;
        let parent = if ptr.is_null() {
            None
        } else {
            Some(ptr.read(mem)?)
        };

        Ok(parent)
    }

    pub fn iter_parents<'a>(
        &self,
        mem: &'a dyn MemoryAccess,
    ) -> impl Iterator<Item = Result<Self, Error>> + 'a {
        std::iter::successors(
            self.parent(mem).transpose(),
            |res_method_table: &Result<Self, Error>| -> Option<Result<Self, Error>> {
                let method_table = res_method_table.as_ref().ok()?;
                method_table.parent(mem).transpose()
            },
        )
    }

    /// Location of the code pointer for virtual `slot`.
    ///
    /// The vtable is split into chunks of
    /// [`Self::VTABLE_SLOTS_PER_CHUNK`] slots.  Pointers to the
    /// chunks directly follow the fixed record, so this is only valid
    /// for a `MethodTable` read from its original address.
    pub fn virtual_slot_location(
        &self,
        slot: usize,
        mem: &dyn MemoryAccess,
    ) -> Result<TypedPointer<Pointer>, Error> {
        if slot >= self.num_virtuals()? as usize {
            return Err(Error::VirtualSlotOutOfRange {
                method_table: self.ptr().as_ptr(),
                slot,
            });
        }

        let indirections: TypedPointer<TypedPointer<Pointer>> =
            TypedPointer::new(self.ptr().as_ptr() + Self::SIZE);
        let chunk = indirections
            .read_at((slot / Self::VTABLE_SLOTS_PER_CHUNK) as isize, mem)?;
        Ok(chunk.element((slot % Self::VTABLE_SLOTS_PER_CHUNK) as isize))
    }

    pub fn virtual_slot(
        &self,
        slot: usize,
        mem: &dyn MemoryAccess,
    ) -> Result<Pointer, Error> {
        Ok(self.virtual_slot_location(slot, mem)?.read(mem)?)
    }

    /// The field descriptors introduced by this type.  Inherited
    /// instance fields are described by the parent types, and are
    /// not included.
    pub fn field_descriptions(
        &self,
        mem: &dyn MemoryAccess,
    ) -> Result<Option<FieldDescriptions>, Error> {
        let ee_class = self.ee_class(mem)?;

        let Some(ptr) = ee_class.field_list()? else {
            return Ok(None);
        };

        let packed = ee_class.packed_fields()?;
        let num_instance_fields = packed.num_instance_fields();
        let num_static_fields = packed.num_static_fields();

        let num_own_instance_fields = match self.parent(mem)? {
            Some(parent) => {
                let num_parent_fields =
                    parent.ee_class(mem)?.packed_fields()?.num_instance_fields();
                num_instance_fields.checked_sub(num_parent_fields).ok_or(
                    Error::InconsistentFieldCounts {
                        method_table: self.ptr().as_ptr(),
                        num_instance_fields,
                        num_parent_fields,
                    },
                )?
            }
            None => num_instance_fields,
        };
        let num_fields = num_own_instance_fields
            .checked_add(num_static_fields)
            .ok_or(Error::FieldCountOverflow {
                method_table: self.ptr().as_ptr(),
                num_instance_fields: num_own_instance_fields,
                num_static_fields,
            })?;

        let nbytes = num_fields as usize * FieldDescription::SIZE;
        let bytes = mem.read_bytes(ptr..ptr.try_add(nbytes)?)?;
        Ok(Some(FieldDescriptions::new(self.ptr(), bytes)))
    }

    /// The chain of method descriptor chunks of this type.
    pub fn method_chunks<'a>(
        &self,
        mem: &'a dyn MemoryAccess,
    ) -> Result<impl Iterator<Item = Result<MethodDescChunk, Error>> + 'a, Error>
    {
        let first = self.ee_class(mem)?.method_chunk_list()?;
        Ok(MethodDescChunk::iter_chain(first, mem))
    }
}

impl ReadTypedPointer for MethodTable {
    const SIZE: usize = MethodTable::SIZE;
    type Error = Error;

    fn read_typed_ptr(
        ptr: Pointer,
        mem: &dyn MemoryAccess,
    ) -> Result<Self, Self::Error> {
        MethodTable::read(ptr, mem)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn union_tags() {
        let mt = Pointer::new(0x5000usize);
        let ee_class = Pointer::new(0x7000usize);

        assert_eq!(
            EEClassOrCanonical::decode(mt, ee_class).ok(),
            Some(EEClassOrCanonical::EEClass(ee_class.into()))
        );
        assert_eq!(
            EEClassOrCanonical::decode(mt, ee_class + 2).ok(),
            Some(EEClassOrCanonical::Canonical(ee_class.into()))
        );
        for tag in [1, 3] {
            assert!(matches!(
                EEClassOrCanonical::decode(mt, ee_class + tag),
                Err(Error::UnsupportedTypeUnion { tag: t, .. }) if t == tag
            ));
        }
    }

    #[test]
    fn categories() {
        assert_eq!(TypeCategory::from_raw(0xA), TypeCategory::SzArray);
        assert!(TypeCategory::from_raw(0x6).is_value_type());
        assert!(!TypeCategory::from_raw(0xC).is_value_type());
        assert_eq!(TypeCategory::from_raw(0x3), TypeCategory::Unknown(3));
    }
}
