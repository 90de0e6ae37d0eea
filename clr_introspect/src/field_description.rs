use std::ops::Range;

use memory_reader::{
    ByteRange, MemoryAccess, OwnedBytes, Pointer, TypedPointer,
};

use crate::{unpack_fields, BitField, CorElementType, Error, MethodTable};

/// The field descriptors introduced by one type, as a single block.
pub struct FieldDescriptions {
    method_table: TypedPointer<MethodTable>,
    bytes: OwnedBytes,
}

#[derive(Clone, Copy)]
pub struct FieldDescription<'a> {
    bytes: ByteRange<'a>,
}

/// Access level of a field, as stored in the metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldProtection {
    PrivateScope,
    Private,
    FamilyAndAssembly,
    Assembly,
    Family,
    FamilyOrAssembly,
    Public,
    Unknown,
}

/// Base addresses of a type's static storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StaticBases {
    /// Statics that the garbage collector must scan: object
    /// references and boxed value types.
    pub gc: Pointer,

    /// Statics of primitive type.
    pub non_gc: Pointer,
}

#[derive(Debug, Clone, Copy)]
pub enum FieldContainer {
    /// Field is contained in a Class.  The Pointer is the value
    /// stored in the containing Class, and points to the MethodTable
    /// pointer.  Offsets to fields within the Class are relative to
    /// the location just after the MethodTable pointer.
    Class(Pointer),

    /// Field is contained in a ValueType.  There is no Pointer to the
    /// ValueType itself, but instead is located relative to the
    /// containing object.  Offsets to fields within the ValueType are
    /// relative to the Pointer itself.
    ValueType(Pointer),

    /// Field is static.
    Static(StaticBases),
}

impl FieldDescriptions {
    pub fn new(method_table: TypedPointer<MethodTable>, bytes: OwnedBytes) -> Self {
        Self {
            method_table,
            bytes,
        }
    }

    pub fn method_table(&self) -> TypedPointer<MethodTable> {
        self.method_table
    }

    pub fn ptr_range(&self) -> Range<Pointer> {
        (&self.bytes).into()
    }

    pub fn len(&self) -> usize {
        self.bytes.len() / FieldDescription::SIZE
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn iter<'a>(&'a self) -> impl Iterator<Item = FieldDescription<'a>> {
        (&self).into_iter()
    }

    /// The field with metadata token `token`.
    pub fn find_token(&self, token: u32) -> Result<FieldDescription<'_>, Error> {
        self.iter()
            .find(|field| matches!(field.token(), Ok(t) if t == token))
            .ok_or(Error::NoSuchField {
                method_table: self.method_table.as_ptr(),
                token,
            })
    }
}

pub struct FieldDescriptionIterator<'a> {
    bytes: ByteRange<'a>,
}

impl<'a> Iterator for FieldDescriptionIterator<'a> {
    type Item = FieldDescription<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        (self.bytes.len() >= FieldDescription::SIZE).then(|| {
            let bytes = self.bytes.subrange(..FieldDescription::SIZE);
            self.bytes = self.bytes.subrange(FieldDescription::SIZE..);
            FieldDescription { bytes }
        })
    }
}

impl<'a> IntoIterator for &'a FieldDescriptions {
    type Item = FieldDescription<'a>;

    type IntoIter = FieldDescriptionIterator<'a>;

    fn into_iter(self) -> Self::IntoIter {
        FieldDescriptionIterator {
            bytes: (&self.bytes).into(),
        }
    }
}

impl<'a> FieldDescription<'a> {
    pub const SIZE: usize = 16;

    pub const TOKEN: BitField = BitField::new(0, 24);
    pub const IS_STATIC: BitField = BitField::flag(24);
    pub const IS_THREAD_LOCAL: BitField = BitField::flag(25);
    pub const IS_RVA: BitField = BitField::flag(26);
    pub const PROTECTION: BitField = BitField::new(27, 3);
    pub const REQUIRES_FULL_TOKEN: BitField = BitField::flag(30);

    pub const OFFSET: BitField = BitField::new(0, 27);
    pub const ELEMENT_TYPE: BitField = BitField::new(27, 5);

    /// Offsets reserved for fields added by edit-and-continue, whose
    /// storage is not described by the offset.
    pub const EDIT_AND_CONTINUE_OFFSETS: [u32; 2] = [
        Self::OFFSET.max_value() as u32,
        Self::OFFSET.max_value() as u32 - 4,
    ];

    unpack_fields! {
        method_table: {TypedPointer<MethodTable>, 0..8},
        raw_token: {u32, 8..12, Self::TOKEN},
        raw_is_static: {u32, 8..12, Self::IS_STATIC},
        raw_is_thread_local: {u32, 8..12, Self::IS_THREAD_LOCAL},
        raw_is_rva: {u32, 8..12, Self::IS_RVA},
        raw_protection: {u32, 8..12, Self::PROTECTION},
        raw_requires_full_token: {u32, 8..12, Self::REQUIRES_FULL_TOKEN},
        raw_offset: {u32, 12..16, Self::OFFSET},
        raw_cor_element_type: {u32, 12..16, Self::ELEMENT_TYPE},
    }

    pub fn new(bytes: ByteRange<'a>) -> Self {
        Self { bytes }
    }

    pub fn ptr_range(&self) -> Range<Pointer> {
        self.bytes.into()
    }

    pub fn is_static(&self) -> Result<bool, Error> {
        Ok(self.raw_is_static()? > 0)
    }

    pub fn is_thread_local(&self) -> Result<bool, Error> {
        Ok(self.raw_is_thread_local()? > 0)
    }

    pub fn is_rva(&self) -> Result<bool, Error> {
        Ok(self.raw_is_rva()? > 0)
    }

    pub fn requires_full_token(&self) -> Result<bool, Error> {
        Ok(self.raw_requires_full_token()? > 0)
    }

    pub fn protection(&self) -> Result<FieldProtection, Error> {
        let protection = match self.raw_protection()? {
            0 => FieldProtection::PrivateScope,
            1 => FieldProtection::Private,
            2 => FieldProtection::FamilyAndAssembly,
            3 => FieldProtection::Assembly,
            4 => FieldProtection::Family,
            5 => FieldProtection::FamilyOrAssembly,
            6 => FieldProtection::Public,
            _ => FieldProtection::Unknown,
        };
        Ok(protection)
    }

    /// Metadata token of the field definition.
    pub fn token(&self) -> Result<u32, Error> {
        Ok(0x0400_0000 | self.raw_token()?)
    }

    /// Byte offset of the field within its container.  Fails for
    /// fields added by edit-and-continue.
    pub fn offset(&self) -> Result<usize, Error> {
        let offset = self.raw_offset()?;
        if Self::EDIT_AND_CONTINUE_OFFSETS.contains(&offset) {
            return Err(Error::EditAndContinueField {
                method_table: self.method_table()?.as_ptr(),
                token: self.token()?,
                offset,
            });
        }
        Ok(offset as usize)
    }

    pub fn cor_element_type(&self) -> Result<CorElementType, Error> {
        (self.raw_cor_element_type()? as u8).try_into()
    }

    pub fn is_pointer(&self) -> Result<bool, Error> {
        Ok(self.cor_element_type()?.is_ptr())
    }

    pub fn is_value_type(&self) -> Result<bool, Error> {
        Ok(matches!(
            self.cor_element_type()?,
            CorElementType::ValueType
        ))
    }

    /// Address of the field's storage.
    ///
    /// `mem` is only accessed for static value types, which are
    /// stored boxed behind a pointer.
    pub fn location(
        &self,
        container: FieldContainer,
        mem: &dyn MemoryAccess,
    ) -> Result<Pointer, Error> {
        let is_instance_field = !self.is_static()?;

        let ptr = if is_instance_field {
            let base = match container {
                FieldContainer::Class(ptr) => Ok(ptr + Pointer::SIZE),
                FieldContainer::ValueType(ptr) => Ok(ptr),
                FieldContainer::Static(_) => {
                    Err(Error::LocationOfInstanceFieldRequiresInstance)
                }
            }?;
            base + self.offset()?
        } else if self.is_rva()? {
            return Err(Error::NotImplementedYet(format!(
                "Location of RVA static field {:#x}",
                self.token()?
            )));
        } else if self.is_thread_local()? {
            return Err(Error::NotImplementedYet(format!(
                "Location of thread-local static field {:#x}",
                self.token()?
            )));
        } else {
            let FieldContainer::Static(bases) = container else {
                return Err(Error::NotImplementedYet(format!(
                    "Static field {:#x} accessed through an instance",
                    self.token()?
                )));
            };

            let element_type = self.cor_element_type()?;
            if element_type.is_object_reference() {
                bases.gc + self.offset()?
            } else if matches!(element_type, CorElementType::ValueType) {
                // Static value types are not stored inline, but are
                // instead boxed.  Read the pointer to the box, then
                // advance past its method table pointer.
                let boxed: TypedPointer<Pointer> =
                    (bases.gc + self.offset()?).into();
                boxed.read(mem)? + Pointer::SIZE
            } else {
                bases.non_gc + self.offset()?
            }
        };

        Ok(ptr)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn encode(token: u32, is_static: bool, element_type: u8, offset: u32) -> [u8; 16] {
        let word_0 = FieldDescription::TOKEN.encode(0, token as u64);
        let word_0 = FieldDescription::IS_STATIC.encode(word_0, is_static as u64);
        let word_1 = FieldDescription::OFFSET.encode(0, offset as u64);
        let word_1 =
            FieldDescription::ELEMENT_TYPE.encode(word_1, element_type as u64);

        let mut bytes = [0u8; 16];
        bytes[0..8].copy_from_slice(&0x5000usize.to_le_bytes());
        bytes[8..12].copy_from_slice(&(word_0 as u32).to_le_bytes());
        bytes[12..16].copy_from_slice(&(word_1 as u32).to_le_bytes());
        bytes
    }

    #[test]
    fn decode_packed_words() -> Result<(), Error> {
        let bytes = encode(0x12, false, 0x08, 0x18);
        let field = FieldDescription::new(ByteRange::new(Pointer::new(0x100usize), &bytes));

        assert_eq!(field.method_table()?, Pointer::new(0x5000usize));
        assert_eq!(field.token()?, 0x0400_0012);
        assert!(!field.is_static()?);
        assert_eq!(field.offset()?, 0x18);
        assert_eq!(
            field.cor_element_type()?,
            CorElementType::Prim(crate::PrimType::I32)
        );
        Ok(())
    }

    #[test]
    fn instance_field_locations() -> Result<(), Error> {
        let mem = memory_reader::SnapshotMemory::new();
        let bytes = encode(1, false, 0x08, 0x10);
        let field = FieldDescription::new(ByteRange::new(Pointer::new(0x100usize), &bytes));

        let object = Pointer::new(0x9000usize);
        assert_eq!(
            field.location(FieldContainer::Class(object), &mem)?,
            object + 0x18
        );
        assert_eq!(
            field.location(FieldContainer::ValueType(object), &mem)?,
            object + 0x10
        );

        let statics = StaticBases {
            gc: Pointer::new(0x1000usize),
            non_gc: Pointer::new(0x2000usize),
        };
        assert!(matches!(
            field.location(FieldContainer::Static(statics), &mem),
            Err(Error::LocationOfInstanceFieldRequiresInstance)
        ));
        Ok(())
    }

    #[test]
    fn static_field_locations() -> Result<(), Error> {
        let statics = StaticBases {
            gc: Pointer::new(0x1000usize),
            non_gc: Pointer::new(0x2000usize),
        };
        let mem = memory_reader::SnapshotMemory::new()
            .with_region(0x1020usize, 0x7000usize.to_le_bytes().to_vec());
        let location = |element_type: u8, offset: u32| {
            let bytes = encode(1, true, element_type, offset);
            let field =
                FieldDescription::new(ByteRange::new(Pointer::new(0x100usize), &bytes));
            field.location(FieldContainer::Static(statics), &mem)
        };

        assert_eq!(location(0x12, 0x08)?, Pointer::new(0x1008usize));
        assert_eq!(location(0x0a, 0x08)?, Pointer::new(0x2008usize));
        assert_eq!(location(0x11, 0x20)?, Pointer::new(0x7008usize));
        Ok(())
    }

    #[test]
    fn edit_and_continue_offsets() {
        for offset in FieldDescription::EDIT_AND_CONTINUE_OFFSETS {
            let bytes = encode(3, false, 0x08, offset);
            let field =
                FieldDescription::new(ByteRange::new(Pointer::new(0x100usize), &bytes));
            assert!(matches!(
                field.offset(),
                Err(Error::EditAndContinueField { token: 0x0400_0003, .. })
            ));
        }
    }
}
