use std::ops::Range;

use bitflags::bitflags;
use memory_reader::{
    MemoryAccess, OwnedBytes, Pointer, ReadTypedPointer, TypedPointer,
};

use crate::{
    unpack_fields, Error, MethodDescChunk, MethodTable, PackedDwords,
    RelativePointer,
};

/// The runtime's cold per-type data, shared between a
/// `MethodTable` and all instantiations that use it as their
/// canonical table.
///
/// The record has a fixed region, optionally followed by layout
/// information, and always followed by a block of field counts.
/// The field list and method chunk list are stored as offsets from
/// the record's own address, so an `EEClass` can only be decoded at
/// the address it was read from.  It is not `Clone`:
///
/// ```compile_fail
/// fn duplicate(ee_class: &clr_introspect::EEClass) -> clr_introspect::EEClass {
///     ee_class.clone()
/// }
/// ```
///
/// Position-independent values can be copied out with
/// [`EEClass::fixed`] and [`EEClass::packed_fields`].
pub struct EEClass {
    bytes: OwnedBytes,
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct EEClassVmFlags: u32 {
        const LAYOUT_DEPENDS_ON_OTHER_MODULES = 0x0000_0001;
        const DELEGATE = 0x0000_0002;
        const FIXED_ADDRESS_VT_STATICS = 0x0000_0020;
        const HAS_LAYOUT = 0x0000_0040;
        const IS_NESTED = 0x0000_0080;
        const IS_EQUIVALENT_TYPE = 0x0000_0200;
        const HAS_OVERLAYED_FIELDS = 0x0000_0400;
        const HAS_FIELDS_WHICH_MUST_BE_INITED = 0x0000_0800;
        const UNSAFE_VALUE_TYPE = 0x0000_1000;
        const NO_GUID = 0x0002_0000;
        const HAS_NON_PUBLIC_FIELDS = 0x0004_0000;
        const PREFER_ALIGN8 = 0x0010_0000;
        const NOT_TIGHTLY_PACKED = 0x1000_0000;
        const CONTAINS_METHOD_IMPLS = 0x2000_0000;
    }
}

/// Copy of the position-independent part of an [`EEClass`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EEClassFixed {
    pub guid_info: Pointer,
    pub optional_fields: Pointer,
    pub method_table: TypedPointer<MethodTable>,
    pub attr_class: u32,
    pub vm_flags: EEClassVmFlags,
    pub norm_type: u8,
    pub fields_are_packed: bool,
    pub fixed_class_fields: u8,
    pub base_size_padding: u8,
}

/// Layout information of a type with explicit or sequential layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EEClassLayoutInfo {
    pub managed_size: u32,
    pub largest_alignment: u8,
    pub flags: u8,
    pub packing_size: u8,
}

/// The field counts that follow the fixed region of an [`EEClass`],
/// in the order the runtime stores them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EEClassPackedFields {
    values: [u32; EEClassPackedFields::NUM_FIELDS],
}

impl EEClassPackedFields {
    pub const NUM_FIELDS: usize = 11;

    /// Upper bound on the encoded size, reached when the values are
    /// stored unpacked.
    pub const MAX_SIZE: usize = 4 * Self::NUM_FIELDS;

    pub fn new(values: [u32; Self::NUM_FIELDS]) -> Self {
        Self { values }
    }

    pub fn values(&self) -> &[u32; Self::NUM_FIELDS] {
        &self.values
    }

    pub fn num_instance_fields(&self) -> u32 {
        self.values[0]
    }
    pub fn num_methods(&self) -> u32 {
        self.values[1]
    }
    pub fn num_static_fields(&self) -> u32 {
        self.values[2]
    }
    pub fn num_handle_statics(&self) -> u32 {
        self.values[3]
    }
    pub fn num_boxed_statics(&self) -> u32 {
        self.values[4]
    }
    pub fn non_gc_static_field_bytes(&self) -> u32 {
        self.values[5]
    }
    pub fn num_thread_static_fields(&self) -> u32 {
        self.values[6]
    }
    pub fn num_handle_thread_statics(&self) -> u32 {
        self.values[7]
    }
    pub fn num_boxed_thread_statics(&self) -> u32 {
        self.values[8]
    }
    pub fn non_gc_thread_static_field_bytes(&self) -> u32 {
        self.values[9]
    }
    pub fn num_non_virtual_slots(&self) -> u32 {
        self.values[10]
    }
}

impl EEClass {
    /// Size of the fixed region common to every EEClass.
    pub const FIXED_SIZE: usize = 56;

    const LAYOUT_INFO: Range<usize> = 56..63;

    unpack_fields! {
        guid_info: {Pointer, 0..8},
        optional_fields: {Pointer, 8..16},
        method_table: {TypedPointer<MethodTable>, 16..24},
        raw_field_list: {isize, 24..32},
        raw_method_chunk_list: {isize, 32..40},
        attr_class: {u32, 40..44},
        raw_vm_flags: {u32, 44..48},
        norm_type: {u8, 48..49},
        fields_are_packed: {bool, 49..50},
        fixed_class_fields: {u8, 50..51},
        base_size_padding: {u8, 51..52},
    }

    /// Read the fixed region, then re-read to include the field
    /// counts.  The size of the fixed region depends on the most
    /// derived runtime class, and is stored within the region itself.
    pub fn read(ptr: Pointer, mem: &dyn MemoryAccess) -> Result<Self, Error> {
        let fixed = Self {
            bytes: mem.read_bytes(ptr..ptr.try_add(Self::FIXED_SIZE)?)?,
        };
        let fixed_class_fields = fixed.fixed_class_fields()? as usize;
        if fixed_class_fields < Self::FIXED_SIZE {
            return Err(Error::TruncatedEEClass {
                ee_class: ptr,
                needed: Self::FIXED_SIZE,
                available: fixed_class_fields,
            });
        }

        let counts = ptr.try_add(fixed_class_fields)?;
        let counts_size = if fixed.fields_are_packed()? {
            Self::packed_counts_size(counts, mem)?
        } else {
            EEClassPackedFields::MAX_SIZE
        };

        let bytes = mem.read_bytes(ptr..counts.try_add(counts_size)?)?;
        Ok(Self { bytes })
    }

    /// Number of bytes of packed counts at `counts`, found by reading
    /// one word at a time until every count has been decoded.  A
    /// stream that never completes is left for
    /// [`Self::packed_fields`] to report.
    fn packed_counts_size(
        counts: Pointer,
        mem: &dyn MemoryAccess,
    ) -> Result<usize, Error> {
        let mut packed = PackedDwords::new(Vec::new());
        while packed.words().len() * 4 < EEClassPackedFields::MAX_SIZE {
            let word_ptr = counts.try_add(packed.words().len() * 4)?;
            let word: u32 =
                mem.read_bytes(word_ptr..word_ptr + 4)?.as_range().unpack()?;
            packed.push(word);
            if packed.get(EEClassPackedFields::NUM_FIELDS - 1).is_some() {
                break;
            }
        }
        Ok(packed.words().len() * 4)
    }

    pub fn ptr(&self) -> TypedPointer<Self> {
        self.bytes.start().into()
    }

    pub fn ptr_range(&self) -> Range<Pointer> {
        (&self.bytes).into()
    }

    pub fn vm_flags(&self) -> Result<EEClassVmFlags, Error> {
        Ok(EEClassVmFlags::from_bits_retain(self.raw_vm_flags()?))
    }

    pub fn fixed(&self) -> Result<EEClassFixed, Error> {
        Ok(EEClassFixed {
            guid_info: self.guid_info()?,
            optional_fields: self.optional_fields()?,
            method_table: self.method_table()?,
            attr_class: self.attr_class()?,
            vm_flags: self.vm_flags()?,
            norm_type: self.norm_type()?,
            fields_are_packed: self.fields_are_packed()?,
            fixed_class_fields: self.fixed_class_fields()?,
            base_size_padding: self.base_size_padding()?,
        })
    }

    /// Start of the [`FieldDescription`](crate::FieldDescription)
    /// array, if the type has any fields.
    pub fn field_list(&self) -> Result<Option<Pointer>, Error> {
        let slot = self.raw_field_list_location().start;
        let relative = RelativePointer::<u8>::new(slot, self.raw_field_list()?);
        Ok(relative.target().map(|ptr| ptr.as_ptr()))
    }

    /// First chunk of method descriptors, if the type has methods.
    pub fn method_chunk_list(
        &self,
    ) -> Result<Option<TypedPointer<MethodDescChunk>>, Error> {
        let slot = self.raw_method_chunk_list_location().start;
        let relative = RelativePointer::new(slot, self.raw_method_chunk_list()?);
        Ok(relative.target())
    }

    pub fn layout_info(&self) -> Result<Option<EEClassLayoutInfo>, Error> {
        if !self.vm_flags()?.contains(EEClassVmFlags::HAS_LAYOUT) {
            return Ok(None);
        }

        let fixed_class_fields = self.fixed_class_fields()? as usize;
        if fixed_class_fields < Self::LAYOUT_INFO.end {
            return Err(Error::TruncatedEEClass {
                ee_class: self.ptr().as_ptr(),
                needed: Self::LAYOUT_INFO.end,
                available: fixed_class_fields,
            });
        }

        let bytes = self.bytes.subrange(Self::LAYOUT_INFO);
        let info = EEClassLayoutInfo {
            managed_size: bytes.subrange(0..4).unpack()?,
            largest_alignment: bytes.subrange(4..5).unpack()?,
            flags: bytes.subrange(5..6).unpack()?,
            packing_size: bytes.subrange(6..7).unpack()?,
        };
        Ok(Some(info))
    }

    /// Decode the field counts, whether stored as plain words or as
    /// [`PackedDwords`].
    pub fn packed_fields(&self) -> Result<EEClassPackedFields, Error> {
        let start = self.fixed_class_fields()? as usize;
        let bytes = self.bytes.subrange(start..);

        let mut values = [0u32; EEClassPackedFields::NUM_FIELDS];
        if self.fields_are_packed()? {
            let packed = PackedDwords::from_le_bytes(bytes.bytes());
            for (index, value) in values.iter_mut().enumerate() {
                *value = packed.get(index).ok_or(Error::TruncatedPackedFields {
                    ee_class: self.ptr().as_ptr(),
                    index,
                })?;
            }
        } else {
            for (index, value) in values.iter_mut().enumerate() {
                let word = bytes
                    .bytes()
                    .get(4 * index..4 * index + 4)
                    .and_then(|word| word.try_into().ok())
                    .ok_or(Error::TruncatedPackedFields {
                        ee_class: self.ptr().as_ptr(),
                        index,
                    })?;
                *value = u32::from_le_bytes(word);
            }
        }

        Ok(EEClassPackedFields::new(values))
    }
}

impl ReadTypedPointer for EEClass {
    const SIZE: usize = EEClass::FIXED_SIZE;
    type Error = Error;

    fn read_typed_ptr(
        ptr: Pointer,
        mem: &dyn MemoryAccess,
    ) -> Result<Self, Self::Error> {
        EEClass::read(ptr, mem)
    }
}
