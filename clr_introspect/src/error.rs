use memory_reader::Pointer;
use thiserror::Error;

#[derive(Error)]
pub enum Error {
    #[error("memory_reader::Error{{ {err} }}")]
    MemoryReader {
        #[from]
        err: memory_reader::Error,
    },

    #[error("symbol_manager::Error{{ {err} }}")]
    SymbolManager {
        #[from]
        err: symbol_manager::Error,
    },

    #[error("Module '{0}' is not loaded in the target process")]
    ModuleNotLoaded(String),

    #[error("Value 0x{0:02x} does not correspond to any element type")]
    InvalidRuntimeType(u8),

    #[error(
        "MethodTable at {method_table} has a type union \
         with unsupported tag {tag} (raw value {raw})"
    )]
    UnsupportedTypeUnion {
        method_table: Pointer,
        raw: Pointer,
        tag: usize,
    },

    #[error(
        "Field {token:#x} of MethodTable {method_table} \
         has edit-and-continue offset {offset:#x}"
    )]
    EditAndContinueField {
        method_table: Pointer,
        token: u32,
        offset: u32,
    },

    #[error(
        "EEClass of {method_table} declares {num_instance_fields} \
         instance fields, but its parent declares {num_parent_fields}"
    )]
    InconsistentFieldCounts {
        method_table: Pointer,
        num_instance_fields: u32,
        num_parent_fields: u32,
    },

    #[error(
        "MethodTable {method_table} declares {num_instance_fields} \
         instance and {num_static_fields} static fields, \
         more than can be described"
    )]
    FieldCountOverflow {
        method_table: Pointer,
        num_instance_fields: u32,
        num_static_fields: u32,
    },

    #[error(
        "MethodDescChunk at {chunk} holds {count} descriptors, \
         which do not fit in its {size} bytes"
    )]
    InconsistentMethodDescChunk {
        chunk: Pointer,
        count: usize,
        size: usize,
    },

    #[error("Chain of MethodDescChunks loops back to {0}")]
    CyclicMethodDescChunks(Pointer),

    #[error(
        "EEClass at {ee_class} needs {needed} bytes \
         of fixed fields, but only {available} were read"
    )]
    TruncatedEEClass {
        ee_class: Pointer,
        needed: usize,
        available: usize,
    },

    #[error("Packed fields of EEClass at {ee_class} end before value {index}")]
    TruncatedPackedFields { ee_class: Pointer, index: usize },

    #[error("Location of instance field requires the containing instance")]
    LocationOfInstanceFieldRequiresInstance,

    #[error("MethodDesc at {0} has no entry point")]
    NoEntryPoint(Pointer),

    #[error("Virtual slot {slot} is out of range for MethodTable {method_table}")]
    VirtualSlotOutOfRange { method_table: Pointer, slot: usize },

    #[error("No field with token {token:#x} in MethodTable {method_table}")]
    NoSuchField { method_table: Pointer, token: u32 },

    #[error("No import '{member}' loaded for type '{type_name}'")]
    NoSuchImport { type_name: String, member: String },

    #[error("Import of type '{0}' has no namespace")]
    MissingImportNamespace(String),

    #[error(
        "Member '{member}' of '{type_name}' is a {kind}, \
         but is annotated as a {attribute} import"
    )]
    ImportKindMismatch {
        type_name: String,
        member: String,
        kind: &'static str,
        attribute: &'static str,
    },

    #[error(
        "Member '{member}' of '{type_name}' requests \
         both mapping and binding"
    )]
    ConflictingBindingModes { type_name: String, member: String },

    #[error("Field import '{member}' of '{type_name}' has no load strategy")]
    MissingFieldLoad { type_name: String, member: String },

    #[error(
        "Field '{member}' of '{type_name}' has {expected} bytes \
         of storage, but {provided} were loaded"
    )]
    FieldStorageSizeMismatch {
        type_name: String,
        member: String,
        expected: usize,
        provided: usize,
    },

    #[error("No callable bound to '{0}'")]
    NotBound(String),

    #[error(
        "'{0}' is bound to native code, \
         which can only be invoked through `call_native`"
    )]
    NativeCallRequiresUnsafe(String),

    #[error("Native calls support at most 4 arguments, but {0} were given")]
    TooManyNativeArguments(usize),

    #[error("Not yet implemented: {0}")]
    NotImplementedYet(String),
}

impl std::fmt::Debug for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self)
    }
}
