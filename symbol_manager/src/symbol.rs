use memory_reader::Pointer;

/// The kind of entity a symbol names, from the ELF `st_type` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SymbolKind {
    Function,
    Object,
    Other(u8),
}

/// The linkage of a symbol, from the ELF `st_bind` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SymbolBinding {
    Local,
    Global,
    Weak,
    Other(u8),
}

impl SymbolKind {
    pub fn from_st_type(st_type: u8) -> Self {
        match st_type {
            elf::abi::STT_FUNC => Self::Function,
            elf::abi::STT_OBJECT => Self::Object,
            other => Self::Other(other),
        }
    }
}

impl SymbolBinding {
    pub fn from_st_bind(st_bind: u8) -> Self {
        match st_bind {
            elf::abi::STB_LOCAL => Self::Local,
            elf::abi::STB_GLOBAL => Self::Global,
            elf::abi::STB_WEAK => Self::Weak,
            other => Self::Other(other),
        }
    }
}

/// One entry of a symbol table, as seen during enumeration.  The
/// name borrows from the symbol file.
#[derive(Debug, Clone, Copy)]
pub struct SymbolRecord<'a> {
    pub name: &'a str,

    /// Virtual address recorded in the symbol table, not yet
    /// adjusted for the image base.
    pub value: u64,

    pub size: u64,
    pub kind: SymbolKind,
    pub binding: SymbolBinding,
}

/// A resolved symbol.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Symbol {
    /// Name as stored in the symbol table (mangled, if C++).
    pub name: String,

    /// Offset of the symbol from the load base of its image.
    pub offset: i64,

    /// Location in a specific loaded module, if one was provided when
    /// resolving.
    pub address: Option<Pointer>,

    pub size: u64,
    pub kind: SymbolKind,
    pub binding: SymbolBinding,
}

impl Symbol {
    pub(crate) fn from_record(record: &SymbolRecord, image_base: u64) -> Self {
        Self {
            name: record.name.to_string(),
            offset: record.value.wrapping_sub(image_base) as i64,
            address: None,
            size: record.size,
            kind: record.kind,
            binding: record.binding,
        }
    }

    /// Place the symbol within a module loaded at `module_base`.
    pub fn located_at(
        mut self,
        module_base: Pointer,
    ) -> Result<Self, memory_reader::Error> {
        self.address = Some(module_base.try_offset(self.offset as isize)?);
        Ok(self)
    }
}
