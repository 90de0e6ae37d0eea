use std::fs::File;
use std::ops::ControlFlow;
use std::path::{Path, PathBuf};

use elf::{endian::AnyEndian, ElfBytes};
use itertools::Itertools as _;
use memmap2::Mmap;
use regex::Regex;

use crate::{
    Result, SymbolBinding, SymbolKind, SymbolRecord, SymbolSource,
};

/// An ELF file holding a symbol table, either a separate debug file
/// or the image itself.
///
/// The file is mapped once on open, and parsed again for each
/// enumeration.  Parsing only reads the headers, so this is cheap
/// compared to walking the symbol table itself.
pub struct DebugSymbolFile {
    path: PathBuf,
    data: Mmap,
    image_base: u64,
}

impl DebugSymbolFile {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path)?;

        // The mapping is read-only.  Modification of the file on disk
        // while it is mapped would be visible here, which is
        // acceptable for debug files that are written once.
        let data = unsafe { Mmap::map(&file) }?;

        let image_base = {
            let elf = ElfBytes::<AnyEndian>::minimal_parse(&data)?;
            elf.segments()
                .into_iter()
                .flatten()
                .filter(|segment| segment.p_type == elf::abi::PT_LOAD)
                .map(|segment| segment.p_vaddr)
                .min()
                .unwrap_or(0)
        };

        log::debug!(
            "Opened symbol file {}, image base 0x{image_base:x}",
            path.display()
        );

        Ok(Self {
            path,
            data,
            image_base,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn parse(&self) -> Result<ElfBytes<'_, AnyEndian>> {
        Ok(ElfBytes::<AnyEndian>::minimal_parse(&self.data)?)
    }

    /// True if the file has a static symbol table.  Stripped
    /// binaries only carry `.dynsym`, which lacks most internal
    /// symbols.
    pub fn has_symtab(&self) -> Result<bool> {
        Ok(self.parse()?.symbol_table()?.is_some())
    }

    /// The GNU build id, as lowercase hex, if the file has one.
    pub fn build_id(&self) -> Result<Option<String>> {
        let elf = self.parse()?;
        let Some(header) = elf.section_header_by_name(".note.gnu.build-id")?
        else {
            return Ok(None);
        };

        let build_id = elf
            .section_data_as_notes(&header)?
            .find_map(|note| match note {
                elf::note::Note::GnuBuildId(id) => Some(id.0),
                _ => None,
            })
            .map(|bytes| bytes.iter().map(|byte| format!("{byte:02x}")).join(""));

        Ok(build_id)
    }
}

impl SymbolSource for DebugSymbolFile {
    fn image_base(&self) -> u64 {
        self.image_base
    }

    fn for_each_symbol(
        &self,
        mask: Option<&Regex>,
        visit: &mut dyn FnMut(SymbolRecord<'_>) -> ControlFlow<()>,
    ) -> Result<()> {
        let elf = self.parse()?;

        for table in [elf.symbol_table()?, elf.dynamic_symbol_table()?] {
            let Some((symbols, names)) = table else {
                continue;
            };

            for symbol in symbols
                .iter()
                .filter(|symbol| !symbol.is_undefined())
                .filter(|symbol| symbol.st_name > 0)
            {
                let name = names.get(symbol.st_name as usize)?;
                if mask.is_some_and(|mask| !mask.is_match(name)) {
                    continue;
                }

                let record = SymbolRecord {
                    name,
                    value: symbol.st_value,
                    size: symbol.st_size,
                    kind: SymbolKind::from_st_type(symbol.st_symtype()),
                    binding: SymbolBinding::from_st_bind(symbol.st_bind()),
                };
                if visit(record).is_break() {
                    return Ok(());
                }
            }
        }

        Ok(())
    }
}

impl std::fmt::Debug for DebugSymbolFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DebugSymbolFile")
            .field("path", &self.path)
            .field("image_base", &format_args!("0x{:x}", self.image_base))
            .finish()
    }
}

