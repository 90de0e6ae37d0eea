use std::ops::Range;

use crate::{MemoryMapRegion, Pointer};

/// A shared library or executable mapped into a process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadedModule {
    /// File name, without its directory.
    pub name: String,

    /// Full path of the backing file, as reported by the kernel.
    pub path: String,

    /// Address at which file offset zero is mapped.  Symbol offsets
    /// are relative to this address.
    pub base: Pointer,

    /// Lowest and one-past-highest address of any region backed by
    /// the module's file.
    pub bounds: Range<Pointer>,
}

impl LoadedModule {
    /// Collect every region backed by the file whose name is
    /// `short_name`.  Returns `None` if no region is mapped from
    /// file offset zero, since the load base is then unknown.
    pub fn from_regions<'a>(
        short_name: &str,
        regions: impl IntoIterator<Item = &'a MemoryMapRegion>,
    ) -> Option<Self> {
        let regions: Vec<_> = regions
            .into_iter()
            .filter(|region| region.is_file_backed())
            .filter(|region| region.short_name() == Some(short_name))
            .collect();

        let first = regions.iter().find(|region| region.file_offset() == 0)?;
        let path = first.name()?.to_string();

        let bounds = regions
            .iter()
            .filter(|region| region.name() == Some(path.as_str()))
            .map(|region| region.address_range())
            .reduce(|a, b| a.start.min(b.start)..a.end.max(b.end))?;

        Some(Self {
            name: short_name.to_string(),
            base: first.mmap_start_address(),
            path,
            bounds,
        })
    }

    pub fn contains(&self, ptr: Pointer) -> bool {
        self.bounds.contains(&ptr)
    }

    pub fn offset_of(&self, ptr: Pointer) -> Option<usize> {
        self.contains(ptr).then(|| ptr - self.base)
    }
}

/// Capability to find a loaded module by its short name
/// (e.g. `libcoreclr.so`).
pub trait ModuleLookup {
    fn find_module(&self, short_name: &str) -> Option<LoadedModule>;
}

/// A fixed set of modules, for use where no live process is
/// available.
#[derive(Debug, Default, Clone)]
pub struct StaticModules(pub Vec<LoadedModule>);

impl ModuleLookup for StaticModules {
    fn find_module(&self, short_name: &str) -> Option<LoadedModule> {
        self.0.iter().find(|module| module.name == short_name).cloned()
    }
}
