use std::ops::Range;
use std::path::Path;

use super::{Error, Pointer, Result};

/// One line of `/proc/<pid>/maps`.
#[derive(Debug, Clone)]
pub struct MemoryMapRegion {
    range: Range<Pointer>,
    file_offset: usize,
    pub name: Option<String>,
    pub is_executable: bool,
    pub is_readable: bool,
    pub is_writable: bool,
}

impl MemoryMapRegion {
    pub fn new(map_range: proc_maps::MapRange) -> Result<Self> {
        let name = map_range
            .filename()
            .map(|path| {
                path.to_str()
                    .map(str::to_string)
                    .ok_or(Error::InvalidUTF8InPath)
            })
            .transpose()?;

        let start = map_range.start();
        Ok(Self {
            range: start.into()..(start + map_range.size()).into(),
            file_offset: map_range.offset,
            name,
            is_readable: map_range.is_read(),
            is_writable: map_range.is_write(),
            is_executable: map_range.is_exec(),
        })
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// File name of the backing file, without its directory.
    pub fn short_name(&self) -> Option<&str> {
        let name = self.name.as_deref()?;
        Path::new(name)
            .file_name()
            .and_then(|file_name| file_name.to_str())
    }

    /// True for regions mapped from a file on disk, as opposed to
    /// anonymous or pseudo-regions such as `[heap]`.
    pub fn is_file_backed(&self) -> bool {
        self.name().is_some_and(|name| name.starts_with('/'))
    }

    /// Address at which offset zero of the backing file would be
    /// mapped, given this region's offset.
    pub fn mmap_start_address(&self) -> Pointer {
        self.range.start - self.file_offset
    }

    pub fn address_range(&self) -> Range<Pointer> {
        self.range.clone()
    }

    pub fn file_offset(&self) -> usize {
        self.file_offset
    }
}
