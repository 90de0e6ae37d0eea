use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error)]
pub enum Error {
    #[error("memory_reader::Error{{ {err} }}")]
    MemoryReader {
        #[from]
        err: memory_reader::Error,
    },

    #[error("std::io::Error{{ {err} }}")]
    Io {
        #[from]
        err: std::io::Error,
    },

    #[error("elf::ParseError{{ {err} }}")]
    InvalidElfFormat {
        #[from]
        err: elf::ParseError,
    },

    #[error("regex::Error{{ {err} }}")]
    InvalidSymbolMask {
        #[from]
        err: regex::Error,
    },

    #[error("Symbol '{name}' not found in {image}")]
    SymbolNotFound { image: String, name: String },

    #[error(
        "Symbol '{name}' in {image} resolved to offset {offset}, \
         which is not a valid location within the image"
    )]
    InvalidSymbolOffset {
        image: String,
        name: String,
        offset: i64,
    },

    #[error("Symbol '{0}' requested more than once in a single batch")]
    DuplicateSymbolName(String),

    #[error("No symbol source registered for image '{0}'")]
    NoSymbolSource(String),

    #[error("Could not derive a cache file name from image '{0}'")]
    InvalidImageName(String),

    #[error("{path}:{line}: corrupt cache entry '{entry}'")]
    CorruptCacheEntry {
        path: PathBuf,
        line: usize,
        entry: String,
    },

    #[error("No debug symbols found for {image}, searched {searched:?}")]
    DebugSymbolsNotFound {
        image: String,
        searched: Vec<PathBuf>,
    },

    #[error("ELF file {0} has no build id")]
    MissingBuildId(PathBuf),

    #[error("Downloading symbols for {image} failed: {reason}")]
    DownloadFailed { image: String, reason: String },

    #[error("Downloading symbols for {image} did not finish within {timeout:?}")]
    DownloadTimeout { image: String, timeout: Duration },

    #[error(
        "Two downloads of the symbols for {image} differ \
         ({first} vs {second})"
    )]
    DownloadedSymbolMismatch {
        image: String,
        first: PathBuf,
        second: PathBuf,
    },
}

impl std::fmt::Debug for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self)
    }
}
