use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use itertools::Itertools as _;
use xxhash_rust::xxh64::xxh64;

use crate::{Error, Result};

/// Persistent `name -> offset` table for one image.
///
/// The backing file is plain text, one `name\toffset` entry per line,
/// with the offset as a signed decimal integer.  It is read in full on
/// open and rewritten in full by [`SymbolCache::persist`].  There is
/// no locking: when several processes share a cache file, the last
/// one to persist wins.
pub struct SymbolCache {
    path: PathBuf,
    entries: BTreeMap<String, i64>,
    skipped: Vec<Error>,
    dirty: bool,
}

impl SymbolCache {
    /// File name of the cache for `image`.
    ///
    /// Images that share a file name, such as two installed versions
    /// of the same runtime, must not share a cache.  The name is
    /// qualified by the image's build id when it is known, and by a
    /// hash of the full image path otherwise.
    pub fn file_name_for(image: &str, build_id: Option<&str>) -> Result<String> {
        let file_name = Path::new(image)
            .file_name()
            .and_then(|name| name.to_str())
            .filter(|name| !name.is_empty())
            .ok_or_else(|| Error::InvalidImageName(image.to_string()))?;
        let qualifier = match build_id {
            Some(build_id) => build_id.to_string(),
            None => format!("{:016x}", xxh64(image.as_bytes(), 0)),
        };
        Ok(format!("{file_name}.{qualifier}.symbol-offsets"))
    }

    /// Load the cache at `path`.  A missing file is an empty cache.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let text = match std::fs::read_to_string(&path) {
            Ok(text) => text,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                String::new()
            }
            Err(err) => return Err(err.into()),
        };

        let mut entries = BTreeMap::new();
        let mut skipped = Vec::new();
        for (i, line) in text.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match Self::parse_line(line) {
                Some((name, offset)) => {
                    entries.insert(name.to_string(), offset);
                }
                None => {
                    let err = Error::CorruptCacheEntry {
                        path: path.clone(),
                        line: i + 1,
                        entry: line.to_string(),
                    };
                    log::warn!("Skipping {err}");
                    skipped.push(err);
                }
            }
        }

        log::debug!(
            "Loaded {} cached symbol offsets from {}",
            entries.len(),
            path.display()
        );

        Ok(Self {
            path,
            entries,
            skipped,
            dirty: false,
        })
    }

    /// Offsets that would not be valid for any symbol are rejected
    /// here, so that a corrupted file cannot produce a bad address.
    fn parse_line(line: &str) -> Option<(&str, i64)> {
        let (name, offset) = line.rsplit_once('\t')?;
        let offset = offset.trim().parse::<i64>().ok()?;
        (!name.is_empty() && offset > 0).then_some((name, offset))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn get(&self, name: &str) -> Option<i64> {
        self.entries.get(name).copied()
    }

    /// Entries of the backing file that were not trusted on load.
    pub fn load_report(&self) -> &[Error] {
        &self.skipped
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, i64)> + '_ {
        self.entries
            .iter()
            .map(|(name, offset)| (name.as_str(), *offset))
    }

    /// Record an offset.  Callers must have validated it, as
    /// `SymbolResolver` does before any insertion.
    pub(crate) fn insert(&mut self, name: &str, offset: i64) {
        debug_assert!(offset > 0);
        if self.entries.insert(name.to_string(), offset) != Some(offset) {
            self.dirty = true;
        }
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Rewrite the backing file, if anything changed since it was
    /// loaded or last persisted.
    pub fn persist(&mut self) -> Result<()> {
        if !self.dirty {
            return Ok(());
        }

        if let Some(dir) = self.path.parent() {
            std::fs::create_dir_all(dir)?;
        }

        let text = self
            .entries
            .iter()
            .map(|(name, offset)| format!("{name}\t{offset}\n"))
            .join("");
        std::fs::write(&self.path, text)?;

        log::debug!(
            "Persisted {} symbol offsets to {}",
            self.entries.len(),
            self.path.display()
        );
        self.dirty = false;
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn file_name_from_image_path() -> Result<()> {
        assert_eq!(
            SymbolCache::file_name_for("/usr/share/dotnet/libcoreclr.so", Some("3f2a"))?,
            "libcoreclr.so.3f2a.symbol-offsets"
        );

        let v6 = SymbolCache::file_name_for("/opt/dotnet/6.0.25/libcoreclr.so", None)?;
        let v8 = SymbolCache::file_name_for("/opt/dotnet/8.0.1/libcoreclr.so", None)?;
        assert!(v6.starts_with("libcoreclr.so."));
        assert_ne!(v6, v8);
        assert_eq!(
            v6,
            SymbolCache::file_name_for("/opt/dotnet/6.0.25/libcoreclr.so", None)?
        );

        assert!(SymbolCache::file_name_for("/", None).is_err());
        Ok(())
    }

    #[test]
    fn rejects_invalid_lines() {
        assert_eq!(SymbolCache::parse_line("a\t16"), Some(("a", 16)));
        assert_eq!(SymbolCache::parse_line("a\t0"), None);
        assert_eq!(SymbolCache::parse_line("a\t-8"), None);
        assert_eq!(SymbolCache::parse_line("a\tsixteen"), None);
        assert_eq!(SymbolCache::parse_line("a 16"), None);
        assert_eq!(SymbolCache::parse_line("\t16"), None);
    }
}
