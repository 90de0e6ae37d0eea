use std::collections::{HashMap, HashSet};
use std::ops::ControlFlow;
use std::path::Path;

use memory_reader::{LoadedModule, Pointer, TypedPointer};
use regex::Regex;

use crate::{
    CandidateNames, DebugSymbolFile, Error, Result, Symbol, SymbolCache,
    SymbolConfig, SymbolLocator, SymbolRecord, SymbolSource,
};

/// Resolves symbol names to offsets within a binary image.
///
/// Offsets are served from a persistent per-image cache where
/// possible.  On a miss, the image's symbol source is enumerated
/// until the first match, and the result is added to the cache.
/// Caches are written back by [`SymbolResolver::close`], which also
/// runs on drop.
///
/// Images are identified by the string passed in, normally the path
/// of the loaded file.  A symbol source is opened the first time an
/// image is used, unless one was registered beforehand.
pub struct SymbolResolver {
    config: SymbolConfig,
    sources: HashMap<String, Box<dyn SymbolSource>>,
    caches: HashMap<String, SymbolCache>,
    enumerations: usize,
}

impl SymbolResolver {
    pub fn new(config: SymbolConfig) -> Self {
        Self {
            config,
            sources: HashMap::new(),
            caches: HashMap::new(),
            enumerations: 0,
        }
    }

    pub fn config(&self) -> &SymbolConfig {
        &self.config
    }

    /// Use `source` for all lookups in `image`, instead of searching
    /// for a debug file.
    pub fn register_source(
        &mut self,
        image: impl Into<String>,
        source: impl SymbolSource + 'static,
    ) {
        self.sources.insert(image.into(), Box::new(source));
    }

    /// Number of times a symbol table has been walked.  Cache hits do
    /// not walk any table.
    pub fn enumeration_count(&self) -> usize {
        self.enumerations
    }

    /// The offset cache of `image`, loading it if needed.
    pub fn cache(&mut self, image: &str) -> Result<&SymbolCache> {
        Self::cache_entry(&mut self.caches, &self.config, image)
            .map(|cache| &*cache)
    }

    fn cache_entry<'c>(
        caches: &'c mut HashMap<String, SymbolCache>,
        config: &SymbolConfig,
        image: &str,
    ) -> Result<&'c mut SymbolCache> {
        if !caches.contains_key(image) {
            let build_id = Self::image_build_id(image);
            let file_name = SymbolCache::file_name_for(image, build_id.as_deref())?;
            let path = config.cache_dir.join(file_name);
            caches.insert(image.to_string(), SymbolCache::open(path)?);
        }
        caches
            .get_mut(image)
            .ok_or_else(|| Error::NoSymbolSource(image.to_string()))
    }

    /// Build id of the image on disk.  Images that cannot be read as
    /// ELF, or that are only known through a registered source, have
    /// none.
    fn image_build_id(image: &str) -> Option<String> {
        let path = Path::new(image);
        if !path.is_file() {
            return None;
        }
        match DebugSymbolFile::open(path).and_then(|file| file.build_id()) {
            Ok(build_id) => build_id,
            Err(err) => {
                log::debug!("No build id for {image}: {err}");
                None
            }
        }
    }

    fn source_entry<'s>(
        sources: &'s mut HashMap<String, Box<dyn SymbolSource>>,
        config: &SymbolConfig,
        image: &str,
    ) -> Result<&'s dyn SymbolSource> {
        if !sources.contains_key(image) {
            let path = SymbolLocator::new(config).locate(Path::new(image))?;
            let file = DebugSymbolFile::open(path)?;
            sources.insert(image.to_string(), Box::new(file));
        }
        sources
            .get(image)
            .map(|source| source.as_ref())
            .ok_or_else(|| Error::NoSymbolSource(image.to_string()))
    }

    fn validate(image: &str, name: &str, offset: i64) -> Result<i64> {
        if offset > 0 {
            Ok(offset)
        } else {
            Err(Error::InvalidSymbolOffset {
                image: image.to_string(),
                name: name.to_string(),
                offset,
            })
        }
    }

    /// Walk the symbol table of `image` once, stopping at the first
    /// symbol for which `visit` breaks.
    fn enumerate(
        &mut self,
        image: &str,
        mask: Option<&Regex>,
        visit: &mut dyn FnMut(SymbolRecord<'_>, u64) -> ControlFlow<()>,
    ) -> Result<()> {
        let source = Self::source_entry(&mut self.sources, &self.config, image)?;
        let image_base = source.image_base();
        self.enumerations += 1;
        log::debug!("Enumerating symbols of {image}");
        source.for_each_symbol(mask, &mut |record| visit(record, image_base))
    }

    fn find_symbol(
        &mut self,
        image: &str,
        name: &str,
        mask: Option<&Regex>,
    ) -> Result<Symbol> {
        let mut found = None;
        self.enumerate(image, mask, &mut |record, image_base| {
            if CandidateNames::of(record.name).matches(name) {
                found = Some(Symbol::from_record(&record, image_base));
                ControlFlow::Break(())
            } else {
                ControlFlow::Continue(())
            }
        })?;

        found.ok_or_else(|| Error::SymbolNotFound {
            image: image.to_string(),
            name: name.to_string(),
        })
    }

    fn resolve_impl(
        &mut self,
        image: &str,
        name: &str,
        mask: Option<&Regex>,
    ) -> Result<i64> {
        let cache = Self::cache_entry(&mut self.caches, &self.config, image)?;
        if let Some(offset) = cache.get(name) {
            log::debug!("Cache hit for {name} in {image}: {offset}");
            return Ok(offset);
        }

        let symbol = self.find_symbol(image, name, mask)?;
        let offset = Self::validate(image, name, symbol.offset)?;
        Self::cache_entry(&mut self.caches, &self.config, image)?
            .insert(name, offset);
        Ok(offset)
    }

    /// Offset of `name` from the load base of `image`.
    pub fn resolve(&mut self, image: &str, name: &str) -> Result<i64> {
        self.resolve_impl(image, name, None)
    }

    /// As [`Self::resolve`], but only symbols whose raw name matches
    /// the regular expression `mask` are considered on a cache miss.
    pub fn resolve_masked(
        &mut self,
        image: &str,
        name: &str,
        mask: &str,
    ) -> Result<i64> {
        let mask = Regex::new(mask)?;
        self.resolve_impl(image, name, Some(&mask))
    }

    /// Full symbol table entry of `name`.  This always walks the
    /// symbol table, since the cache only holds offsets.
    pub fn resolve_symbol(&mut self, image: &str, name: &str) -> Result<Symbol> {
        let symbol = self.find_symbol(image, name, None)?;
        let offset = Self::validate(image, name, symbol.offset)?;
        Self::cache_entry(&mut self.caches, &self.config, image)?
            .insert(name, offset);
        Ok(symbol)
    }

    pub fn resolve_address(
        &mut self,
        module_base: Pointer,
        image: &str,
        name: &str,
    ) -> Result<Pointer> {
        let offset = self.resolve(image, name)?;
        Ok(module_base.try_offset(offset as isize)?)
    }

    pub fn resolve_typed<T>(
        &mut self,
        module_base: Pointer,
        image: &str,
        name: &str,
    ) -> Result<TypedPointer<T>> {
        self.resolve_address(module_base, image, name)
            .map(TypedPointer::new)
    }

    /// Address of `name` within a loaded module, using the module's
    /// path as the image.
    pub fn resolve_in_module(
        &mut self,
        module: &LoadedModule,
        name: &str,
    ) -> Result<Pointer> {
        self.resolve_address(module.base, &module.path, name)
    }

    /// Resolve several names at once.  Output `i` is the offset of
    /// `names[i]`.  All names missing from the cache are found in a
    /// single pass over the symbol table.  A name may appear only
    /// once, since there would be no way to tell which of several
    /// same-named symbols each occurrence refers to.
    pub fn resolve_many(
        &mut self,
        image: &str,
        names: &[&str],
    ) -> Result<Vec<i64>> {
        let mut seen = HashSet::new();
        if let Some(dup) = names.iter().find(|name| !seen.insert(**name)) {
            return Err(Error::DuplicateSymbolName(dup.to_string()));
        }

        let cache = Self::cache_entry(&mut self.caches, &self.config, image)?;
        let mut offsets: Vec<Option<i64>> =
            names.iter().map(|name| cache.get(name)).collect();

        let mut pending: HashMap<&str, usize> = names
            .iter()
            .enumerate()
            .filter(|(i, _)| offsets[*i].is_none())
            .map(|(i, name)| (*name, i))
            .collect();

        if !pending.is_empty() {
            let mut found: Vec<(usize, i64)> = Vec::new();
            self.enumerate(image, None, &mut |record, image_base| {
                let candidates = CandidateNames::of(record.name);
                for candidate in candidates.iter() {
                    if let Some(index) = pending.remove(candidate) {
                        let symbol = Symbol::from_record(&record, image_base);
                        found.push((index, symbol.offset));
                    }
                }
                if pending.is_empty() {
                    ControlFlow::Break(())
                } else {
                    ControlFlow::Continue(())
                }
            })?;

            let cache = Self::cache_entry(&mut self.caches, &self.config, image)?;
            for (index, offset) in found {
                let offset = Self::validate(image, names[index], offset)?;
                cache.insert(names[index], offset);
                offsets[index] = Some(offset);
            }
        }

        names
            .iter()
            .zip(offsets)
            .map(|(name, offset)| {
                offset.ok_or_else(|| Error::SymbolNotFound {
                    image: image.to_string(),
                    name: name.to_string(),
                })
            })
            .collect()
    }

    /// Write every modified cache back to disk.  Safe to call more
    /// than once.
    pub fn close(&mut self) -> Result<()> {
        let mut first_err = None;
        for cache in self.caches.values_mut() {
            if let Err(err) = cache.persist() {
                log::warn!(
                    "Could not persist symbol cache {}: {err}",
                    cache.path().display()
                );
                first_err.get_or_insert(err);
            }
        }
        first_err.map_or(Ok(()), Err)
    }
}

impl Drop for SymbolResolver {
    fn drop(&mut self) {
        // Failures were already logged by close().
        let _ = self.close();
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{SymbolBinding, SymbolKind};

    struct FixedSource(Vec<(&'static str, u64)>);

    impl SymbolSource for FixedSource {
        fn image_base(&self) -> u64 {
            0x1000
        }

        fn for_each_symbol(
            &self,
            mask: Option<&Regex>,
            visit: &mut dyn FnMut(SymbolRecord<'_>) -> ControlFlow<()>,
        ) -> Result<()> {
            for &(name, value) in &self.0 {
                if mask.is_some_and(|mask| !mask.is_match(name)) {
                    continue;
                }
                let record = SymbolRecord {
                    name,
                    value,
                    size: 8,
                    kind: SymbolKind::Object,
                    binding: SymbolBinding::Global,
                };
                if visit(record).is_break() {
                    break;
                }
            }
            Ok(())
        }
    }

    fn resolver(dir: &Path) -> SymbolResolver {
        let mut resolver =
            SymbolResolver::new(SymbolConfig::default().with_cache_dir(dir));
        resolver.register_source(
            "/opt/libfake.so",
            FixedSource(vec![
                ("first", 0x1010),
                ("second", 0x1020),
                ("overloaded", 0x1030),
                ("overloaded", 0x1040),
                ("before_base", 0x0800),
                ("third", 0x1050),
            ]),
        );
        resolver
    }

    #[test]
    fn first_match_wins() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let mut resolver = resolver(dir.path());
        assert_eq!(resolver.resolve("/opt/libfake.so", "overloaded")?, 0x30);
        Ok(())
    }

    #[test]
    fn invalid_offset_is_not_cached() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let mut resolver = resolver(dir.path());
        assert!(matches!(
            resolver.resolve("/opt/libfake.so", "before_base"),
            Err(Error::InvalidSymbolOffset { offset: -0x800, .. })
        ));
        assert_eq!(resolver.cache("/opt/libfake.so")?.get("before_base"), None);
        Ok(())
    }

    #[test]
    fn batch_preserves_input_order() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let mut resolver = resolver(dir.path());

        resolver.resolve("/opt/libfake.so", "second")?;
        let offsets =
            resolver.resolve_many("/opt/libfake.so", &["third", "second", "first"])?;

        assert_eq!(offsets, vec![0x50, 0x20, 0x10]);
        assert_eq!(resolver.enumeration_count(), 2);
        Ok(())
    }

    #[test]
    fn batch_rejects_duplicates() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let mut resolver = resolver(dir.path());
        assert!(matches!(
            resolver.resolve_many("/opt/libfake.so", &["first", "second", "first"]),
            Err(Error::DuplicateSymbolName(name)) if name == "first"
        ));
        assert_eq!(resolver.enumeration_count(), 0);
        Ok(())
    }

    #[test]
    fn batch_reports_missing_name() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let mut resolver = resolver(dir.path());
        assert!(matches!(
            resolver.resolve_many("/opt/libfake.so", &["first", "missing"]),
            Err(Error::SymbolNotFound { name, .. }) if name == "missing"
        ));
        Ok(())
    }

    #[test]
    fn mask_restricts_search() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let mut resolver = resolver(dir.path());
        assert!(matches!(
            resolver.resolve_masked("/opt/libfake.so", "first", "^s"),
            Err(Error::SymbolNotFound { .. })
        ));
        assert_eq!(resolver.resolve_masked("/opt/libfake.so", "second", "^s")?, 0x20);
        Ok(())
    }

    #[test]
    fn address_in_module() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let mut resolver = resolver(dir.path());
        let base = Pointer::new(0x7f00_0000_0000usize);
        assert_eq!(
            resolver.resolve_address(base, "/opt/libfake.so", "third")?,
            Pointer::new(0x7f00_0000_0050usize)
        );
        Ok(())
    }
}
