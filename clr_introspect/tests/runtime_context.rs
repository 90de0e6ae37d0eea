use std::ops::ControlFlow;

use clr_introspect::{
    Callable, Error, FieldLoad, GcHeapBounds, ImportMember, ImportSpec,
    RuntimeConfig, RuntimeContext, StaticProcess, SyncBlockValue,
};
use memory_reader::{
    LoadedModule, MemoryAccess, Pointer, SnapshotMemory, StaticModules,
};
use regex::Regex;
use symbol_manager::{
    SymbolBinding, SymbolConfig, SymbolKind, SymbolRecord, SymbolSource,
};
use tempfile::TempDir;

const RUNTIME_BASE: usize = 0x7f00_0000_0000;
const RUNTIME_PATH: &str = "/usr/share/dotnet/shared/libcoreclr.so";

const HEAP_LOWEST: usize = 0x1_0000_0000;
const HEAP_HIGHEST: usize = 0x2_0000_0000;
const OBJECT: usize = HEAP_LOWEST + 0x1000;
const OBJECT_METHOD_TABLE: usize = HEAP_LOWEST + 0x2000;

const SYMBOLS: [(&str, u64); 7] = [
    ("g_gc_lowest_address", 0x100),
    ("g_gc_highest_address", 0x108),
    ("s_objectCount", 0x110),
    ("s_liveCount", 0x118),
    ("s_config", 0x120),
    ("AllocateObject", 0x2000),
    ("IsHeapPointer", 0x2100),
];

/// Symbols at fixed offsets from the start of the image.
struct FixedSymbols;

impl SymbolSource for FixedSymbols {
    fn image_base(&self) -> u64 {
        0
    }

    fn for_each_symbol(
        &self,
        mask: Option<&Regex>,
        visit: &mut dyn FnMut(SymbolRecord<'_>) -> ControlFlow<()>,
    ) -> symbol_manager::Result<()> {
        for (name, value) in SYMBOLS {
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

fn runtime_globals() -> Vec<u8> {
    let mut bytes = Vec::new();
    bytes.extend(HEAP_LOWEST.to_le_bytes());
    bytes.extend(HEAP_HIGHEST.to_le_bytes());
    bytes.extend(42u32.to_le_bytes());
    bytes.extend([0u8; 4]);
    bytes.extend(7u32.to_le_bytes());
    bytes.extend([0u8; 4]);
    bytes.extend(0xdead_beef_u64.to_le_bytes());
    bytes
}

fn heap_object() -> Vec<u8> {
    // Object header, padding, then the MethodTable pointer.
    let mut bytes = vec![0u8; 4];
    bytes.extend(0x0800_0003_u32.to_le_bytes());
    bytes.extend(OBJECT_METHOD_TABLE.to_le_bytes());
    bytes.extend([0u8; 16]);
    bytes
}

fn object_method_table() -> Vec<u8> {
    let mut bytes = vec![0u8; 64];
    bytes[4..8].copy_from_slice(&0x18u32.to_le_bytes());
    bytes
}

fn context(cache_dir: &TempDir) -> Result<RuntimeContext, Error> {
    context_with_config(cache_dir, RuntimeConfig::default())
}

fn context_with_config(
    cache_dir: &TempDir,
    config: RuntimeConfig,
) -> Result<RuntimeContext, Error> {
    let _ = env_logger::builder().is_test(true).try_init();

    let memory = SnapshotMemory::new()
        .with_region(RUNTIME_BASE + 0x100, runtime_globals())
        .with_region(OBJECT - 8, heap_object())
        .with_region(OBJECT_METHOD_TABLE, object_method_table());
    let runtime = LoadedModule {
        name: "libcoreclr.so".into(),
        path: RUNTIME_PATH.into(),
        base: Pointer::new(RUNTIME_BASE),
        bounds: Pointer::new(RUNTIME_BASE)..Pointer::new(RUNTIME_BASE + 0x10_0000),
    };
    let process = StaticProcess {
        memory,
        modules: StaticModules(vec![runtime]),
    };

    let config = config
        .with_symbols(SymbolConfig::default().with_cache_dir(cache_dir.path()));
    let mut context = RuntimeContext::new(process, config)?;
    context.register_runtime_symbols(FixedSymbols);
    Ok(context)
}

fn cache_dir() -> TempDir {
    tempfile::tempdir().expect("temporary directory")
}

fn heap_utilities() -> ImportSpec {
    ImportSpec::new("GCHeapUtilities", "libcoreclr.so")
        .with_namespace("Runtime.Internals")
        .with_member(ImportMember::method("Allocate", "AllocateObject"))
        .with_member(ImportMember::method("IsHeapPointer", "IsHeapPointer").bound())
        .with_member(ImportMember::field(
            "objectCount",
            "s_objectCount",
            FieldLoad::Copy,
            4,
        ))
        .with_member(ImportMember::field(
            "liveCount",
            "s_liveCount",
            FieldLoad::Proxy,
            4,
        ))
        .with_member(ImportMember::field(
            "config",
            "s_config",
            FieldLoad::FastOverwrite,
            8,
        ))
}

#[test]
fn runtime_module_must_be_loaded() {
    let dir = cache_dir();
    let process = StaticProcess {
        memory: SnapshotMemory::new(),
        modules: StaticModules::default(),
    };
    let config = RuntimeConfig::default()
        .with_symbols(SymbolConfig::default().with_cache_dir(dir.path()));
    assert!(matches!(
        RuntimeContext::new(process, config),
        Err(Error::ModuleNotLoaded(_))
    ));
}

#[test]
fn load_applies_every_member() -> Result<(), Error> {
    let dir = cache_dir();
    let mut context = context(&dir)?;
    let spec = heap_utilities();
    context.load_imports(&spec)?;

    let imports = context.imports();
    assert!(imports.is_loaded("GCHeapUtilities"));
    assert_eq!(
        imports.method_address("GCHeapUtilities", "Allocate")?,
        Pointer::new(RUNTIME_BASE + 0x2000)
    );
    assert!(matches!(
        imports.method_address("GCHeapUtilities", "IsHeapPointer"),
        Err(Error::NoSuchImport { .. })
    ));
    assert_eq!(
        imports.field_address("GCHeapUtilities", "liveCount")?,
        Pointer::new(RUNTIME_BASE + 0x118)
    );

    let bound = spec.dispatch_name("IsHeapPointer");
    assert_eq!(
        context.dispatch().get(&bound).and_then(Callable::as_native),
        Some(Pointer::new(RUNTIME_BASE + 0x2100))
    );
    assert!(context.dispatch().is_retargeted(&bound));
    Ok(())
}

#[test]
fn field_load_strategies() -> Result<(), Error> {
    let dir = cache_dir();
    let mut context = context(&dir)?;
    context.load_imports(&heap_utilities())?;

    let field = |context: &RuntimeContext, name: &str| {
        context
            .imports()
            .field_bytes("GCHeapUtilities", name, context.memory())
    };
    assert_eq!(field(&context, "objectCount")?, 42u32.to_le_bytes());
    assert_eq!(field(&context, "liveCount")?, 7u32.to_le_bytes());
    assert_eq!(field(&context, "config")?, 0xdead_beef_u64.to_le_bytes());

    context
        .memory()
        .write_all(Pointer::new(RUNTIME_BASE + 0x110), &43u32.to_le_bytes())?;
    context
        .memory()
        .write_all(Pointer::new(RUNTIME_BASE + 0x118), &8u32.to_le_bytes())?;

    // Only the proxy observes writes made after the load.
    assert_eq!(field(&context, "objectCount")?, 42u32.to_le_bytes());
    assert_eq!(field(&context, "liveCount")?, 8u32.to_le_bytes());
    Ok(())
}

#[test]
fn unload_restores_previous_state() -> Result<(), Error> {
    let dir = cache_dir();
    let mut context = context(&dir)?;
    let spec = heap_utilities();
    let bound = spec.dispatch_name("IsHeapPointer");
    let storage = spec.dispatch_name("config");

    context.dispatch_mut().register(&bound, Callable::rust(|_| 1));
    context.load_imports(&spec)?;
    assert!(context.dispatch().is_retargeted(&bound));

    context.unload_imports("GCHeapUtilities");
    assert!(!context.imports().is_loaded("GCHeapUtilities"));
    assert!(!context.dispatch().is_retargeted(&bound));
    assert_eq!(context.dispatch().call(&bound, &[0])?, 1);
    assert_eq!(context.imports().field_storage(&storage), Some(&[0u8; 8][..]));

    // A second unload, and an unload of a type never loaded, change
    // nothing.
    context.unload_imports("GCHeapUtilities");
    context.unload_imports("StringTable");
    assert_eq!(context.dispatch().call(&bound, &[0])?, 1);
    assert_eq!(context.dispatch().len(), 1);

    context.load_imports(&spec)?;
    assert_eq!(
        context.imports().field_storage(&storage),
        Some(&0xdead_beef_u64.to_le_bytes()[..])
    );
    Ok(())
}

#[test]
fn reload_replaces_previous_load() -> Result<(), Error> {
    let dir = cache_dir();
    let mut context = context(&dir)?;
    context.load_imports(&heap_utilities())?;
    context
        .memory()
        .write_all(Pointer::new(RUNTIME_BASE + 0x110), &50u32.to_le_bytes())?;
    context.load_imports(&heap_utilities())?;

    assert_eq!(
        context.imports().field_bytes(
            "GCHeapUtilities",
            "objectCount",
            context.memory()
        )?,
        50u32.to_le_bytes()
    );
    assert_eq!(context.imports().loaded_types().count(), 1);
    Ok(())
}

#[test]
fn invalid_spec_is_rejected_before_resolving() -> Result<(), Error> {
    let dir = cache_dir();
    let mut context = context(&dir)?;

    let mut spec = heap_utilities();
    spec.namespace = None;
    assert!(matches!(
        context.load_imports(&spec),
        Err(Error::MissingImportNamespace(_))
    ));

    let spec = heap_utilities()
        .with_member(ImportMember::method("Free", "FreeObject").with_modes(true, true));
    assert!(matches!(
        context.load_imports(&spec),
        Err(Error::ConflictingBindingModes { .. })
    ));

    assert_eq!(context.symbols().enumeration_count(), 0);
    assert!(context.dispatch().is_empty());
    Ok(())
}

#[test]
fn failed_load_changes_nothing() -> Result<(), Error> {
    let dir = cache_dir();
    let mut context = context(&dir)?;

    // The symbol resolves, but its storage is not readable.
    let mut spec = heap_utilities().with_member(ImportMember::field(
        "handlers",
        "AllocateObject",
        FieldLoad::Copy,
        8,
    ));
    spec.members.retain(|member| member.name != "Allocate");
    assert!(matches!(
        context.load_imports(&spec),
        Err(Error::MemoryReader { .. })
    ));

    assert!(!context.imports().is_loaded("GCHeapUtilities"));
    assert!(context.dispatch().is_empty());
    assert_eq!(context.imports().field_storage(&spec.dispatch_name("config")), None);

    let spec = heap_utilities()
        .with_member(ImportMember::method("Free", "FreeObject"));
    assert!(matches!(
        context.load_imports(&spec),
        Err(Error::SymbolManager { .. })
    ));
    assert!(context.dispatch().is_empty());
    Ok(())
}

#[test]
fn heap_bounds_from_runtime_globals() -> Result<(), Error> {
    let dir = cache_dir();
    let mut context = context(&dir)?;

    let bounds = context.heap_bounds()?;
    assert_eq!(
        bounds,
        GcHeapBounds {
            lowest: Pointer::new(HEAP_LOWEST),
            highest: Pointer::new(HEAP_HIGHEST),
        }
    );
    assert!(bounds.contains(Pointer::new(OBJECT)));

    assert!(!context.is_heap_pointer(Pointer::new(HEAP_HIGHEST + 8))?);
    assert!(matches!(
        context.is_heap_pointer(Pointer::new(OBJECT)),
        Err(Error::NotBound(_))
    ));
    let enumerations = context.symbols().enumeration_count();
    assert!(!context.bind_heap_predicate()?);
    assert_eq!(context.symbols().enumeration_count(), enumerations);

    context
        .dispatch_mut()
        .register(GcHeapBounds::IS_HEAP_POINTER, Callable::rust(|args| {
            (args[0] == OBJECT) as usize
        }));
    assert!(context.is_heap_pointer(Pointer::new(OBJECT))?);
    assert!(!context.is_heap_pointer(Pointer::new(OBJECT + 8))?);

    let enumerations = context.symbols().enumeration_count();
    context.heap_bounds()?;
    assert_eq!(context.symbols().enumeration_count(), enumerations);
    Ok(())
}

extern "C" fn is_test_object(ptr: usize) -> usize {
    (ptr == OBJECT) as usize
}

#[test]
fn runtime_heap_predicate_is_bound() -> Result<(), Error> {
    let dir = cache_dir();
    let config = RuntimeConfig::default().with_heap_pointer_symbol("IsHeapPointer");
    let mut context = context_with_config(&dir, config)?;

    assert!(context.bind_heap_predicate()?);
    assert_eq!(
        context
            .dispatch()
            .get(GcHeapBounds::IS_HEAP_POINTER)
            .and_then(Callable::as_native),
        Some(Pointer::new(RUNTIME_BASE + 0x2100))
    );
    assert!(matches!(
        context.is_heap_pointer(Pointer::new(OBJECT)),
        Err(Error::NativeCallRequiresUnsafe(_))
    ));

    // The snapshot's runtime is not executable, so call a local
    // function with the same signature instead.
    let func: extern "C" fn(usize) -> usize = is_test_object;
    context
        .dispatch_mut()
        .retarget(GcHeapBounds::IS_HEAP_POINTER, Pointer::new(func as usize));
    unsafe {
        assert!(context.is_heap_pointer_native(Pointer::new(OBJECT))?);
        assert!(!context.is_heap_pointer_native(Pointer::new(OBJECT + 8))?);
        assert!(!context.is_heap_pointer_native(Pointer::new(HEAP_HIGHEST + 8))?);
    }

    context.dispatch_mut().restore(GcHeapBounds::IS_HEAP_POINTER);
    assert_eq!(
        context
            .dispatch()
            .get(GcHeapBounds::IS_HEAP_POINTER)
            .and_then(Callable::as_native),
        Some(Pointer::new(RUNTIME_BASE + 0x2100))
    );
    Ok(())
}

#[test]
fn objects_and_cached_method_tables() -> Result<(), Error> {
    let dir = cache_dir();
    let context = context(&dir)?;

    let method_table = context.method_table_of(Pointer::new(OBJECT))?;
    assert_eq!(method_table.base_size()?, 0x18);
    let again = context.method_table_of(Pointer::new(OBJECT))?;
    assert!(std::ptr::eq(method_table, again));

    let header = context.object_header(Pointer::new(OBJECT))?;
    assert_eq!(
        header.value(context.memory())?,
        SyncBlockValue::SyncBlockIndex(3)
    );
    Ok(())
}

#[test]
fn close_is_idempotent() -> Result<(), Error> {
    let dir = cache_dir();
    let mut context = context(&dir)?;
    context.load_imports(&heap_utilities())?;
    let bound = heap_utilities().dispatch_name("IsHeapPointer");

    context.close()?;
    assert!(context.is_closed());
    assert!(!context.imports().is_loaded("GCHeapUtilities"));
    assert!(!context.dispatch().contains(&bound));
    context.close()?;

    let cache_files = std::fs::read_dir(dir.path())
        .map(|entries| entries.count())
        .unwrap_or(0);
    assert_eq!(cache_files, 1);
    Ok(())
}

#[test]
fn cached_offsets_survive_a_new_context() -> Result<(), Error> {
    let dir = cache_dir();
    {
        let mut context = context(&dir)?;
        context.load_imports(&heap_utilities())?;
        assert_eq!(context.symbols().enumeration_count(), 1);
    }

    let mut context = context(&dir)?;
    context.load_imports(&heap_utilities())?;
    assert_eq!(context.symbols().enumeration_count(), 0);
    Ok(())
}
