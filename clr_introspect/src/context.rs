use std::cell::OnceCell;

use elsa::FrozenMap;
use log::{debug, info, warn};
use memory_reader::{
    LoadedModule, MemoryAccess, MemoryReader, ModuleLookup, Pointer,
    StaticModules, TypedPointer,
};
use symbol_manager::{SymbolResolver, SymbolSource};

use crate::extensions::*;
use crate::{
    Callable, DispatchTable, EEClass, Error, GcHeapBounds, ImportManager, ImportSpec,
    MethodTable, ObjectHeader, RuntimeConfig,
};

/// A process that hosts a runtime: its memory, and the modules
/// loaded into it.
pub trait TargetProcess {
    fn memory(&self) -> &dyn MemoryAccess;
    fn modules(&self) -> &dyn ModuleLookup;
}

impl TargetProcess for MemoryReader {
    fn memory(&self) -> &dyn MemoryAccess {
        self
    }
    fn modules(&self) -> &dyn ModuleLookup {
        self
    }
}

/// A process described by a memory backend and a fixed module list,
/// such as a snapshot taken from another process.
pub struct StaticProcess<M> {
    pub memory: M,
    pub modules: StaticModules,
}

impl<M: MemoryAccess> TargetProcess for StaticProcess<M> {
    fn memory(&self) -> &dyn MemoryAccess {
        &self.memory
    }
    fn modules(&self) -> &dyn ModuleLookup {
        &self.modules
    }
}

/// Everything needed to inspect one runtime instance.
///
/// Holds the symbol resolver, the import bindings, and caches of
/// decoded runtime structures.  [`RuntimeContext::close`] unloads all
/// imports and persists the symbol caches.  It runs on drop if not
/// called explicitly.
pub struct RuntimeContext {
    process: Box<dyn TargetProcess>,
    config: RuntimeConfig,
    runtime: LoadedModule,
    symbols: SymbolResolver,
    imports: ImportManager,
    dispatch: DispatchTable,

    method_tables: FrozenMap<Pointer, Box<MethodTable>>,
    ee_classes: FrozenMap<Pointer, Box<EEClass>>,
    heap_bounds: OnceCell<GcHeapBounds>,
    heap_predicate_missing: bool,

    closed: bool,
}

impl RuntimeContext {
    pub fn new(
        process: impl TargetProcess + 'static,
        config: RuntimeConfig,
    ) -> Result<Self, Error> {
        let runtime = process
            .modules()
            .find_module(&config.runtime_module)
            .ok_or_else(|| Error::ModuleNotLoaded(config.runtime_module.clone()))?;
        info!(
            "Found runtime {} at {} ({})",
            runtime.name, runtime.base, runtime.path
        );

        Ok(Self {
            process: Box::new(process),
            symbols: SymbolResolver::new(config.symbols.clone()),
            config,
            runtime,
            imports: ImportManager::new(),
            dispatch: DispatchTable::new(),
            method_tables: FrozenMap::new(),
            ee_classes: FrozenMap::new(),
            heap_bounds: OnceCell::new(),
            heap_predicate_missing: false,
            closed: false,
        })
    }

    /// Attach to a running process.
    pub fn attach(pid: u32, config: RuntimeConfig) -> Result<Self, Error> {
        let reader = MemoryReader::new(pid)?;
        Self::new(reader, config)
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn runtime_module(&self) -> &LoadedModule {
        &self.runtime
    }

    pub fn memory(&self) -> &dyn MemoryAccess {
        self.process.memory()
    }

    pub fn symbols(&mut self) -> &mut SymbolResolver {
        &mut self.symbols
    }

    /// Use `source` for symbol lookups in the runtime module.
    pub fn register_runtime_symbols(&mut self, source: impl SymbolSource + 'static) {
        self.symbols.register_source(self.runtime.path.clone(), source);
    }

    pub fn dispatch(&self) -> &DispatchTable {
        &self.dispatch
    }

    pub fn dispatch_mut(&mut self) -> &mut DispatchTable {
        &mut self.dispatch
    }

    pub fn imports(&self) -> &ImportManager {
        &self.imports
    }

    /// Address of a symbol in the runtime module.
    pub fn resolve_address(&mut self, name: &str) -> Result<Pointer, Error> {
        Ok(self.symbols.resolve_in_module(&self.runtime, name)?)
    }

    pub fn method_table(
        &self,
        ptr: TypedPointer<MethodTable>,
    ) -> Result<&MethodTable, Error> {
        self.method_tables.try_insert(ptr.as_ptr(), || {
            MethodTable::read(ptr.as_ptr(), self.process.memory())
        })
    }

    /// The `MethodTable` of the heap object at `object`.
    pub fn method_table_of(&self, object: Pointer) -> Result<&MethodTable, Error> {
        let ptr: TypedPointer<TypedPointer<MethodTable>> = object.into();
        let method_table = ptr.read(self.process.memory())?;
        self.method_table(method_table)
    }

    pub fn ee_class(&self, method_table: &MethodTable) -> Result<&EEClass, Error> {
        let mem = self.process.memory();
        let ptr = method_table.ee_class_ptr(mem)?;
        self.ee_classes
            .try_insert(ptr.as_ptr(), || EEClass::read(ptr.as_ptr(), mem))
    }

    pub fn object_header(&self, object: Pointer) -> Result<ObjectHeader, Error> {
        ObjectHeader::of(object)
    }

    /// Bounds of the GC heap.  Read on first use, and cached
    /// afterwards.
    pub fn heap_bounds(&mut self) -> Result<GcHeapBounds, Error> {
        let Self {
            heap_bounds,
            symbols,
            runtime,
            config,
            process,
            ..
        } = self;

        let bounds = heap_bounds.or_try_init(|| -> Result<_, Error> {
            let lowest =
                symbols.resolve_in_module(runtime, &config.gc_lowest_symbol)?;
            let highest =
                symbols.resolve_in_module(runtime, &config.gc_highest_symbol)?;
            GcHeapBounds::read(lowest.into(), highest.into(), process.memory())
        })?;
        Ok(*bounds)
    }

    /// Bind the runtime's own heap-pointer check under
    /// [`GcHeapBounds::IS_HEAP_POINTER`], unless something is already
    /// bound there.  Returns false if the runtime's symbols do not
    /// provide it.  A missing symbol is only looked up once.
    pub fn bind_heap_predicate(&mut self) -> Result<bool, Error> {
        if self.dispatch.contains(GcHeapBounds::IS_HEAP_POINTER) {
            return Ok(true);
        }
        if self.heap_predicate_missing {
            return Ok(false);
        }

        let name = &self.config.heap_pointer_symbol;
        match self.symbols.resolve_in_module(&self.runtime, name) {
            Ok(address) => {
                info!(
                    "Binding {} to {name} at {address}",
                    GcHeapBounds::IS_HEAP_POINTER
                );
                self.dispatch
                    .register(GcHeapBounds::IS_HEAP_POINTER, Callable::Native(address));
                Ok(true)
            }
            Err(
                symbol_manager::Error::SymbolNotFound { .. }
                | symbol_manager::Error::DebugSymbolsNotFound { .. },
            ) => {
                debug!("Runtime does not provide {name}");
                self.heap_predicate_missing = true;
                Ok(false)
            }
            Err(err) => Err(err.into()),
        }
    }

    /// True if `ptr` is a heap object, according to the predicate
    /// bound under [`GcHeapBounds::IS_HEAP_POINTER`].  A native
    /// predicate requires [`Self::is_heap_pointer_native`].
    pub fn is_heap_pointer(&mut self, ptr: Pointer) -> Result<bool, Error> {
        let bounds = self.heap_bounds()?;
        if !bounds.contains(ptr) {
            return Ok(false);
        }
        self.bind_heap_predicate()?;
        bounds.is_heap_pointer(ptr, &self.dispatch)
    }

    /// As [`Self::is_heap_pointer`], calling native predicates
    /// directly.
    ///
    /// # Safety
    ///
    /// Only sound when the runtime is loaded into the current
    /// process, so that a native predicate is callable code.
    pub unsafe fn is_heap_pointer_native(
        &mut self,
        ptr: Pointer,
    ) -> Result<bool, Error> {
        let bounds = self.heap_bounds()?;
        if !bounds.contains(ptr) {
            return Ok(false);
        }
        self.bind_heap_predicate()?;
        bounds.is_heap_pointer_native(ptr, &self.dispatch)
    }

    pub fn load_imports(&mut self, spec: &ImportSpec) -> Result<(), Error> {
        spec.validate()?;

        let module = if spec.image == self.runtime.name {
            self.runtime.clone()
        } else {
            self.process
                .modules()
                .find_module(&spec.image)
                .ok_or_else(|| Error::ModuleNotLoaded(spec.image.clone()))?
        };

        self.imports.load(
            spec,
            &module,
            &mut self.symbols,
            self.process.memory(),
            &mut self.dispatch,
        )
    }

    pub fn unload_imports(&mut self, type_name: &str) {
        self.imports.unload(type_name, &mut self.dispatch);
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Unload all imports, and persist the symbol caches.  Calling
    /// `close` again does nothing.
    pub fn close(&mut self) -> Result<(), Error> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;

        self.imports.unload_all(&mut self.dispatch);
        self.symbols.close()?;
        info!("Closed runtime context for {}", self.runtime.name);
        Ok(())
    }
}

impl Drop for RuntimeContext {
    fn drop(&mut self) {
        if let Err(err) = self.close() {
            warn!("Error while closing runtime context: {err}");
        }
    }
}
