use symbol_manager::SymbolConfig;

/// Settings for attaching to a runtime.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Short name of the runtime's shared library.
    pub runtime_module: String,

    /// Global variable holding the lowest address of the GC heap.
    pub gc_lowest_symbol: String,

    /// Global variable holding the highest address of the GC heap.
    pub gc_highest_symbol: String,

    /// Runtime function that checks whether an address is the start
    /// of a heap object.  Bound on first use, if the runtime's
    /// symbols provide it.
    pub heap_pointer_symbol: String,

    pub symbols: SymbolConfig,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            runtime_module: "libcoreclr.so".into(),
            gc_lowest_symbol: "g_gc_lowest_address".into(),
            gc_highest_symbol: "g_gc_highest_address".into(),
            heap_pointer_symbol: "GCHeap::IsHeapPointer".into(),
            symbols: SymbolConfig::default(),
        }
    }
}

impl RuntimeConfig {
    pub const RUNTIME_MODULE_VAR: &'static str = "CLR_INSPECT_RUNTIME_MODULE";

    /// Defaults, with `CLR_INSPECT_RUNTIME_MODULE` and the symbol
    /// settings of [`SymbolConfig::from_env`] applied.
    pub fn from_env() -> Self {
        let mut config = Self {
            symbols: SymbolConfig::from_env(),
            ..Default::default()
        };
        if let Ok(module) = std::env::var(Self::RUNTIME_MODULE_VAR) {
            if !module.is_empty() {
                config.runtime_module = module;
            }
        }
        config
    }

    pub fn with_runtime_module(mut self, name: impl Into<String>) -> Self {
        self.runtime_module = name.into();
        self
    }

    pub fn with_heap_pointer_symbol(mut self, name: impl Into<String>) -> Self {
        self.heap_pointer_symbol = name.into();
        self
    }

    pub fn with_symbols(mut self, symbols: SymbolConfig) -> Self {
        self.symbols = symbols;
        self
    }
}
