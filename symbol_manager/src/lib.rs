mod error;
pub use error::{Error, Result};

mod config;
pub use config::*;

mod symbol;
pub use symbol::*;

mod symbol_source;
pub use symbol_source::*;

mod name_match;
pub use name_match::*;

mod debug_symbol_file;
pub use debug_symbol_file::*;

mod symbol_cache;
pub use symbol_cache::*;

mod locator;
pub use locator::*;

mod resolver;
pub use resolver::*;
