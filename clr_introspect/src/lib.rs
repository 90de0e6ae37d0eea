mod error;
pub use error::Error;

pub(crate) mod macros;

pub(crate) mod extensions;

mod bit_field;
pub use bit_field::*;

mod packed_dwords;
pub use packed_dwords::*;

mod relative_pointer;
pub use relative_pointer::*;

mod cor_element_type;
pub use cor_element_type::{CorElementType, PrimType};

mod method_table;
pub use method_table::*;

mod ee_class;
pub use ee_class::*;

mod field_description;
pub use field_description::*;

mod method_desc;
pub use method_desc::*;

mod object_header;
pub use object_header::*;

mod dispatch_table;
pub use dispatch_table::*;

mod gc_heap;
pub use gc_heap::*;

mod import;
pub use import::*;

mod import_manager;
pub use import_manager::*;

mod config;
pub use config::*;

mod context;
pub use context::*;
