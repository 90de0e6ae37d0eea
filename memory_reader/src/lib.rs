mod error;
pub use error::{Error, Result};

mod pointer;
pub use pointer::*;

mod normalize_indices;
pub use normalize_indices::*;

mod byte_range;
pub use byte_range::*;

mod owned_bytes;
pub use owned_bytes::*;

mod memory_access;
pub use memory_access::*;

mod memory_reader;
pub use memory_reader::MemoryReader;

mod memory_map_region;
pub use memory_map_region::*;

mod module;
pub use module::*;

mod typed_pointer;
pub use typed_pointer::*;

mod bounded_pointer;
pub use bounded_pointer::*;

mod allocation;
pub use allocation::*;
