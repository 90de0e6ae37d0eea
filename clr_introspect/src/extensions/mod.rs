pub(crate) mod or_try_init;
pub use or_try_init::OrTryInit as _;

pub(crate) mod try_insert;
pub use try_insert::TryInsert as _;
