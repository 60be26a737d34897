//! 通用工具

pub mod ttl_cache;

pub use ttl_cache::{ExpiryPolicy, TtlCache};
