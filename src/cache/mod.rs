//! Result memoization shared across engine callers.

pub mod result_cache;

pub use result_cache::{CacheKey, CacheStats, QueryKind, ResultCache};
