//! Convenience re-exports for library consumers.
//!
//! ```rust,no_run
//! use ltc_metrics::prelude::*;
//! ```

// Core
pub use crate::core::config::Config;
pub use crate::core::errors::{LtcError, Result};
pub use crate::core::request::{CancelHandle, RequestContext};

// Source
#[cfg(feature = "sqlite")]
pub use crate::source::sqlite::SqliteFactSource;
pub use crate::source::{ClaimRow, FactSource, PolicyRow};

// Metrics
pub use crate::metrics::{
    BundleKind, DatePreset, FilterSpec, Insight, MetricsBundle, Severity, StateDistribution,
};

// Cache and engine
pub use crate::cache::{CacheStats, ResultCache};
pub use crate::engine::{CachedValue, ExecutiveSummary, MetricsEngine};
