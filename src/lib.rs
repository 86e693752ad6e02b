#![forbid(unsafe_code)]

//! LTC metrics (ltcm): parameterized metrics aggregation and caching for
//! long-term-care claims and policy reporting.
//!
//! The engine turns claims and policy fact rows into derived business
//! metrics under a carrier/date filter:
//! 1. **Filter builder**: claims eligibility plus carrier and snapshot scoping
//! 2. **Aggregator and composer**: pushed-down aggregates, zero-safe rates
//! 3. **Insight rules**: fixed threshold advisories over a composed bundle
//! 4. **Result cache**: TTL memoization with single-flight computes
//!
//! # Library usage
//!
//! Use the [`prelude`] for convenient access to the most common types:
//!
//! ```rust,no_run
//! use ltc_metrics::prelude::*;
//! ```
//!
//! Individual modules can also be imported directly:
//!
//! ```rust,no_run
//! use ltc_metrics::core::config::Config;
//! use ltc_metrics::metrics::filter::{FilterSpec, DatePreset};
//! ```

pub mod prelude;

pub mod cache;
pub mod core;
pub mod engine;
pub mod metrics;
pub mod source;
