//! Metric computation: filter building, aggregation, composition, insights.

pub mod aggregator;
pub mod bundle;
pub mod composer;
pub mod filter;
pub mod insights;

pub use aggregator::Aggregator;
pub use bundle::{BundleKind, MetricsBundle, StateDistribution};
pub use filter::{DatePreset, FilterSpec};
pub use insights::{Insight, Severity, generate_insights};
