//! Result types handed to the presentation layer.

#![allow(missing_docs)]

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Serialize, Serializer};

/// Which fact relation a bundle was computed from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BundleKind {
    Claims,
    Policy,
    /// Cross-relation composite; no insight rules apply.
    Executive,
}

impl BundleKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Claims => "claims",
            Self::Policy => "policy",
            Self::Executive => "executive",
        }
    }
}

impl std::fmt::Display for BundleKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

fn serialize_secs<S: Serializer>(d: &Duration, s: S) -> std::result::Result<S::Ok, S::Error> {
    s.serialize_f64(d.as_secs_f64())
}

/// Named metric values, ordered by name, plus how long the compute took.
///
/// Bundles are built whole by the composer and never mutated after leaving
/// it; a missing name reads as `0.0`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricsBundle {
    kind: BundleKind,
    metrics: BTreeMap<String, f64>,
    #[serde(rename = "query_time_secs", serialize_with = "serialize_secs")]
    query_time: Duration,
}

impl MetricsBundle {
    pub(crate) fn new(kind: BundleKind, metrics: BTreeMap<String, f64>, query_time: Duration) -> Self {
        Self {
            kind,
            metrics,
            query_time,
        }
    }

    pub const fn kind(&self) -> BundleKind {
        self.kind
    }

    pub const fn query_time(&self) -> Duration {
        self.query_time
    }

    /// Metric value, `0.0` when absent.
    pub fn get(&self, name: &str) -> f64 {
        self.metrics.get(name).copied().unwrap_or(0.0)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.metrics.contains_key(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.metrics.iter().map(|(k, v)| (k.as_str(), *v))
    }

    pub fn len(&self) -> usize {
        self.metrics.len()
    }

    pub fn is_empty(&self) -> bool {
        self.metrics.is_empty()
    }
}

/// One row of the policy-by-state breakdown.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StateDistribution {
    /// `"UNKNOWN"` when the insured state is missing.
    pub state: String,
    pub policy_count: u64,
    pub total_premium: f64,
}
