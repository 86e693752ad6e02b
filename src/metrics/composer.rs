//! Metrics composer: derived rates and ratios over aggregator output.
//!
//! Division never fails. A denominator that is not a positive finite number
//! yields `0.0`, and so does a quotient that would come out negative or NaN.

#![allow(missing_docs)]

use std::time::Duration;

use super::aggregator::RawMetrics;
use super::bundle::{BundleKind, MetricsBundle};

/// Fixed share of premium treated as at risk in the executive view.
pub const REVENUE_AT_RISK_RATE: f64 = 0.05;

/// `numerator / denominator`, or `0.0` when the denominator is not positive.
pub fn ratio(numerator: f64, denominator: f64) -> f64 {
    if denominator <= 0.0 || !denominator.is_finite() || !numerator.is_finite() {
        return 0.0;
    }
    let value = numerator / denominator;
    if value.is_finite() && value > 0.0 {
        value
    } else {
        0.0
    }
}

/// [`ratio`] scaled to a plain percentage (`82.3` means 82.3 %).
pub fn percentage(numerator: f64, denominator: f64) -> f64 {
    ratio(numerator, denominator) * 100.0
}

fn get(raw: &RawMetrics, name: &str) -> f64 {
    raw.get(name).copied().unwrap_or(0.0)
}

/// Claims bundle: raw aggregates plus approval and retro rates.
pub fn compose_claims(mut raw: RawMetrics, query_time: Duration) -> MetricsBundle {
    let total = get(&raw, "total_claims");
    let approval = percentage(get(&raw, "approved_claims"), total);
    let retro = percentage(get(&raw, "total_retro_claims"), total);
    raw.insert("approval_rate".to_string(), approval);
    raw.insert("retro_percentage".to_string(), retro);
    MetricsBundle::new(BundleKind::Claims, raw, query_time)
}

/// Policy bundle: raw aggregates plus lapse rate and claims per policy.
pub fn compose_policy(mut raw: RawMetrics, query_time: Duration) -> MetricsBundle {
    let total = get(&raw, "total_policies");
    let lapse = percentage(total - get(&raw, "active_policies"), total);
    let per_policy = ratio(get(&raw, "total_active_claims"), total);
    raw.insert("lapse_rate".to_string(), lapse);
    raw.insert("avg_claims_per_policy".to_string(), per_policy);
    MetricsBundle::new(BundleKind::Policy, raw, query_time)
}

/// Cross-relation composite for the executive view.
///
/// Query time is the mean of the two source bundles.
pub fn compose_executive(claims: &MetricsBundle, policy: &MetricsBundle) -> MetricsBundle {
    let total_claims = claims.get("total_claims");
    let total_policies = policy.get("total_policies");
    let total_premium = policy.get("total_premium");

    let mut m = RawMetrics::new();
    m.insert("total_claims".into(), total_claims);
    m.insert("total_policies".into(), total_policies);
    m.insert("total_records".into(), total_claims + total_policies);
    m.insert("claims_per_policy".into(), ratio(total_claims, total_policies));
    m.insert("total_premium".into(), total_premium);
    m.insert("revenue_at_risk".into(), total_premium * REVENUE_AT_RISK_RATE);
    m.insert("states_count".into(), policy.get("states_count"));
    m.insert("approval_rate".into(), claims.get("approval_rate"));
    m.insert("lapse_rate".into(), policy.get("lapse_rate"));

    let query_time = (claims.query_time() + policy.query_time()) / 2;
    MetricsBundle::new(BundleKind::Executive, m, query_time)
}
