//! Insight rules: threshold checks over a composed bundle.
//!
//! Pure and stateless. Rules are evaluated in a fixed order and every rule
//! that holds contributes one insight; none suppresses another. All
//! thresholds are strict, so a value sitting exactly on a boundary fires
//! nothing.

#![allow(missing_docs)]

use serde::Serialize;

use super::bundle::{BundleKind, MetricsBundle};
use super::composer::ratio;

pub const APPROVAL_EXCELLENT_ABOVE: f64 = 80.0;
pub const APPROVAL_ACTION_BELOW: f64 = 60.0;
pub const TAT_FAST_BELOW: f64 = 25.0;
pub const TAT_SLOW_ABOVE: f64 = 35.0;
pub const HIGH_VOLUME_ABOVE: f64 = 100.0;
pub const LAPSE_STRONG_BELOW: f64 = 5.0;
pub const LAPSE_RISK_ABOVE: f64 = 10.0;
pub const PREMIUM_PORTFOLIO_ABOVE: f64 = 4_000.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Positive,
    Warning,
    Notice,
}

impl Severity {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Positive => "positive",
            Self::Warning => "warning",
            Self::Notice => "notice",
        }
    }
}

/// One advisory line for the presentation layer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Insight {
    pub severity: Severity,
    pub title: &'static str,
    pub message: String,
}

impl Insight {
    fn new(severity: Severity, title: &'static str, message: String) -> Self {
        Self {
            severity,
            title,
            message,
        }
    }
}

/// Evaluate the rule set for `kind` against `bundle`.
///
/// Missing metrics read as zero. Executive bundles have no rules.
pub fn generate_insights(bundle: &MetricsBundle, kind: BundleKind) -> Vec<Insight> {
    match kind {
        BundleKind::Claims => claims_insights(bundle),
        BundleKind::Policy => policy_insights(bundle),
        BundleKind::Executive => Vec::new(),
    }
}

fn claims_insights(bundle: &MetricsBundle) -> Vec<Insight> {
    let approval = bundle.get("approval_rate");
    let tat = bundle.get("avg_processing_time");
    let total = bundle.get("total_claims");
    let mut out = Vec::new();

    if approval > APPROVAL_EXCELLENT_ABOVE {
        out.push(Insight::new(
            Severity::Positive,
            "Excellent Performance",
            format!("Approval rate of {approval:.1}% exceeds industry benchmark of 75%"),
        ));
    }
    if approval < APPROVAL_ACTION_BELOW {
        out.push(Insight::new(
            Severity::Warning,
            "Action Required",
            format!("Approval rate of {approval:.1}% is below target. Review denial reasons."),
        ));
    }
    if tat < TAT_FAST_BELOW {
        out.push(Insight::new(
            Severity::Positive,
            "Fast Processing",
            format!(
                "Average TAT of {tat:.1} days is {:.1} days faster than target",
                TAT_FAST_BELOW - tat
            ),
        ));
    }
    if tat > TAT_SLOW_ABOVE {
        out.push(Insight::new(
            Severity::Warning,
            "Slow Processing",
            format!("Average TAT of {tat:.1} days exceeds 30-day target. Consider staffing review."),
        ));
    }
    if total > HIGH_VOLUME_ABOVE {
        out.push(Insight::new(
            Severity::Notice,
            "High Volume Period",
            format!("Processing {total:.0} claims. Monitor capacity closely."),
        ));
    }
    out
}

fn policy_insights(bundle: &MetricsBundle) -> Vec<Insight> {
    let lapse = bundle.get("lapse_rate");
    let avg_premium = ratio(bundle.get("total_premium"), bundle.get("total_policies"));
    let mut out = Vec::new();

    if lapse < LAPSE_STRONG_BELOW {
        out.push(Insight::new(
            Severity::Positive,
            "Strong Retention",
            format!("Lapse rate of {lapse:.1}% indicates excellent policy retention"),
        ));
    }
    if lapse > LAPSE_RISK_ABOVE {
        out.push(Insight::new(
            Severity::Warning,
            "Retention Risk",
            format!("Lapse rate of {lapse:.1}% requires attention. Review customer satisfaction."),
        ));
    }
    if avg_premium > PREMIUM_PORTFOLIO_ABOVE {
        out.push(Insight::new(
            Severity::Notice,
            "Premium Portfolio",
            format!(
                "Average premium of ${} indicates high-value policies",
                thousands(avg_premium)
            ),
        ));
    }
    out
}

/// Whole-number rendering with comma grouping: `4521.6` becomes `4,522`.
#[allow(clippy::cast_possible_truncation)]
fn thousands(value: f64) -> String {
    let rounded = value.round() as i64;
    let digits = rounded.unsigned_abs().to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3 + 1);
    if rounded < 0 {
        out.push('-');
    }
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }
    out
}
