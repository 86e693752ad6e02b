//! Aggregator: fixed aggregate sets pushed down to a fact source.
//!
//! Each summary is one multi-aggregate pass plus a handful of scoped counts
//! over the same filtered view. Nulls from empty or all-null columns are
//! coerced to `0.0` here, so every declared name is always present.

#![allow(missing_docs)]

use std::collections::BTreeMap;

use crate::core::errors::{LtcError, Result};
use crate::core::request::RequestContext;
use crate::metrics::bundle::StateDistribution;
use crate::metrics::filter::{FilterSpec, claims_predicate, policy_predicate};
use crate::source::{
    AggFunc, Aggregate, ClaimRow, Column, Expr, FactSource, PolicyRow, Predicate, Relation, Value,
};

/// Flat metric name to value mapping produced by one aggregation.
pub type RawMetrics = BTreeMap<String, f64>;

const RETRO_COLUMNS: &[Column] = &[
    Column::RetroAllFacilities,
    Column::RetroHomeHealth,
    Column::RetroAllOther,
];

pub const CLAIMS_AGGREGATES: &[Aggregate] = &[
    Aggregate::new("total_claims", AggFunc::Count, Expr::Star),
    Aggregate::new(
        "facility_claims",
        AggFunc::Sum,
        Expr::Col(Column::InitialDecisionsFacilities),
    ),
    Aggregate::new(
        "home_health_claims",
        AggFunc::Sum,
        Expr::Col(Column::InitialDecisionsHomeHealth),
    ),
    Aggregate::new(
        "other_claims",
        AggFunc::Sum,
        Expr::Col(Column::InitialDecisionsAllOther),
    ),
    Aggregate::new("total_retro_claims", AggFunc::Sum, Expr::Add(RETRO_COLUMNS)),
    Aggregate::new("avg_processing_time", AggFunc::Avg, Expr::Col(Column::TatDays)),
    Aggregate::new("min_tat", AggFunc::Min, Expr::Col(Column::TatDays)),
    Aggregate::new("max_tat", AggFunc::Max, Expr::Col(Column::TatDays)),
    Aggregate::new("avg_retro_months", AggFunc::Avg, Expr::Col(Column::RetroMonths)),
];

pub const POLICY_AGGREGATES: &[Aggregate] = &[
    Aggregate::new("total_policies", AggFunc::Count, Expr::Star),
    Aggregate::new("avg_age", AggFunc::Avg, Expr::Col(Column::RatedAge)),
    Aggregate::new("total_premium", AggFunc::Sum, Expr::Col(Column::AnnualizedPremium)),
    Aggregate::new("avg_premium", AggFunc::Avg, Expr::Col(Column::AnnualizedPremium)),
    Aggregate::new(
        "total_collected",
        AggFunc::Sum,
        Expr::Col(Column::LifetimeCollectedPremium),
    ),
    Aggregate::new(
        "total_active_claims",
        AggFunc::Sum,
        Expr::Col(Column::TotalActiveClaims),
    ),
    Aggregate::new("total_rfbs", AggFunc::Sum, Expr::Col(Column::TotalRfbs)),
    Aggregate::new(
        "total_approved_rfbs",
        AggFunc::Sum,
        Expr::Col(Column::TotalApprovedRfbs),
    ),
    Aggregate::new("total_denials", AggFunc::Sum, Expr::Col(Column::TotalDenials)),
    Aggregate::new(
        "states_count",
        AggFunc::CountDistinct,
        Expr::Col(Column::InsuredState),
    ),
];

fn text_in(column: Column, values: &[&str]) -> Predicate {
    Predicate::In(column, values.iter().map(|v| Value::from(*v)).collect())
}

/// Scoped counts layered on top of the claims view.
pub fn claims_supplemental() -> Vec<(&'static str, Predicate)> {
    vec![
        (
            "approved_claims",
            Predicate::Eq(Column::Decision, "Approved".into()),
        ),
        ("denied_claims", Predicate::Eq(Column::Decision, "Denied".into())),
        (
            "in_assessment_claims",
            text_in(Column::Decision, &["In Assessment", "Pending"]),
        ),
        (
            "initial_decisions",
            Predicate::Eq(Column::OngoingRateMonth, 0i64.into()),
        ),
        (
            "ongoing_decisions",
            Predicate::Eq(Column::OngoingRateMonth, 1i64.into()),
        ),
        (
            "restoration_decisions",
            Predicate::Eq(Column::OngoingRateMonth, 2i64.into()),
        ),
    ]
}

/// Scoped counts layered on top of the policy view.
pub fn policy_supplemental() -> Vec<(&'static str, Predicate)> {
    vec![
        ("in_waiver", Predicate::Eq(Column::InWaiverFlag, "Yes".into())),
        (
            "in_forfeiture",
            Predicate::Eq(Column::InNonforfeitureFlag, "Yes".into()),
        ),
        (
            "active_policies",
            text_in(Column::PolicyStatus, &["ACTIVE", "Active"]),
        ),
        (
            "policies_with_claims",
            Predicate::Gt(Column::TotalActiveClaims, 0i64.into()),
        ),
    ]
}

/// Read-only aggregation over a fact source.
pub struct Aggregator<'a> {
    source: &'a dyn FactSource,
}

impl<'a> Aggregator<'a> {
    pub fn new(source: &'a dyn FactSource) -> Self {
        Self { source }
    }

    /// Claims aggregates plus supplemental counts for `spec`.
    pub fn claims(&self, spec: &FilterSpec, ctx: &RequestContext) -> Result<RawMetrics> {
        self.run(
            Relation::Claims,
            &claims_predicate(spec),
            CLAIMS_AGGREGATES,
            claims_supplemental(),
            ctx,
        )
    }

    /// Policy aggregates plus supplemental counts for `spec`.
    pub fn policy(&self, spec: &FilterSpec, ctx: &RequestContext) -> Result<RawMetrics> {
        self.run(
            Relation::Policy,
            &policy_predicate(spec),
            POLICY_AGGREGATES,
            policy_supplemental(),
            ctx,
        )
    }

    pub fn claim_rows(
        &self,
        spec: &FilterSpec,
        limit: usize,
        ctx: &RequestContext,
    ) -> Result<Vec<ClaimRow>> {
        self.source.claim_rows(&claims_predicate(spec), limit, ctx)
    }

    pub fn policy_rows(
        &self,
        spec: &FilterSpec,
        limit: usize,
        ctx: &RequestContext,
    ) -> Result<Vec<PolicyRow>> {
        self.source.policy_rows(&policy_predicate(spec), limit, ctx)
    }

    /// Policy count and premium per insured state, largest first.
    pub fn state_distribution(
        &self,
        spec: &FilterSpec,
        top_n: usize,
        ctx: &RequestContext,
    ) -> Result<Vec<StateDistribution>> {
        let groups = self.source.group_count(
            Relation::Policy,
            &policy_predicate(spec),
            Column::InsuredState,
            Column::AnnualizedPremium,
            top_n,
            ctx,
        )?;
        Ok(groups
            .into_iter()
            .map(|g| StateDistribution {
                state: g.key.unwrap_or_else(|| "UNKNOWN".to_string()),
                policy_count: g.count,
                total_premium: finite_or_zero("total_premium", g.sum),
            })
            .collect())
    }

    #[allow(clippy::cast_precision_loss)]
    fn run(
        &self,
        relation: Relation,
        base: &Predicate,
        aggregates: &[Aggregate],
        supplemental: Vec<(&'static str, Predicate)>,
        ctx: &RequestContext,
    ) -> Result<RawMetrics> {
        let values = self.source.aggregate(relation, base, aggregates, ctx)?;
        if values.len() != aggregates.len() {
            return Err(LtcError::Runtime {
                details: format!(
                    "{relation} source returned {} values for {} aggregates",
                    values.len(),
                    aggregates.len()
                ),
            });
        }

        let mut out = RawMetrics::new();
        for (agg, value) in aggregates.iter().zip(values) {
            out.insert(agg.name.to_ascii_lowercase(), finite_or_zero(agg.name, value));
        }
        for (name, pred) in supplemental {
            let scoped = base.clone().and(pred);
            let n = self.source.count(relation, &scoped, ctx)?;
            out.insert(name.to_ascii_lowercase(), n as f64);
        }
        Ok(out)
    }
}

/// Null and non-finite aggregates become `0.0`.
fn finite_or_zero(name: &str, value: Option<f64>) -> f64 {
    match value {
        Some(v) if v.is_finite() => v,
        other => {
            log::debug!("aggregate {name} resolved to {other:?}; using 0.0");
            0.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::GroupCount;

    /// Source that answers every aggregate with `None` and every count with 0.
    struct NullSource;

    impl FactSource for NullSource {
        fn source_id(&self) -> &str {
            "null"
        }

        fn aggregate(
            &self,
            _: Relation,
            _: &Predicate,
            aggregates: &[Aggregate],
            _: &RequestContext,
        ) -> Result<Vec<Option<f64>>> {
            Ok(vec![None; aggregates.len()])
        }

        fn count(&self, _: Relation, _: &Predicate, _: &RequestContext) -> Result<u64> {
            Ok(0)
        }

        fn group_count(
            &self,
            _: Relation,
            _: &Predicate,
            _: Column,
            _: Column,
            _: usize,
            _: &RequestContext,
        ) -> Result<Vec<GroupCount>> {
            Ok(vec![GroupCount {
                key: None,
                count: 3,
                sum: None,
            }])
        }

        fn claim_rows(&self, _: &Predicate, _: usize, _: &RequestContext) -> Result<Vec<ClaimRow>> {
            Ok(Vec::new())
        }

        fn policy_rows(
            &self,
            _: &Predicate,
            _: usize,
            _: &RequestContext,
        ) -> Result<Vec<PolicyRow>> {
            Ok(Vec::new())
        }
    }

    /// Source that drops one aggregate value.
    struct ShortSource;

    impl FactSource for ShortSource {
        fn source_id(&self) -> &str {
            "short"
        }

        fn aggregate(
            &self,
            _: Relation,
            _: &Predicate,
            aggregates: &[Aggregate],
            _: &RequestContext,
        ) -> Result<Vec<Option<f64>>> {
            Ok(vec![Some(1.0); aggregates.len().saturating_sub(1)])
        }

        fn count(&self, _: Relation, _: &Predicate, _: &RequestContext) -> Result<u64> {
            Ok(0)
        }

        fn group_count(
            &self,
            _: Relation,
            _: &Predicate,
            _: Column,
            _: Column,
            _: usize,
            _: &RequestContext,
        ) -> Result<Vec<GroupCount>> {
            Ok(Vec::new())
        }

        fn claim_rows(&self, _: &Predicate, _: usize, _: &RequestContext) -> Result<Vec<ClaimRow>> {
            Ok(Vec::new())
        }

        fn policy_rows(
            &self,
            _: &Predicate,
            _: usize,
            _: &RequestContext,
        ) -> Result<Vec<PolicyRow>> {
            Ok(Vec::new())
        }
    }

    #[test]
    fn null_aggregates_become_zero_and_every_name_is_present() {
        let agg = Aggregator::new(&NullSource);
        let ctx = RequestContext::unbounded();
        let claims = agg.claims(&FilterSpec::all(), &ctx).unwrap();
        for a in CLAIMS_AGGREGATES {
            assert_eq!(claims.get(a.name), Some(&0.0), "{}", a.name);
        }
        for (name, _) in claims_supplemental() {
            assert_eq!(claims.get(name), Some(&0.0), "{name}");
        }
        let policy = agg.policy(&FilterSpec::all(), &ctx).unwrap();
        assert_eq!(
            policy.len(),
            POLICY_AGGREGATES.len() + policy_supplemental().len()
        );
    }

    #[test]
    fn names_are_lower_case_and_unique() {
        let mut seen = std::collections::HashSet::new();
        let claim_names = CLAIMS_AGGREGATES
            .iter()
            .map(|a| a.name)
            .chain(claims_supplemental().into_iter().map(|(n, _)| n));
        for name in claim_names {
            assert_eq!(name, name.to_ascii_lowercase());
            assert!(seen.insert(name), "duplicate {name}");
        }
    }

    #[test]
    fn missing_state_reported_as_unknown() {
        let agg = Aggregator::new(&NullSource);
        let rows = agg
            .state_distribution(&FilterSpec::all(), 10, &RequestContext::unbounded())
            .unwrap();
        assert_eq!(
            rows,
            vec![StateDistribution {
                state: "UNKNOWN".into(),
                policy_count: 3,
                total_premium: 0.0,
            }]
        );
    }

    #[test]
    fn short_aggregate_response_is_an_error_not_a_partial_map() {
        let agg = Aggregator::new(&ShortSource);
        let err = agg
            .claims(&FilterSpec::all(), &RequestContext::unbounded())
            .unwrap_err();
        assert_eq!(err.code(), "LTC-3900");
    }

    #[test]
    fn non_finite_values_are_zeroed() {
        assert_eq!(finite_or_zero("x", Some(f64::NAN)), 0.0);
        assert_eq!(finite_or_zero("x", Some(f64::INFINITY)), 0.0);
        assert_eq!(finite_or_zero("x", Some(2.5)), 2.5);
    }
}
