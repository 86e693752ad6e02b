//! End-to-end engine behavior over SQLite-backed fact fixtures.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{ACME, BETA, CountingSource, date, october, policy, scenario_source};
use ltc_metrics::cache::ResultCache;
use ltc_metrics::core::config::SourceConfig;
use ltc_metrics::core::errors::LtcError;
use ltc_metrics::core::request::RequestContext;
use ltc_metrics::engine::MetricsEngine;
use ltc_metrics::metrics::{BundleKind, DatePreset, FilterSpec, Severity};
use ltc_metrics::source::sqlite::{SqliteFactSource, open_existing};
use ltc_metrics::source::synthetic::{SyntheticSpec, generate};

type Counting = CountingSource<SqliteFactSource>;

fn engine_over(source: &Arc<Counting>) -> MetricsEngine {
    let cache = Arc::new(ResultCache::new(Duration::from_secs(300)));
    MetricsEngine::new(source.clone(), cache)
}

fn counted_scenario() -> (Arc<Counting>, MetricsEngine) {
    let source = Arc::new(CountingSource::new(scenario_source()));
    let engine = engine_over(&source);
    (source, engine)
}

fn acme_october() -> FilterSpec {
    FilterSpec::new(Some(ACME), Some(october())).unwrap()
}

fn titles(insights: &[ltc_metrics::metrics::Insight]) -> Vec<&'static str> {
    insights.iter().map(|i| i.title).collect()
}

#[test]
fn claims_scenario_metrics_and_insights() {
    let (_, engine) = counted_scenario();
    let ctx = RequestContext::unbounded();
    let bundle = engine.get_claims_summary(&acme_october(), &ctx).unwrap();

    assert_eq!(bundle.kind(), BundleKind::Claims);
    assert_eq!(bundle.get("total_claims"), 120.0);
    assert_eq!(bundle.get("approved_claims"), 90.0);
    assert_eq!(bundle.get("denied_claims"), 12.0);
    assert_eq!(bundle.get("in_assessment_claims"), 18.0);
    assert!((bundle.get("approval_rate") - 75.0).abs() < 1e-9);
    assert!((bundle.get("avg_processing_time") - 22.5).abs() < 1e-9);
    assert_eq!(bundle.get("max_tat"), 22.5);
    assert_eq!(
        bundle.get("initial_decisions")
            + bundle.get("ongoing_decisions")
            + bundle.get("restoration_decisions"),
        120.0
    );

    let insights = engine.get_insights(&bundle, BundleKind::Claims);
    assert_eq!(titles(&insights), vec!["Fast Processing", "High Volume Period"]);
    assert_eq!(insights[0].severity, Severity::Positive);
    assert_eq!(insights[1].severity, Severity::Notice);
}

#[test]
fn policy_scenario_lapse_on_boundary_fires_nothing() {
    let (_, engine) = counted_scenario();
    let ctx = RequestContext::unbounded();
    let bundle = engine.get_policy_summary(&acme_october(), &ctx).unwrap();

    assert_eq!(bundle.get("total_policies"), 200.0);
    assert_eq!(bundle.get("active_policies"), 180.0);
    assert!((bundle.get("lapse_rate") - 10.0).abs() < 1e-9);
    assert_eq!(bundle.get("avg_premium"), 3_000.0);
    assert_eq!(bundle.get("states_count"), 2.0);
    assert!(engine.get_insights(&bundle, BundleKind::Policy).is_empty());
}

#[test]
fn zero_policies_are_zero_safe() {
    let (_, engine) = counted_scenario();
    let ctx = RequestContext::unbounded();
    let filter = FilterSpec::new(Some(BETA), Some(october())).unwrap();
    let bundle = engine.get_policy_summary(&filter, &ctx).unwrap();

    assert_eq!(bundle.get("total_policies"), 0.0);
    assert_eq!(bundle.get("lapse_rate"), 0.0);
    assert_eq!(bundle.get("avg_claims_per_policy"), 0.0);
    assert_eq!(bundle.get("avg_premium"), 0.0);
    let insights = engine.get_insights(&bundle, BundleKind::Policy);
    assert!(!titles(&insights).contains(&"Premium Portfolio"));
}

#[test]
fn second_call_within_ttl_does_not_touch_the_source() {
    let (source, engine) = counted_scenario();
    let ctx = RequestContext::unbounded();

    let first = engine.get_claims_summary(&acme_october(), &ctx).unwrap();
    let after_first = source.calls();
    assert!(after_first > 0);

    let second = engine.get_claims_summary(&acme_october(), &ctx).unwrap();
    assert_eq!(source.calls(), after_first);
    assert!(Arc::ptr_eq(&first, &second));
}

#[test]
fn invalidate_all_costs_exactly_one_recompute() {
    let (source, engine) = counted_scenario();
    let ctx = RequestContext::unbounded();

    engine.get_policy_summary(&acme_october(), &ctx).unwrap();
    let per_compute = source.calls();

    engine.invalidate_all();
    assert!(engine.cache().is_empty());
    engine.get_policy_summary(&acme_october(), &ctx).unwrap();
    assert_eq!(source.calls(), per_compute * 2);

    engine.get_policy_summary(&acme_october(), &ctx).unwrap();
    assert_eq!(source.calls(), per_compute * 2);
}

#[test]
fn all_carrier_shares_the_unfiltered_slot() {
    let (source, engine) = counted_scenario();
    let ctx = RequestContext::unbounded();

    let unfiltered = engine.get_claims_summary(&FilterSpec::all(), &ctx).unwrap();
    let calls = source.calls();
    let all = FilterSpec::new(Some("ALL"), None).unwrap();
    let again = engine.get_claims_summary(&all, &ctx).unwrap();

    assert_eq!(source.calls(), calls);
    assert!(Arc::ptr_eq(&unfiltered, &again));
}

#[test]
fn rows_and_summary_see_the_same_eligible_set() {
    let (_, engine) = counted_scenario();
    let ctx = RequestContext::unbounded();
    let filter = acme_october();

    let bundle = engine.get_claims_summary(&filter, &ctx).unwrap();
    let rows = engine.get_claims_rows(&filter, 1_000, &ctx).unwrap();

    assert_eq!(rows.len() as f64, bundle.get("total_claims"));
    assert!(rows.iter().all(|r| r.tat_days != Some(99.0)));
    let ids: Vec<i64> = rows.iter().map(|r| r.claim_id).collect();
    let mut sorted = ids.clone();
    sorted.sort_unstable();
    // Single snapshot, so the id tiebreak decides the order.
    assert_eq!(ids, sorted);
}

#[test]
fn claims_dates_normalize_to_month_end_but_policy_dates_do_not() {
    let (_, engine) = counted_scenario();
    let ctx = RequestContext::unbounded();
    let mid_month = FilterSpec::new(Some(ACME), Some(date(2024, 10, 15))).unwrap();

    let claims = engine.get_claims_summary(&mid_month, &ctx).unwrap();
    let policy = engine.get_policy_summary(&mid_month, &ctx).unwrap();

    assert_eq!(claims.get("total_claims"), 120.0);
    assert_eq!(policy.get("total_policies"), 0.0);
}

#[test]
fn policy_rows_come_back_by_premium_descending() {
    let source = SqliteFactSource::in_memory("premiums").unwrap();
    source
        .insert_policies(&[
            policy(1, ACME, Some("CA"), "Active", 1_200.0),
            policy(2, ACME, Some("NY"), "Active", 7_400.0),
            policy(3, ACME, None, "Lapsed", 3_100.0),
        ])
        .unwrap();
    let source = Arc::new(CountingSource::new(source));
    let engine = engine_over(&source);

    let rows = engine
        .get_policy_rows(&FilterSpec::all(), 2, &RequestContext::unbounded())
        .unwrap();
    let premiums: Vec<Option<f64>> = rows.iter().map(|r| r.annual_premium).collect();
    assert_eq!(premiums, vec![Some(7_400.0), Some(3_100.0)]);
}

#[test]
fn state_distribution_counts_and_labels_missing_states() {
    let (_, engine) = counted_scenario();
    let ctx = RequestContext::unbounded();
    let states = engine
        .get_state_distribution(&acme_october(), 10, &ctx)
        .unwrap();

    let labels: Vec<&str> = states.iter().map(|s| s.state.as_str()).collect();
    // TX and the missing-state group tie; the null key sorts first.
    assert_eq!(labels, vec!["CA", "UNKNOWN", "TX"]);
    assert_eq!(states[0].policy_count, 100);
    assert_eq!(states[1].policy_count, 50);
    assert_eq!(states[2].policy_count, 50);
    assert_eq!(states[0].total_premium, 300_000.0);

    let top = engine.get_state_distribution(&acme_october(), 1, &ctx).unwrap();
    assert_eq!(top.len(), 1);
    assert_eq!(top[0].state, "CA");
}

#[test]
fn executive_summary_combines_both_bundles() {
    let (_, engine) = counted_scenario();
    let ctx = RequestContext::unbounded();
    let summary = engine.get_executive_summary(&acme_october(), &ctx).unwrap();

    let composite = &summary.composite;
    assert_eq!(composite.kind(), BundleKind::Executive);
    assert_eq!(composite.get("total_records"), 320.0);
    assert!((composite.get("claims_per_policy") - 0.6).abs() < 1e-9);
    assert!((composite.get("revenue_at_risk") - 30_000.0).abs() < 1e-6);
    assert_eq!(
        titles(&summary.claims_insights),
        vec!["Fast Processing", "High Volume Period"]
    );
    assert!(summary.policy_insights.is_empty());
    assert_eq!(engine.cache().len(), 2);
}

#[test]
fn expired_deadline_fails_without_caching() {
    let (_, engine) = counted_scenario();
    let ctx = RequestContext::with_timeout(Duration::ZERO);
    let err = engine.get_claims_summary(&acme_october(), &ctx).unwrap_err();
    assert!(matches!(err, LtcError::SourceUnavailable { .. }));
    assert!(engine.cache().is_empty());
}

#[test]
fn cancelled_request_reports_cancellation() {
    let (source, engine) = counted_scenario();
    let ctx = RequestContext::unbounded();
    ctx.cancel_handle().cancel();
    let err = engine.get_policy_summary(&acme_october(), &ctx).unwrap_err();
    assert_eq!(err.code(), "LTC-3001");
    assert_eq!(source.calls(), 0);
}

#[test]
fn disabled_cache_computes_every_time() {
    let source = Arc::new(CountingSource::new(scenario_source()));
    let engine = MetricsEngine::new(source.clone(), Arc::new(ResultCache::disabled()));
    let ctx = RequestContext::unbounded();

    engine.get_claims_summary(&acme_october(), &ctx).unwrap();
    let per_compute = source.calls();
    engine.get_claims_summary(&acme_october(), &ctx).unwrap();
    assert_eq!(source.calls(), per_compute * 2);
    assert!(engine.cache().is_empty());
}

#[test]
fn engines_sharing_a_cache_keep_sources_apart() {
    let cache = Arc::new(ResultCache::new(Duration::from_secs(300)));
    let scenario = MetricsEngine::new(Arc::new(scenario_source()), Arc::clone(&cache));
    let empty = MetricsEngine::new(
        Arc::new(SqliteFactSource::in_memory("empty").unwrap()),
        Arc::clone(&cache),
    );
    let ctx = RequestContext::unbounded();

    let full = scenario.get_claims_summary(&FilterSpec::all(), &ctx).unwrap();
    let none = empty.get_claims_summary(&FilterSpec::all(), &ctx).unwrap();
    assert_eq!(full.get("total_claims"), 120.0);
    assert_eq!(none.get("total_claims"), 0.0);
    assert_eq!(cache.len(), 2);

    empty.invalidate_all();
    assert!(cache.is_empty());
}

#[test]
fn file_backed_source_round_trips_through_open_existing() {
    let dir = tempfile::tempdir().unwrap();
    let config = SourceConfig {
        database: dir.path().join("nested").join("facts.sqlite3"),
        ..SourceConfig::default()
    };

    let missing = open_existing(&config).unwrap_err();
    assert!(missing.to_string().contains("ltcm seed"));

    let data = generate(&SyntheticSpec {
        seed: 9,
        claims_per_month: 30,
        policies_per_snapshot: 20,
        months: 3,
        ..SyntheticSpec::default()
    });
    {
        let writer = SqliteFactSource::open(&config).unwrap();
        assert_eq!(writer.insert_claims(&data.claims).unwrap(), 90);
        assert_eq!(writer.insert_policies(&data.policies).unwrap(), 60);
    }

    let reader = open_existing(&config).unwrap();
    let engine = MetricsEngine::new(
        Arc::new(reader),
        Arc::new(ResultCache::new(Duration::from_secs(60))),
    );
    let as_of = DatePreset::LastMonth.resolve(date(2024, 11, 20));
    let filter = FilterSpec::new(None, as_of).unwrap();
    let ctx = RequestContext::with_timeout(Duration::from_secs(10));

    let policy = engine.get_policy_summary(&filter, &ctx).unwrap();
    assert_eq!(policy.get("total_policies"), 20.0);

    let eligible = data
        .claims
        .iter()
        .filter(|c| c.snapshot_date == october())
        .filter(|c| {
            ltc_metrics::metrics::filter::is_eligible(
                c.ongoing_rate_month,
                c.is_initial_decision_flag,
            )
        })
        .count();
    let claims = engine.get_claims_summary(&filter, &ctx).unwrap();
    assert_eq!(claims.get("total_claims"), eligible as f64);
}
