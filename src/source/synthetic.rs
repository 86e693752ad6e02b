//! Seeded synthetic fact generator for demos and tests.
//!
//! Produces month-end claim snapshots and policy snapshots for the three demo
//! carriers. Output is deterministic for a given [`SyntheticSpec`].

#![allow(missing_docs)]

use chrono::{Months, NaiveDate};
use rand::rngs::StdRng;
use rand::seq::IndexedRandom;
use rand::{Rng, SeedableRng};

use super::records::{ClaimFact, PolicyFact};
use crate::metrics::filter::last_day_of_month;

pub const CARRIERS: &[&str] = &[
    "Acme Insurance Co",
    "Beta Health Insurance",
    "Gamma Long Term Care",
];

const STATES: &[&str] = &[
    "AZ", "CA", "FL", "GA", "IL", "MI", "NC", "NJ", "NY", "OH", "PA", "TX", "VA", "WA",
];

const FIRST_NAMES: &[&str] = &[
    "Alex", "Jordan", "Morgan", "Taylor", "Casey", "Riley", "Jamie", "Avery", "Quinn", "Drew",
];

const LAST_NAMES: &[&str] = &[
    "Smith", "Garcia", "Chen", "Okafor", "Novak", "Patel", "Rossi", "Kim", "Silva", "Walsh",
];

/// Shape of a generated dataset.
#[derive(Debug, Clone)]
pub struct SyntheticSpec {
    pub seed: u64,
    pub claims_per_month: usize,
    pub policies_per_snapshot: usize,
    /// Number of month-end snapshots, counting back from `end`.
    pub months: u32,
    pub end: NaiveDate,
}

impl Default for SyntheticSpec {
    fn default() -> Self {
        Self {
            seed: 42,
            claims_per_month: 200,
            policies_per_snapshot: 300,
            months: 12,
            end: NaiveDate::from_ymd_opt(2024, 10, 31).unwrap_or_default(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Dataset {
    pub claims: Vec<ClaimFact>,
    pub policies: Vec<PolicyFact>,
}

/// Month-end dates from `end` backwards, newest first.
pub fn snapshot_dates(end: NaiveDate, months: u32) -> Vec<NaiveDate> {
    (0..months)
        .filter_map(|m| end.checked_sub_months(Months::new(m)))
        .map(last_day_of_month)
        .collect()
}

fn pick<'a>(rng: &mut StdRng, items: &[&'a str]) -> &'a str {
    items.choose(rng).copied().unwrap_or_default()
}

fn decision(rng: &mut StdRng) -> &'static str {
    match rng.random_range(0..100) {
        0..70 => "Approved",
        70..82 => "Denied",
        82..92 => "In Assessment",
        _ => "Pending",
    }
}

fn status(rng: &mut StdRng) -> &'static str {
    match rng.random_range(0..100) {
        0..85 => "Active",
        85..90 => "ACTIVE",
        90..96 => "Lapsed",
        _ => "Terminated",
    }
}

fn yes_no(rng: &mut StdRng, p_yes: f64) -> String {
    if rng.random_bool(p_yes) { "Yes" } else { "No" }.to_string()
}

fn round1(v: f64) -> f64 {
    (v * 10.0).round() / 10.0
}

/// Generate a dataset. Same spec, same rows.
pub fn generate(spec: &SyntheticSpec) -> Dataset {
    let mut rng = StdRng::seed_from_u64(spec.seed);
    let dates = snapshot_dates(spec.end, spec.months);
    let mut data = Dataset::default();
    let mut next_claim_id: i64 = 1;

    for &snapshot in &dates {
        for _ in 0..spec.claims_per_month {
            let category: i32 = rng.random_range(0..3);
            let retro = rng.random_bool(0.2);
            let retro_category: i32 = rng.random_range(0..3);
            let flag = |c: i32, on: bool| Some(i64::from(on && c == category));
            let retro_flag = |c: i32| Some(i64::from(retro && c == retro_category));
            data.claims.push(ClaimFact {
                claim_id: next_claim_id,
                policy_number: format!("POL-{:06}", rng.random_range(1..100_000)),
                claimant_name: format!(
                    "{} {}",
                    pick(&mut rng, FIRST_NAMES),
                    pick(&mut rng, LAST_NAMES)
                ),
                carrier_name: pick(&mut rng, CARRIERS).to_string(),
                snapshot_date: snapshot,
                decision: decision(&mut rng).to_string(),
                ongoing_rate_month: Some(rng.random_range(0..3)),
                is_initial_decision_flag: Some(rng.random_range(0..2)),
                initial_decisions_facilities: flag(0, true),
                initial_decisions_home_health: flag(1, true),
                initial_decisions_all_other: flag(2, true),
                retro_all_facilities: retro_flag(0),
                retro_home_health: retro_flag(1),
                retro_all_other: retro_flag(2),
                tat_days: Some(round1(rng.random_range(5.0..45.0))),
                retro_months: retro.then(|| f64::from(rng.random_range(1..12_i32))),
            });
            next_claim_id += 1;
        }

        for i in 0..spec.policies_per_snapshot {
            let premium = round1(rng.random_range(1_500.0..8_000.0));
            let years = f64::from(rng.random_range(1..20_i32));
            let active_claims = match rng.random_range(0..100) {
                0..80 => 0,
                80..95 => 1,
                _ => 2,
            };
            let rfbs = active_claims + rng.random_range(0..3);
            let approved = rng.random_range(0..=rfbs);
            data.policies.push(PolicyFact {
                policy_id: format!("P{:07}", i + 1),
                carrier_name: CARRIERS[i % CARRIERS.len()].to_string(),
                policy_snapshot_date: snapshot,
                insured_state: (!rng.random_bool(0.02)).then(|| pick(&mut rng, STATES).to_string()),
                policy_status: status(&mut rng).to_string(),
                annualized_premium: Some(premium),
                lifetime_collected_premium: Some(round1(premium * years)),
                rated_age: Some(f64::from(rng.random_range(55..90_i32))),
                in_waiver_flag: yes_no(&mut rng, 0.08),
                in_nonforfeiture_flag: yes_no(&mut rng, 0.03),
                total_active_claims: active_claims,
                total_rfbs: rfbs,
                total_approved_rfbs: approved,
                total_denials: rfbs - approved,
            });
        }
    }

    log::debug!(
        "generated {} claims and {} policies across {} snapshots (seed {})",
        data.claims.len(),
        data.policies.len(),
        dates.len(),
        spec.seed
    );
    data
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small() -> SyntheticSpec {
        SyntheticSpec {
            seed: 11,
            claims_per_month: 20,
            policies_per_snapshot: 15,
            months: 4,
            ..SyntheticSpec::default()
        }
    }

    #[test]
    fn generation_is_deterministic() {
        let a = generate(&small());
        let b = generate(&small());
        assert_eq!(a.claims, b.claims);
        assert_eq!(a.policies, b.policies);
    }

    #[test]
    fn sizes_follow_requested_shape() {
        let data = generate(&small());
        assert_eq!(data.claims.len(), 80);
        assert_eq!(data.policies.len(), 60);
    }

    #[test]
    fn snapshots_are_month_ends_newest_first() {
        let dates = snapshot_dates(NaiveDate::from_ymd_opt(2024, 3, 31).unwrap(), 3);
        assert_eq!(
            dates,
            vec![
                NaiveDate::from_ymd_opt(2024, 3, 31).unwrap(),
                NaiveDate::from_ymd_opt(2024, 2, 29).unwrap(),
                NaiveDate::from_ymd_opt(2024, 1, 31).unwrap(),
            ]
        );
    }

    #[test]
    fn carriers_come_from_the_demo_set() {
        let data = generate(&small());
        assert!(
            data.claims
                .iter()
                .all(|c| CARRIERS.contains(&c.carrier_name.as_str()))
        );
        assert!(
            data.policies
                .iter()
                .all(|p| p.total_approved_rfbs + p.total_denials == p.total_rfbs)
        );
    }
}
