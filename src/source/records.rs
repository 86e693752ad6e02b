//! Fact records and the projected rows returned by list queries.

#![allow(missing_docs)]

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use super::predicate::{FieldLookup, Value};
use super::Column;

/// One claim-decision snapshot row as stored in the claims fact table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClaimFact {
    pub claim_id: i64,
    pub policy_number: String,
    pub claimant_name: String,
    pub carrier_name: String,
    pub snapshot_date: NaiveDate,
    pub decision: String,
    /// 0 = initial, 1 = ongoing, 2 = restoration.
    pub ongoing_rate_month: Option<i64>,
    pub is_initial_decision_flag: Option<i64>,
    pub initial_decisions_facilities: Option<i64>,
    pub initial_decisions_home_health: Option<i64>,
    pub initial_decisions_all_other: Option<i64>,
    pub retro_all_facilities: Option<i64>,
    pub retro_home_health: Option<i64>,
    pub retro_all_other: Option<i64>,
    pub tat_days: Option<f64>,
    pub retro_months: Option<f64>,
}

/// One policy row of a monthly policy snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyFact {
    pub policy_id: String,
    pub carrier_name: String,
    pub policy_snapshot_date: NaiveDate,
    pub insured_state: Option<String>,
    pub policy_status: String,
    pub annualized_premium: Option<f64>,
    pub lifetime_collected_premium: Option<f64>,
    pub rated_age: Option<f64>,
    /// `"Yes"` / `"No"`.
    pub in_waiver_flag: String,
    pub in_nonforfeiture_flag: String,
    pub total_active_claims: i64,
    pub total_rfbs: i64,
    pub total_approved_rfbs: i64,
    pub total_denials: i64,
}

fn date_value(d: NaiveDate) -> Value {
    Value::Text(d.format("%Y-%m-%d").to_string())
}

impl FieldLookup for ClaimFact {
    fn field(&self, column: Column) -> Option<Value> {
        let v = match column {
            Column::ClaimId => Value::Int(self.claim_id),
            Column::PolicyNumber => Value::Text(self.policy_number.clone()),
            Column::ClaimantName => Value::Text(self.claimant_name.clone()),
            Column::CarrierName => Value::Text(self.carrier_name.clone()),
            Column::SnapshotDate => date_value(self.snapshot_date),
            Column::Decision => Value::Text(self.decision.clone()),
            Column::OngoingRateMonth => Value::Int(self.ongoing_rate_month?),
            Column::IsInitialDecisionFlag => Value::Int(self.is_initial_decision_flag?),
            Column::InitialDecisionsFacilities => Value::Int(self.initial_decisions_facilities?),
            Column::InitialDecisionsHomeHealth => Value::Int(self.initial_decisions_home_health?),
            Column::InitialDecisionsAllOther => Value::Int(self.initial_decisions_all_other?),
            Column::RetroAllFacilities => Value::Int(self.retro_all_facilities?),
            Column::RetroHomeHealth => Value::Int(self.retro_home_health?),
            Column::RetroAllOther => Value::Int(self.retro_all_other?),
            Column::TatDays => Value::Real(self.tat_days?),
            Column::RetroMonths => Value::Real(self.retro_months?),
            _ => return None,
        };
        Some(v)
    }
}

impl FieldLookup for PolicyFact {
    fn field(&self, column: Column) -> Option<Value> {
        let v = match column {
            Column::PolicyId => Value::Text(self.policy_id.clone()),
            Column::CarrierName => Value::Text(self.carrier_name.clone()),
            Column::PolicySnapshotDate => date_value(self.policy_snapshot_date),
            Column::InsuredState => Value::Text(self.insured_state.clone()?),
            Column::PolicyStatus => Value::Text(self.policy_status.clone()),
            Column::AnnualizedPremium => Value::Real(self.annualized_premium?),
            Column::LifetimeCollectedPremium => Value::Real(self.lifetime_collected_premium?),
            Column::RatedAge => Value::Real(self.rated_age?),
            Column::InWaiverFlag => Value::Text(self.in_waiver_flag.clone()),
            Column::InNonforfeitureFlag => Value::Text(self.in_nonforfeiture_flag.clone()),
            Column::TotalActiveClaims => Value::Int(self.total_active_claims),
            Column::TotalRfbs => Value::Int(self.total_rfbs),
            Column::TotalApprovedRfbs => Value::Int(self.total_approved_rfbs),
            Column::TotalDenials => Value::Int(self.total_denials),
            _ => return None,
        };
        Some(v)
    }
}

/// Projected claim row for list views.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClaimRow {
    pub claim_id: i64,
    pub policy_number: String,
    pub claimant_name: String,
    pub carrier: String,
    pub decision: String,
    pub snapshot_date: NaiveDate,
    pub rate_month: Option<i64>,
    pub tat_days: Option<f64>,
}

impl From<&ClaimFact> for ClaimRow {
    fn from(f: &ClaimFact) -> Self {
        Self {
            claim_id: f.claim_id,
            policy_number: f.policy_number.clone(),
            claimant_name: f.claimant_name.clone(),
            carrier: f.carrier_name.clone(),
            decision: f.decision.clone(),
            snapshot_date: f.snapshot_date,
            rate_month: f.ongoing_rate_month,
            tat_days: f.tat_days,
        }
    }
}

/// Projected policy row for list views.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PolicyRow {
    pub policy_id: String,
    pub carrier: String,
    pub state: Option<String>,
    pub status: String,
    pub annual_premium: Option<f64>,
    pub age: Option<f64>,
    pub in_waiver: String,
    pub active_claims: i64,
}

impl From<&PolicyFact> for PolicyRow {
    fn from(f: &PolicyFact) -> Self {
        Self {
            policy_id: f.policy_id.clone(),
            carrier: f.carrier_name.clone(),
            state: f.insured_state.clone(),
            status: f.policy_status.clone(),
            annual_premium: f.annualized_premium,
            age: f.rated_age,
            in_waiver: f.in_waiver_flag.clone(),
            active_claims: f.total_active_claims,
        }
    }
}
