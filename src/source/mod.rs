//! Fact source boundary: the read contract the engine needs from storage.
//!
//! The engine never issues SQL itself. It builds [`Predicate`] and
//! [`Aggregate`] values and hands them to a [`FactSource`], which pushes them
//! down to whatever backs the two fact relations.

#![allow(missing_docs)]

pub mod predicate;
pub mod records;
#[cfg(feature = "sqlite")]
pub mod sqlite;
pub mod synthetic;

use crate::core::errors::Result;
use crate::core::request::RequestContext;

pub use predicate::{AggFunc, Aggregate, Expr, FieldLookup, Predicate, Value};
pub use records::{ClaimFact, ClaimRow, PolicyFact, PolicyRow};

/// The two fact relations exposed by a source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Relation {
    Claims,
    Policy,
}

impl Relation {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Claims => "claims",
            Self::Policy => "policy",
        }
    }
}

impl std::fmt::Display for Relation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Every column the engine reads, across both relations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Column {
    // shared
    CarrierName,
    // claims
    ClaimId,
    PolicyNumber,
    ClaimantName,
    SnapshotDate,
    Decision,
    OngoingRateMonth,
    IsInitialDecisionFlag,
    InitialDecisionsFacilities,
    InitialDecisionsHomeHealth,
    InitialDecisionsAllOther,
    RetroAllFacilities,
    RetroHomeHealth,
    RetroAllOther,
    TatDays,
    RetroMonths,
    // policy
    PolicyId,
    PolicySnapshotDate,
    InsuredState,
    PolicyStatus,
    AnnualizedPremium,
    LifetimeCollectedPremium,
    RatedAge,
    InWaiverFlag,
    InNonforfeitureFlag,
    TotalActiveClaims,
    TotalRfbs,
    TotalApprovedRfbs,
    TotalDenials,
}

impl Column {
    /// Physical column name in the fact tables.
    pub const fn sql_name(self) -> &'static str {
        match self {
            Self::CarrierName => "CARRIER_NAME",
            Self::ClaimId => "TPA_FEE_WORKSHEET_SNAPSHOT_FACT_ID",
            Self::PolicyNumber => "POLICY_NUMBER",
            Self::ClaimantName => "CLAIMANTNAME",
            Self::SnapshotDate => "SNAPSHOT_DATE",
            Self::Decision => "DECISION",
            Self::OngoingRateMonth => "ONGOING_RATE_MONTH",
            Self::IsInitialDecisionFlag => "IS_INITIAL_DECISION_FLAG",
            Self::InitialDecisionsFacilities => "INITIAL_DECISIONS_FACILITIES",
            Self::InitialDecisionsHomeHealth => "INITIAL_DECISIONS_HOME_HEALTH",
            Self::InitialDecisionsAllOther => "INITIAL_DECISIONS_ALL_OTHER",
            Self::RetroAllFacilities => "RETRO_ALL_FACILITIES",
            Self::RetroHomeHealth => "RETRO_HOME_HEALTH",
            Self::RetroAllOther => "RETRO_ALL_OTHER",
            Self::TatDays => "RFB_PROCESS_TO_DECISION_TAT",
            Self::RetroMonths => "RETRO_MONTHS",
            Self::PolicyId => "POLICY_ID",
            Self::PolicySnapshotDate => "POLICY_SNAPSHOT_DATE",
            Self::InsuredState => "INSURED_STATE",
            Self::PolicyStatus => "POLICY_STATUS_DIM_ID",
            Self::AnnualizedPremium => "ANNUALIZED_PREMIUM",
            Self::LifetimeCollectedPremium => "LIFETIME_COLLECTED_PREMIUM",
            Self::RatedAge => "RATED_AGE",
            Self::InWaiverFlag => "IN_WAIVER_FLG",
            Self::InNonforfeitureFlag => "IN_NONFORFEITURE_FLG",
            Self::TotalActiveClaims => "TOTAL_ACTIVE_CLAIMS",
            Self::TotalRfbs => "TOTAL_RFBS",
            Self::TotalApprovedRfbs => "TOTAL_APPROVED_RFBS",
            Self::TotalDenials => "TOTAL_DENIALS",
        }
    }
}

/// One bucket of a group-by-count push-down.
#[derive(Debug, Clone, PartialEq)]
pub struct GroupCount {
    pub key: Option<String>,
    pub count: u64,
    pub sum: Option<f64>,
}

/// Read capability over the claims and policy fact relations.
///
/// Implementations must honor the context deadline and cancel flag on every
/// call, and must return rows already ordered as documented.
pub trait FactSource: Send + Sync {
    /// Logical identifier used in cache keys (e.g. the database path).
    fn source_id(&self) -> &str;

    /// Evaluate `aggregates` in one pass over the filtered relation.
    ///
    /// Returns one value per aggregate, in request order. `None` means the
    /// aggregate saw no non-null input.
    fn aggregate(
        &self,
        relation: Relation,
        filter: &Predicate,
        aggregates: &[Aggregate],
        ctx: &RequestContext,
    ) -> Result<Vec<Option<f64>>>;

    /// Count rows matching `filter`.
    fn count(&self, relation: Relation, filter: &Predicate, ctx: &RequestContext) -> Result<u64>;

    /// Group by `group_by`, counting rows and summing `sum_of`, ordered by
    /// count descending then key ascending, truncated to `limit` groups.
    fn group_count(
        &self,
        relation: Relation,
        filter: &Predicate,
        group_by: Column,
        sum_of: Column,
        limit: usize,
        ctx: &RequestContext,
    ) -> Result<Vec<GroupCount>>;

    /// Claim rows matching `filter`, newest snapshot first.
    fn claim_rows(
        &self,
        filter: &Predicate,
        limit: usize,
        ctx: &RequestContext,
    ) -> Result<Vec<ClaimRow>>;

    /// Policy rows matching `filter`, highest annualized premium first.
    fn policy_rows(
        &self,
        filter: &Predicate,
        limit: usize,
        ctx: &RequestContext,
    ) -> Result<Vec<PolicyRow>>;
}
