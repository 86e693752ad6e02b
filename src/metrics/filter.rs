//! Filter builder: request parameters to fact-source predicates.
//!
//! Every claims consumer (summary, supplemental counts, row list) takes its
//! predicate from [`claims_predicate`], so the eligibility rule is applied the
//! same way everywhere.

#![allow(missing_docs)]

use std::str::FromStr;
use std::sync::LazyLock;

use chrono::{Datelike, Duration, Months, NaiveDate};
use regex::Regex;
use serde::Serialize;

use crate::core::errors::{LtcError, Result};
use crate::source::{Column, Predicate, Value};

const DATE_FORMAT: &str = "%Y-%m-%d";

/// Carrier names: printable, no control characters, at most 128 chars.
static CARRIER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[^\p{Cc}]{1,128}$").expect("carrier pattern is valid")
});

/// Immutable request filter. Part of every cache key.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize)]
pub struct FilterSpec {
    carrier: Option<String>,
    as_of: Option<NaiveDate>,
}

impl FilterSpec {
    /// No carrier restriction, no date restriction.
    #[must_use]
    pub fn all() -> Self {
        Self::default()
    }

    /// Build a filter, normalizing the carrier.
    ///
    /// A blank carrier or `"All"` (any case) means every carrier.
    pub fn new(carrier: Option<&str>, as_of: Option<NaiveDate>) -> Result<Self> {
        let carrier = match carrier.map(str::trim) {
            None | Some("") => None,
            Some(c) if c.eq_ignore_ascii_case("all") => None,
            Some(c) if CARRIER_RE.is_match(c) => Some(c.to_string()),
            Some(c) => {
                return Err(LtcError::malformed(
                    "carrier",
                    format!("{c:?} contains control characters or exceeds 128 characters"),
                ));
            }
        };
        Ok(Self { carrier, as_of })
    }

    /// Build a filter from raw strings; the date must be `YYYY-MM-DD`.
    pub fn parse(carrier: Option<&str>, as_of: Option<&str>) -> Result<Self> {
        let as_of = match as_of.map(str::trim) {
            None | Some("") => None,
            Some(raw) => Some(parse_date(raw)?),
        };
        Self::new(carrier, as_of)
    }

    pub fn carrier(&self) -> Option<&str> {
        self.carrier.as_deref()
    }

    pub const fn as_of(&self) -> Option<NaiveDate> {
        self.as_of
    }
}

/// Parse a `YYYY-MM-DD` date, rejecting anything else as a malformed filter.
pub fn parse_date(raw: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(raw, DATE_FORMAT)
        .map_err(|e| LtcError::malformed("as_of", format!("{raw:?} is not a YYYY-MM-DD date: {e}")))
}

/// Named reporting periods offered to users.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatePreset {
    /// Last day of the previous calendar month.
    LastMonth,
    /// First day of the current month minus 90 days.
    LastQuarter,
    AllTime,
    Custom(NaiveDate),
}

impl DatePreset {
    /// Resolve against `today`. `None` means no date filter.
    pub fn resolve(self, today: NaiveDate) -> Option<NaiveDate> {
        let first_of_month = today.with_day(1).unwrap_or(today);
        match self {
            Self::LastMonth => first_of_month.pred_opt(),
            Self::LastQuarter => first_of_month.checked_sub_signed(Duration::days(90)),
            Self::AllTime => None,
            Self::Custom(date) => Some(date),
        }
    }
}

impl FromStr for DatePreset {
    type Err = LtcError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "last-month" => Ok(Self::LastMonth),
            "last-quarter" => Ok(Self::LastQuarter),
            "all-time" | "all" => Ok(Self::AllTime),
            other => parse_date(other).map(Self::Custom),
        }
    }
}

/// Last calendar day of `date`'s month.
pub fn last_day_of_month(date: NaiveDate) -> NaiveDate {
    date.with_day(1)
        .and_then(|first| first.checked_add_months(Months::new(1)))
        .and_then(|next| next.pred_opt())
        .unwrap_or(date)
}

fn date_value(date: NaiveDate) -> Value {
    Value::Text(date.format(DATE_FORMAT).to_string())
}

/// Claims eligibility as a predicate.
///
/// The three clauses partition on `ongoing_rate_month`, so "at least one"
/// and "exactly one" select the same rows. Rate month 0 with flag 0 stays
/// out of scope.
pub fn eligibility_predicate() -> Predicate {
    let either_flag = || Predicate::In(Column::IsInitialDecisionFlag, vec![0i64.into(), 1i64.into()]);
    let ongoing = Predicate::Eq(Column::OngoingRateMonth, 1i64.into()).and(either_flag());
    let initial = Predicate::Eq(Column::OngoingRateMonth, 0i64.into())
        .and(Predicate::Eq(Column::IsInitialDecisionFlag, 1i64.into()));
    let restoration = Predicate::Eq(Column::OngoingRateMonth, 2i64.into()).and(either_flag());
    ongoing.or(initial).or(restoration)
}

/// Reference evaluation of the eligibility rule: exactly one clause holds.
pub fn is_eligible(rate_month: Option<i64>, flag: Option<i64>) -> bool {
    let (Some(rm), Some(flag)) = (rate_month, flag) else {
        return false;
    };
    let clauses = [
        rm == 1 && matches!(flag, 0 | 1),
        rm == 0 && flag == 1,
        rm == 2 && matches!(flag, 0 | 1),
    ];
    clauses.iter().filter(|&&c| c).count() == 1
}

fn carrier_predicate(spec: &FilterSpec) -> Predicate {
    spec.carrier()
        .map_or(Predicate::True, |c| Predicate::Eq(Column::CarrierName, c.into()))
}

/// Eligibility, then carrier, then the month-end snapshot date.
pub fn claims_predicate(spec: &FilterSpec) -> Predicate {
    let mut pred = eligibility_predicate().and(carrier_predicate(spec));
    if let Some(date) = spec.as_of() {
        pred = pred.and(Predicate::Eq(
            Column::SnapshotDate,
            date_value(last_day_of_month(date)),
        ));
    }
    pred
}

/// Carrier plus an exact snapshot-date match (no month-end normalization).
pub fn policy_predicate(spec: &FilterSpec) -> Predicate {
    let mut pred = carrier_predicate(spec);
    if let Some(date) = spec.as_of() {
        pred = pred.and(Predicate::Eq(Column::PolicySnapshotDate, date_value(date)));
    }
    pred
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::{ClaimFact, FieldLookup};
    use proptest::prelude::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn claim(rate_month: Option<i64>, flag: Option<i64>) -> ClaimFact {
        ClaimFact {
            claim_id: 1,
            policy_number: "POL-1".into(),
            claimant_name: "Pat Doe".into(),
            carrier_name: "Acme Insurance Co".into(),
            snapshot_date: date(2024, 10, 31),
            decision: "Approved".into(),
            ongoing_rate_month: rate_month,
            is_initial_decision_flag: flag,
            initial_decisions_facilities: None,
            initial_decisions_home_health: None,
            initial_decisions_all_other: None,
            retro_all_facilities: None,
            retro_home_health: None,
            retro_all_other: None,
            tat_days: None,
            retro_months: None,
        }
    }

    #[test]
    fn all_and_blank_carriers_mean_no_filter() {
        for raw in ["All", "all", "  ", ""] {
            let spec = FilterSpec::new(Some(raw), None).unwrap();
            assert_eq!(spec.carrier(), None, "{raw:?}");
        }
        let spec = FilterSpec::new(Some("  Acme Insurance Co "), None).unwrap();
        assert_eq!(spec.carrier(), Some("Acme Insurance Co"));
    }

    #[test]
    fn control_characters_in_carrier_rejected() {
        let err = FilterSpec::new(Some("Acme\u{0}"), None).unwrap_err();
        assert_eq!(err.code(), "LTC-1101");
        let long = "x".repeat(129);
        assert!(FilterSpec::new(Some(&long), None).is_err());
    }

    #[test]
    fn unparseable_date_is_malformed() {
        for raw in ["2024-13-01", "10/31/2024", "yesterday", "2024-02-30"] {
            let err = FilterSpec::parse(None, Some(raw)).unwrap_err();
            assert!(
                matches!(err, LtcError::MalformedFilter { field: "as_of", .. }),
                "{raw}: {err}"
            );
        }
        let spec = FilterSpec::parse(Some("All"), Some("2024-10-15")).unwrap();
        assert_eq!(spec.as_of(), Some(date(2024, 10, 15)));
    }

    #[test]
    fn month_end_normalization() {
        assert_eq!(last_day_of_month(date(2024, 2, 3)), date(2024, 2, 29));
        assert_eq!(last_day_of_month(date(2023, 2, 28)), date(2023, 2, 28));
        assert_eq!(last_day_of_month(date(2024, 12, 1)), date(2024, 12, 31));
    }

    #[test]
    fn claims_date_is_month_end_but_policy_date_is_exact() {
        let spec = FilterSpec::parse(None, Some("2024-10-15")).unwrap();
        let mut params = Vec::new();
        claims_predicate(&spec).to_sql(&mut params);
        assert_eq!(params.last(), Some(&Value::Text("2024-10-31".into())));

        let mut params = Vec::new();
        policy_predicate(&spec).to_sql(&mut params);
        assert_eq!(params, vec![Value::Text("2024-10-15".into())]);
    }

    #[test]
    fn presets_resolve_against_today() {
        let today = date(2024, 11, 14);
        assert_eq!(DatePreset::LastMonth.resolve(today), Some(date(2024, 10, 31)));
        assert_eq!(DatePreset::LastQuarter.resolve(today), Some(date(2024, 8, 3)));
        assert_eq!(DatePreset::AllTime.resolve(today), None);
        assert_eq!(
            DatePreset::Custom(date(2024, 1, 5)).resolve(today),
            Some(date(2024, 1, 5))
        );
    }

    #[test]
    fn presets_parse_from_cli_strings() {
        assert_eq!("last-month".parse::<DatePreset>().unwrap(), DatePreset::LastMonth);
        assert_eq!("LAST_QUARTER".parse::<DatePreset>().unwrap(), DatePreset::LastQuarter);
        assert_eq!("all-time".parse::<DatePreset>().unwrap(), DatePreset::AllTime);
        assert_eq!(
            "2024-06-30".parse::<DatePreset>().unwrap(),
            DatePreset::Custom(date(2024, 6, 30))
        );
        assert!("fortnight".parse::<DatePreset>().is_err());
    }

    #[test]
    fn initial_with_zero_flag_is_excluded() {
        assert!(!is_eligible(Some(0), Some(0)));
        assert!(is_eligible(Some(0), Some(1)));
        assert!(is_eligible(Some(1), Some(0)));
        assert!(is_eligible(Some(2), Some(1)));
        assert!(!is_eligible(Some(3), Some(1)));
        assert!(!is_eligible(None, Some(1)));
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(256))]

        #[test]
        fn predicate_agrees_with_exactly_one_clause(
            rate_month in proptest::option::of(-1i64..4),
            flag in proptest::option::of(-1i64..3),
        ) {
            let row = claim(rate_month, flag);
            let by_predicate = eligibility_predicate().matches(&row as &dyn FieldLookup);
            prop_assert_eq!(by_predicate, is_eligible(rate_month, flag));
        }

        #[test]
        fn claims_predicate_never_admits_ineligible_rows(
            rate_month in proptest::option::of(-1i64..4),
            flag in proptest::option::of(-1i64..3),
        ) {
            let row = claim(rate_month, flag);
            let spec = FilterSpec::parse(Some("Acme Insurance Co"), Some("2024-10-01")).unwrap();
            if claims_predicate(&spec).matches(&row) {
                prop_assert!(is_eligible(rate_month, flag));
            }
        }
    }
}
