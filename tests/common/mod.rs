#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use chrono::NaiveDate;

use ltc_metrics::core::errors::Result;
use ltc_metrics::core::request::RequestContext;
use ltc_metrics::source::sqlite::SqliteFactSource;
use ltc_metrics::source::{
    Aggregate, ClaimFact, ClaimRow, Column, FactSource, GroupCount, PolicyFact, PolicyRow,
    Predicate, Relation,
};

// ──────────────────── CLI runner ────────────────────

pub struct CmdResult {
    pub status: ExitStatus,
    pub stdout: String,
    pub stderr: String,
    pub log_path: PathBuf,
}

fn now_millis() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_millis())
}

fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

fn resolve_bin_path() -> PathBuf {
    if let Ok(path) = std::env::var("CARGO_BIN_EXE_ltcm") {
        return PathBuf::from(path);
    }

    let exe_name = if cfg!(windows) { "ltcm.exe" } else { "ltcm" };
    let fallback = std::env::current_exe()
        .ok()
        .and_then(|p| p.parent().map(PathBuf::from))
        .and_then(|deps| deps.parent().map(PathBuf::from))
        .map(|debug_dir| debug_dir.join(exe_name));

    match fallback {
        Some(path) if path.exists() => path,
        _ => panic!("unable to resolve ltcm binary path for integration test"),
    }
}

/// Run `ltcm` with `home` as both `$HOME` and the parent of the fact database.
pub fn run_cli_case(case_name: &str, home: &Path, args: &[&str]) -> CmdResult {
    let root = std::env::temp_dir().join("ltcm-test-logs");
    fs::create_dir_all(&root).expect("create temp test log dir");

    let log_path = root.join(format!("{}-{}.log", sanitize(case_name), now_millis()));
    let bin_path = resolve_bin_path();
    let database = home.join("facts.sqlite3");

    let output = Command::new(&bin_path)
        .args(args)
        .env("HOME", home)
        .env("LTC_SOURCE_DATABASE", &database)
        .env_remove("LTC_OUTPUT_FORMAT")
        .env("RUST_BACKTRACE", "1")
        .output()
        .expect("execute ltcm command");

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();

    let mut log_content = String::new();
    log_content.push_str(&format!("case={case_name}\n"));
    log_content.push_str(&format!("bin={}\n", bin_path.display()));
    log_content.push_str(&format!("args={args:?}\n"));
    log_content.push_str(&format!("status={}\n", output.status));
    log_content.push_str("----- stdout -----\n");
    log_content.push_str(&stdout);
    log_content.push('\n');
    log_content.push_str("----- stderr -----\n");
    log_content.push_str(&stderr);
    log_content.push('\n');
    fs::write(&log_path, log_content).expect("write test log");

    CmdResult {
        status: output.status,
        stdout,
        stderr,
        log_path,
    }
}

// ──────────────────── fact fixtures ────────────────────

pub const ACME: &str = "Acme Insurance Co";
pub const BETA: &str = "Beta Health Insurance";

pub fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).expect("valid date")
}

pub fn october() -> NaiveDate {
    date(2024, 10, 31)
}

pub fn claim(id: i64, carrier: &str, decision: &str, rate_month: i64, flag: i64) -> ClaimFact {
    ClaimFact {
        claim_id: id,
        policy_number: format!("POL-{id:06}"),
        claimant_name: format!("Claimant {id}"),
        carrier_name: carrier.to_string(),
        snapshot_date: october(),
        decision: decision.to_string(),
        ongoing_rate_month: Some(rate_month),
        is_initial_decision_flag: Some(flag),
        initial_decisions_facilities: Some(1),
        initial_decisions_home_health: Some(0),
        initial_decisions_all_other: Some(0),
        retro_all_facilities: Some(0),
        retro_home_health: Some(0),
        retro_all_other: Some(0),
        tat_days: Some(22.5),
        retro_months: None,
    }
}

pub fn policy(id: usize, carrier: &str, state: Option<&str>, status: &str, premium: f64) -> PolicyFact {
    PolicyFact {
        policy_id: format!("P{id:07}"),
        carrier_name: carrier.to_string(),
        policy_snapshot_date: october(),
        insured_state: state.map(str::to_string),
        policy_status: status.to_string(),
        annualized_premium: Some(premium),
        lifetime_collected_premium: Some(premium * 4.0),
        rated_age: Some(72.0),
        in_waiver_flag: "No".to_string(),
        in_nonforfeiture_flag: "No".to_string(),
        total_active_claims: 0,
        total_rfbs: 0,
        total_approved_rfbs: 0,
        total_denials: 0,
    }
}

/// 120 eligible Acme claims (90 approved, 12 denied, 18 in assessment, TAT
/// 22.5) plus ineligible noise that must never be counted.
pub fn scenario_claims() -> Vec<ClaimFact> {
    let mut rows = Vec::new();
    let mut id = 1;
    for (decision, n) in [("Approved", 90), ("Denied", 12), ("In Assessment", 18)] {
        for _ in 0..n {
            // Rotate through the three eligible lifecycle stages.
            let rate_month = [1, 0, 2][usize::try_from(id % 3).unwrap_or(0)];
            rows.push(claim(id, ACME, decision, rate_month, 1));
            id += 1;
        }
    }
    for _ in 0..15 {
        let mut noise = claim(id, ACME, "Approved", 0, 0);
        noise.tat_days = Some(99.0);
        rows.push(noise);
        id += 1;
    }
    rows
}

/// 200 Acme policies, 180 of them active, 3 000 premium each.
pub fn scenario_policies() -> Vec<PolicyFact> {
    (0..200)
        .map(|i| {
            let status = match i {
                0..150 => "Active",
                150..180 => "ACTIVE",
                180..190 => "Lapsed",
                _ => "Terminated",
            };
            let state = match i % 4 {
                0 | 1 => Some("CA"),
                2 => Some("TX"),
                _ => None,
            };
            policy(i, ACME, state, status, 3_000.0)
        })
        .collect()
}

pub fn scenario_source() -> SqliteFactSource {
    let source = SqliteFactSource::in_memory("scenario").expect("open in-memory source");
    source
        .insert_claims(&scenario_claims())
        .expect("insert claims");
    source
        .insert_policies(&scenario_policies())
        .expect("insert policies");
    source
}

// ──────────────────── counting source ────────────────────

/// Fact source wrapper that counts calls and can stall each one.
pub struct CountingSource<S> {
    inner: S,
    calls: AtomicUsize,
    delay: Duration,
}

impl<S: FactSource> CountingSource<S> {
    pub fn new(inner: S) -> Self {
        Self::with_delay(inner, Duration::ZERO)
    }

    pub fn with_delay(inner: S, delay: Duration) -> Self {
        Self {
            inner,
            calls: AtomicUsize::new(0),
            delay,
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn enter(&self, ctx: &RequestContext) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }
        ctx.check("counting source")
    }
}

impl<S: FactSource> FactSource for CountingSource<S> {
    fn source_id(&self) -> &str {
        self.inner.source_id()
    }

    fn aggregate(
        &self,
        relation: Relation,
        filter: &Predicate,
        aggregates: &[Aggregate],
        ctx: &RequestContext,
    ) -> Result<Vec<Option<f64>>> {
        self.enter(ctx)?;
        self.inner.aggregate(relation, filter, aggregates, ctx)
    }

    fn count(&self, relation: Relation, filter: &Predicate, ctx: &RequestContext) -> Result<u64> {
        self.enter(ctx)?;
        self.inner.count(relation, filter, ctx)
    }

    fn group_count(
        &self,
        relation: Relation,
        filter: &Predicate,
        group_by: Column,
        sum_of: Column,
        limit: usize,
        ctx: &RequestContext,
    ) -> Result<Vec<GroupCount>> {
        self.enter(ctx)?;
        self.inner
            .group_count(relation, filter, group_by, sum_of, limit, ctx)
    }

    fn claim_rows(
        &self,
        filter: &Predicate,
        limit: usize,
        ctx: &RequestContext,
    ) -> Result<Vec<ClaimRow>> {
        self.enter(ctx)?;
        self.inner.claim_rows(filter, limit, ctx)
    }

    fn policy_rows(
        &self,
        filter: &Predicate,
        limit: usize,
        ctx: &RequestContext,
    ) -> Result<Vec<PolicyRow>> {
        self.enter(ctx)?;
        self.inner.policy_rows(filter, limit, ctx)
    }
}
