//! SQLite-backed fact source.
//!
//! One connection behind a `parking_lot` mutex. Every call acquires the lock
//! within the request deadline and installs a progress handler that interrupts
//! the running statement once the request is cancelled or expires.

#![allow(missing_docs)]

use std::fmt;
use std::time::Instant;

use chrono::NaiveDate;
use parking_lot::Mutex;
use rusqlite::types::{ToSqlOutput, Type};
use rusqlite::{Connection, ErrorCode, OpenFlags, Row, ToSql, params, params_from_iter};

use super::predicate::{Aggregate, Predicate, Value};
use super::records::{ClaimFact, ClaimRow, PolicyFact, PolicyRow};
use super::{Column, FactSource, GroupCount, Relation};
use crate::core::config::{SourceConfig, is_sql_identifier};
use crate::core::errors::{LtcError, Result};
use crate::core::request::RequestContext;

/// SQLite VM instructions between deadline/cancel checks.
const PROGRESS_INTERVAL_OPS: i32 = 1_000;

const DATE_FORMAT: &str = "%Y-%m-%d";

impl ToSql for Value {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            Self::Int(v) => ToSqlOutput::from(*v),
            Self::Real(v) => ToSqlOutput::from(*v),
            Self::Text(s) => ToSqlOutput::from(s.as_str()),
        })
    }
}

/// Fact source over two tables in one SQLite database.
pub struct SqliteFactSource {
    conn: Mutex<Connection>,
    claims_table: String,
    policy_table: String,
    source_id: String,
}

impl fmt::Debug for SqliteFactSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SqliteFactSource")
            .field("source_id", &self.source_id)
            .field("claims_table", &self.claims_table)
            .field("policy_table", &self.policy_table)
            .finish_non_exhaustive()
    }
}

impl SqliteFactSource {
    /// Open (or create) the database named by `config`, creating the fact
    /// tables if they do not exist.
    pub fn open(config: &SourceConfig) -> Result<Self> {
        let path = &config.database;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|source| LtcError::io(parent, source))?;
        }
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .map_err(|e| LtcError::SourceUnavailable {
            details: format!("cannot open {}: {e}", path.display()),
        })?;
        Self::with_connection(
            conn,
            &config.claims_table,
            &config.policy_table,
            path.display().to_string(),
        )
    }

    /// Private in-memory database, mainly for tests and demos.
    pub fn in_memory(source_id: &str) -> Result<Self> {
        let defaults = SourceConfig::default();
        let conn = Connection::open_in_memory()?;
        Self::with_connection(
            conn,
            &defaults.claims_table,
            &defaults.policy_table,
            source_id.to_string(),
        )
    }

    fn with_connection(
        conn: Connection,
        claims_table: &str,
        policy_table: &str,
        source_id: String,
    ) -> Result<Self> {
        for name in [claims_table, policy_table] {
            if !is_sql_identifier(name) {
                return Err(LtcError::InvalidConfig {
                    details: format!("table name {name:?} is not a plain SQL identifier"),
                });
            }
        }
        apply_pragmas(&conn)?;
        apply_schema(&conn, claims_table, policy_table)?;
        Ok(Self {
            conn: Mutex::new(conn),
            claims_table: claims_table.to_string(),
            policy_table: policy_table.to_string(),
            source_id,
        })
    }

    fn table(&self, relation: Relation) -> &str {
        match relation {
            Relation::Claims => &self.claims_table,
            Relation::Policy => &self.policy_table,
        }
    }

    /// Bulk-load claim facts in one transaction. Returns rows inserted.
    pub fn insert_claims(&self, rows: &[ClaimFact]) -> Result<usize> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare_cached(&format!(
                "INSERT INTO \"{}\" (
                    \"TPA_FEE_WORKSHEET_SNAPSHOT_FACT_ID\", \"POLICY_NUMBER\", \"CLAIMANTNAME\",
                    \"CARRIER_NAME\", \"SNAPSHOT_DATE\", \"DECISION\", \"ONGOING_RATE_MONTH\",
                    \"IS_INITIAL_DECISION_FLAG\", \"INITIAL_DECISIONS_FACILITIES\",
                    \"INITIAL_DECISIONS_HOME_HEALTH\", \"INITIAL_DECISIONS_ALL_OTHER\",
                    \"RETRO_ALL_FACILITIES\", \"RETRO_HOME_HEALTH\", \"RETRO_ALL_OTHER\",
                    \"RFB_PROCESS_TO_DECISION_TAT\", \"RETRO_MONTHS\"
                ) VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?15,?16)",
                self.claims_table
            ))?;
            for r in rows {
                stmt.execute(params![
                    r.claim_id,
                    r.policy_number,
                    r.claimant_name,
                    r.carrier_name,
                    r.snapshot_date.format(DATE_FORMAT).to_string(),
                    r.decision,
                    r.ongoing_rate_month,
                    r.is_initial_decision_flag,
                    r.initial_decisions_facilities,
                    r.initial_decisions_home_health,
                    r.initial_decisions_all_other,
                    r.retro_all_facilities,
                    r.retro_home_health,
                    r.retro_all_other,
                    r.tat_days,
                    r.retro_months,
                ])?;
            }
        }
        tx.commit()?;
        Ok(rows.len())
    }

    /// Bulk-load policy facts in one transaction. Returns rows inserted.
    pub fn insert_policies(&self, rows: &[PolicyFact]) -> Result<usize> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare_cached(&format!(
                "INSERT INTO \"{}\" (
                    \"POLICY_ID\", \"CARRIER_NAME\", \"POLICY_SNAPSHOT_DATE\", \"INSURED_STATE\",
                    \"POLICY_STATUS_DIM_ID\", \"ANNUALIZED_PREMIUM\", \"LIFETIME_COLLECTED_PREMIUM\",
                    \"RATED_AGE\", \"IN_WAIVER_FLG\", \"IN_NONFORFEITURE_FLG\",
                    \"TOTAL_ACTIVE_CLAIMS\", \"TOTAL_RFBS\", \"TOTAL_APPROVED_RFBS\", \"TOTAL_DENIALS\"
                ) VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14)",
                self.policy_table
            ))?;
            for r in rows {
                stmt.execute(params![
                    r.policy_id,
                    r.carrier_name,
                    r.policy_snapshot_date.format(DATE_FORMAT).to_string(),
                    r.insured_state,
                    r.policy_status,
                    r.annualized_premium,
                    r.lifetime_collected_premium,
                    r.rated_age,
                    r.in_waiver_flag,
                    r.in_nonforfeiture_flag,
                    r.total_active_claims,
                    r.total_rfbs,
                    r.total_approved_rfbs,
                    r.total_denials,
                ])?;
            }
        }
        tx.commit()?;
        Ok(rows.len())
    }

    /// Delete every fact row. Used by `seed --replace`.
    pub fn truncate(&self) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute_batch(&format!(
            "DELETE FROM \"{}\"; DELETE FROM \"{}\";",
            self.claims_table, self.policy_table
        ))?;
        Ok(())
    }

    /// Run `f` under the connection lock, bounded by `ctx`.
    fn with_conn<T>(
        &self,
        ctx: &RequestContext,
        stage: &'static str,
        f: impl FnOnce(&Connection) -> rusqlite::Result<T>,
    ) -> Result<T> {
        ctx.check(stage)?;
        let conn = match ctx.remaining() {
            Some(wait) => self.conn.try_lock_for(wait).ok_or_else(|| {
                LtcError::SourceUnavailable {
                    details: format!("connection busy past deadline during {stage}"),
                }
            })?,
            None => self.conn.lock(),
        };

        let watch = ctx.clone();
        conn.progress_handler(
            PROGRESS_INTERVAL_OPS,
            Some(move || watch.is_cancelled() || watch.is_expired()),
        );
        let started = Instant::now();
        let result = f(&conn);
        conn.progress_handler(0, None::<fn() -> bool>);
        log::trace!("{stage} on {} took {:?}", self.source_id, started.elapsed());

        result.map_err(|err| {
            if is_interrupt(&err) {
                // Whichever condition tripped the handler decides the error.
                match ctx.check(stage) {
                    Err(e) => e,
                    Ok(()) => LtcError::SourceUnavailable {
                        details: format!("query interrupted during {stage}"),
                    },
                }
            } else {
                err.into()
            }
        })
    }
}

fn is_interrupt(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _) if e.code == ErrorCode::OperationInterrupted
    )
}

fn limit_value(limit: usize) -> Value {
    Value::Int(i64::try_from(limit).unwrap_or(i64::MAX))
}

fn get_date(row: &Row<'_>, idx: usize) -> rusqlite::Result<NaiveDate> {
    let raw: String = row.get(idx)?;
    NaiveDate::parse_from_str(&raw, DATE_FORMAT)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

impl FactSource for SqliteFactSource {
    fn source_id(&self) -> &str {
        &self.source_id
    }

    fn aggregate(
        &self,
        relation: Relation,
        filter: &Predicate,
        aggregates: &[Aggregate],
        ctx: &RequestContext,
    ) -> Result<Vec<Option<f64>>> {
        if aggregates.is_empty() {
            return Ok(Vec::new());
        }
        let select = aggregates
            .iter()
            .map(Aggregate::to_sql)
            .collect::<Vec<_>>()
            .join(", ");
        let mut params = Vec::new();
        let sql = format!(
            "SELECT {select} FROM \"{}\" WHERE {}",
            self.table(relation),
            filter.to_sql(&mut params)
        );
        self.with_conn(ctx, "aggregate", |conn| {
            conn.prepare_cached(&sql)?
                .query_row(params_from_iter(params.iter()), |row| {
                    (0..aggregates.len())
                        .map(|i| row.get::<_, Option<f64>>(i))
                        .collect()
                })
        })
    }

    fn count(&self, relation: Relation, filter: &Predicate, ctx: &RequestContext) -> Result<u64> {
        let mut params = Vec::new();
        let sql = format!(
            "SELECT COUNT(*) FROM \"{}\" WHERE {}",
            self.table(relation),
            filter.to_sql(&mut params)
        );
        let n: i64 = self.with_conn(ctx, "count", |conn| {
            conn.prepare_cached(&sql)?
                .query_row(params_from_iter(params.iter()), |row| row.get(0))
        })?;
        Ok(u64::try_from(n).unwrap_or(0))
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
        let mut params = Vec::new();
        let key = group_by.sql_name();
        let sql = format!(
            "SELECT \"{key}\", COUNT(*) AS n, SUM(\"{sum}\") FROM \"{table}\"
             WHERE {filter}
             GROUP BY \"{key}\"
             ORDER BY n DESC, \"{key}\" ASC
             LIMIT ?",
            sum = sum_of.sql_name(),
            table = self.table(relation),
            filter = filter.to_sql(&mut params),
        );
        params.push(limit_value(limit));
        self.with_conn(ctx, "group count", |conn| {
            conn.prepare_cached(&sql)?
                .query_map(params_from_iter(params.iter()), |row| {
                    let n: i64 = row.get(1)?;
                    Ok(GroupCount {
                        key: row.get(0)?,
                        count: u64::try_from(n).unwrap_or(0),
                        sum: row.get(2)?,
                    })
                })?
                .collect()
        })
    }

    fn claim_rows(
        &self,
        filter: &Predicate,
        limit: usize,
        ctx: &RequestContext,
    ) -> Result<Vec<ClaimRow>> {
        let mut params = Vec::new();
        let sql = format!(
            "SELECT \"TPA_FEE_WORKSHEET_SNAPSHOT_FACT_ID\", \"POLICY_NUMBER\", \"CLAIMANTNAME\",
                    \"CARRIER_NAME\", \"DECISION\", \"SNAPSHOT_DATE\", \"ONGOING_RATE_MONTH\",
                    \"RFB_PROCESS_TO_DECISION_TAT\"
             FROM \"{}\" WHERE {}
             ORDER BY \"SNAPSHOT_DATE\" DESC, \"TPA_FEE_WORKSHEET_SNAPSHOT_FACT_ID\" ASC
             LIMIT ?",
            self.claims_table,
            filter.to_sql(&mut params)
        );
        params.push(limit_value(limit));
        self.with_conn(ctx, "claim rows", |conn| {
            conn.prepare_cached(&sql)?
                .query_map(params_from_iter(params.iter()), |row| {
                    Ok(ClaimRow {
                        claim_id: row.get(0)?,
                        policy_number: row.get(1)?,
                        claimant_name: row.get(2)?,
                        carrier: row.get(3)?,
                        decision: row.get(4)?,
                        snapshot_date: get_date(row, 5)?,
                        rate_month: row.get(6)?,
                        tat_days: row.get(7)?,
                    })
                })?
                .collect()
        })
    }

    fn policy_rows(
        &self,
        filter: &Predicate,
        limit: usize,
        ctx: &RequestContext,
    ) -> Result<Vec<PolicyRow>> {
        let mut params = Vec::new();
        let sql = format!(
            "SELECT \"POLICY_ID\", \"CARRIER_NAME\", \"INSURED_STATE\", \"POLICY_STATUS_DIM_ID\",
                    \"ANNUALIZED_PREMIUM\", \"RATED_AGE\", \"IN_WAIVER_FLG\", \"TOTAL_ACTIVE_CLAIMS\"
             FROM \"{}\" WHERE {}
             ORDER BY \"ANNUALIZED_PREMIUM\" DESC, \"POLICY_ID\" ASC
             LIMIT ?",
            self.policy_table,
            filter.to_sql(&mut params)
        );
        params.push(limit_value(limit));
        self.with_conn(ctx, "policy rows", |conn| {
            conn.prepare_cached(&sql)?
                .query_map(params_from_iter(params.iter()), |row| {
                    Ok(PolicyRow {
                        policy_id: row.get(0)?,
                        carrier: row.get(1)?,
                        state: row.get(2)?,
                        status: row.get(3)?,
                        annual_premium: row.get(4)?,
                        age: row.get(5)?,
                        in_waiver: row.get(6)?,
                        active_claims: row.get(7)?,
                    })
                })?
                .collect()
        })
    }
}

// ──────────────────── schema & pragmas ────────────────────

fn apply_pragmas(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "PRAGMA synchronous = NORMAL;
         PRAGMA cache_size = -8000;
         PRAGMA temp_store = MEMORY;
         PRAGMA busy_timeout = 5000;",
    )?;
    // In-memory databases report "memory" and cannot switch to WAL.
    let mode: String = conn.query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))?;
    if !mode.eq_ignore_ascii_case("wal") && !mode.eq_ignore_ascii_case("memory") {
        log::warn!("requested WAL journal mode but got '{mode}'");
    }
    Ok(())
}

fn apply_schema(conn: &Connection, claims: &str, policy: &str) -> Result<()> {
    conn.execute_batch(&format!(
        "CREATE TABLE IF NOT EXISTS \"{claims}\" (
            \"TPA_FEE_WORKSHEET_SNAPSHOT_FACT_ID\" INTEGER NOT NULL,
            \"POLICY_NUMBER\" TEXT NOT NULL,
            \"CLAIMANTNAME\" TEXT NOT NULL,
            \"CARRIER_NAME\" TEXT NOT NULL,
            \"SNAPSHOT_DATE\" TEXT NOT NULL,
            \"DECISION\" TEXT NOT NULL,
            \"ONGOING_RATE_MONTH\" INTEGER,
            \"IS_INITIAL_DECISION_FLAG\" INTEGER,
            \"INITIAL_DECISIONS_FACILITIES\" INTEGER,
            \"INITIAL_DECISIONS_HOME_HEALTH\" INTEGER,
            \"INITIAL_DECISIONS_ALL_OTHER\" INTEGER,
            \"RETRO_ALL_FACILITIES\" INTEGER,
            \"RETRO_HOME_HEALTH\" INTEGER,
            \"RETRO_ALL_OTHER\" INTEGER,
            \"RFB_PROCESS_TO_DECISION_TAT\" REAL,
            \"RETRO_MONTHS\" REAL
        );

        CREATE TABLE IF NOT EXISTS \"{policy}\" (
            \"POLICY_ID\" TEXT NOT NULL,
            \"CARRIER_NAME\" TEXT NOT NULL,
            \"POLICY_SNAPSHOT_DATE\" TEXT NOT NULL,
            \"INSURED_STATE\" TEXT,
            \"POLICY_STATUS_DIM_ID\" TEXT NOT NULL,
            \"ANNUALIZED_PREMIUM\" REAL,
            \"LIFETIME_COLLECTED_PREMIUM\" REAL,
            \"RATED_AGE\" REAL,
            \"IN_WAIVER_FLG\" TEXT NOT NULL,
            \"IN_NONFORFEITURE_FLG\" TEXT NOT NULL,
            \"TOTAL_ACTIVE_CLAIMS\" INTEGER NOT NULL DEFAULT 0,
            \"TOTAL_RFBS\" INTEGER NOT NULL DEFAULT 0,
            \"TOTAL_APPROVED_RFBS\" INTEGER NOT NULL DEFAULT 0,
            \"TOTAL_DENIALS\" INTEGER NOT NULL DEFAULT 0
        );

        CREATE INDEX IF NOT EXISTS \"idx_{claims}_carrier_date\"
            ON \"{claims}\"(\"CARRIER_NAME\", \"SNAPSHOT_DATE\");
        CREATE INDEX IF NOT EXISTS \"idx_{claims}_date\" ON \"{claims}\"(\"SNAPSHOT_DATE\");
        CREATE INDEX IF NOT EXISTS \"idx_{policy}_carrier_date\"
            ON \"{policy}\"(\"CARRIER_NAME\", \"POLICY_SNAPSHOT_DATE\");
        CREATE INDEX IF NOT EXISTS \"idx_{policy}_date\" ON \"{policy}\"(\"POLICY_SNAPSHOT_DATE\");"
    ))?;
    Ok(())
}

/// Open the configured database file if it exists, without creating it.
pub fn open_existing(config: &SourceConfig) -> Result<SqliteFactSource> {
    if !config.database.exists() {
        return Err(LtcError::SourceUnavailable {
            details: format!(
                "database {} does not exist (run `ltcm seed` first)",
                config.database.display()
            ),
        });
    }
    SqliteFactSource::open(config)
}

// ──────────────────── tests ────────────────────
