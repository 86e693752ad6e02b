//! Top-level CLI definition and dispatch.

use std::io::{self, IsTerminal, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{Local, NaiveDate};
use clap::{Args, CommandFactory, Parser, Subcommand};
use clap_complete::{Shell as CompletionShell, generate};
use colored::{ColoredString, Colorize, control};
use serde_json::{Value, json};
use thiserror::Error;

use ltc_metrics::core::config::Config;
use ltc_metrics::core::errors::LtcError;
use ltc_metrics::core::request::RequestContext;
use ltc_metrics::engine::MetricsEngine;
use ltc_metrics::metrics::filter::parse_date;
use ltc_metrics::metrics::{
    BundleKind, DatePreset, FilterSpec, Insight, MetricsBundle, Severity, StateDistribution,
};
use ltc_metrics::source::sqlite::{SqliteFactSource, open_existing};
use ltc_metrics::source::synthetic::{SyntheticSpec, generate as generate_dataset};
use ltc_metrics::source::{ClaimRow, PolicyRow};

/// LTC metrics: claims and policy reporting over fact snapshots.
#[derive(Debug, Parser)]
#[command(
    name = "ltcm",
    author,
    version,
    about = "LTC Metrics - claims and policy reporting engine",
    long_about = None,
    arg_required_else_help = true
)]
pub struct Cli {
    /// Override config file path.
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,
    /// Force JSON output mode.
    #[arg(long, global = true)]
    json: bool,
    /// Disable colored output.
    #[arg(long, global = true)]
    no_color: bool,
    /// Increase verbosity.
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    verbose: bool,
    /// Quiet mode (errors only).
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    quiet: bool,
    /// Subcommand to execute.
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Subcommand)]
enum Command {
    /// Claims summary and insights.
    Claims(ClaimsArgs),
    /// Policy summary and insights.
    Policies(PoliciesArgs),
    /// Combined claims and policy view.
    Executive(FilterArgs),
    /// Generate a synthetic dataset into the configured database.
    Seed(SeedArgs),
    /// View configuration state.
    Config(ConfigArgs),
    /// Generate shell completions.
    Completions(CompletionsArgs),
}

#[derive(Debug, Clone, Args, Default)]
struct FilterArgs {
    /// Carrier name; "All" or blank means every carrier.
    #[arg(long, value_name = "NAME")]
    carrier: Option<String>,
    /// Snapshot date (YYYY-MM-DD).
    #[arg(long, value_name = "DATE", conflicts_with = "preset")]
    as_of: Option<String>,
    /// Named period: last-month, last-quarter, all-time.
    #[arg(long, value_name = "PRESET")]
    preset: Option<String>,
    /// Per-request deadline; defaults to source.query_timeout_ms.
    #[arg(long, value_name = "MILLISECONDS")]
    timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, Args, Default)]
struct ClaimsArgs {
    #[command(flatten)]
    filter: FilterArgs,
    /// Also list up to N eligible claim rows.
    #[arg(long, value_name = "N")]
    rows: Option<usize>,
}

#[derive(Debug, Clone, Args, Default)]
struct PoliciesArgs {
    #[command(flatten)]
    filter: FilterArgs,
    /// Also list up to N policy rows.
    #[arg(long, value_name = "N")]
    rows: Option<usize>,
    /// Also show the top N insured states.
    #[arg(long, value_name = "N")]
    states: Option<usize>,
}

#[derive(Debug, Clone, Args)]
struct SeedArgs {
    /// RNG seed; the same seed yields the same rows.
    #[arg(long, default_value_t = 42)]
    seed: u64,
    /// Month-end snapshots to generate.
    #[arg(long, default_value_t = 12, value_name = "N")]
    months: u32,
    /// Claim rows per snapshot.
    #[arg(long, default_value_t = 200, value_name = "N")]
    claims_per_month: usize,
    /// Policy rows per snapshot.
    #[arg(long, default_value_t = 300, value_name = "N")]
    policies: usize,
    /// Newest snapshot month (YYYY-MM-DD).
    #[arg(long, value_name = "DATE")]
    end: Option<String>,
    /// Delete existing facts before seeding.
    #[arg(long)]
    replace: bool,
}

#[derive(Debug, Clone, Args)]
struct ConfigArgs {
    #[command(subcommand)]
    command: Option<ConfigCommand>,
}

#[derive(Debug, Clone, Copy, Subcommand)]
enum ConfigCommand {
    /// Print the config file path.
    Path,
    /// Print the effective configuration.
    Show,
    /// Load and validate the configuration.
    Validate,
}

#[derive(Debug, Clone, Args)]
struct CompletionsArgs {
    /// Shell to generate completion script for.
    #[arg(value_enum)]
    shell: CompletionShell,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OutputMode {
    Human,
    Json,
}

/// CLI error type with explicit exit-code mapping.
#[derive(Debug, Error)]
pub enum CliError {
    /// Invalid user input or configuration.
    #[error("{0}")]
    User(String),
    /// Environment/runtime failure.
    #[error("{0}")]
    Runtime(String),
    /// Internal bug or invariant violation.
    #[error("{0}")]
    Internal(String),
    /// JSON serialization failed.
    #[error("failed to serialize output: {0}")]
    Json(#[from] serde_json::Error),
    /// Output write failed.
    #[error("failed to write output: {0}")]
    Io(#[from] io::Error),
}

impl CliError {
    /// Process exit code contract for the CLI.
    pub const fn exit_code(&self) -> i32 {
        match self {
            Self::User(_) => 1,
            Self::Runtime(_) | Self::Io(_) => 2,
            Self::Internal(_) | Self::Json(_) => 3,
        }
    }
}

impl From<LtcError> for CliError {
    fn from(error: LtcError) -> Self {
        let message = error.to_string();
        match error {
            LtcError::InvalidConfig { .. }
            | LtcError::MissingConfig { .. }
            | LtcError::ConfigParse { .. }
            | LtcError::MalformedFilter { .. } => Self::User(message),
            LtcError::SourceUnavailable { .. }
            | LtcError::Sql { .. }
            | LtcError::ComputeCancelled { .. }
            | LtcError::Io { .. } => Self::Runtime(message),
            LtcError::Serialization { .. } | LtcError::Runtime { .. } => Self::Internal(message),
        }
    }
}

/// Install the process logger. `-v` and `-q` override `RUST_LOG`.
pub fn init_logging(cli: &Cli) {
    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn"));
    if cli.verbose {
        builder.filter_level(log::LevelFilter::Debug);
    } else if cli.quiet {
        builder.filter_level(log::LevelFilter::Error);
    }
    // A logger installed by an embedding harness wins.
    let _ = builder.format_timestamp_millis().try_init();
}

/// Dispatch CLI commands.
pub fn run(cli: &Cli) -> Result<(), CliError> {
    if cli.no_color {
        control::set_override(false);
    }

    match &cli.command {
        Command::Claims(args) => run_claims(cli, args),
        Command::Policies(args) => run_policies(cli, args),
        Command::Executive(args) => run_executive(cli, args),
        Command::Seed(args) => run_seed(cli, args),
        Command::Config(args) => run_config(cli, args),
        Command::Completions(args) => {
            let mut command = Cli::command();
            let binary_name = command.get_name().to_string();
            generate(args.shell, &mut command, binary_name, &mut io::stdout());
            Ok(())
        }
    }
}

// ──────────────────── request shaping ────────────────────

struct Session {
    config: Config,
    engine: MetricsEngine,
}

fn open_session(cli: &Cli) -> Result<Session, CliError> {
    let config = Config::load(cli.config.as_deref())?;
    let source = open_existing(&config.source)?;
    let engine = MetricsEngine::from_config(Arc::new(source), &config);
    Ok(Session { config, engine })
}

fn build_filter(args: &FilterArgs, today: NaiveDate) -> Result<FilterSpec, CliError> {
    let as_of = match (&args.as_of, &args.preset) {
        (Some(raw), _) => Some(parse_date(raw)?),
        (None, Some(raw)) => raw.parse::<DatePreset>()?.resolve(today),
        (None, None) => None,
    };
    Ok(FilterSpec::new(args.carrier.as_deref(), as_of)?)
}

fn request_context(config: &Config, args: &FilterArgs) -> Result<RequestContext, CliError> {
    let timeout = match args.timeout_ms {
        Some(0) => return Err(CliError::User("--timeout-ms must be > 0".to_string())),
        Some(ms) => Duration::from_millis(ms),
        None => config.source.query_timeout(),
    };
    Ok(RequestContext::with_timeout(timeout))
}

fn today() -> NaiveDate {
    Local::now().date_naive()
}

// ──────────────────── commands ────────────────────

fn run_claims(cli: &Cli, args: &ClaimsArgs) -> Result<(), CliError> {
    let session = open_session(cli)?;
    let filter = build_filter(&args.filter, today())?;
    let ctx = request_context(&session.config, &args.filter)?;

    let bundle = session.engine.get_claims_summary(&filter, &ctx)?;
    let insights = session.engine.get_insights(&bundle, BundleKind::Claims);
    let rows = args
        .rows
        .map(|limit| session.engine.get_claims_rows(&filter, limit, &ctx))
        .transpose()?;

    match output_mode(cli) {
        OutputMode::Human => {
            print_header("Claims", &filter);
            print_bundle(&bundle);
            print_insights(&insights);
            if let Some(rows) = &rows {
                print_claim_rows(rows);
            }
        }
        OutputMode::Json => {
            let payload = json!({
                "command": "claims",
                "filter": serde_json::to_value(&filter)?,
                "metrics": serde_json::to_value(bundle.as_ref())?,
                "insights": serde_json::to_value(&insights)?,
                "rows": serde_json::to_value(rows.as_deref())?,
            });
            write_json_line(&payload)?;
        }
    }
    Ok(())
}

fn run_policies(cli: &Cli, args: &PoliciesArgs) -> Result<(), CliError> {
    let session = open_session(cli)?;
    let filter = build_filter(&args.filter, today())?;
    let ctx = request_context(&session.config, &args.filter)?;

    let bundle = session.engine.get_policy_summary(&filter, &ctx)?;
    let insights = session.engine.get_insights(&bundle, BundleKind::Policy);
    let rows = args
        .rows
        .map(|limit| session.engine.get_policy_rows(&filter, limit, &ctx))
        .transpose()?;
    let states = args
        .states
        .map(|top_n| session.engine.get_state_distribution(&filter, top_n, &ctx))
        .transpose()?;

    match output_mode(cli) {
        OutputMode::Human => {
            print_header("Policies", &filter);
            print_bundle(&bundle);
            print_insights(&insights);
            if let Some(states) = &states {
                print_states(states);
            }
            if let Some(rows) = &rows {
                print_policy_rows(rows);
            }
        }
        OutputMode::Json => {
            let payload = json!({
                "command": "policies",
                "filter": serde_json::to_value(&filter)?,
                "metrics": serde_json::to_value(bundle.as_ref())?,
                "insights": serde_json::to_value(&insights)?,
                "rows": serde_json::to_value(rows.as_deref())?,
                "states": serde_json::to_value(states.as_deref())?,
            });
            write_json_line(&payload)?;
        }
    }
    Ok(())
}

fn run_executive(cli: &Cli, args: &FilterArgs) -> Result<(), CliError> {
    let session = open_session(cli)?;
    let filter = build_filter(args, today())?;
    let ctx = request_context(&session.config, args)?;
    let summary = session.engine.get_executive_summary(&filter, &ctx)?;

    match output_mode(cli) {
        OutputMode::Human => {
            print_header("Executive summary", &filter);
            print_bundle(&summary.composite);
            println!();
            println!("Claims");
            print_insights(&summary.claims_insights);
            println!("Policies");
            print_insights(&summary.policy_insights);
        }
        OutputMode::Json => {
            let payload = json!({
                "command": "executive",
                "filter": serde_json::to_value(&filter)?,
                "summary": serde_json::to_value(&summary)?,
            });
            write_json_line(&payload)?;
        }
    }
    Ok(())
}

fn run_seed(cli: &Cli, args: &SeedArgs) -> Result<(), CliError> {
    let config = Config::load(cli.config.as_deref())?;
    let database = config.source.database.clone();
    if database.exists() && !args.replace {
        return Err(CliError::User(format!(
            "database {} already exists (pass --replace to overwrite its facts)",
            database.display()
        )));
    }

    let mut spec = SyntheticSpec {
        seed: args.seed,
        claims_per_month: args.claims_per_month,
        policies_per_snapshot: args.policies,
        months: args.months,
        ..SyntheticSpec::default()
    };
    if let Some(raw) = &args.end {
        spec.end = parse_date(raw)?;
    }
    if spec.months == 0 {
        return Err(CliError::User("--months must be >= 1".to_string()));
    }

    let source = SqliteFactSource::open(&config.source)?;
    if args.replace {
        source.truncate()?;
    }
    let data = generate_dataset(&spec);
    let claims = source.insert_claims(&data.claims)?;
    let policies = source.insert_policies(&data.policies)?;
    log::info!(
        "seeded {claims} claims and {policies} policies into {} (seed {})",
        database.display(),
        spec.seed
    );

    match output_mode(cli) {
        OutputMode::Human => {
            println!(
                "Seeded {claims} claims and {policies} policies into {}",
                database.display()
            );
            println!("  Snapshots: {} months ending {}", spec.months, spec.end);
        }
        OutputMode::Json => {
            let payload = json!({
                "command": "seed",
                "database": database.to_string_lossy(),
                "seed": spec.seed,
                "months": spec.months,
                "end": spec.end.to_string(),
                "claims": claims,
                "policies": policies,
            });
            write_json_line(&payload)?;
        }
    }
    Ok(())
}

fn run_config(cli: &Cli, args: &ConfigArgs) -> Result<(), CliError> {
    match args.command {
        Some(ConfigCommand::Path) => {
            let path = cli.config.clone().unwrap_or_else(Config::default_path);
            let exists = path.exists();

            match output_mode(cli) {
                OutputMode::Human => {
                    println!("{}", path.display());
                    if !exists {
                        println!("  (file does not exist; defaults will be used)");
                    }
                }
                OutputMode::Json => {
                    let payload = json!({
                        "command": "config path",
                        "path": path.to_string_lossy(),
                        "exists": exists,
                    });
                    write_json_line(&payload)?;
                }
            }
            Ok(())
        }
        None | Some(ConfigCommand::Show) => {
            let config = Config::load(cli.config.as_deref())?;

            match output_mode(cli) {
                OutputMode::Human => {
                    let toml_str = toml::to_string_pretty(&config)
                        .map_err(|e| CliError::Internal(format!("serialize config: {e}")))?;
                    println!("{toml_str}");
                }
                OutputMode::Json => {
                    let payload = json!({
                        "command": "config show",
                        "config": serde_json::to_value(&config)?,
                    });
                    write_json_line(&payload)?;
                }
            }
            Ok(())
        }
        Some(ConfigCommand::Validate) => match Config::load(cli.config.as_deref()) {
            Ok(config) => {
                let hash = config.stable_hash()?;

                match output_mode(cli) {
                    OutputMode::Human => {
                        println!("Configuration is valid.");
                        println!("  Source: {}", config.paths.config_file.display());
                        println!("  Hash: {hash}");
                    }
                    OutputMode::Json => {
                        let payload = json!({
                            "command": "config validate",
                            "valid": true,
                            "path": config.paths.config_file.to_string_lossy(),
                            "hash": hash,
                        });
                        write_json_line(&payload)?;
                    }
                }
                Ok(())
            }
            Err(e) => {
                match output_mode(cli) {
                    OutputMode::Human => {
                        eprintln!("Configuration is INVALID: {e}");
                    }
                    OutputMode::Json => {
                        let payload = json!({
                            "command": "config validate",
                            "valid": false,
                            "error": e.to_string(),
                        });
                        write_json_line(&payload)?;
                    }
                }
                Err(CliError::User(format!("invalid config: {e}")))
            }
        },
    }
}

// ──────────────────── human rendering ────────────────────

fn print_header(title: &str, filter: &FilterSpec) {
    let carrier = filter.carrier().unwrap_or("All carriers");
    let as_of = filter
        .as_of()
        .map_or_else(|| "all snapshots".to_string(), |d| d.to_string());
    println!("{} | {carrier} | {as_of}", title.bold());
    println!();
}

fn print_bundle(bundle: &MetricsBundle) {
    for (name, value) in bundle.iter() {
        println!("  {name:<24}  {value:>14.2}");
    }
    let secs = format!("{:.3}s", bundle.query_time().as_secs_f64());
    println!("  {:<24}  {secs:>14}", "query_time");
}

fn severity_label(severity: Severity) -> ColoredString {
    let label = format!("[{}]", severity.as_str());
    match severity {
        Severity::Positive => label.green(),
        Severity::Warning => label.yellow(),
        Severity::Notice => label.cyan(),
    }
}

fn print_insights(insights: &[Insight]) {
    println!();
    if insights.is_empty() {
        println!("  (no insights)");
        return;
    }
    for insight in insights {
        println!(
            "  {} {}: {}",
            severity_label(insight.severity),
            insight.title.bold(),
            insight.message
        );
    }
}

fn print_claim_rows(rows: &[ClaimRow]) {
    println!();
    println!(
        "  {:>8}  {:<12}  {:<20}  {:<24}  {:<14}  {:<10}  {:>6}",
        "Claim", "Policy", "Claimant", "Carrier", "Decision", "Snapshot", "TAT"
    );
    println!("  {}", "-".repeat(108));
    for row in rows {
        let tat = row
            .tat_days
            .map_or_else(|| "-".to_string(), |t| format!("{t:.1}"));
        println!(
            "  {:>8}  {:<12}  {:<20}  {:<24}  {:<14}  {:<10}  {:>6}",
            row.claim_id,
            row.policy_number,
            row.claimant_name,
            row.carrier,
            row.decision,
            row.snapshot_date,
            tat
        );
    }
}

fn print_policy_rows(rows: &[PolicyRow]) {
    println!();
    println!(
        "  {:<12}  {:<24}  {:<5}  {:<10}  {:>12}  {:>5}  {:<6}  {:>6}",
        "Policy", "Carrier", "State", "Status", "Premium", "Age", "Waiver", "Claims"
    );
    println!("  {}", "-".repeat(96));
    for row in rows {
        let premium = row
            .annual_premium
            .map_or_else(|| "-".to_string(), |p| format!("{p:.2}"));
        let age = row.age.map_or_else(|| "-".to_string(), |a| format!("{a:.0}"));
        println!(
            "  {:<12}  {:<24}  {:<5}  {:<10}  {:>12}  {:>5}  {:<6}  {:>6}",
            row.policy_id,
            row.carrier,
            row.state.as_deref().unwrap_or("-"),
            row.status,
            premium,
            age,
            row.in_waiver,
            row.active_claims
        );
    }
}

fn print_states(states: &[StateDistribution]) {
    println!();
    println!("  {:<8}  {:>8}  {:>16}", "State", "Policies", "Premium");
    println!("  {}", "-".repeat(36));
    for row in states {
        println!(
            "  {:<8}  {:>8}  {:>16.2}",
            row.state, row.policy_count, row.total_premium
        );
    }
}

// ──────────────────── output mode ────────────────────

fn write_json_line(payload: &Value) -> Result<(), CliError> {
    let mut stdout = io::stdout().lock();
    serde_json::to_writer(&mut stdout, payload)?;
    writeln!(stdout)?;
    Ok(())
}

fn output_mode(cli: &Cli) -> OutputMode {
    let env_mode = std::env::var("LTC_OUTPUT_FORMAT").ok();
    resolve_output_mode(cli.json, env_mode.as_deref(), io::stdout().is_terminal())
}

fn resolve_output_mode(json_flag: bool, env_mode: Option<&str>, stdout_is_tty: bool) -> OutputMode {
    if json_flag {
        return OutputMode::Json;
    }

    let fallback = if stdout_is_tty {
        OutputMode::Human
    } else {
        OutputMode::Json
    };

    match env_mode
        .map(str::trim)
        .map(str::to_ascii_lowercase)
        .as_deref()
    {
        Some("json") => OutputMode::Json,
        Some("human") => OutputMode::Human,
        _ => fallback,
    }
}
