//! `fitsync` command surface.
//!
//! [`run_cli`] executes a parsed [`Cli`]; [`init_tracing`] installs the
//! stderr log subscriber the binary uses. Both are usable from a host binary.

use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use fitness_sync_core::{
    sync_records, ActivityKind, DocumentStore, DryRunStore, FetchRange, JsonFileProvider,
    LookupFailurePolicy, MapperConfig, NaturalKey, Properties, Reconciler, RecordKind, SleepKind,
    SourceRecord, SyncReport, TelemetryProvider,
};
use fitness_sync_notion::{NotionConfig, NotionStore};
use fitness_sync_store_sqlite::{SqliteDocumentStore, SyncRunRecord};
use serde::Serialize;
use serde_json::Value;
use time::OffsetDateTime;
use tracing_subscriber::EnvFilter;

pub const DEFAULT_LOG_FILTER: &str = "fitness_sync=info";

#[derive(Debug, Parser)]
#[command(name = "fitsync")]
#[command(about = "Sync fitness telemetry exports into a document store")]
pub struct Cli {
    #[arg(long, default_value = "./fitsync.sqlite3")]
    db: PathBuf,

    /// Mapper config JSON; built-in rules when omitted.
    #[arg(long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    Sync(SyncArgs),
    Map(MapArgs),
    Runs {
        #[command(subcommand)]
        command: RunsCommand,
    },
}

#[derive(Debug, Args)]
pub struct InputArgs {
    #[arg(value_enum)]
    kind: KindArg,
    #[arg(long)]
    input: PathBuf,
    #[arg(long, default_value_t = 0)]
    start: usize,
    #[arg(long)]
    limit: Option<usize>,
}

#[derive(Debug, Args)]
pub struct SyncArgs {
    #[command(flatten)]
    input: InputArgs,
    #[arg(long, value_enum, default_value_t = TargetArg::Sqlite)]
    target: TargetArg,
    /// Collection to sync into; overrides the per-kind database ids.
    #[arg(long)]
    database_id: Option<String>,
    #[arg(long, env = "NOTION_ACTIVITIES_DB_ID")]
    activities_db_id: Option<String>,
    #[arg(long, env = "NOTION_SLEEP_DB_ID")]
    sleep_db_id: Option<String>,
    #[arg(long, env = "NOTION_TOKEN", hide_env_values = true)]
    notion_token: Option<String>,
    #[arg(long)]
    dry_run: bool,
    /// Fail a record when its lookup query fails instead of creating it.
    #[arg(long)]
    strict_lookups: bool,
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Args)]
pub struct MapArgs {
    #[command(flatten)]
    input: InputArgs,
}

#[derive(Debug, Subcommand)]
pub enum RunsCommand {
    List(RunsListArgs),
}

#[derive(Debug, Args)]
pub struct RunsListArgs {
    #[arg(long, default_value_t = 20)]
    limit: usize,
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum KindArg {
    Activities,
    Sleep,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum TargetArg {
    Sqlite,
    Notion,
}

#[derive(Debug, Serialize)]
struct MapPreview {
    key: NaturalKey,
    suppressed: Option<&'static str>,
    tracked: Properties,
    identity: Properties,
}

/// Installs a stderr `fmt` subscriber filtered by `RUST_LOG`, falling back to
/// [`DEFAULT_LOG_FILTER`]. A second call is a no-op.
pub fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

/// Executes the parsed CLI command graph.
///
/// # Errors
/// Returns an error when configuration, input loading or the store fails,
/// and after printing the report when any record failed to sync.
pub fn run_cli(cli: Cli) -> Result<()> {
    let config = load_config(cli.config.as_deref())?;
    match cli.command {
        Command::Sync(args) => run_sync(&cli.db, &config, &args),
        Command::Map(args) => run_map(&config, &args),
        Command::Runs {
            command: RunsCommand::List(args),
        } => run_runs_list(&cli.db, &args),
    }
}

fn load_config(path: Option<&Path>) -> Result<MapperConfig> {
    let Some(path) = path else {
        return Ok(MapperConfig::v1());
    };
    let body = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config {}", path.display()))?;
    let value: Value = serde_json::from_str(&body)
        .with_context(|| format!("config {} is not valid JSON", path.display()))?;
    Ok(MapperConfig::from_json(&value)?)
}

fn load_records(input: &InputArgs) -> Result<Vec<SourceRecord>> {
    let mut provider = JsonFileProvider::open(&input.input)?;
    if matches!(input.kind, KindArg::Sleep) {
        provider = provider.stop_at_first_without(&["dailySleepDTO", "dailyNapDTO"]);
    }
    let records = provider.list_records(&FetchRange {
        start: input.start,
        limit: input.limit,
    })?;
    tracing::info!(
        input = %input.input.display(),
        records = records.len(),
        "loaded telemetry export"
    );
    Ok(records)
}

fn run_sync(db: &Path, config: &MapperConfig, args: &SyncArgs) -> Result<()> {
    let records = load_records(&args.input)?;
    let policy = if args.strict_lookups {
        LookupFailurePolicy::Fail
    } else {
        LookupFailurePolicy::TreatAsAbsent
    };

    let mut ledger = SqliteDocumentStore::open(db)?;
    ledger.migrate()?;

    let started_at = OffsetDateTime::now_utc();
    let report = match args.target {
        TargetArg::Sqlite => {
            let collection = args
                .database_id
                .clone()
                .unwrap_or_else(|| kind_name(args.input.kind).to_string());
            sync_kind(config, args, &collection, policy, &records, &mut ledger)?
        }
        TargetArg::Notion => {
            let token = args.notion_token.clone().ok_or_else(|| {
                anyhow!("--notion-token or NOTION_TOKEN is required for the notion target")
            })?;
            let collection = notion_database_id(args)?;
            let mut notion = NotionStore::new(NotionConfig::new(token))?;
            sync_kind(config, args, &collection, policy, &records, &mut notion)?
        }
    };
    let finished_at = OffsetDateTime::now_utc();

    let run = ledger.record_run(&report, started_at, finished_at, args.dry_run)?;
    tracing::debug!(run_id = %run.run_id, "sync run recorded");

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_sync_report(&report, args.dry_run);
    }

    if report.has_failures() {
        return Err(anyhow!(
            "{} of {} record(s) failed to sync",
            report.failed,
            records.len()
        ));
    }
    Ok(())
}

fn sync_kind(
    config: &MapperConfig,
    args: &SyncArgs,
    collection: &str,
    policy: LookupFailurePolicy,
    records: &[SourceRecord],
    store: &mut dyn DocumentStore,
) -> Result<SyncReport> {
    Ok(match args.input.kind {
        KindArg::Activities => run_reconciler(
            Reconciler::new(ActivityKind::new(config)?, collection),
            policy,
            records,
            store,
            args.dry_run,
        ),
        KindArg::Sleep => run_reconciler(
            Reconciler::new(SleepKind::new(config)?, collection),
            policy,
            records,
            store,
            args.dry_run,
        ),
    })
}

fn run_reconciler<K: RecordKind>(
    reconciler: Reconciler<K>,
    policy: LookupFailurePolicy,
    records: &[SourceRecord],
    store: &mut dyn DocumentStore,
    dry_run: bool,
) -> SyncReport {
    let reconciler = reconciler.with_lookup_failure_policy(policy);
    if !dry_run {
        return sync_records(&reconciler, records, store);
    }

    let mut planned = DryRunStore::new(store);
    let report = sync_records(&reconciler, records, &mut planned);
    tracing::info!(planned = planned.planned().len(), "dry run; no mutations applied");
    report
}

fn notion_database_id(args: &SyncArgs) -> Result<String> {
    let per_kind = match args.input.kind {
        KindArg::Activities => (&args.activities_db_id, "NOTION_ACTIVITIES_DB_ID"),
        KindArg::Sleep => (&args.sleep_db_id, "NOTION_SLEEP_DB_ID"),
    };
    args.database_id
        .clone()
        .or_else(|| per_kind.0.clone())
        .filter(|id| !id.trim().is_empty())
        .ok_or_else(|| anyhow!("--database-id or {} is required for the notion target", per_kind.1))
}

fn kind_name(kind: KindArg) -> &'static str {
    match kind {
        KindArg::Activities => "activities",
        KindArg::Sleep => "sleep",
    }
}

fn run_map(config: &MapperConfig, args: &MapArgs) -> Result<()> {
    let records = load_records(&args.input)?;
    let previews = match args.input.kind {
        KindArg::Activities => preview(&ActivityKind::new(config)?, &records),
        KindArg::Sleep => preview(&SleepKind::new(config)?, &records),
    };
    println!("{}", serde_json::to_string_pretty(&previews)?);
    Ok(())
}

fn preview<K: RecordKind>(kind: &K, records: &[SourceRecord]) -> Vec<MapPreview> {
    records
        .iter()
        .map(|source| {
            let mapped = kind.map(source);
            MapPreview {
                key: mapped.key,
                suppressed: kind.suppression(source),
                tracked: mapped.tracked,
                identity: mapped.identity,
            }
        })
        .collect()
}

fn run_runs_list(db: &Path, args: &RunsListArgs) -> Result<()> {
    let store = SqliteDocumentStore::open(db)?;
    store.migrate()?;
    let runs = store.list_runs(args.limit)?;
    if args.json {
        println!("{}", serde_json::to_string_pretty(&runs)?);
    } else {
        print_runs_table(&runs);
    }
    Ok(())
}

fn print_sync_report(report: &SyncReport, dry_run: bool) {
    println!(
        "kind={} collection={} dry_run={} created={} updated={} skipped={} failed={}",
        report.kind,
        report.collection,
        if dry_run { "yes" } else { "no" },
        report.created,
        report.updated,
        report.skipped,
        report.failed
    );
    println!("{:<8} {:<48} {:<28} reason", "action", "key", "target_id");
    println!("{}", "-".repeat(100));
    for outcome in &report.outcomes {
        let key = outcome.key.to_string();
        println!(
            "{:<8} {:<48} {:<28} {}",
            outcome.action.as_str(),
            key,
            outcome.target_id.as_deref().unwrap_or("-"),
            outcome.reason.as_deref().unwrap_or("")
        );
    }
    for failure in &report.failures {
        let key = failure.key.to_string();
        let index = format!("#{}", failure.index);
        println!(
            "{:<8} {:<48} {:<28} {}",
            "failed", key, index, failure.error
        );
    }
}

fn print_runs_table(runs: &[SyncRunRecord]) {
    println!(
        "{:<26} {:<10} {:<24} {:<7} {:<7} {:<7} {:<7} {:<7} finished_at",
        "run_id", "kind", "collection", "dry_run", "created", "updated", "skipped", "failed"
    );
    println!("{}", "-".repeat(130));
    for run in runs {
        println!(
            "{:<26} {:<10} {:<24} {:<7} {:<7} {:<7} {:<7} {:<7} {}",
            run.run_id,
            run.kind,
            run.collection,
            if run.dry_run { "yes" } else { "no" },
            run.created,
            run.updated,
            run.skipped,
            run.failed,
            run.finished_at
        );
    }
}
