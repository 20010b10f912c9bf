//! Tally CLI - track finances locally and reconcile them with the cloud
//!
//! The local database is the source of truth: every mutation lands there
//! first and reaches the remote store when one is configured through
//! `TALLY_REMOTE_URL` / `TALLY_REMOTE_TOKEN`.

use std::env;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{CommandFactory, Parser, Subcommand, ValueEnum};
use clap_complete::{generate, shells, Generator};
use thiserror::Error;

use tally_core::config::{RemoteConfig, SyncOptions};
use tally_core::engine::UpsertOutcome;
use tally_core::models::{EntityKind, OwnerId, Payload, RecordId, SyncableRecord};
use tally_core::remote::{HttpRecordStore, RecordStore};
use tally_core::services::RecordService;
use tally_core::sync::PushReport;
use tally_core::util::normalize_text_option;

#[derive(Parser)]
#[command(name = "tally")]
#[command(about = "Track finances locally and reconcile them with the cloud")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Optional path to the local database file
    #[arg(long, value_name = "PATH", global = true)]
    db_path: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a record from a JSON payload
    #[command(alias = "new")]
    Add {
        /// Entity kind
        #[arg(value_enum)]
        kind: KindArg,
        /// Payload fields as JSON
        #[arg(long, value_name = "JSON")]
        data: String,
        /// Reuse this id when well-formed; malformed ids are replaced
        #[arg(long, value_name = "ID")]
        id: Option<String>,
    },
    /// Replace an existing record's payload
    Update {
        #[arg(value_enum)]
        kind: KindArg,
        /// Record id
        id: String,
        /// Payload fields as JSON
        #[arg(long, value_name = "JSON")]
        data: String,
    },
    /// Delete a record everywhere
    #[command(alias = "rm")]
    Delete {
        #[arg(value_enum)]
        kind: KindArg,
        /// Record id
        id: String,
    },
    /// List records of a kind, newest first
    #[command(alias = "ls")]
    List {
        #[arg(value_enum)]
        kind: KindArg,
        /// Number of records to show
        #[arg(short, long, default_value = "20")]
        limit: usize,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show records still waiting to sync
    Pending {
        /// Entity kind (all kinds when omitted)
        #[arg(value_enum)]
        kind: Option<KindArg>,
    },
    /// Show recently logged write conflicts
    Conflicts {
        /// Number of conflicts to show
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },
    /// Push local records to the remote store and prune stale rows
    Push {
        /// Entity kind (all kinds when omitted)
        #[arg(value_enum)]
        kind: Option<KindArg>,
    },
    /// Retry records flagged pending-sync
    Flush {
        /// Entity kind (all kinds when omitted)
        #[arg(value_enum)]
        kind: Option<KindArg>,
    },
    /// Delete every transaction, asset, and liability everywhere.
    /// Categories are kept.
    Wipe {
        /// Confirm the wipe
        #[arg(long)]
        force: bool,
    },
    /// Generate shell completion scripts
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: CompletionShell,
        /// Optional output path (stdout when omitted)
        #[arg(short, long, value_name = "PATH")]
        output: Option<PathBuf>,
    },
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
enum KindArg {
    Transaction,
    Asset,
    Liability,
    Category,
}

impl From<KindArg> for EntityKind {
    fn from(kind: KindArg) -> Self {
        match kind {
            KindArg::Transaction => Self::Transaction,
            KindArg::Asset => Self::Asset,
            KindArg::Liability => Self::Liability,
            KindArg::Category => Self::Category,
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
enum CompletionShell {
    Bash,
    Zsh,
    Fish,
}

#[derive(Debug, Error)]
enum CliError {
    #[error(transparent)]
    Core(#[from] tally_core::Error),

    #[error(transparent)]
    Io(#[from] io::Error),

    #[error(transparent)]
    Serialization(#[from] serde_json::Error),

    #[error("Payload JSON cannot be empty")]
    EmptyPayload,

    #[error("Record id cannot be empty")]
    EmptyRecordId,

    #[error("Invalid record id: {0}")]
    InvalidRecordId(String),

    #[error("TALLY_OWNER_ID must be set to a non-empty account id")]
    MissingOwner,

    #[error("Refusing to wipe without --force")]
    WipeNotConfirmed,

    #[error("Remote sync is not configured; set TALLY_REMOTE_URL and TALLY_REMOTE_TOKEN to use `tally {0}`")]
    SyncNotConfigured(&'static str),
}

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        eprintln!("Error: {error}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), CliError> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("tally_core=info".parse().unwrap())
                .add_directive("tally_cli=info".parse().unwrap()),
        )
        .init();

    let cli = Cli::parse();

    // completions need no database or owner
    if let Commands::Completions { shell, output } = &cli.command {
        return run_completions(*shell, output.as_deref());
    }

    let db_path = resolve_db_path(cli.db_path);
    let service = open_service(&db_path)?;

    match cli.command {
        Commands::Add { kind, data, id } => {
            run_add(&service, kind.into(), &data, id.as_deref()).await
        }
        Commands::Update { kind, id, data } => {
            run_update(&service, kind.into(), &id, &data).await
        }
        Commands::Delete { kind, id } => run_delete(&service, kind.into(), &id).await,
        Commands::List { kind, limit, json } => run_list(&service, kind.into(), limit, json),
        Commands::Pending { kind } => run_pending(&service, kind.map(Into::into)),
        Commands::Conflicts { limit } => run_conflicts(&service, limit),
        Commands::Push { kind } => run_push(&service, kind.map(Into::into)).await,
        Commands::Flush { kind } => run_flush(&service, kind.map(Into::into)).await,
        Commands::Wipe { force } => run_wipe(&service, force).await,
        Commands::Completions { .. } => Ok(()),
    }
}

/// Resolve the database path: CLI flag, then `TALLY_DB_PATH`, then the
/// platform data directory
fn resolve_db_path(flag: Option<PathBuf>) -> PathBuf {
    if let Some(path) = flag {
        return path;
    }

    if let Some(path) = normalize_text_option(env::var("TALLY_DB_PATH").ok()) {
        return PathBuf::from(path);
    }

    dirs::data_dir().map_or_else(
        || PathBuf::from("tally.db"),
        |base| base.join("tally").join("tally.db"),
    )
}

fn owner_from_env() -> Result<OwnerId, CliError> {
    normalize_text_option(env::var("TALLY_OWNER_ID").ok())
        .map(OwnerId::new)
        .ok_or(CliError::MissingOwner)
}

fn open_service(db_path: &Path) -> Result<RecordService, CliError> {
    let owner = owner_from_env()?;
    let options = SyncOptions::default();

    let remote: Option<Arc<dyn RecordStore>> = match RemoteConfig::from_env()? {
        Some(config) => {
            tracing::info!("Remote sync enabled at {}", config.url);
            Some(Arc::new(HttpRecordStore::new(&config, options.request_timeout)?))
        }
        None => None,
    };

    Ok(RecordService::open_path(db_path, owner, remote, options)?)
}

async fn run_add(
    service: &RecordService,
    kind: EntityKind,
    data: &str,
    id: Option<&str>,
) -> Result<(), CliError> {
    let payload = parse_payload(kind, data)?;
    let (record, outcome) = service.create_with_id(id, payload).await?;
    print_saved(&record, outcome);
    Ok(())
}

async fn run_update(
    service: &RecordService,
    kind: EntityKind,
    id: &str,
    data: &str,
) -> Result<(), CliError> {
    let id = parse_record_id(id)?;
    let payload = parse_payload(kind, data)?;
    let (record, outcome) = service.update(kind, id, payload).await?;
    print_saved(&record, outcome);
    Ok(())
}

async fn run_delete(service: &RecordService, kind: EntityKind, id: &str) -> Result<(), CliError> {
    let id = parse_record_id(id)?;
    match service.delete(kind, id).await? {
        Some(record) => println!("Deleted {} {}", kind, record.id),
        None => println!("Deleted {kind} {id} (no local copy)"),
    }
    Ok(())
}

fn run_list(service: &RecordService, kind: EntityKind, limit: usize, json: bool) -> Result<(), CliError> {
    let mut records = service.list(kind)?;
    records.truncate(limit);

    if json {
        let rows = records
            .iter()
            .map(SyncableRecord::to_row)
            .collect::<serde_json::Result<Vec<_>>>()?;
        println!("{}", serde_json::to_string_pretty(&rows)?);
        return Ok(());
    }

    if records.is_empty() {
        println!("No {kind} records");
        return Ok(());
    }
    for record in &records {
        println!("{}", format_record_line(record));
    }
    Ok(())
}

fn run_pending(service: &RecordService, kind: Option<EntityKind>) -> Result<(), CliError> {
    let mut total = 0;
    for kind in kinds_for(kind) {
        let records = service.pending(kind)?;
        for record in &records {
            println!("{kind}  {}", format_record_line(record));
        }
        total += records.len();
    }
    if total == 0 {
        println!("Nothing waiting to sync");
    } else {
        println!("{total} record(s) waiting to sync");
    }
    Ok(())
}

fn run_conflicts(service: &RecordService, limit: usize) -> Result<(), CliError> {
    let conflicts = service.conflicts(limit)?;
    if conflicts.is_empty() {
        println!("No conflicts recorded");
        return Ok(());
    }
    for conflict in conflicts {
        println!(
            "{} {}: kept newer write, dropped one {}ms older ({}, {})",
            conflict.kind,
            conflict.record_id,
            conflict.local_updated_at - conflict.incoming_updated_at,
            conflict.strategy,
            format_relative_time(conflict.resolved_at)
        );
    }
    Ok(())
}

async fn run_push(service: &RecordService, kind: Option<EntityKind>) -> Result<(), CliError> {
    if !service.is_sync_enabled() {
        return Err(CliError::SyncNotConfigured("push"));
    }

    let reports = match kind {
        Some(kind) => vec![service.push_all(kind).await?],
        None => service.push_everything().await?,
    };
    for report in &reports {
        print_push_report(report);
    }
    Ok(())
}

async fn run_flush(service: &RecordService, kind: Option<EntityKind>) -> Result<(), CliError> {
    if !service.is_sync_enabled() {
        return Err(CliError::SyncNotConfigured("flush"));
    }

    let mut touched = 0;
    for kind in kinds_for(kind) {
        let report = service.flush_pending(kind).await?;
        if report.synced > 0 || report.still_pending > 0 {
            println!(
                "{}: {} synced, {} still pending",
                kind.table(),
                report.synced,
                report.still_pending
            );
            touched += report.synced + report.still_pending;
        }
    }
    if touched == 0 {
        println!("Nothing waiting to sync");
    }
    Ok(())
}

async fn run_wipe(service: &RecordService, force: bool) -> Result<(), CliError> {
    if !force {
        return Err(CliError::WipeNotConfirmed);
    }
    if !service.is_sync_enabled() {
        return Err(CliError::SyncNotConfigured("wipe"));
    }

    let report = service.wipe_all().await?;
    if report.clean.is_empty() {
        println!("Nothing wiped (cancelled)");
    } else if report.is_complete() {
        println!("Wiped: {}", table_names(&report.clean));
    } else {
        println!(
            "Wiped: {} (cancelled before: {})",
            table_names(&report.clean),
            table_names(&report.skipped)
        );
    }
    Ok(())
}

fn run_completions(shell: CompletionShell, output: Option<&Path>) -> Result<(), CliError> {
    match shell {
        CompletionShell::Bash => write_completions(shells::Bash, output),
        CompletionShell::Zsh => write_completions(shells::Zsh, output),
        CompletionShell::Fish => write_completions(shells::Fish, output),
    }
}

fn write_completions(generator: impl Generator, output: Option<&Path>) -> Result<(), CliError> {
    let mut command = Cli::command();
    let mut buffer = Vec::new();
    generate(generator, &mut command, "tally", &mut buffer);

    match output {
        Some(path) => {
            fs::write(path, &buffer)?;
            println!("Wrote completions to {}", path.display());
        }
        None => io::stdout().write_all(&buffer)?,
    }
    Ok(())
}

fn parse_payload(kind: EntityKind, data: &str) -> Result<Payload, CliError> {
    if data.trim().is_empty() {
        return Err(CliError::EmptyPayload);
    }
    Ok(Payload::from_json(kind, data)?)
}

fn parse_record_id(raw: &str) -> Result<RecordId, CliError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(CliError::EmptyRecordId);
    }
    trimmed
        .parse()
        .map_err(|_| CliError::InvalidRecordId(trimmed.to_string()))
}

fn kinds_for(kind: Option<EntityKind>) -> Vec<EntityKind> {
    kind.map_or_else(|| EntityKind::ALL.to_vec(), |kind| vec![kind])
}

fn table_names(kinds: &[EntityKind]) -> String {
    kinds
        .iter()
        .map(|kind| kind.table())
        .collect::<Vec<_>>()
        .join(", ")
}

fn print_saved(record: &SyncableRecord, outcome: UpsertOutcome) {
    match outcome {
        UpsertOutcome::Synced => println!("{}", record.id),
        UpsertOutcome::Pending => println!("{} (saved, not yet synced)", record.id),
    }
}

fn print_push_report(report: &PushReport) {
    let mut line = format!(
        "{}: pushed {}, removed {} stale",
        report.kind.table(),
        report.pushed,
        report.deleted
    );
    if report.flagged_pending > 0 {
        line.push_str(&format!(", {} pending retry", report.flagged_pending));
    }
    if report.cancelled {
        line.push_str(" (cancelled)");
    }
    println!("{line}");
}

fn format_record_line(record: &SyncableRecord) -> String {
    format!(
        "{}  {}  {}",
        record.id,
        payload_summary(&record.payload),
        format_relative_time(record.updated_at)
    )
}

fn payload_summary(payload: &Payload) -> String {
    match payload {
        Payload::Transaction(transaction) => {
            let mut summary = format!(
                "{} {:.2} {}",
                transaction.flow, transaction.amount, transaction.description
            );
            if let Some(category) = &transaction.category {
                summary.push_str(&format!(" [{category}]"));
            }
            summary
        }
        Payload::Asset(asset) => format!("{} (value {:.2})", asset.name, asset.value),
        Payload::Liability(liability) => format!(
            "{} (balance {:.2}, rate {:.2}%)",
            liability.name, liability.balance, liability.rate
        ),
        Payload::Category(category) => {
            format!("{} ({}, {})", category.name, category.flow, category.color)
        }
    }
}

fn format_relative_time(timestamp_ms: i64) -> String {
    let now = chrono::Utc::now().timestamp_millis();
    let delta_seconds = (now - timestamp_ms) / 1000;
    if delta_seconds < 60 {
        "just now".to_string()
    } else if delta_seconds < 3600 {
        format!("{}m ago", delta_seconds / 60)
    } else if delta_seconds < 86_400 {
        format!("{}h ago", delta_seconds / 3600)
    } else {
        format!("{}d ago", delta_seconds / 86_400)
    }
}
