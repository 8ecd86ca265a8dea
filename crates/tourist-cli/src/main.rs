use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use tourist_core::{parse_snapshot, EntityKind};
use tourist_history::{
    backfill, parse_change_log, shift_transactions, BackfillInput, IdentifierResolver,
    UnresolvedPolicy,
};
use tourist_storage::{EntityStore, MemoryStore};
use tourist_sync::{
    audit_club_pool_links, export_snapshot, import_snapshot, maybe_build_scheduler,
    run_sync_once_from_env, TouristConfig,
};

#[derive(Debug, Parser)]
#[command(name = "tourist-cli")]
#[command(about = "Underwater hockey venue sync and history tools")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Fetch every enabled source and reconcile it into the store.
    Sync,
    /// Import a JSON-lines snapshot by short name.
    Import { path: PathBuf },
    /// Write the store as a JSON-lines snapshot.
    Export {
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Rebuild history from an initial snapshot and an application change log.
    Backfill {
        #[arg(long)]
        initial: PathBuf,
        #[arg(long)]
        initial_issued_at: DateTime<Utc>,
        #[arg(long)]
        changes: Option<PathBuf>,
        /// Snapshot of records with ids, used only to resolve ids.
        #[arg(long)]
        known: Option<PathBuf>,
        #[arg(long)]
        skip_unresolved: bool,
    },
    /// Add `by` to every transaction id in the store's log.
    ShiftTransactions {
        #[arg(long, allow_hyphen_values = true)]
        by: i64,
    },
    /// Check that club wiki links point at pools in the club's place.
    AuditLinks,
    /// Run the sync on the configured cron until interrupted.
    Schedule,
}

async fn read_text(path: &PathBuf) -> Result<String> {
    tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("reading {}", path.display()))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = TouristConfig::from_env();

    match cli.command.unwrap_or(Commands::Sync) {
        Commands::Sync => {
            let summary = run_sync_once_from_env().await?;
            println!(
                "sync complete: run_id={} sources={} pools(+{} ~{} -{}) clubs(+{} ~{} -{}) \
                 problems={} reports={}",
                summary.run_id,
                summary.enabled_sources,
                summary.pools.added,
                summary.pools.updated,
                summary.pools.deleted,
                summary.clubs.added,
                summary.clubs.updated,
                summary.clubs.deleted,
                summary.problems,
                summary.reports_dir
            );
        }
        Commands::Import { path } => {
            let mut store = MemoryStore::load(&config.store_path).await?;
            let text = read_text(&path).await?;
            let report = import_snapshot(&mut store, &text, Some("import".into()), Utc::now())
                .with_context(|| format!("importing {}", path.display()))?;
            store.save(&config.store_path).await?;
            println!(
                "{}",
                serde_json::to_string_pretty(&report).context("serializing import report")?
            );
        }
        Commands::Export { out } => {
            let store = MemoryStore::load(&config.store_path).await?;
            let text = export_snapshot(&store).context("exporting store")?;
            match out {
                Some(path) => tokio::fs::write(&path, text)
                    .await
                    .with_context(|| format!("writing {}", path.display()))?,
                None => print!("{text}"),
            }
        }
        Commands::Backfill {
            initial,
            initial_issued_at,
            changes,
            known,
            skip_unresolved,
        } => {
            let mut store = MemoryStore::load(&config.store_path).await?;
            let initial = parse_snapshot(&read_text(&initial).await?)
                .context("parsing initial snapshot")?;
            let changes = match changes {
                Some(path) => parse_change_log(&read_text(&path).await?)
                    .with_context(|| format!("parsing change log {}", path.display()))?,
                None => Vec::new(),
            };
            let known = match known {
                Some(path) => parse_snapshot(&read_text(&path).await?)
                    .with_context(|| format!("parsing {}", path.display()))?,
                None => Vec::new(),
            };

            let mut resolver = IdentifierResolver::new();
            for kind in EntityKind::ALL {
                resolver
                    .add_records(store.all_of_kind(kind))
                    .context("indexing stored records")?;
            }
            let input = BackfillInput {
                initial,
                initial_issued_at,
                changes,
                known,
                unresolved: if skip_unresolved {
                    UnresolvedPolicy::Skip
                } else {
                    UnresolvedPolicy::Abort
                },
            };
            let outcome = backfill(input, store.transaction_log(), resolver)
                .context("backfilling history")?;
            let (synthesized, shift, skipped) =
                (outcome.synthesized, outcome.shift, outcome.skipped.len());
            store.replace_log(outcome.replayer.into_log().context("rebuilding transaction log")?);
            store.save(&config.store_path).await?;
            println!(
                "backfill complete: synthesized={synthesized} shift={shift} skipped={skipped}"
            );
        }
        Commands::ShiftTransactions { by } => {
            let mut store = MemoryStore::load(&config.store_path).await?;
            let mut log = store.transaction_log().clone();
            shift_transactions(&mut log, by)
                .with_context(|| format!("shifting transactions by {by}"))?;
            store.replace_log(log);
            store.save(&config.store_path).await?;
            println!("shifted transactions by {by}");
        }
        Commands::AuditLinks => {
            let store = MemoryStore::load(&config.store_path).await?;
            let audit = audit_club_pool_links(&store);
            println!(
                "{}",
                serde_json::to_string_pretty(&audit).context("serializing link audit")?
            );
            if !audit.is_clean() {
                anyhow::bail!(
                    "{} missing and {} misplaced club links",
                    audit.not_found.len(),
                    audit.different_place.len()
                );
            }
        }
        Commands::Schedule => match maybe_build_scheduler(&config).await? {
            Some(sched) => {
                sched.start().await.context("starting scheduler")?;
                info!(cron = %config.sync_cron, "scheduler started");
                tokio::signal::ctrl_c().await.context("waiting for ctrl-c")?;
                info!("shutting down scheduler");
            }
            None => {
                eprintln!("scheduler disabled; set TOURIST_SCHEDULER_ENABLED=true");
            }
        },
    }

    Ok(())
}
