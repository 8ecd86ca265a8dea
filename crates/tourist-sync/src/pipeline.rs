use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, info_span, Instrument};
use uuid::Uuid;

use tourist_adapters::{adapter_for, Extracted};
use tourist_core::TransactionId;
use tourist_storage::{
    ChangeSet, EntityStore, FetchChange, FetchLog, FetcherConfig, HttpFetcher, MemoryStore,
    TextFetcher,
};

use crate::config::{SourceConfig, SourceRegistry, TouristConfig};
use crate::diff::SyncCounts;
use crate::extracts::match_place_texts;
use crate::feed_sync::sync_feed;
use crate::reconcile::{ProblemAccumulator, ProblemKind};
use crate::report::write_reports;

#[derive(Debug, Clone, Serialize)]
pub struct SyncRunSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub enabled_sources: usize,
    pub fetched_sources: usize,
    pub unchanged_fetches: usize,
    pub pools: SyncCounts,
    pub clubs: SyncCounts,
    pub transaction_id: Option<TransactionId>,
    pub extracts: usize,
    pub problems: usize,
    pub reports_dir: String,
    pub parquet_manifest: String,
}

pub struct SyncPipeline {
    config: TouristConfig,
    fetcher: Arc<dyn TextFetcher>,
}

impl SyncPipeline {
    pub fn new(config: TouristConfig) -> Result<Self> {
        let http = HttpFetcher::new(FetcherConfig {
            timeout: Duration::from_secs(config.http_timeout_secs),
            user_agent: Some(config.user_agent.clone()),
            ..Default::default()
        })?;
        Ok(Self::with_fetcher(config, Arc::new(http)))
    }

    pub fn with_fetcher(config: TouristConfig, fetcher: Arc<dyn TextFetcher>) -> Self {
        Self { config, fetcher }
    }

    pub fn config(&self) -> &TouristConfig {
        &self.config
    }

    /// Fetches every enabled source, reconciles them against the stored
    /// graph, commits once and writes the run report.
    pub async fn run_once(&self) -> Result<SyncRunSummary> {
        let run_id = Uuid::new_v4();
        let span = info_span!("sync_run", %run_id);
        self.run(run_id).instrument(span).await
    }

    async fn run(&self, run_id: Uuid) -> Result<SyncRunSummary> {
        let started_at = Utc::now();
        let registry = SourceRegistry::load(&self.config.registry_path()).await?;
        let enabled: Vec<SourceConfig> = registry.enabled().cloned().collect();
        let mut store = MemoryStore::load(&self.config.store_path).await?;
        let mut fetch_log = FetchLog::load(&self.config.fetch_log_path).await?;

        let mut problems = ProblemAccumulator::new();
        let mut changes = ChangeSet::default();
        let mut pools = SyncCounts::default();
        let mut clubs = SyncCounts::default();
        let mut extracts = Vec::new();
        let mut fetched_sources = 0usize;
        let mut unchanged_fetches = 0usize;

        for source in &enabled {
            problems.set_source(Some(&source.source_id));
            let adapter = adapter_for(source.extractor);
            let response = match adapter
                .fetch(self.fetcher.as_ref(), &source.source_id, &source.url)
                .await
            {
                Ok(response) => response,
                Err(err) => {
                    problems.push(
                        ProblemKind::FetchFailed,
                        format!("Fetching {} failed: {err}", source.url),
                    );
                    continue;
                }
            };
            let fetched_at = Utc::now();
            fetched_sources += 1;
            if fetch_log.add(&source.source_id, &source.url, response.clone(), fetched_at)
                == FetchChange::Unchanged
            {
                unchanged_fetches += 1;
            }

            match adapter
                .extract(&response)
                .with_context(|| format!("extracting {}", source.source_id))?
            {
                Extracted::Feed(feed) => {
                    let outcome = sync_feed(&store, source, &feed, fetched_at, &mut problems)
                        .with_context(|| format!("reconciling {}", source.source_id))?;
                    pools.absorb(outcome.pools);
                    clubs.absorb(outcome.clubs);
                    changes.extend(outcome.changes);
                }
                Extracted::PlaceTexts(texts) => {
                    let matched = match_place_texts(&store, source, texts, &mut problems)
                        .with_context(|| format!("matching places for {}", source.source_id))?;
                    extracts.extend(matched);
                }
            }
        }
        problems.set_source(None);

        let transaction = store
            .commit(changes, Some(format!("sync:{run_id}")), started_at)
            .context("committing sync changes")?;
        store.save(&self.config.store_path).await?;
        fetch_log.save(&self.config.fetch_log_path).await?;

        let reports_dir = self.config.reports_dir.join(run_id.to_string());
        let summary = SyncRunSummary {
            run_id,
            started_at,
            finished_at: Utc::now(),
            enabled_sources: enabled.len(),
            fetched_sources,
            unchanged_fetches,
            pools,
            clubs,
            transaction_id: transaction.as_ref().map(|t| t.id),
            extracts: extracts.len(),
            problems: problems.len(),
            reports_dir: reports_dir.display().to_string(),
            parquet_manifest: reports_dir
                .join("snapshots")
                .join("manifest.json")
                .display()
                .to_string(),
        };
        write_reports(
            &summary,
            problems.problems(),
            &extracts,
            store.transaction_log(),
        )
        .await?;

        info!(
            sources = summary.enabled_sources,
            fetched = summary.fetched_sources,
            transaction = ?summary.transaction_id,
            problems = summary.problems,
            "sync run finished"
        );
        Ok(summary)
    }
}

pub async fn run_sync_once_from_env() -> Result<SyncRunSummary> {
    let config = TouristConfig::from_env();
    let pipeline = SyncPipeline::new(config)?;
    pipeline.run_once().await
}
