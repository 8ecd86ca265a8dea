//! Run report directory: markdown summary, JSON-lines problems and extracts,
//! and a parquet export of the version log with a sha256 manifest.

use std::collections::BTreeMap;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use arrow_array::{Int64Array, RecordBatch, StringArray};
use arrow_schema::{DataType, Field as ArrowField, Schema};
use parquet::arrow::ArrowWriter;
use serde::Serialize;
use sha2::{Digest, Sha256};
use tokio::fs;

use tourist_core::TransactionLog;

use crate::diff::SyncCounts;
use crate::extracts::PlaceExtract;
use crate::pipeline::SyncRunSummary;
use crate::reconcile::Problem;

#[derive(Debug, Clone, Serialize)]
pub struct ParquetManifest {
    pub schema_version: u32,
    pub files: Vec<ParquetManifestFile>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ParquetManifestFile {
    pub name: String,
    pub path: String,
    pub sha256: String,
    pub bytes: u64,
}

fn counts_lines(counts: &SyncCounts) -> String {
    format!(
        "- Added: {}\n- Updated: {}\n- Deleted: {}\n- Unmodified: {}",
        counts.added, counts.updated, counts.deleted, counts.unmodified
    )
}

fn summary_markdown(summary: &SyncRunSummary, problems: &[Problem]) -> String {
    let mut by_kind: BTreeMap<String, usize> = BTreeMap::new();
    for problem in problems {
        *by_kind.entry(problem.kind.to_string()).or_default() += 1;
    }
    let problem_lines = if by_kind.is_empty() {
        "- none".to_string()
    } else {
        by_kind
            .iter()
            .map(|(kind, count)| format!("- {kind}: {count}"))
            .collect::<Vec<_>>()
            .join("\n")
    };
    let transaction = summary
        .transaction_id
        .map_or_else(|| "none".to_string(), |id| id.to_string());
    format!(
        "# Tourist Sync Run\n\n\
         - Run ID: `{}`\n\
         - Started: {}\n\
         - Finished: {}\n\
         - Enabled sources: {}\n\
         - Fetched sources: {} ({} unchanged)\n\
         - Transaction: {}\n\
         - Place extracts: {}\n\n\
         ## Pools\n{}\n\n\
         ## Clubs\n{}\n\n\
         ## Problems\n{}\n",
        summary.run_id,
        summary.started_at,
        summary.finished_at,
        summary.enabled_sources,
        summary.fetched_sources,
        summary.unchanged_fetches,
        transaction,
        summary.extracts,
        counts_lines(&summary.pools),
        counts_lines(&summary.clubs),
        problem_lines,
    )
}

fn json_lines<T: Serialize>(items: &[T]) -> Result<String> {
    let mut out = String::new();
    for item in items {
        out.push_str(&serde_json::to_string(item).context("serializing report line")?);
        out.push('\n');
    }
    Ok(out)
}

/// Writes the report for one run into `summary.reports_dir`.
pub async fn write_reports(
    summary: &SyncRunSummary,
    problems: &[Problem],
    extracts: &[PlaceExtract],
    log: &TransactionLog,
) -> Result<()> {
    let reports_dir = PathBuf::from(&summary.reports_dir);
    fs::create_dir_all(&reports_dir)
        .await
        .with_context(|| format!("creating {}", reports_dir.display()))?;

    fs::write(reports_dir.join("summary.md"), summary_markdown(summary, problems))
        .await
        .context("writing summary.md")?;
    fs::write(reports_dir.join("problems.jsonl"), json_lines(problems)?)
        .await
        .context("writing problems.jsonl")?;
    fs::write(reports_dir.join("extracts.jsonl"), json_lines(extracts)?)
        .await
        .context("writing extracts.jsonl")?;
    let run_json = serde_json::to_vec_pretty(summary).context("serializing run summary")?;
    fs::write(reports_dir.join("run.json"), run_json)
        .await
        .context("writing run.json")?;

    export_version_log(&reports_dir, Path::new(&summary.parquet_manifest), log).await
}

async fn export_version_log(
    reports_dir: &Path,
    manifest_path: &Path,
    log: &TransactionLog,
) -> Result<()> {
    let snapshot_dir = reports_dir.join("snapshots");
    fs::create_dir_all(&snapshot_dir)
        .await
        .with_context(|| format!("creating {}", snapshot_dir.display()))?;

    let versions_path = snapshot_dir.join("versions.parquet");
    let transactions_path = snapshot_dir.join("transactions.parquet");
    write_versions_parquet(&versions_path, log)?;
    write_transactions_parquet(&transactions_path, log)?;

    let manifest = ParquetManifest {
        schema_version: 1,
        files: vec![
            manifest_entry("versions", reports_dir, &versions_path)?,
            manifest_entry("transactions", reports_dir, &transactions_path)?,
        ],
    };
    let bytes = serde_json::to_vec_pretty(&manifest).context("serializing parquet manifest")?;
    fs::write(manifest_path, bytes)
        .await
        .with_context(|| format!("writing {}", manifest_path.display()))
}

fn write_parquet(path: &Path, batch: RecordBatch) -> Result<()> {
    let file = File::create(path).with_context(|| format!("creating {}", path.display()))?;
    let mut writer = ArrowWriter::try_new(file, batch.schema(), None)
        .with_context(|| format!("opening parquet writer {}", path.display()))?;
    writer
        .write(&batch)
        .with_context(|| format!("writing record batch {}", path.display()))?;
    writer
        .close()
        .with_context(|| format!("closing parquet writer {}", path.display()))?;
    Ok(())
}

fn write_versions_parquet(path: &Path, log: &TransactionLog) -> Result<()> {
    let versions = log.versions();
    let schema = Arc::new(Schema::new(vec![
        ArrowField::new("kind", DataType::Utf8, false),
        ArrowField::new("entity_id", DataType::Int64, false),
        ArrowField::new("transaction_id", DataType::Int64, false),
        ArrowField::new("end_transaction_id", DataType::Int64, true),
        ArrowField::new("operation", DataType::Utf8, false),
        ArrowField::new("short_name", DataType::Utf8, false),
        ArrowField::new("name", DataType::Utf8, false),
        ArrowField::new("parent_id", DataType::Int64, true),
    ]));

    let kinds = StringArray::from(
        versions
            .iter()
            .map(|v| Some(v.kind.as_str()))
            .collect::<Vec<_>>(),
    );
    let entity_ids = Int64Array::from(versions.iter().map(|v| v.entity_id).collect::<Vec<_>>());
    let transaction_ids =
        Int64Array::from(versions.iter().map(|v| v.transaction_id).collect::<Vec<_>>());
    let end_ids = Int64Array::from(
        versions
            .iter()
            .map(|v| v.end_transaction_id)
            .collect::<Vec<_>>(),
    );
    let operations = StringArray::from(
        versions
            .iter()
            .map(|v| Some(v.operation.as_str()))
            .collect::<Vec<_>>(),
    );
    let short_names = StringArray::from(
        versions
            .iter()
            .map(|v| Some(v.record.short_name.as_str()))
            .collect::<Vec<_>>(),
    );
    let names = StringArray::from(
        versions
            .iter()
            .map(|v| Some(v.record.name.as_str()))
            .collect::<Vec<_>>(),
    );
    let parent_ids = Int64Array::from(
        versions
            .iter()
            .map(|v| v.record.parent.id)
            .collect::<Vec<_>>(),
    );

    let batch = RecordBatch::try_new(
        schema,
        vec![
            Arc::new(kinds),
            Arc::new(entity_ids),
            Arc::new(transaction_ids),
            Arc::new(end_ids),
            Arc::new(operations),
            Arc::new(short_names),
            Arc::new(names),
            Arc::new(parent_ids),
        ],
    )
    .context("building versions record batch")?;
    write_parquet(path, batch)
}

fn write_transactions_parquet(path: &Path, log: &TransactionLog) -> Result<()> {
    let transactions = log.transactions();
    let schema = Arc::new(Schema::new(vec![
        ArrowField::new("id", DataType::Int64, false),
        ArrowField::new("issued_at", DataType::Utf8, false),
        ArrowField::new("actor", DataType::Utf8, true),
    ]));
    let ids = Int64Array::from(transactions.iter().map(|t| t.id).collect::<Vec<_>>());
    let issued_at = StringArray::from(
        transactions
            .iter()
            .map(|t| Some(t.issued_at.to_rfc3339()))
            .collect::<Vec<_>>(),
    );
    let actors = StringArray::from(
        transactions
            .iter()
            .map(|t| t.actor.as_deref())
            .collect::<Vec<_>>(),
    );
    let batch = RecordBatch::try_new(
        schema,
        vec![Arc::new(ids), Arc::new(issued_at), Arc::new(actors)],
    )
    .context("building transactions record batch")?;
    write_parquet(path, batch)
}

fn manifest_entry(name: &str, reports_dir: &Path, path: &Path) -> Result<ParquetManifestFile> {
    let bytes = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    let sha256 = hex::encode(hasher.finalize());
    let rel = path
        .strip_prefix(reports_dir)
        .unwrap_or(path)
        .display()
        .to_string();
    Ok(ParquetManifestFile {
        name: name.to_string(),
        path: rel,
        sha256,
        bytes: bytes.len() as u64,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Utc};
    use tourist_core::{EntityRecord, Operation, ParentRef};
    use uuid::Uuid;

    use crate::reconcile::ProblemKind;

    #[tokio::test]
    async fn report_directory_has_summary_problems_and_manifest() {
        let dir = tempfile::tempdir().expect("tempdir");
        let at = DateTime::<Utc>::from_timestamp(1_700_000_000, 0).expect("valid timestamp");
        let mut log = TransactionLog::new();
        let tx = log.begin(at, Some("sync".into()));
        let place = EntityRecord::place("South", "south")
            .with_id(2)
            .with_parent(ParentRef::by_id(1));
        log.record(tx.id, Operation::Insert, &place).expect("record");

        let run_id = Uuid::new_v4();
        let reports_dir = dir.path().join(run_id.to_string());
        let summary = SyncRunSummary {
            run_id,
            started_at: at,
            finished_at: at,
            enabled_sources: 1,
            fetched_sources: 1,
            unchanged_fetches: 0,
            pools: SyncCounts::default(),
            clubs: SyncCounts {
                added: 2,
                ..SyncCounts::default()
            },
            transaction_id: Some(tx.id),
            extracts: 0,
            problems: 1,
            reports_dir: reports_dir.display().to_string(),
            parquet_manifest: reports_dir
                .join("snapshots")
                .join("manifest.json")
                .display()
                .to_string(),
        };
        let problems = vec![Problem {
            kind: ProblemKind::RegionNotFound,
            source_id: Some("feed".into()),
            message: "Region Highlands not found, skipping its clubs".into(),
        }];

        write_reports(&summary, &problems, &[], &log).await.expect("reports");

        let markdown = std::fs::read_to_string(reports_dir.join("summary.md")).expect("summary");
        assert!(markdown.contains("- region_not_found: 1"));
        assert!(markdown.contains("- Transaction: 1"));
        let problem_lines =
            std::fs::read_to_string(reports_dir.join("problems.jsonl")).expect("problems");
        assert_eq!(problem_lines.lines().count(), 1);
        assert!(problem_lines.contains("\"kind\":\"region_not_found\""));

        let manifest: serde_json::Value = serde_json::from_slice(
            &std::fs::read(reports_dir.join("snapshots").join("manifest.json")).expect("manifest"),
        )
        .expect("manifest json");
        let files = manifest["files"].as_array().expect("files");
        assert_eq!(files.len(), 2);
        assert_eq!(files[0]["path"], "snapshots/versions.parquet");
        assert_eq!(files[0]["sha256"].as_str().map(str::len), Some(64));
    }
}
