//! Feed sync orchestration: clustering and reconciling pools, diffing clubs
//! and pools against the store, snapshot import/export, run reports and the
//! scheduler.

pub mod audit;
pub mod cluster;
pub mod config;
pub mod diff;
pub mod extracts;
pub mod feed_sync;
pub mod import;
pub mod pipeline;
pub mod reconcile;
pub mod report;
pub mod scheduler;

use thiserror::Error;
use tourist_adapters::AdapterError;
use tourist_core::{EntityKind, ModelError};
use tourist_storage::StoreError;

pub use audit::{audit_club_pool_links, LinkAudit, LinkCheck};
pub use cluster::{cluster, group_by_distance, pairwise_distances, PoolDistance};
pub use config::{SourceConfig, SourceRegistry, TouristConfig, DEFAULT_CLUSTER_DISTANCE_M};
pub use diff::{classify, diff_and_apply, SyncCounts, SyncResults};
pub use extracts::{match_place_texts, PlaceExtract};
pub use feed_sync::{sync_feed, FeedSyncOutcome};
pub use import::{export_snapshot, import_snapshot, plan_import, ImportPlan, ImportReport};
pub use pipeline::{run_sync_once_from_env, SyncPipeline, SyncRunSummary};
pub use reconcile::{
    classify_pool_groups, check_names_across_groups, merge, new_pool_record, stored_pool_candidates,
    PoolSync, Problem, ProblemAccumulator, ProblemKind, ReconcileError, MERGE_TOLERANCE_M,
};
pub use report::{write_reports, ParquetManifest, ParquetManifestFile};
pub use scheduler::maybe_build_scheduler;

pub const CRATE_NAME: &str = "tourist-sync";

#[derive(Debug, Error)]
pub enum SyncError {
    #[error(transparent)]
    Model(#[from] ModelError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Adapter(#[from] AdapterError),
    #[error(transparent)]
    Reconcile(#[from] ReconcileError),
    #[error("Duplicates: {0:?}")]
    DuplicateKeys(Vec<String>),
    #[error("cannot compare a {new} record with a {old} record")]
    KindMismatch { new: EntityKind, old: EntityKind },
    #[error("place {0} is not in the store")]
    UnknownPlace(String),
}
