//! Canonical entity store interface, its in-memory implementation, the URL
//! fetch log and the HTTP fetcher.

pub mod fetch;
pub mod fetch_log;
pub mod files;
pub mod memory;

use chrono::{DateTime, Utc};
use thiserror::Error;

use tourist_core::{
    EntityId, EntityKind, EntityRecord, ModelError, SourceRecord, Transaction, TransactionLog,
};

pub use fetch::{
    is_transient_error, is_transient_status, FetchError, FetcherConfig, HttpFetcher,
    RetrySchedule, TextFetcher,
};
pub use fetch_log::{FetchChange, FetchLog, UrlFetch};
pub use files::{sha256_hex, write_atomic};
pub use memory::MemoryStore;

pub const CRATE_NAME: &str = "tourist-storage";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error(transparent)]
    Model(#[from] ModelError),
    #[error("{kind} {id} not found")]
    NotFound { kind: EntityKind, id: EntityId },
    #[error("{kind} id {id} is already taken")]
    IdTaken { kind: EntityKind, id: EntityId },
    #[error("short_name {0} is already used")]
    DuplicateShortName(String),
    #[error("{short_name}: parent {parent} is not a stored place")]
    UnknownParent { short_name: String, parent: String },
    #[error("cannot delete {short_name}, it still has children {children:?}")]
    DeleteWithChildren {
        short_name: String,
        children: Vec<String>,
    },
    #[error("found {0} root places, expected at most one")]
    MultipleRoots(usize),
    #[error("place {0} is its own ancestor")]
    Cycle(String),
    #[error("name '{name}' matches more than one {kind}: {matches:?}")]
    AmbiguousName {
        name: String,
        kind: EntityKind,
        matches: Vec<String>,
    },
}

/// Everything one commit writes. Applied as deletes, then adds, then updates.
#[derive(Debug, Clone, Default)]
pub struct ChangeSet {
    pub adds: Vec<EntityRecord>,
    pub updates: Vec<EntityRecord>,
    pub deletes: Vec<(EntityKind, EntityId)>,
    pub sources: Vec<SourceRecord>,
}

impl ChangeSet {
    pub fn is_empty(&self) -> bool {
        self.adds.is_empty()
            && self.updates.is_empty()
            && self.deletes.is_empty()
            && self.sources.is_empty()
    }

    pub fn extend(&mut self, other: ChangeSet) {
        self.adds.extend(other.adds);
        self.updates.extend(other.updates);
        self.deletes.extend(other.deletes);
        self.sources.extend(other.sources);
    }
}

/// Narrow query/commit interface over the canonical entity graph.
pub trait EntityStore {
    fn get(&self, kind: EntityKind, id: EntityId) -> Option<&EntityRecord>;

    /// Short names are unique across all kinds.
    fn find_by_short_name(&self, short_name: &str) -> Option<&EntityRecord>;

    fn children(&self, parent: EntityId) -> Vec<&EntityRecord>;

    fn all_of_kind(&self, kind: EntityKind) -> Vec<&EntityRecord>;

    fn source(&self, short_name: &str) -> Option<&SourceRecord>;

    fn transaction_log(&self) -> &TransactionLog;

    /// Applies every change or none. Returns the transaction written, if any
    /// entity changed.
    fn commit(
        &mut self,
        changes: ChangeSet,
        actor: Option<String>,
        issued_at: DateTime<Utc>,
    ) -> Result<Option<Transaction>, StoreError>;

    fn parent_of(&self, record: &EntityRecord) -> Option<&EntityRecord> {
        record
            .parent
            .id
            .and_then(|id| self.get(EntityKind::Place, id))
    }

    /// True when `root` is a strict ancestor of `record`.
    fn is_descendant_of(&self, record: &EntityRecord, root: EntityId) -> bool {
        let limit = self.all_of_kind(EntityKind::Place).len();
        let mut current = record;
        for _ in 0..=limit {
            match current.parent.id {
                Some(id) if id == root => return true,
                Some(id) => match self.get(EntityKind::Place, id) {
                    Some(parent) => current = parent,
                    None => return false,
                },
                None => return false,
            }
        }
        false
    }

    /// Case-insensitive display-name lookup among descendants of `root`.
    fn find_by_display_name(
        &self,
        root: EntityId,
        kind: EntityKind,
        name: &str,
    ) -> Result<Option<&EntityRecord>, StoreError> {
        let wanted = name.to_lowercase();
        let matches: Vec<&EntityRecord> = self
            .all_of_kind(kind)
            .into_iter()
            .filter(|r| r.name.to_lowercase() == wanted && self.is_descendant_of(r, root))
            .collect();
        match matches.as_slice() {
            [] => Ok(None),
            [one] => Ok(Some(*one)),
            many => Err(StoreError::AmbiguousName {
                name: name.to_string(),
                kind,
                matches: many.iter().map(|r| r.short_name.clone()).collect(),
            }),
        }
    }
}
