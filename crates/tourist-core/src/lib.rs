//! Core domain model for the underwater-hockey venue graph: geometry,
//! typed entity records, pool candidates, version chains and the snapshot codec.

pub mod candidate;
pub mod entity;
pub mod geo;
pub mod snapshot;
pub mod version;

use thiserror::Error;

pub use candidate::{PoolCandidate, PoolKey, SourceProvenance, STORE_SOURCE};
pub use entity::{
    wiki_links, ClubDetail, EntityDetail, EntityId, EntityKind, EntityRecord, Field, FieldValue,
    ParentRef, PlaceDetail, PoolDetail, ROOT_SHORT_NAME,
};
pub use geo::{GeoPoint, Geometry, Polygon};
pub use snapshot::{parse_snapshot, sort_parent_first, write_snapshot, SnapshotEntity};
pub use version::{Operation, Transaction, TransactionId, TransactionLog, VersionRecord};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const CRATE_NAME: &str = "tourist-core";

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("invalid geometry: {0}")]
    InvalidGeometry(String),
    #[error("{field} does not apply to {kind} records")]
    FieldNotApplicable { field: Field, kind: EntityKind },
    #[error("wrong value type for field {field}")]
    FieldType { field: Field },
    #[error(
        "short_name must start with a letter and be all letters, numbers, underscore and dash; found '{0}'"
    )]
    InvalidShortName(String),
    #[error("{0} has no parent; every record except the root needs one")]
    MissingParent(String),
    #[error("the root record must not have a parent")]
    RootWithParent,
    #[error("{0}: place and pool markdown must not contain [[wiki links]]")]
    WikiLinkInMarkdown(String),
    #[error("{short_name}: {field} is only allowed as {expected}")]
    GeometryKind {
        short_name: String,
        field: String,
        expected: String,
    },
    #[error("Duplicates: {0:?}")]
    DuplicateKeys(Vec<String>),
    #[error("expected a single root 'world', found {0:?}")]
    RootMismatch(Vec<String>),
    #[error("parents not found: {0:?}")]
    UnknownParents(Vec<String>),
    #[error("not reachable from any root: {0:?}")]
    Unreachable(Vec<String>),
    #[error("snapshot line {line}: {source}")]
    Snapshot {
        line: usize,
        #[source]
        source: serde_json::Error,
    },
    #[error("{0} has no id")]
    MissingId(String),
    #[error("transaction {0} already exists")]
    TransactionExists(TransactionId),
    #[error("transaction {0} not found")]
    UnknownTransaction(TransactionId),
    #[error("{kind} {entity_id}: transaction {transaction_id} is not after {previous}")]
    OutOfOrder {
        kind: EntityKind,
        entity_id: EntityId,
        previous: TransactionId,
        transaction_id: TransactionId,
    },
    #[error("candidate {name} has sources {sources:?}, expected exactly one")]
    NotSingleSource { name: String, sources: Vec<String> },
}

/// An upstream feed as last synced into the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceRecord {
    pub short_name: String,
    pub name: String,
    pub logo_url: Option<String>,
    pub place_id: Option<EntityId>,
    pub sync_timestamp: Option<DateTime<Utc>>,
}

impl SourceRecord {
    pub fn new(short_name: impl Into<String>) -> Self {
        Self {
            short_name: short_name.into(),
            name: String::new(),
            logo_url: None,
            place_id: None,
            sync_timestamp: None,
        }
    }
}
