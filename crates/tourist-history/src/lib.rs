//! Version history: identifier resolution for legacy records, version chain
//! replay, transaction renumbering, change-log parsing and history backfill.

pub mod backfill;
pub mod changelog;
pub mod renumber;
pub mod replay;
pub mod resolve;

use thiserror::Error;
use tourist_core::{EntityId, EntityKind, ModelError, TransactionId};

pub use backfill::{backfill, BackfillInput, BackfillOutcome, UnresolvedPolicy};
pub use changelog::{group_changes, parse_change_log, LogChange};
pub use renumber::shift_transactions;
pub use replay::{changeset, FieldChanges, VersionReplayer};
pub use resolve::{IdentifierResolver, DEFAULT_IGNORED_NAMES};

pub const CRATE_NAME: &str = "tourist-history";

#[derive(Debug, Error)]
pub enum HistoryError {
    #[error(transparent)]
    Model(#[from] ModelError),
    #[error("{kind} short_name {short_name} maps to id {existing} and {new}")]
    ConflictingId {
        kind: EntityKind,
        short_name: String,
        existing: EntityId,
        new: EntityId,
    },
    #[error("no {kind} id found for '{key}'")]
    Unresolved { kind: EntityKind, key: String },
    #[error("{kind} {short_name} has no parent id")]
    MissingParentId { kind: EntityKind, short_name: String },
    #[error("{short_name}: parent id {parent_id} is not a known place")]
    UnknownParentId {
        short_name: String,
        parent_id: EntityId,
    },
    #[error("{kind} {entity_id}: previous version ends at {end} but the next starts at {transaction_id}")]
    BrokenChain {
        kind: EntityKind,
        entity_id: EntityId,
        end: TransactionId,
        transaction_id: TransactionId,
    },
    #[error("transaction {0} was already replayed or synthesized")]
    TransactionReused(TransactionId),
    #[error("version of {kind} {entity_id} belongs to transaction {found}, not {expected}")]
    ForeignVersion {
        kind: EntityKind,
        entity_id: EntityId,
        found: TransactionId,
        expected: TransactionId,
    },
    #[error("cannot shift transactions by {shift}: {reason}")]
    Renumber { shift: i64, reason: String },
    #[error("change log line {line}: couldn't match '{text}'")]
    ChangeLogLine { line: usize, text: String },
    #[error("change log line {line}: bad timestamp '{text}'")]
    ChangeLogTimestamp { line: usize, text: String },
    #[error("change log line {line}: {source}")]
    ChangeLogEntity {
        line: usize,
        #[source]
        source: serde_json::Error,
    },
}
