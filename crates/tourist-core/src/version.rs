//! Transactions and append-only version chains.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::entity::{EntityId, EntityKind, EntityRecord};
use crate::ModelError;

pub type TransactionId = i64;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: TransactionId,
    pub issued_at: DateTime<Utc>,
    pub actor: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    Insert,
    Update,
    Delete,
}

impl Operation {
    pub fn as_str(self) -> &'static str {
        match self {
            Operation::Insert => "insert",
            Operation::Update => "update",
            Operation::Delete => "delete",
        }
    }
}

/// One state of one entity, valid from `transaction_id` until
/// `end_transaction_id` (open while `None`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VersionRecord {
    pub kind: EntityKind,
    pub entity_id: EntityId,
    pub transaction_id: TransactionId,
    pub end_transaction_id: Option<TransactionId>,
    pub operation: Operation,
    pub record: EntityRecord,
}

impl VersionRecord {
    pub fn key(&self) -> (EntityKind, EntityId) {
        (self.kind, self.entity_id)
    }

    pub fn is_open(&self) -> bool {
        self.end_transaction_id.is_none()
    }
}

/// Transactions plus every version they produced.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TransactionLog {
    transactions: Vec<Transaction>,
    versions: Vec<VersionRecord>,
}

impl TransactionLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.transactions.is_empty() && self.versions.is_empty()
    }

    pub fn transactions(&self) -> &[Transaction] {
        &self.transactions
    }

    pub fn versions(&self) -> &[VersionRecord] {
        &self.versions
    }

    pub fn transaction(&self, id: TransactionId) -> Option<&Transaction> {
        self.transactions
            .binary_search_by_key(&id, |t| t.id)
            .ok()
            .map(|idx| &self.transactions[idx])
    }

    pub fn next_transaction_id(&self) -> TransactionId {
        self.transactions.last().map_or(1, |t| t.id + 1)
    }

    /// Opens the next transaction.
    pub fn begin(&mut self, issued_at: DateTime<Utc>, actor: Option<String>) -> Transaction {
        let tx = Transaction {
            id: self.next_transaction_id(),
            issued_at,
            actor,
        };
        self.transactions.push(tx.clone());
        tx
    }

    /// Inserts a transaction keeping ids sorted and unique.
    pub fn push_transaction(&mut self, tx: Transaction) -> Result<(), ModelError> {
        match self.transactions.binary_search_by_key(&tx.id, |t| t.id) {
            Ok(_) => Err(ModelError::TransactionExists(tx.id)),
            Err(idx) => {
                self.transactions.insert(idx, tx);
                Ok(())
            }
        }
    }

    /// Appends a version, closing the entity's open tail at `transaction_id`.
    pub fn record(
        &mut self,
        transaction_id: TransactionId,
        operation: Operation,
        record: &EntityRecord,
    ) -> Result<(), ModelError> {
        let entity_id = record
            .id
            .ok_or_else(|| ModelError::MissingId(record.short_name.clone()))?;
        if self.transaction(transaction_id).is_none() {
            return Err(ModelError::UnknownTransaction(transaction_id));
        }
        let key = (record.kind(), entity_id);
        if let Some(tail) = self
            .versions
            .iter_mut()
            .rev()
            .find(|v| v.key() == key && v.is_open())
        {
            if tail.transaction_id >= transaction_id {
                return Err(ModelError::OutOfOrder {
                    kind: key.0,
                    entity_id,
                    previous: tail.transaction_id,
                    transaction_id,
                });
            }
            tail.end_transaction_id = Some(transaction_id);
        }
        self.versions.push(VersionRecord {
            kind: key.0,
            entity_id,
            transaction_id,
            end_transaction_id: None,
            operation,
            record: record.clone(),
        });
        Ok(())
    }

    /// Changes a transaction id without touching version references.
    /// Fails like a unique index would if `to` is taken.
    pub fn rekey_transaction(
        &mut self,
        from: TransactionId,
        to: TransactionId,
    ) -> Result<(), ModelError> {
        if self.transaction(to).is_some() {
            return Err(ModelError::TransactionExists(to));
        }
        let idx = self
            .transactions
            .binary_search_by_key(&from, |t| t.id)
            .map_err(|_| ModelError::UnknownTransaction(from))?;
        let mut tx = self.transactions.remove(idx);
        tx.id = to;
        self.push_transaction(tx)
    }

    /// Appends a version as-is; chain rules are the caller's business.
    pub fn push_version(&mut self, version: VersionRecord) {
        self.versions.push(version);
    }

    pub fn versions_mut(&mut self) -> &mut [VersionRecord] {
        &mut self.versions
    }

    /// Versions written by one transaction.
    pub fn changed_in(&self, transaction_id: TransactionId) -> Vec<&VersionRecord> {
        self.versions
            .iter()
            .filter(|v| v.transaction_id == transaction_id)
            .collect()
    }

    /// Every version of one entity, oldest first.
    pub fn history(&self, kind: EntityKind, entity_id: EntityId) -> Vec<&VersionRecord> {
        let mut chain: Vec<&VersionRecord> = self
            .versions
            .iter()
            .filter(|v| v.key() == (kind, entity_id))
            .collect();
        chain.sort_by_key(|v| v.transaction_id);
        chain
    }
}
