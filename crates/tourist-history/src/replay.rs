//! In-memory copy of the version tables, built up by replaying transactions
//! and by synthesizing versions for history that was never recorded.

use std::collections::{BTreeMap, BTreeSet};

use tourist_core::{
    sort_parent_first, EntityId, EntityKind, EntityRecord, Field, FieldValue, ModelError,
    Operation, ParentRef, SnapshotEntity, Transaction, TransactionId, TransactionLog,
    VersionRecord,
};

use crate::HistoryError;

/// Changed fields as `(old, new)`.
pub type FieldChanges = BTreeMap<Field, (FieldValue, FieldValue)>;

#[derive(Debug, Clone)]
struct Link {
    version: VersionRecord,
    synthesized: bool,
}

#[derive(Debug, Clone, Default)]
pub struct VersionReplayer {
    chains: BTreeMap<(EntityKind, EntityId), Vec<Link>>,
    transactions: BTreeMap<TransactionId, Transaction>,
    synthesized: BTreeSet<TransactionId>,
}

impl VersionReplayer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends the versions a recorded transaction wrote. Nothing is kept
    /// when any of them is rejected.
    pub fn replay(
        &mut self,
        transaction: &Transaction,
        changed: Vec<VersionRecord>,
    ) -> Result<(), HistoryError> {
        if self.transactions.contains_key(&transaction.id) {
            return Err(HistoryError::TransactionReused(transaction.id));
        }
        let mut seen = BTreeSet::new();
        for version in &changed {
            if version.transaction_id != transaction.id {
                return Err(HistoryError::ForeignVersion {
                    kind: version.kind,
                    entity_id: version.entity_id,
                    found: version.transaction_id,
                    expected: transaction.id,
                });
            }
            if !seen.insert(version.key()) {
                return Err(ModelError::OutOfOrder {
                    kind: version.kind,
                    entity_id: version.entity_id,
                    previous: transaction.id,
                    transaction_id: transaction.id,
                }
                .into());
            }
            self.check_append(version, false)?;
        }
        self.transactions.insert(transaction.id, transaction.clone());
        for version in changed {
            self.append(version, false);
        }
        Ok(())
    }

    /// Replays transactions that may arrive in any order.
    pub fn replay_stream(
        &mut self,
        stream: impl IntoIterator<Item = (Transaction, Vec<VersionRecord>)>,
    ) -> Result<(), HistoryError> {
        let mut items: Vec<_> = stream.into_iter().collect();
        items.sort_by_key(|(tx, _)| tx.id);
        for (tx, changed) in items {
            self.replay(&tx, changed)?;
        }
        Ok(())
    }

    /// Replays every transaction of a stored log.
    pub fn replay_log(&mut self, log: &TransactionLog) -> Result<(), HistoryError> {
        let stream = log.transactions().iter().map(|tx| {
            let changed = log.changed_in(tx.id).into_iter().cloned().collect();
            (tx.clone(), changed)
        });
        self.replay_stream(stream.collect::<Vec<_>>())
    }

    /// Synthesizes a version of `entity` in `transaction`: an insert for the
    /// first version of the entity, an update afterwards.
    pub fn add_entity(
        &mut self,
        entity: &EntityRecord,
        transaction: &Transaction,
    ) -> Result<(), HistoryError> {
        let entity_id = entity
            .id
            .ok_or_else(|| ModelError::MissingId(entity.short_name.clone()))?;
        if entity.parent.id.is_none() && !entity.is_root() {
            return Err(HistoryError::MissingParentId {
                kind: entity.kind(),
                short_name: entity.short_name.clone(),
            });
        }
        if !self.synthesized.contains(&transaction.id)
            && self.transactions.contains_key(&transaction.id)
        {
            return Err(HistoryError::TransactionReused(transaction.id));
        }
        let key = (entity.kind(), entity_id);
        let operation = if self.chains.contains_key(&key) {
            Operation::Update
        } else {
            Operation::Insert
        };
        let version = VersionRecord {
            kind: key.0,
            entity_id,
            transaction_id: transaction.id,
            end_transaction_id: None,
            operation,
            record: entity.clone(),
        };
        self.check_append(&version, true)?;
        if self.synthesized.insert(transaction.id) {
            self.transactions.insert(transaction.id, transaction.clone());
        }
        self.append(version, true);
        Ok(())
    }

    /// Whether `version` may follow the current end of its chain.
    fn check_append(
        &self,
        version: &VersionRecord,
        synthesized: bool,
    ) -> Result<(), HistoryError> {
        let Some(prev) = self.chains.get(&version.key()).and_then(|chain| chain.last()) else {
            return Ok(());
        };
        match prev.version.end_transaction_id {
            None if prev.version.transaction_id >= version.transaction_id => {
                Err(ModelError::OutOfOrder {
                    kind: version.kind,
                    entity_id: version.entity_id,
                    previous: prev.version.transaction_id,
                    transaction_id: version.transaction_id,
                }
                .into())
            }
            None => Ok(()),
            Some(end) if end == version.transaction_id && !synthesized => Ok(()),
            Some(end) => Err(HistoryError::BrokenChain {
                kind: version.kind,
                entity_id: version.entity_id,
                end,
                transaction_id: version.transaction_id,
            }),
        }
    }

    /// Closes the open predecessor and pushes; `check_append` must have passed.
    fn append(&mut self, version: VersionRecord, synthesized: bool) {
        let chain = self.chains.entry(version.key()).or_default();
        if let Some(prev) = chain.last_mut() {
            if prev.version.end_transaction_id.is_none() {
                prev.version.end_transaction_id = Some(version.transaction_id);
            }
        }
        chain.push(Link {
            version,
            synthesized,
        });
    }

    pub fn transactions(&self) -> impl Iterator<Item = &Transaction> {
        self.transactions.values()
    }

    pub fn synthesized_transactions(&self) -> &BTreeSet<TransactionId> {
        &self.synthesized
    }

    /// Newest version of every entity, ordered by kind then id.
    pub fn latest_versions(&self) -> Vec<&VersionRecord> {
        self.chains
            .values()
            .filter_map(|chain| chain.last().map(|link| &link.version))
            .collect()
    }

    /// Latest versions that are not deletes.
    pub fn live_versions(&self) -> Vec<&VersionRecord> {
        self.latest_versions()
            .into_iter()
            .filter(|v| v.operation != Operation::Delete)
            .collect()
    }

    pub fn history(&self, kind: EntityKind, entity_id: EntityId) -> Vec<&VersionRecord> {
        self.chains
            .get(&(kind, entity_id))
            .map(|chain| chain.iter().map(|link| &link.version).collect())
            .unwrap_or_default()
    }

    /// Live records as snapshot lines, parents before children.
    pub fn snapshot_entities(&self) -> Result<Vec<SnapshotEntity>, HistoryError> {
        let place_names: BTreeMap<EntityId, String> = self
            .latest_versions()
            .into_iter()
            .filter(|v| v.kind == EntityKind::Place)
            .map(|v| (v.entity_id, v.record.short_name.clone()))
            .collect();

        let mut records = Vec::new();
        for version in self.live_versions() {
            let mut record = version.record.clone();
            record.parent = match record.parent.id {
                None => ParentRef::root(),
                Some(parent_id) => {
                    let short_name = place_names.get(&parent_id).ok_or_else(|| {
                        HistoryError::UnknownParentId {
                            short_name: record.short_name.clone(),
                            parent_id,
                        }
                    })?;
                    ParentRef {
                        id: Some(parent_id),
                        short_name: Some(short_name.clone()),
                    }
                }
            };
            records.push(record);
        }

        let ordered = sort_parent_first(records, &BTreeSet::new())?;
        Ok(ordered
            .iter()
            .map(|r| SnapshotEntity::from_record(r, r.parent.short_name.as_deref().unwrap_or("")))
            .collect())
    }

    /// Flattens the replayed chains back into a log.
    pub fn into_log(self) -> Result<TransactionLog, HistoryError> {
        let mut log = TransactionLog::new();
        for tx in self.transactions.into_values() {
            log.push_transaction(tx)?;
        }
        let mut versions: Vec<VersionRecord> = self
            .chains
            .into_values()
            .flatten()
            .map(|link| link.version)
            .collect();
        versions.sort_by_key(|v| (v.transaction_id, v.kind, v.entity_id));
        for version in versions {
            log.push_version(version);
        }
        Ok(log)
    }
}

/// Fields that differ between `current` and the version before it.
pub fn changeset(current: &EntityRecord, previous: Option<&EntityRecord>) -> FieldChanges {
    let mut changes = FieldChanges::new();
    for field in Field::for_kind(current.kind()) {
        let new = current.field_value(field).unwrap_or(FieldValue::Null);
        let old = previous
            .and_then(|p| p.field_value(field))
            .unwrap_or(FieldValue::Null);
        if old != new {
            changes.insert(field, (old, new));
        }
    }
    changes
}
