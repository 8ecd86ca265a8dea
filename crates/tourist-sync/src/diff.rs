//! Field-level diffing and add/update/delete classification.

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;

use tourist_core::{EntityRecord, Field};
use tourist_storage::ChangeSet;

use crate::SyncError;

/// Copies every differing field of `new` into `old`, skipping `ignore`.
/// Returns the fields that changed.
pub fn diff_and_apply(
    new: &EntityRecord,
    old: &mut EntityRecord,
    ignore: &BTreeSet<Field>,
) -> Result<BTreeSet<Field>, SyncError> {
    if new.kind() != old.kind() {
        return Err(SyncError::KindMismatch {
            new: new.kind(),
            old: old.kind(),
        });
    }
    let mut changed = BTreeSet::new();
    for field in Field::for_kind(new.kind()) {
        if ignore.contains(&field) {
            continue;
        }
        let (Some(new_value), Some(old_value)) = (new.field_value(field), old.field_value(field))
        else {
            continue;
        };
        if new_value != old_value {
            old.set_field(field, new_value)?;
            changed.insert(field);
        }
    }
    Ok(changed)
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SyncCounts {
    pub added: usize,
    pub deleted: usize,
    pub updated: usize,
    pub unmodified: usize,
}

impl SyncCounts {
    pub fn absorb(&mut self, other: SyncCounts) {
        self.added += other.added;
        self.deleted += other.deleted;
        self.updated += other.updated;
        self.unmodified += other.unmodified;
    }

    pub fn changed(&self) -> usize {
        self.added + self.deleted + self.updated
    }
}

/// Outcome of comparing stored records with freshly built ones. Updated and
/// unmodified records are the stored records with new values applied.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SyncResults {
    pub to_add: Vec<EntityRecord>,
    pub to_del: Vec<EntityRecord>,
    pub updated: Vec<EntityRecord>,
    pub unmodified: Vec<EntityRecord>,
}

impl SyncResults {
    pub fn summary(&self) -> SyncCounts {
        SyncCounts {
            added: self.to_add.len(),
            deleted: self.to_del.len(),
            updated: self.updated.len(),
            unmodified: self.unmodified.len(),
        }
    }

    pub fn is_noop(&self) -> bool {
        self.to_add.is_empty() && self.to_del.is_empty() && self.updated.is_empty()
    }

    pub fn into_change_set(self) -> Result<ChangeSet, SyncError> {
        let deletes = self
            .to_del
            .iter()
            .map(|r| {
                r.id.map(|id| (r.kind(), id))
                    .ok_or_else(|| tourist_core::ModelError::MissingId(r.short_name.clone()))
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(ChangeSet {
            adds: self.to_add,
            updates: self.updated,
            deletes,
            sources: Vec::new(),
        })
    }
}

fn duplicate_keys<'a>(keys: impl Iterator<Item = &'a String>) -> Vec<String> {
    let mut seen = BTreeSet::new();
    let duplicates: BTreeSet<String> = keys.filter(|k| !seen.insert(*k)).cloned().collect();
    duplicates.into_iter().collect()
}

/// Sorts `new` against `old` by `key`. Records only in `new` are added,
/// records only in `old` deleted, and the rest diffed.
pub fn classify(
    old: Vec<EntityRecord>,
    new: Vec<EntityRecord>,
    key: impl Fn(&EntityRecord) -> String,
    ignore: &BTreeSet<Field>,
) -> Result<SyncResults, SyncError> {
    let old_keys: Vec<String> = old.iter().map(&key).collect();
    let new_keys: Vec<String> = new.iter().map(&key).collect();
    let mut duplicates = duplicate_keys(old_keys.iter());
    duplicates.extend(duplicate_keys(new_keys.iter()));
    if !duplicates.is_empty() {
        return Err(SyncError::DuplicateKeys(duplicates));
    }

    let mut remaining: BTreeMap<String, EntityRecord> = old_keys.iter().cloned().zip(old).collect();
    let mut results = SyncResults::default();
    for (key, record) in new_keys.into_iter().zip(new) {
        match remaining.remove(&key) {
            None => results.to_add.push(record),
            Some(mut existing) => {
                if diff_and_apply(&record, &mut existing, ignore)?.is_empty() {
                    results.unmodified.push(existing);
                } else {
                    results.updated.push(existing);
                }
            }
        }
    }
    for key in old_keys {
        if let Some(record) = remaining.remove(&key) {
            results.to_del.push(record);
        }
    }
    Ok(results)
}
