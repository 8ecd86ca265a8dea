//! Snapshot import into the store and export from it.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};

use tourist_core::{
    parse_snapshot, sort_parent_first, write_snapshot, EntityKind, EntityRecord, Field,
    ModelError, ParentRef, SnapshotEntity, Transaction, ROOT_SHORT_NAME,
};
use tourist_storage::{ChangeSet, EntityStore};

use crate::diff::diff_and_apply;
use crate::SyncError;

/// What an import would write.
#[derive(Debug, Clone, Default)]
pub struct ImportPlan {
    pub changes: ChangeSet,
    pub unmodified: usize,
    /// Unknown snapshot keys, as `short_name.key`.
    pub skipped_keys: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ImportReport {
    pub added: usize,
    pub updated: usize,
    pub unmodified: usize,
    pub skipped_keys: Vec<String>,
    pub transaction: Option<Transaction>,
}

fn store_place_short_names(store: &dyn EntityStore) -> BTreeSet<String> {
    store
        .all_of_kind(EntityKind::Place)
        .into_iter()
        .map(|p| p.short_name.clone())
        .collect()
}

/// Plans an import of `entities` by short name. Snapshot ids are ignored and
/// nothing is ever deleted.
pub fn plan_import(
    store: &dyn EntityStore,
    entities: Vec<SnapshotEntity>,
) -> Result<ImportPlan, SyncError> {
    let mut skipped_keys = Vec::new();
    let mut records = Vec::with_capacity(entities.len());
    for entity in entities {
        for key in entity.skipped() {
            skipped_keys.push(format!("{}.{key}", entity.short_name));
        }
        let mut record = entity.into_record()?;
        record.id = None;
        record.parent.id = None;
        records.push(record);
    }
    if !skipped_keys.is_empty() {
        warn!(keys = ?skipped_keys, "ignoring unknown snapshot keys");
    }

    let has_root = records.iter().any(|r| r.parent.short_name.is_none())
        || store.find_by_short_name(ROOT_SHORT_NAME).is_some();
    if !has_root {
        return Err(ModelError::RootMismatch(Vec::new()).into());
    }
    let records = sort_parent_first(records, &store_place_short_names(store))
        .map_err(|err| match err {
            ModelError::DuplicateKeys(keys) => SyncError::DuplicateKeys(keys),
            other => SyncError::Model(other),
        })?;

    let ignore: BTreeSet<Field> = [Field::Id].into_iter().collect();
    let mut plan = ImportPlan {
        skipped_keys,
        ..ImportPlan::default()
    };
    for mut record in records {
        if let Some(parent) = record
            .parent
            .short_name
            .as_deref()
            .and_then(|sn| store.find_by_short_name(sn))
            .filter(|p| p.kind() == EntityKind::Place)
        {
            if let Some(id) = parent.id {
                record.parent = ParentRef::by_id(id);
            }
        }
        match store.find_by_short_name(&record.short_name) {
            None => plan.changes.adds.push(record),
            Some(existing) => {
                let mut existing = existing.clone();
                if diff_and_apply(&record, &mut existing, &ignore)?.is_empty() {
                    plan.unmodified += 1;
                } else {
                    plan.changes.updates.push(existing);
                }
            }
        }
    }
    Ok(plan)
}

/// Imports a JSON-lines snapshot in one commit.
pub fn import_snapshot<S: EntityStore>(
    store: &mut S,
    text: &str,
    actor: Option<String>,
    issued_at: DateTime<Utc>,
) -> Result<ImportReport, SyncError> {
    let entities = parse_snapshot(text)?;
    let plan = plan_import(&*store, entities)?;
    let added = plan.changes.adds.len();
    let updated = plan.changes.updates.len();
    let transaction = store.commit(plan.changes, actor, issued_at)?;
    info!(added, updated, unmodified = plan.unmodified, "imported snapshot");
    Ok(ImportReport {
        added,
        updated,
        unmodified: plan.unmodified,
        skipped_keys: plan.skipped_keys,
        transaction,
    })
}

/// Every stored record, parents first, as a JSON-lines snapshot.
pub fn export_snapshot(store: &dyn EntityStore) -> Result<String, SyncError> {
    let mut records: Vec<EntityRecord> = Vec::new();
    for kind in EntityKind::ALL {
        for record in store.all_of_kind(kind) {
            let mut record = record.clone();
            record.parent.short_name = store.parent_of(&record).map(|p| p.short_name.clone());
            records.push(record);
        }
    }
    let ordered = sort_parent_first(records, &BTreeSet::new())?;
    let entities: Vec<SnapshotEntity> = ordered
        .iter()
        .map(|r| SnapshotEntity::from_record(r, r.parent.short_name.as_deref().unwrap_or("")))
        .collect();
    Ok(write_snapshot(&entities)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tourist_storage::MemoryStore;

    const SAMPLE: &str = include_str!("../../../fixtures/snapshot/sample.jsonl");

    fn at(secs: i64) -> DateTime<Utc> {
        DateTime::<Utc>::from_timestamp(secs, 0).expect("valid timestamp")
    }

    #[test]
    fn export_then_import_is_a_no_op() {
        let mut store = MemoryStore::new();
        let report =
            import_snapshot(&mut store, SAMPLE, Some("import".into()), at(1)).expect("import");
        assert!(report.added > 0);
        assert!(report.transaction.is_some());
        assert_eq!(report.skipped_keys, vec!["south.comment".to_string()]);

        let exported = export_snapshot(&store).expect("export");
        let again = import_snapshot(&mut store, &exported, None, at(2)).expect("reimport");
        assert_eq!(again.added, 0);
        assert_eq!(again.updated, 0);
        assert_eq!(again.unmodified, report.added);
        assert!(again.transaction.is_none());
        assert_eq!(export_snapshot(&store).expect("export"), exported);
    }

    #[test]
    fn export_imported_into_an_empty_store_reproduces_it() {
        let mut store = MemoryStore::new();
        import_snapshot(&mut store, SAMPLE, None, at(1)).expect("import");
        let exported = export_snapshot(&store).expect("export");

        let mut fresh = MemoryStore::new();
        let report = import_snapshot(&mut fresh, &exported, None, at(2)).expect("reimport");
        assert_eq!(report.added, exported.lines().count());
        assert!(report.skipped_keys.is_empty());
        assert_eq!(export_snapshot(&fresh).expect("export"), exported);
    }

    #[test]
    fn import_updates_by_short_name_and_ignores_ids() {
        let mut store = MemoryStore::new();
        import_snapshot(&mut store, SAMPLE, None, at(1)).expect("import");
        let edit = r#"{"type": "club", "name": "Saints Hockey", "short_name": "saints", "parent_short_name": "south", "id": 999, "source_short_name": "gbuwh-feed-clubs", "source_key": "102"}"#;
        let report = import_snapshot(&mut store, edit, None, at(2)).expect("edit");
        assert_eq!(report.updated, 1);
        let saints = store.find_by_short_name("saints").expect("saints");
        assert_eq!(saints.name, "Saints Hockey");
        assert_ne!(saints.id, Some(999));
    }

    #[test]
    fn duplicate_short_names_are_all_listed() {
        let store = MemoryStore::new();
        let text = r#"{"type": "place", "name": "World", "short_name": "world"}
{"type": "place", "name": "A", "short_name": "a", "parent_short_name": "world"}
{"type": "place", "name": "A", "short_name": "a", "parent_short_name": "world"}
{"type": "place", "name": "B", "short_name": "b", "parent_short_name": "world"}
{"type": "place", "name": "B", "short_name": "b", "parent_short_name": "world"}
"#;
        let err =
            plan_import(&store, parse_snapshot(text).expect("parse")).expect_err("duplicates");
        assert!(matches!(
            err,
            SyncError::DuplicateKeys(keys) if keys == vec!["a".to_string(), "b".to_string()]
        ));
    }

    #[test]
    fn unknown_parent_is_rejected() {
        let store = MemoryStore::new();
        let text = r#"{"type": "place", "name": "World", "short_name": "world"}
{"type": "club", "name": "Lost", "short_name": "lost", "parent_short_name": "atlantis"}
"#;
        let err = plan_import(&store, parse_snapshot(text).expect("parse")).expect_err("orphan");
        assert!(matches!(err, SyncError::Model(ModelError::UnknownParents(_))));
    }
}
