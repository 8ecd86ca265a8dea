//! In-memory arena store persisted as one JSON file.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::fs;
use tracing::info;

use tourist_core::{
    EntityId, EntityKind, EntityRecord, ModelError, Operation, SourceRecord, Transaction,
    TransactionLog,
};

use crate::files::write_atomic;
use crate::{ChangeSet, EntityStore, StoreError};

/// On-disk layout.
#[derive(Debug, Default, Serialize, Deserialize)]
struct StoreFile {
    entities: Vec<EntityRecord>,
    #[serde(default)]
    sources: Vec<SourceRecord>,
    #[serde(default)]
    log: TransactionLog,
}

#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    places: BTreeMap<EntityId, EntityRecord>,
    clubs: BTreeMap<EntityId, EntityRecord>,
    pools: BTreeMap<EntityId, EntityRecord>,
    sources: BTreeMap<String, SourceRecord>,
    log: TransactionLog,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuilds a store from persisted parts, checking the same rules a commit does.
    fn from_file(file: StoreFile) -> Result<Self, StoreError> {
        let mut store = MemoryStore {
            log: file.log,
            ..Self::default()
        };
        for record in file.entities {
            let kind = record.kind();
            let id = record
                .id
                .ok_or_else(|| ModelError::MissingId(record.short_name.clone()))?;
            if store.table_mut(kind).insert(id, record).is_some() {
                return Err(StoreError::IdTaken { kind, id });
            }
        }
        for source in file.sources {
            store.sources.insert(source.short_name.clone(), source);
        }
        store.check_integrity()?;
        Ok(store)
    }

    fn to_file(&self) -> StoreFile {
        StoreFile {
            entities: self.iter_all().cloned().collect(),
            sources: self.sources.values().cloned().collect(),
            log: self.log.clone(),
        }
    }

    /// Loads the store at `path`; a missing file is an empty store.
    pub async fn load(path: &Path) -> anyhow::Result<Self> {
        if !fs::try_exists(path)
            .await
            .with_context(|| format!("checking store path {}", path.display()))?
        {
            return Ok(Self::default());
        }
        let text = fs::read_to_string(path)
            .await
            .with_context(|| format!("reading store {}", path.display()))?;
        let file: StoreFile = serde_json::from_str(&text)
            .with_context(|| format!("parsing store {}", path.display()))?;
        let store =
            Self::from_file(file).with_context(|| format!("validating store {}", path.display()))?;
        info!(
            path = %path.display(),
            places = store.places.len(),
            clubs = store.clubs.len(),
            pools = store.pools.len(),
            "loaded store"
        );
        Ok(store)
    }

    pub async fn save(&self, path: &Path) -> anyhow::Result<()> {
        let bytes = serde_json::to_vec_pretty(&self.to_file()).context("serializing store")?;
        write_atomic(path, &bytes)
            .await
            .with_context(|| format!("saving store {}", path.display()))
    }

    /// Replaces the log, e.g. after renumbering or backfilling history.
    pub fn replace_log(&mut self, log: TransactionLog) {
        self.log = log;
    }

    fn table(&self, kind: EntityKind) -> &BTreeMap<EntityId, EntityRecord> {
        match kind {
            EntityKind::Place => &self.places,
            EntityKind::Club => &self.clubs,
            EntityKind::Pool => &self.pools,
        }
    }

    fn table_mut(&mut self, kind: EntityKind) -> &mut BTreeMap<EntityId, EntityRecord> {
        match kind {
            EntityKind::Place => &mut self.places,
            EntityKind::Club => &mut self.clubs,
            EntityKind::Pool => &mut self.pools,
        }
    }

    fn iter_all(&self) -> impl Iterator<Item = &EntityRecord> {
        self.places
            .values()
            .chain(self.clubs.values())
            .chain(self.pools.values())
    }

    /// Ids are never reused, including ids of deleted records still in the log.
    fn next_id(&self, kind: EntityKind) -> EntityId {
        let live = self.table(kind).keys().next_back().copied().unwrap_or(0);
        let logged = self
            .log
            .versions()
            .iter()
            .filter(|v| v.kind == kind)
            .map(|v| v.entity_id)
            .max()
            .unwrap_or(0);
        live.max(logged) + 1
    }

    fn place_by_short_name(&self, short_name: &str) -> Option<&EntityRecord> {
        self.places.values().find(|p| p.short_name == short_name)
    }

    /// Points the record's parent at a stored place id.
    fn resolve_parent(&self, record: &mut EntityRecord) -> Result<(), StoreError> {
        if record.parent.is_root() {
            return Ok(());
        }
        let parent_id = match (record.parent.id, record.parent.short_name.as_deref()) {
            (Some(id), _) => self.places.contains_key(&id).then_some(id),
            (None, Some(short_name)) => self.place_by_short_name(short_name).and_then(|p| p.id),
            (None, None) => None,
        };
        let Some(parent_id) = parent_id else {
            return Err(StoreError::UnknownParent {
                short_name: record.short_name.clone(),
                parent: format!("{:?}", record.parent),
            });
        };
        record.parent.id = Some(parent_id);
        record.parent.short_name = None;
        Ok(())
    }

    fn check_integrity(&self) -> Result<(), StoreError> {
        let mut seen = BTreeSet::new();
        let mut roots = 0usize;
        for record in self.iter_all() {
            record.validate()?;
            if !seen.insert(record.short_name.as_str()) {
                return Err(StoreError::DuplicateShortName(record.short_name.clone()));
            }
            if record.is_root() {
                roots += 1;
                continue;
            }
            let parent_id = record.parent.id.ok_or_else(|| StoreError::UnknownParent {
                short_name: record.short_name.clone(),
                parent: format!("{:?}", record.parent),
            })?;
            if !self.places.contains_key(&parent_id) {
                return Err(StoreError::UnknownParent {
                    short_name: record.short_name.clone(),
                    parent: format!("place {parent_id}"),
                });
            }
        }
        if roots > 1 {
            return Err(StoreError::MultipleRoots(roots));
        }
        for place in self.places.values() {
            let mut steps = 0usize;
            let mut current = place;
            while let Some(parent_id) = current.parent.id {
                steps += 1;
                match self.places.get(&parent_id) {
                    Some(parent) if steps <= self.places.len() => current = parent,
                    Some(_) => return Err(StoreError::Cycle(place.short_name.clone())),
                    None => break,
                }
            }
        }
        Ok(())
    }
}

impl EntityStore for MemoryStore {
    fn get(&self, kind: EntityKind, id: EntityId) -> Option<&EntityRecord> {
        self.table(kind).get(&id)
    }

    fn find_by_short_name(&self, short_name: &str) -> Option<&EntityRecord> {
        self.iter_all().find(|r| r.short_name == short_name)
    }

    fn children(&self, parent: EntityId) -> Vec<&EntityRecord> {
        self.iter_all()
            .filter(|r| r.parent.id == Some(parent))
            .collect()
    }

    fn all_of_kind(&self, kind: EntityKind) -> Vec<&EntityRecord> {
        self.table(kind).values().collect()
    }

    fn source(&self, short_name: &str) -> Option<&SourceRecord> {
        self.sources.get(short_name)
    }

    fn transaction_log(&self) -> &TransactionLog {
        &self.log
    }

    fn commit(
        &mut self,
        changes: ChangeSet,
        actor: Option<String>,
        issued_at: DateTime<Utc>,
    ) -> Result<Option<Transaction>, StoreError> {
        if changes.is_empty() {
            return Ok(None);
        }
        let mut next = self.clone();
        let mut written: Vec<(Operation, EntityRecord)> = Vec::new();
        let mut deleted_places = Vec::new();

        for (kind, id) in changes.deletes {
            let removed = next
                .table_mut(kind)
                .remove(&id)
                .ok_or(StoreError::NotFound { kind, id })?;
            if kind == EntityKind::Place {
                deleted_places.push(removed.clone());
            }
            written.push((Operation::Delete, removed));
        }

        for mut record in changes.adds {
            let kind = record.kind();
            let id = match record.id {
                Some(id) if next.table(kind).contains_key(&id) => {
                    return Err(StoreError::IdTaken { kind, id })
                }
                Some(id) => id,
                None => next.next_id(kind),
            };
            record.id = Some(id);
            next.resolve_parent(&mut record)?;
            if let Some(existing) = next.find_by_short_name(&record.short_name) {
                return Err(StoreError::DuplicateShortName(existing.short_name.clone()));
            }
            next.table_mut(kind).insert(id, record.clone());
            written.push((Operation::Insert, record));
        }

        for mut record in changes.updates {
            let kind = record.kind();
            let id = record
                .id
                .ok_or_else(|| ModelError::MissingId(record.short_name.clone()))?;
            if !next.table(kind).contains_key(&id) {
                return Err(StoreError::NotFound { kind, id });
            }
            next.resolve_parent(&mut record)?;
            next.table_mut(kind).insert(id, record.clone());
            written.push((Operation::Update, record));
        }

        for source in changes.sources {
            next.sources.insert(source.short_name.clone(), source);
        }

        for place in &deleted_places {
            let children: Vec<String> = next
                .iter_all()
                .filter(|r| r.parent.id.is_some() && r.parent.id == place.id)
                .map(|r| r.short_name.clone())
                .collect();
            if !children.is_empty() {
                return Err(StoreError::DeleteWithChildren {
                    short_name: place.short_name.clone(),
                    children,
                });
            }
        }
        next.check_integrity()?;

        let tx = if written.is_empty() {
            None
        } else {
            let tx = next.log.begin(issued_at, actor);
            for (operation, record) in &written {
                next.log.record(tx.id, *operation, record)?;
            }
            Some(tx)
        };
        *self = next;
        Ok(tx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;
    use tourist_core::{GeoPoint, ParentRef, ROOT_SHORT_NAME};

    fn ts(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(secs, 0).expect("valid timestamp")
    }

    fn seeded() -> MemoryStore {
        let mut store = MemoryStore::new();
        store
            .commit(
                ChangeSet {
                    adds: vec![
                        EntityRecord::place("World", ROOT_SHORT_NAME),
                        EntityRecord::place("London", "lon")
                            .with_parent(ParentRef::by_short_name(ROOT_SHORT_NAME)),
                        EntityRecord::pool("Pool", "lonpool")
                            .with_parent(ParentRef::by_short_name("lon"))
                            .with_entrance(GeoPoint::new(51.5, -0.1)),
                    ],
                    ..ChangeSet::default()
                },
                Some("test".into()),
                ts(0),
            )
            .expect("seed commit");
        store
    }

    #[test]
    fn commit_assigns_ids_and_resolves_parents_by_short_name() {
        let store = seeded();
        let lon = store.find_by_short_name("lon").expect("lon");
        let pool = store.find_by_short_name("lonpool").expect("pool");
        assert_eq!(pool.parent, ParentRef::by_id(lon.id.expect("id")));
        assert_eq!(store.children(lon.id.expect("id")).len(), 1);
        assert_eq!(store.transaction_log().transactions().len(), 1);
        assert_eq!(store.transaction_log().versions().len(), 3);
    }

    #[test]
    fn empty_change_set_writes_no_transaction() {
        let mut store = seeded();
        let tx = store
            .commit(ChangeSet::default(), None, ts(5))
            .expect("empty commit");
        assert!(tx.is_none());
        assert_eq!(store.transaction_log().transactions().len(), 1);
    }

    #[test]
    fn failed_commit_leaves_store_untouched() {
        let mut store = seeded();
        let before = store.to_file().entities;
        let err = store
            .commit(
                ChangeSet {
                    adds: vec![
                        EntityRecord::club("Club", "club")
                            .with_parent(ParentRef::by_short_name("lon")),
                        EntityRecord::club("Other", "lonpool")
                            .with_parent(ParentRef::by_short_name("lon")),
                    ],
                    ..ChangeSet::default()
                },
                None,
                ts(10),
            )
            .expect_err("duplicate short name");
        assert!(matches!(err, StoreError::DuplicateShortName(_)));
        assert_eq!(store.to_file().entities, before);
        assert!(store.find_by_short_name("club").is_none());
    }

    #[test]
    fn deleting_a_place_with_children_fails() {
        let mut store = seeded();
        let lon = store.find_by_short_name("lon").and_then(|r| r.id).expect("lon id");
        let err = store
            .commit(
                ChangeSet {
                    deletes: vec![(EntityKind::Place, lon)],
                    ..ChangeSet::default()
                },
                None,
                ts(10),
            )
            .expect_err("children remain");
        assert!(matches!(err, StoreError::DeleteWithChildren { .. }));
    }

    #[test]
    fn display_name_lookup_is_case_insensitive_and_scoped() {
        let mut store = seeded();
        store
            .commit(
                ChangeSet {
                    adds: vec![
                        EntityRecord::place("Bristol", "bri")
                            .with_parent(ParentRef::by_short_name(ROOT_SHORT_NAME)),
                        EntityRecord::place("Docks", "bri-docks")
                            .with_parent(ParentRef::by_short_name("bri")),
                        EntityRecord::place("Docks", "lon-docks")
                            .with_parent(ParentRef::by_short_name("lon")),
                    ],
                    ..ChangeSet::default()
                },
                None,
                ts(10),
            )
            .expect("commit");
        let bri = store.find_by_short_name("bri").and_then(|r| r.id).expect("bri");
        let found = store
            .find_by_display_name(bri, EntityKind::Place, "DOCKS")
            .expect("lookup")
            .expect("found");
        assert_eq!(found.short_name, "bri-docks");

        let world = store
            .find_by_short_name(ROOT_SHORT_NAME)
            .and_then(|r| r.id)
            .expect("world");
        assert!(matches!(
            store.find_by_display_name(world, EntityKind::Place, "docks"),
            Err(StoreError::AmbiguousName { .. })
        ));
    }

    #[tokio::test]
    async fn save_and_load_keep_records_and_log() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("store.json");
        let store = seeded();
        store.save(&path).await.expect("save");
        let loaded = MemoryStore::load(&path).await.expect("load");
        assert_eq!(loaded.to_file().entities, store.to_file().entities);
        assert_eq!(loaded.transaction_log(), store.transaction_log());

        let missing = MemoryStore::load(&dir.path().join("missing.json"))
            .await
            .expect("missing file");
        assert!(missing.all_of_kind(EntityKind::Place).is_empty());
    }

    #[test]
    fn deleted_ids_are_not_reused() {
        let mut store = seeded();
        let pool_id = store
            .find_by_short_name("lonpool")
            .and_then(|r| r.id)
            .expect("pool id");
        store
            .commit(
                ChangeSet {
                    deletes: vec![(EntityKind::Pool, pool_id)],
                    ..ChangeSet::default()
                },
                None,
                ts(20),
            )
            .expect("delete");
        store
            .commit(
                ChangeSet {
                    adds: vec![EntityRecord::pool("New", "newpool")
                        .with_parent(ParentRef::by_short_name("lon"))],
                    ..ChangeSet::default()
                },
                None,
                ts(30),
            )
            .expect("add");
        let new_id = store
            .find_by_short_name("newpool")
            .and_then(|r| r.id)
            .expect("new id");
        assert!(new_id > pool_id);
    }
}
