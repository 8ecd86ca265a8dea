//! Fills in ids for records that arrive without them, e.g. legacy snapshots
//! and change-log lines.

use std::collections::{BTreeMap, BTreeSet};

use tourist_core::{EntityId, EntityKind, EntityRecord, ModelError, SnapshotEntity};

use crate::HistoryError;

/// Display names shared by unrelated records in real data.
pub const DEFAULT_IGNORED_NAMES: [&str; 2] = ["noname club", "Acre"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NameEntry {
    Unique(EntityId),
    Ambiguous,
}

#[derive(Debug, Clone)]
pub struct IdentifierResolver {
    short_names: BTreeMap<EntityKind, BTreeMap<String, EntityId>>,
    names: BTreeMap<EntityKind, BTreeMap<String, NameEntry>>,
    ignored: BTreeSet<String>,
}

impl Default for IdentifierResolver {
    fn default() -> Self {
        Self::with_ignored_names(DEFAULT_IGNORED_NAMES)
    }
}

impl IdentifierResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_ignored_names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            short_names: BTreeMap::new(),
            names: BTreeMap::new(),
            ignored: names.into_iter().map(Into::into).collect(),
        }
    }

    /// Indexes snapshot entities that carry ids.
    pub fn add_known<'a>(
        &mut self,
        entities: impl IntoIterator<Item = &'a SnapshotEntity>,
    ) -> Result<(), HistoryError> {
        for entity in entities {
            let id = entity
                .id
                .ok_or_else(|| ModelError::MissingId(entity.short_name.clone()))?;
            self.index(entity.kind, id, &entity.short_name, &entity.name)?;
        }
        Ok(())
    }

    /// Indexes stored records.
    pub fn add_records<'a>(
        &mut self,
        records: impl IntoIterator<Item = &'a EntityRecord>,
    ) -> Result<(), HistoryError> {
        for record in records {
            let id = record
                .id
                .ok_or_else(|| ModelError::MissingId(record.short_name.clone()))?;
            self.index(record.kind(), id, &record.short_name, &record.name)?;
        }
        Ok(())
    }

    fn index(
        &mut self,
        kind: EntityKind,
        id: EntityId,
        short_name: &str,
        name: &str,
    ) -> Result<(), HistoryError> {
        let by_short_name = self.short_names.entry(kind).or_default();
        match by_short_name.get(short_name) {
            Some(&existing) if existing != id => {
                return Err(HistoryError::ConflictingId {
                    kind,
                    short_name: short_name.to_string(),
                    existing,
                    new: id,
                })
            }
            Some(_) => {}
            None => {
                by_short_name.insert(short_name.to_string(), id);
            }
        }

        if self.ignored.contains(name) {
            return Ok(());
        }
        let by_name = self.names.entry(kind).or_default();
        match by_name.get(name) {
            Some(NameEntry::Unique(existing)) if *existing != id => {
                by_name.insert(name.to_string(), NameEntry::Ambiguous);
            }
            Some(_) => {}
            None => {
                by_name.insert(name.to_string(), NameEntry::Unique(id));
            }
        }
        Ok(())
    }

    pub fn id_for_short_name(&self, kind: EntityKind, short_name: &str) -> Option<EntityId> {
        self.short_names.get(&kind)?.get(short_name).copied()
    }

    /// `None` for unknown, ignored and ambiguous names.
    pub fn id_for_name(&self, kind: EntityKind, name: &str) -> Option<EntityId> {
        match self.names.get(&kind)?.get(name)? {
            NameEntry::Unique(id) => Some(*id),
            NameEntry::Ambiguous => None,
        }
    }

    /// Returns `entity` with a missing parent id and id filled in.
    pub fn resolve(&self, mut entity: SnapshotEntity) -> Result<SnapshotEntity, HistoryError> {
        if entity.parent_id.is_none() && !entity.parent_short_name.is_empty() {
            let parent_id = self
                .id_for_short_name(EntityKind::Place, &entity.parent_short_name)
                .ok_or_else(|| HistoryError::Unresolved {
                    kind: EntityKind::Place,
                    key: entity.parent_short_name.clone(),
                })?;
            entity.parent_id = Some(parent_id);
        }
        if entity.id.is_none() {
            let id = self
                .id_for_short_name(entity.kind, &entity.short_name)
                .or_else(|| self.id_for_name(entity.kind, &entity.name))
                .ok_or_else(|| HistoryError::Unresolved {
                    kind: entity.kind,
                    key: entity.short_name.clone(),
                })?;
            entity.id = Some(id);
        }
        Ok(entity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn entity(
        kind: EntityKind,
        id: Option<EntityId>,
        name: &str,
        short_name: &str,
    ) -> SnapshotEntity {
        SnapshotEntity {
            kind,
            name: name.to_string(),
            short_name: short_name.to_string(),
            parent_short_name: String::new(),
            id,
            parent_id: None,
            markdown: String::new(),
            status_comment: None,
            status_date: None,
            geonames_id: None,
            region: None,
            point: None,
            source_short_name: None,
            source_key: None,
            logo_url: None,
            unknown: BTreeMap::new(),
        }
    }

    #[test]
    fn resolves_parent_and_id_by_short_name_then_name() {
        let mut resolver = IdentifierResolver::new();
        resolver
            .add_known(&[
                entity(EntityKind::Place, Some(1), "World", "world"),
                entity(EntityKind::Place, Some(2), "London", "lon"),
                entity(EntityKind::Pool, Some(9), "Golden Lane", "lonpool"),
            ])
            .expect("index");

        let mut renamed = entity(EntityKind::Pool, None, "Golden Lane", "goldenlane");
        renamed.parent_short_name = "lon".to_string();
        let resolved = resolver.resolve(renamed).expect("resolve");
        assert_eq!(resolved.id, Some(9));
        assert_eq!(resolved.parent_id, Some(2));
    }

    #[test]
    fn conflicting_short_name_is_an_error() {
        let mut resolver = IdentifierResolver::new();
        let err = resolver
            .add_known(&[
                entity(EntityKind::Club, Some(3), "Club", "club"),
                entity(EntityKind::Club, Some(4), "Club", "club"),
            ])
            .expect_err("conflict");
        assert!(matches!(
            err,
            HistoryError::ConflictingId {
                existing: 3,
                new: 4,
                ..
            }
        ));
    }

    #[test]
    fn ambiguous_and_ignored_names_do_not_resolve() {
        let mut resolver = IdentifierResolver::new();
        resolver
            .add_known(&[
                entity(EntityKind::Club, Some(3), "Hippos", "hippos1"),
                entity(EntityKind::Club, Some(4), "Hippos", "hippos2"),
                entity(EntityKind::Club, Some(5), "noname club", "noname"),
            ])
            .expect("index");
        assert_eq!(resolver.id_for_name(EntityKind::Club, "Hippos"), None);
        assert_eq!(resolver.id_for_name(EntityKind::Club, "noname club"), None);
        assert_eq!(resolver.id_for_short_name(EntityKind::Club, "noname"), Some(5));

        let err = resolver
            .resolve(entity(EntityKind::Club, None, "Hippos", "hippos3"))
            .expect_err("ambiguous");
        assert!(matches!(err, HistoryError::Unresolved { kind: EntityKind::Club, .. }));
    }

    #[test]
    fn tables_are_per_kind() {
        let mut resolver = IdentifierResolver::new();
        resolver
            .add_records(&[EntityRecord::place("Bristol", "bristol").with_id(2)])
            .expect("index");
        assert_eq!(resolver.id_for_short_name(EntityKind::Pool, "bristol"), None);
        assert_eq!(resolver.id_for_name(EntityKind::Place, "Bristol"), Some(2));
    }
}
