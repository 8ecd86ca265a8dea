//! JSON-lines snapshot codec and parent-first ordering.

use std::collections::{BTreeMap, BTreeSet};

use chrono::NaiveDate;
use serde::{Deserialize, Deserializer, Serialize};

use crate::entity::{
    ClubDetail, EntityDetail, EntityId, EntityKind, EntityRecord, ParentRef, PlaceDetail,
    PoolDetail, ROOT_SHORT_NAME,
};
use crate::geo::Geometry;
use crate::ModelError;

/// Decimal places kept for coordinates in exported snapshots (about 0.1 m).
pub const EXPORT_COORD_DECIMALS: i32 = 6;

/// One line of a snapshot file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotEntity {
    #[serde(rename = "type")]
    pub kind: EntityKind,
    pub name: String,
    pub short_name: String,
    #[serde(default)]
    pub parent_short_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<EntityId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<EntityId>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub markdown: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_comment: Option<String>,
    #[serde(
        default,
        deserialize_with = "empty_date_as_none",
        skip_serializing_if = "Option::is_none"
    )]
    pub status_date: Option<NaiveDate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub geonames_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<Geometry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub point: Option<Geometry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_short_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logo_url: Option<String>,
    /// Keys this codec does not know, kept so callers can report them.
    #[serde(flatten)]
    pub unknown: BTreeMap<String, serde_json::Value>,
}

fn empty_date_as_none<'de, D>(deserializer: D) -> Result<Option<NaiveDate>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    match raw.as_deref() {
        None | Some("") => Ok(None),
        Some(s) => NaiveDate::parse_from_str(s, "%Y-%m-%d")
            .map(Some)
            .map_err(serde::de::Error::custom),
    }
}

fn non_empty(value: &Option<String>) -> Option<String> {
    value.clone().filter(|s| !s.is_empty())
}

impl SnapshotEntity {
    /// Names of unknown keys, sorted.
    pub fn skipped(&self) -> Vec<String> {
        self.unknown.keys().cloned().collect()
    }

    /// Export form of a stored record. `parent_short_name` is looked up by the caller.
    pub fn from_record(record: &EntityRecord, parent_short_name: &str) -> Self {
        let mut entity = SnapshotEntity {
            kind: record.kind(),
            name: record.name.clone(),
            short_name: record.short_name.clone(),
            parent_short_name: parent_short_name.to_string(),
            id: record.id,
            parent_id: record.parent.id,
            markdown: record.markdown.clone(),
            status_comment: non_empty(&record.status_comment),
            status_date: record.status_date,
            geonames_id: None,
            region: None,
            point: None,
            source_short_name: None,
            source_key: None,
            logo_url: None,
            unknown: BTreeMap::new(),
        };
        match &record.detail {
            EntityDetail::Place(d) => {
                entity.geonames_id = d.geonames_id.filter(|id| *id != 0);
                entity.region = d
                    .region
                    .as_ref()
                    .map(|r| Geometry::Polygon(r.rounded(EXPORT_COORD_DECIMALS)));
            }
            EntityDetail::Club(d) => {
                entity.source_short_name = non_empty(&d.source_short_name);
                entity.source_key = non_empty(&d.source_key);
                entity.logo_url = non_empty(&d.logo_url);
            }
            EntityDetail::Pool(d) => {
                entity.point = d
                    .entrance
                    .map(|p| Geometry::Point(p.rounded(EXPORT_COORD_DECIMALS)));
            }
        }
        entity
    }

    pub fn into_record(self) -> Result<EntityRecord, ModelError> {
        let kind = self.kind;
        let geometry_error = |field: &str, expected: &str| ModelError::GeometryKind {
            short_name: self.short_name.clone(),
            field: field.to_string(),
            expected: expected.to_string(),
        };
        if self.region.is_some() && kind != EntityKind::Place {
            return Err(geometry_error("region", "place"));
        }
        if self.point.is_some() && kind != EntityKind::Pool {
            return Err(geometry_error("point", "pool"));
        }
        let detail = match kind {
            EntityKind::Place => EntityDetail::Place(PlaceDetail {
                region: match self.region {
                    None => None,
                    Some(Geometry::Polygon(poly)) => Some(poly),
                    Some(Geometry::Point(_)) => return Err(geometry_error("region", "Polygon")),
                },
                geonames_id: self.geonames_id.filter(|id| *id != 0),
            }),
            EntityKind::Club => EntityDetail::Club(ClubDetail {
                source_short_name: non_empty(&self.source_short_name),
                source_key: non_empty(&self.source_key),
                logo_url: non_empty(&self.logo_url),
            }),
            EntityKind::Pool => EntityDetail::Pool(PoolDetail {
                entrance: match self.point {
                    None => None,
                    Some(Geometry::Point(p)) => Some(p),
                    Some(Geometry::Polygon(_)) => return Err(geometry_error("point", "Point")),
                },
            }),
        };
        Ok(EntityRecord {
            id: self.id,
            name: self.name,
            short_name: self.short_name,
            markdown: self.markdown,
            parent: ParentRef {
                id: self.parent_id,
                short_name: Some(self.parent_short_name).filter(|s| !s.is_empty()),
            },
            status_comment: non_empty(&self.status_comment),
            status_date: self.status_date,
            detail,
        })
    }
}

/// Parses a JSON-lines snapshot, skipping blank lines. Line numbers in errors are 1-based.
pub fn parse_snapshot(text: &str) -> Result<Vec<SnapshotEntity>, ModelError> {
    text.lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(idx, line)| {
            serde_json::from_str(line).map_err(|source| ModelError::Snapshot {
                line: idx + 1,
                source,
            })
        })
        .collect()
}

pub fn write_snapshot(entities: &[SnapshotEntity]) -> Result<String, ModelError> {
    let mut out = String::new();
    for entity in entities {
        let line = serde_json::to_string(entity).map_err(|source| ModelError::Snapshot {
            line: out.lines().count() + 1,
            source,
        })?;
        out.push_str(&line);
        out.push('\n');
    }
    Ok(out)
}

/// Orders records so every parent precedes its children, siblings by short name.
///
/// Records are keyed by short name and point at parents through
/// `parent.short_name`. A parent may live outside the batch when listed in
/// `external_parents`; the batch may contain at most one root and it must be
/// `world`.
pub fn sort_parent_first(
    records: Vec<EntityRecord>,
    external_parents: &BTreeSet<String>,
) -> Result<Vec<EntityRecord>, ModelError> {
    let mut seen = BTreeSet::new();
    let duplicates: BTreeSet<String> = records
        .iter()
        .filter(|r| !seen.insert(r.short_name.clone()))
        .map(|r| r.short_name.clone())
        .collect();
    if !duplicates.is_empty() {
        return Err(ModelError::DuplicateKeys(duplicates.into_iter().collect()));
    }

    let mut children: BTreeMap<Option<String>, Vec<String>> = BTreeMap::new();
    for record in &records {
        children
            .entry(record.parent.short_name.clone())
            .or_default()
            .push(record.short_name.clone());
    }
    for siblings in children.values_mut() {
        siblings.sort();
    }

    if let Some(roots) = children.get(&None) {
        if roots.len() != 1 || roots[0] != ROOT_SHORT_NAME {
            return Err(ModelError::RootMismatch(roots.clone()));
        }
    }

    let unknown: Vec<String> = children
        .keys()
        .flatten()
        .filter(|p| !seen.contains(*p) && !external_parents.contains(*p))
        .cloned()
        .collect();
    if !unknown.is_empty() {
        return Err(ModelError::UnknownParents(unknown));
    }

    let mut starts: Vec<String> = children.get(&None).cloned().unwrap_or_default();
    for parent in external_parents.iter().filter(|p| !seen.contains(*p)) {
        if let Some(kids) = children.get(&Some(parent.clone())) {
            starts.extend(kids.iter().cloned());
        }
    }

    let mut by_name: BTreeMap<String, EntityRecord> = records
        .into_iter()
        .map(|r| (r.short_name.clone(), r))
        .collect();
    let mut ordered = Vec::with_capacity(by_name.len());
    let mut stack: Vec<String> = starts.into_iter().rev().collect();
    while let Some(name) = stack.pop() {
        let Some(record) = by_name.remove(&name) else {
            continue;
        };
        if let Some(kids) = children.get(&Some(name)) {
            stack.extend(kids.iter().rev().cloned());
        }
        ordered.push(record);
    }

    if !by_name.is_empty() {
        return Err(ModelError::Unreachable(by_name.into_keys().collect()));
    }
    Ok(ordered)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geo::GeoPoint;

    fn child(kind: EntityKind, short_name: &str, parent: &str) -> EntityRecord {
        EntityRecord::new(kind, short_name.to_uppercase(), short_name)
            .with_parent(ParentRef::by_short_name(parent))
    }

    #[test]
    fn unknown_keys_are_collected() {
        let entities = parse_snapshot(
            r#"{"type": "place", "name": "World", "short_name": "world", "parent_short_name": "", "colour": "blue"}

{"type": "pool", "name": "Pool", "short_name": "pool", "parent_short_name": "world", "point": {"type": "Point", "coordinates": [2.0, 1.0]}, "status_date": ""}"#,
        )
        .expect("parse");
        assert_eq!(entities.len(), 2);
        assert_eq!(entities[0].skipped(), vec!["colour".to_string()]);
        assert_eq!(entities[1].status_date, None);
        let pool = entities[1].clone().into_record().expect("pool record");
        assert_eq!(pool.entrance(), Some(GeoPoint::new(1.0, 2.0)));
        assert_eq!(pool.parent, ParentRef::by_short_name("world"));
    }

    #[test]
    fn malformed_line_reports_line_number() {
        let err = parse_snapshot("\n{\"type\": \"moon\"}").expect_err("bad kind");
        assert!(matches!(err, ModelError::Snapshot { line: 2, .. }));
    }

    #[test]
    fn export_rounds_coordinates_and_drops_empty_values() {
        let pool = EntityRecord::pool("Pool", "pool")
            .with_id(4)
            .with_parent(ParentRef::by_id(1))
            .with_entrance(GeoPoint::new(51.123_456_789, -0.987_654_321));
        let entity = SnapshotEntity::from_record(&pool, "world");
        let json = serde_json::to_value(&entity).expect("serialize");
        assert_eq!(
            json,
            serde_json::json!({
                "type": "pool",
                "name": "Pool",
                "short_name": "pool",
                "parent_short_name": "world",
                "id": 4,
                "parent_id": 1,
                "point": {"type": "Point", "coordinates": [-0.987654, 51.123457]},
            })
        );
    }

    #[test]
    fn region_on_a_pool_is_rejected() {
        let mut entity = SnapshotEntity::from_record(&EntityRecord::pool("P", "p"), "world");
        entity.region = Some(Geometry::Point(GeoPoint::new(0.0, 0.0)));
        assert!(matches!(
            entity.into_record(),
            Err(ModelError::GeometryKind { .. })
        ));
    }

    #[test]
    fn sort_puts_parents_first_and_siblings_in_order() {
        let records = vec![
            child(EntityKind::Pool, "zpool", "town"),
            child(EntityKind::Club, "aclub", "town"),
            child(EntityKind::Place, "town", "country"),
            child(EntityKind::Place, "country", ROOT_SHORT_NAME),
            EntityRecord::place("World", ROOT_SHORT_NAME),
        ];
        let names: Vec<String> = sort_parent_first(records, &BTreeSet::new())
            .expect("sorted")
            .into_iter()
            .map(|r| r.short_name)
            .collect();
        assert_eq!(names, vec!["world", "country", "town", "aclub", "zpool"]);
    }

    #[test]
    fn sort_lists_every_duplicate() {
        let records = vec![
            EntityRecord::place("World", ROOT_SHORT_NAME),
            child(EntityKind::Place, "a", ROOT_SHORT_NAME),
            child(EntityKind::Club, "a", ROOT_SHORT_NAME),
            child(EntityKind::Place, "b", ROOT_SHORT_NAME),
            child(EntityKind::Pool, "b", "a"),
        ];
        match sort_parent_first(records, &BTreeSet::new()) {
            Err(ModelError::DuplicateKeys(keys)) => assert_eq!(keys, vec!["a", "b"]),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn sort_requires_world_root_and_known_parents() {
        let records = vec![EntityRecord::place("Mars", "mars")];
        assert!(matches!(
            sort_parent_first(records, &BTreeSet::new()),
            Err(ModelError::RootMismatch(_))
        ));

        let records = vec![child(EntityKind::Pool, "pool", "town")];
        assert!(matches!(
            sort_parent_first(records.clone(), &BTreeSet::new()),
            Err(ModelError::UnknownParents(_))
        ));
        let external = BTreeSet::from(["town".to_string()]);
        assert_eq!(sort_parent_first(records, &external).expect("external").len(), 1);
    }

    #[test]
    fn sort_rejects_cycles() {
        let records = vec![
            child(EntityKind::Place, "a", "b"),
            child(EntityKind::Place, "b", "a"),
        ];
        assert!(matches!(
            sort_parent_first(records, &BTreeSet::new()),
            Err(ModelError::Unreachable(_))
        ));
    }
}
