//! Merging clustered pool reports and matching them against stored pools.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;

use serde::Serialize;
use thiserror::Error;
use tracing::warn;

use tourist_core::{
    EntityId, EntityKind, EntityRecord, Field, ModelError, ParentRef, PoolCandidate, PoolKey,
    SourceProvenance, STORE_SOURCE,
};
use tourist_storage::{EntityStore, StoreError};

use crate::cluster::pairwise_distances;
use crate::diff::{diff_and_apply, SyncResults};
use crate::SyncError;

/// Reports of one pool further apart than this are worth a warning.
pub const MERGE_TOLERANCE_M: f64 = 10.0;

const POOL_UPDATE_IGNORED: [Field; 4] =
    [Field::Id, Field::ShortName, Field::StatusDate, Field::Parent];

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("clusters hold {clustered} points but {points} were given")]
    Partition { points: usize, clustered: usize },
    #[error("Similar pool names '{first}' and '{second}' ({signature}) are {distance_m:.1} m apart")]
    SimilarNames {
        signature: String,
        first: String,
        second: String,
        distance_m: f64,
    },
    #[error("Unexpected pool group sources {sources:?} for {names:?}")]
    UnexpectedPoolGroupSources {
        sources: Vec<String>,
        names: Vec<String>,
    },
    #[error("Pool {name} region changed from {old} to {new}")]
    PoolRegionChanged {
        name: String,
        old: String,
        new: String,
    },
    #[error("pool {0} has no owning place")]
    NoOwningPlace(String),
    #[error(transparent)]
    Model(#[from] ModelError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProblemKind {
    FarApart,
    DifferentNames,
    MultipleRegions,
    RegionNotFound,
    NonHttpsLink,
    PlaceNotFound,
    PoolWithoutEntrance,
    FetchFailed,
}

impl ProblemKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ProblemKind::FarApart => "far_apart",
            ProblemKind::DifferentNames => "different_names",
            ProblemKind::MultipleRegions => "multiple_regions",
            ProblemKind::RegionNotFound => "region_not_found",
            ProblemKind::NonHttpsLink => "non_https_link",
            ProblemKind::PlaceNotFound => "place_not_found",
            ProblemKind::PoolWithoutEntrance => "pool_without_entrance",
            ProblemKind::FetchFailed => "fetch_failed",
        }
    }
}

impl fmt::Display for ProblemKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A warning raised during a run. Never stops the run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Problem {
    pub kind: ProblemKind,
    pub source_id: Option<String>,
    pub message: String,
}

/// Collects warnings for the run report, logging each as it arrives.
#[derive(Debug, Clone, Default)]
pub struct ProblemAccumulator {
    source_id: Option<String>,
    problems: Vec<Problem>,
}

impl ProblemAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attributes later problems to `source_id`.
    pub fn set_source(&mut self, source_id: Option<&str>) {
        self.source_id = source_id.map(str::to_string);
    }

    pub fn push(&mut self, kind: ProblemKind, message: impl Into<String>) {
        let message = message.into();
        warn!(
            kind = kind.as_str(),
            source_id = self.source_id.as_deref().unwrap_or("-"),
            "{message}"
        );
        self.problems.push(Problem {
            kind,
            source_id: self.source_id.clone(),
            message,
        });
    }

    pub fn problems(&self) -> &[Problem] {
        &self.problems
    }

    pub fn count(&self, kind: ProblemKind) -> usize {
        self.problems.iter().filter(|p| p.kind == kind).count()
    }

    pub fn len(&self) -> usize {
        self.problems.len()
    }

    pub fn is_empty(&self) -> bool {
        self.problems.is_empty()
    }

    pub fn into_problems(self) -> Vec<Problem> {
        self.problems
    }
}

fn provenance_order(a: &SourceProvenance, b: &SourceProvenance) -> std::cmp::Ordering {
    let key = |p: &SourceProvenance| {
        (
            p.source_id.clone(),
            p.club_name.clone(),
            p.session_label.clone(),
            p.reported.clone(),
            p.stored_pool_id,
        )
    };
    key(a).cmp(&key(b))
}

/// Merges one distance group into a single candidate.
///
/// The representative is the smallest candidate by point then name and
/// carries the provenance of the whole group, so the result does not depend
/// on input order.
pub fn merge(
    mut group: Vec<PoolCandidate>,
    problems: &mut ProblemAccumulator,
) -> Option<PoolCandidate> {
    group.sort();
    if group.len() > 1 {
        if let Some(furthest) = pairwise_distances(&group).last() {
            if furthest.meters > MERGE_TOLERANCE_M {
                problems.push(
                    ProblemKind::FarApart,
                    format!("Pools more than 10 meters apart: {furthest}"),
                );
            }
        }
        let signatures: BTreeSet<String> =
            group.iter().map(PoolCandidate::name_signature).collect();
        if signatures.len() > 1 {
            let names: BTreeSet<&str> = group.iter().map(|c| c.name.as_str()).collect();
            let quoted: Vec<String> = names.iter().map(|n| format!("'{n}'")).collect();
            problems.push(
                ProblemKind::DifferentNames,
                format!("Nearby pools with different names: {}", quoted.join(", ")),
            );
        }
    }

    let mut members = group.into_iter();
    let mut merged = members.next()?;
    for other in members {
        merged.provenance.extend(other.provenance);
    }
    merged.provenance.sort_by(provenance_order);
    Some(merged)
}

/// Fails when a name signature occurs in two different distance groups.
pub fn check_names_across_groups(groups: &[Vec<PoolCandidate>]) -> Result<(), ReconcileError> {
    for (idx, group) in groups.iter().enumerate() {
        for candidate in group {
            let signature = candidate.name_signature();
            let clash = groups[..idx]
                .iter()
                .flatten()
                .find(|earlier| earlier.name_signature() == signature);
            if let Some(earlier) = clash {
                return Err(ReconcileError::SimilarNames {
                    signature,
                    first: earlier.name.clone(),
                    second: candidate.name.clone(),
                    distance_m: earlier.point.distance_m(&candidate.point),
                });
            }
        }
    }
    Ok(())
}

/// Candidates for the stored pools under `root`. Pools without an entrance
/// cannot be placed and are left alone.
pub fn stored_pool_candidates(
    store: &dyn EntityStore,
    root: EntityId,
    problems: &mut ProblemAccumulator,
) -> Vec<PoolCandidate> {
    let mut candidates = Vec::new();
    for pool in store.all_of_kind(EntityKind::Pool) {
        let Some(id) = pool.id else {
            continue;
        };
        if !store.is_descendant_of(pool, root) {
            continue;
        }
        let Some(point) = pool.entrance() else {
            problems.push(
                ProblemKind::PoolWithoutEntrance,
                format!("Stored pool {} has no entrance, skipped", pool.short_name),
            );
            continue;
        };
        let parent = store.parent_of(pool);
        candidates.push(PoolCandidate::new(
            point,
            pool.name.clone(),
            vec![SourceProvenance::from_store(
                id,
                parent.and_then(|p| p.id),
                parent.map(|p| p.short_name.clone()),
            )],
        ));
    }
    candidates
}

/// Store form of a feed pool owned by `place_id`.
pub fn new_pool_record(
    candidate: &PoolCandidate,
    source_id: &str,
    place_id: EntityId,
) -> EntityRecord {
    let short_name = format!("{source_id}{}", candidate.signature_parts().concat());
    let mut record = EntityRecord::pool(candidate.name.clone(), short_name)
        .with_parent(ParentRef::by_id(place_id))
        .with_entrance(candidate.point);
    record.status_comment = Some(format!("Generated from {source_id}"));
    record
}

/// The place a feed pool belongs to. With several, `current` wins when it
/// is among them, otherwise the one with the smallest short name.
fn owning_place(
    candidate: &PoolCandidate,
    current: Option<EntityId>,
    problems: &mut ProblemAccumulator,
) -> Result<(EntityId, String), ReconcileError> {
    let places: BTreeMap<String, EntityId> = candidate
        .provenance
        .iter()
        .filter_map(|p| Some((p.place_short_name.clone()?, p.place_id?)))
        .collect();
    let kept = places
        .iter()
        .find(|(_, id)| Some(**id) == current)
        .or_else(|| places.iter().next());
    let Some((short_name, id)) = kept else {
        return Err(ReconcileError::NoOwningPlace(candidate.name.clone()));
    };
    if places.len() > 1 {
        let all: Vec<&str> = places.keys().map(String::as_str).collect();
        problems.push(
            ProblemKind::MultipleRegions,
            format!(
                "Pool in multiple regions: {} is used from {}; keeping it in {short_name}",
                candidate.name,
                all.join(", ")
            ),
        );
    }
    Ok((*id, short_name.clone()))
}

fn stored_pool<'a>(
    store: &'a dyn EntityStore,
    candidate: &PoolCandidate,
) -> Result<&'a EntityRecord, SyncError> {
    let id = candidate
        .provenance
        .iter()
        .find_map(|p| p.stored_pool_id)
        .ok_or_else(|| ModelError::MissingId(candidate.name.clone()))?;
    store
        .get(EntityKind::Pool, id)
        .ok_or(SyncError::Store(StoreError::NotFound {
            kind: EntityKind::Pool,
            id,
        }))
}

fn register_short_names(
    short_names: &mut HashMap<PoolKey, String>,
    candidate: &PoolCandidate,
    short_name: &str,
) {
    short_names.insert(candidate.key(), short_name.to_string());
    for reported in candidate.provenance.iter().filter_map(|p| p.reported.clone()) {
        short_names.insert(reported, short_name.to_string());
    }
}

/// Pool changes plus the stored short name every reported location ended up with.
#[derive(Debug, Clone, Default)]
pub struct PoolSync {
    pub results: SyncResults,
    pub short_names: HashMap<PoolKey, String>,
}

/// Decides the fate of every group of merged feed pools and stored pools.
///
/// A lone stored pool is deleted, a lone feed pool is inserted and a pair of
/// one feed and one stored pool is an update in place.
pub fn classify_pool_groups(
    groups: Vec<Vec<PoolCandidate>>,
    feed_source: &str,
    store: &dyn EntityStore,
    problems: &mut ProblemAccumulator,
) -> Result<PoolSync, SyncError> {
    let ignore: BTreeSet<Field> = POOL_UPDATE_IGNORED.into_iter().collect();
    let mut sync = PoolSync::default();

    for group in groups {
        let mut feed = Vec::new();
        let mut stored = Vec::new();
        let mut sources = Vec::new();
        for candidate in &group {
            let source = candidate.single_source()?;
            sources.push(source.to_string());
            if source == feed_source {
                feed.push(candidate);
            } else if source == STORE_SOURCE {
                stored.push(candidate);
            }
        }
        if feed.len() + stored.len() != group.len() {
            stored.clear();
            feed.clear();
        }

        match (feed.as_slice(), stored.as_slice()) {
            ([], [old]) => {
                sync.results.to_del.push(stored_pool(store, old)?.clone());
            }
            ([new], []) => {
                let (place_id, _) = owning_place(new, None, problems)?;
                let record = new_pool_record(new, feed_source, place_id);
                register_short_names(&mut sync.short_names, new, &record.short_name);
                sync.results.to_add.push(record);
            }
            ([new], [old]) => {
                let mut existing = stored_pool(store, old)?.clone();
                let (place_id, place_short_name) =
                    owning_place(new, existing.parent.id, problems)?;
                if existing.parent.id != Some(place_id) {
                    let previous = store
                        .parent_of(&existing)
                        .map(|p| p.short_name.clone())
                        .unwrap_or_default();
                    return Err(ReconcileError::PoolRegionChanged {
                        name: existing.name.clone(),
                        old: previous,
                        new: place_short_name,
                    }
                    .into());
                }
                let fresh = new_pool_record(new, feed_source, place_id);
                let changed = diff_and_apply(&fresh, &mut existing, &ignore)?;
                register_short_names(&mut sync.short_names, new, &existing.short_name);
                if changed.is_empty() {
                    sync.results.unmodified.push(existing);
                } else {
                    sync.results.updated.push(existing);
                }
            }
            _ => {
                return Err(ReconcileError::UnexpectedPoolGroupSources {
                    sources,
                    names: group.iter().map(|c| c.name.clone()).collect(),
                }
                .into())
            }
        }
    }
    Ok(sync)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Utc};
    use tourist_core::GeoPoint;
    use tourist_storage::{ChangeSet, MemoryStore};

    const FEED: &str = "feed";

    fn reported(point: GeoPoint, name: &str, place: Option<(EntityId, &str)>) -> PoolCandidate {
        let key = PoolKey {
            point,
            name: name.to_string(),
        };
        PoolCandidate::new(
            point,
            name,
            vec![SourceProvenance {
                source_id: FEED.to_string(),
                club_name: Some(format!("{name} club")),
                reported: Some(key),
                place_id: place.map(|(id, _)| id),
                place_short_name: place.map(|(_, sn)| sn.to_string()),
                ..SourceProvenance::default()
            }],
        )
    }

    fn seeded_store() -> MemoryStore {
        let mut store = MemoryStore::new();
        let quays = EntityRecord::pool("The Quays", "feedthequa")
            .with_parent(ParentRef::by_short_name("south"))
            .with_entrance(GeoPoint::new(50.9097, -1.4044));
        store
            .commit(
                ChangeSet {
                    adds: vec![
                        EntityRecord::place("World", "world"),
                        EntityRecord::place("UK", "uk")
                            .with_parent(ParentRef::by_short_name("world")),
                        EntityRecord::place("South", "south")
                            .with_parent(ParentRef::by_short_name("uk")),
                        EntityRecord::place("London", "london")
                            .with_parent(ParentRef::by_short_name("uk")),
                        quays,
                    ],
                    ..ChangeSet::default()
                },
                None,
                DateTime::<Utc>::from_timestamp(0, 0).expect("valid timestamp"),
            )
            .expect("seed");
        store
    }

    fn place(store: &MemoryStore, short_name: &'static str) -> (EntityId, &'static str) {
        let id = store
            .find_by_short_name(short_name)
            .and_then(|p| p.id)
            .expect("place id");
        (id, short_name)
    }

    #[test]
    fn merge_warns_about_distance_and_names() {
        let mut problems = ProblemAccumulator::new();
        let a = GeoPoint::new(51.0, 0.0);
        let b = GeoPoint::new(51.0002, 0.0);
        let merged = merge(
            vec![reported(b, "Pool Bet", None), reported(a, "Pool A", None)],
            &mut problems,
        )
        .expect("merged");
        assert_eq!(merged.name, "Pool A");
        assert_eq!(merged.provenance.len(), 2);
        assert_eq!(problems.count(ProblemKind::FarApart), 1);
        assert_eq!(problems.count(ProblemKind::DifferentNames), 1);
        assert!(problems.problems()[1]
            .message
            .contains("'Pool A', 'Pool Bet'"));
    }

    #[test]
    fn merge_is_independent_of_input_order() {
        let pools = vec![
            reported(GeoPoint::new(51.0, 0.0001), "Leisure Centre", None),
            reported(GeoPoint::new(51.0, 0.0), "Leisure Centre", None),
            reported(GeoPoint::new(51.0, 0.0), "Leisure Center", None),
        ];
        let mut reversed = pools.clone();
        reversed.reverse();
        let mut problems = ProblemAccumulator::new();
        let first = merge(pools, &mut problems).expect("merged");
        let second = merge(reversed, &mut problems).expect("merged");
        assert_eq!(first.key(), second.key());
        assert_eq!(first.provenance, second.provenance);
        assert_eq!(first.name, "Leisure Center");
        assert!(merge(Vec::new(), &mut problems).is_none());
    }

    #[test]
    fn same_name_in_two_groups_is_an_error() {
        let groups = vec![
            vec![reported(GeoPoint::new(51.0, 0.0), "Central Baths", None)],
            vec![reported(GeoPoint::new(52.0, 0.0), "Central Bathhouse", None)],
        ];
        let err = check_names_across_groups(&groups).expect_err("clash");
        assert!(matches!(
            err,
            ReconcileError::SimilarNames { ref signature, .. } if signature == "cen.bat"
        ));
        assert!(check_names_across_groups(&groups[..1]).is_ok());
    }

    #[test]
    fn lone_feed_pool_is_added_and_lone_stored_pool_deleted() {
        let store = seeded_store();
        let mut problems = ProblemAccumulator::new();
        let stored = stored_pool_candidates(&store, place(&store, "uk").0, &mut problems);
        assert_eq!(stored.len(), 1);
        let london = Some(place(&store, "london"));
        let fresh = reported(GeoPoint::new(51.5155, -0.0922), "Golden Lane", london);
        let groups = vec![stored, vec![fresh.clone()]];
        let sync =
            classify_pool_groups(groups, FEED, &store, &mut problems).expect("classify");
        assert_eq!(sync.results.to_del.len(), 1);
        assert_eq!(sync.results.to_add.len(), 1);
        let added = &sync.results.to_add[0];
        assert_eq!(added.short_name, "feedgollan");
        assert_eq!(added.status_comment.as_deref(), Some("Generated from feed"));
        assert_eq!(sync.short_names.get(&fresh.key()).map(String::as_str), Some("feedgollan"));
    }

    #[test]
    fn matching_feed_pool_updates_in_place() {
        let store = seeded_store();
        let mut problems = ProblemAccumulator::new();
        let mut group = stored_pool_candidates(&store, place(&store, "uk").0, &mut problems);
        let south = Some(place(&store, "south"));
        group.push(reported(GeoPoint::new(50.9098, -1.4044), "The Quays", south));
        let sync =
            classify_pool_groups(vec![group], FEED, &store, &mut problems).expect("classify");
        assert_eq!(sync.results.updated.len(), 1);
        let updated = &sync.results.updated[0];
        assert_eq!(updated.short_name, "feedthequa");
        assert_eq!(updated.entrance(), Some(GeoPoint::new(50.9098, -1.4044)));
    }

    #[test]
    fn pool_moving_region_is_an_error() {
        let store = seeded_store();
        let mut problems = ProblemAccumulator::new();
        let mut group = stored_pool_candidates(&store, place(&store, "uk").0, &mut problems);
        let london = Some(place(&store, "london"));
        group.push(reported(GeoPoint::new(50.9097, -1.4044), "The Quays", london));
        let err =
            classify_pool_groups(vec![group], FEED, &store, &mut problems).expect_err("moved");
        assert_eq!(err.to_string(), "Pool The Quays region changed from south to london");
    }

    #[test]
    fn two_feed_pools_with_one_stored_pool_is_an_error() {
        let store = seeded_store();
        let mut problems = ProblemAccumulator::new();
        let south = place(&store, "south");
        let mut group = stored_pool_candidates(&store, place(&store, "uk").0, &mut problems);
        group.push(reported(GeoPoint::new(50.9097, -1.4044), "The Quays", Some(south)));
        group.push(reported(GeoPoint::new(50.9099, -1.4044), "Quays Pool", Some(south)));
        let err = classify_pool_groups(vec![group], FEED, &store, &mut problems)
            .expect_err("three-way");
        assert!(matches!(
            err,
            SyncError::Reconcile(ReconcileError::UnexpectedPoolGroupSources { .. })
        ));
    }

    #[test]
    fn pool_used_from_two_regions_stays_in_the_first() {
        let store = seeded_store();
        let mut problems = ProblemAccumulator::new();
        let point = GeoPoint::new(51.3, -0.5);
        let merged = merge(
            vec![
                reported(point, "Border Baths", Some(place(&store, "south"))),
                reported(point, "Border Baths", Some(place(&store, "london"))),
            ],
            &mut problems,
        )
        .expect("merged");
        let sync = classify_pool_groups(vec![vec![merged]], FEED, &store, &mut problems)
            .expect("classify");
        assert_eq!(problems.count(ProblemKind::MultipleRegions), 1);
        assert_eq!(
            sync.results.to_add[0].parent.id,
            Some(place(&store, "london").0)
        );
    }

    #[test]
    fn stored_pool_gaining_a_second_region_keeps_its_place() {
        let store = seeded_store();
        let mut problems = ProblemAccumulator::new();
        let point = GeoPoint::new(50.9097, -1.4044);
        let merged = merge(
            vec![
                reported(point, "The Quays", Some(place(&store, "south"))),
                reported(point, "The Quays", Some(place(&store, "london"))),
            ],
            &mut problems,
        )
        .expect("merged");
        let mut group = stored_pool_candidates(&store, place(&store, "uk").0, &mut problems);
        group.push(merged);
        let sync = classify_pool_groups(vec![group], FEED, &store, &mut problems)
            .expect("stored region is still an owner");
        assert_eq!(problems.count(ProblemKind::MultipleRegions), 1);
        assert!(problems.problems()[0].message.contains("keeping it in south"));
        let kept: Vec<&EntityRecord> =
            sync.results.updated.iter().chain(&sync.results.unmodified).collect();
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].short_name, "feedthequa");
        assert_eq!(kept[0].parent.id, Some(place(&store, "south").0));
        assert!(sync.results.to_add.is_empty() && sync.results.to_del.is_empty());
    }
}
