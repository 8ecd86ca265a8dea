//! Reconciling one club feed against the store: regions, pools, clubs and
//! the source record, gathered into a single change set.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use tracing::{info, info_span};

use tourist_adapters::{build_club, BuiltClub, ClubFeed, FeedClub};
use tourist_core::{
    EntityId, EntityKind, EntityRecord, Field, PoolCandidate, SourceProvenance, SourceRecord,
};
use tourist_storage::{ChangeSet, EntityStore};

use crate::cluster::group_by_distance;
use crate::config::SourceConfig;
use crate::diff::{classify, SyncCounts};
use crate::reconcile::{
    check_names_across_groups, classify_pool_groups, merge, stored_pool_candidates,
    ProblemAccumulator, ProblemKind,
};
use crate::SyncError;

const CLUB_UPDATE_IGNORED: [Field; 3] = [Field::Id, Field::ShortName, Field::StatusDate];

#[derive(Debug, Clone, Default)]
pub struct FeedSyncOutcome {
    pub pools: SyncCounts,
    pub clubs: SyncCounts,
    pub changes: ChangeSet,
    pub skipped_regions: Vec<String>,
}

fn club_source_key(record: &EntityRecord) -> String {
    record
        .club_detail()
        .and_then(|d| d.source_key.clone())
        .unwrap_or_default()
}

fn root_place(store: &dyn EntityStore, source: &SourceConfig) -> Result<EntityId, SyncError> {
    store
        .find_by_short_name(&source.place_short_name)
        .filter(|r| r.kind() == EntityKind::Place)
        .and_then(|r| r.id)
        .ok_or_else(|| SyncError::UnknownPlace(source.place_short_name.clone()))
}

struct KeptClub<'a> {
    club: &'a FeedClub,
    place_id: EntityId,
    place_short_name: String,
}

fn session_candidates(source_id: &str, kept: &[KeptClub<'_>]) -> Vec<PoolCandidate> {
    let mut reports = Vec::new();
    for entry in kept {
        for session in &entry.club.sessions {
            let key = session.pool_key();
            reports.push(PoolCandidate::new(
                key.point,
                key.name.clone(),
                vec![SourceProvenance {
                    source_id: source_id.to_string(),
                    club_name: Some(entry.club.name.clone()),
                    session_label: Some(session.title.clone()),
                    reported: Some(key),
                    place_id: Some(entry.place_id),
                    place_short_name: Some(entry.place_short_name.clone()),
                    stored_pool_id: None,
                }],
            ));
        }
    }
    reports
}

/// Computes everything one feed changes in the store without committing.
///
/// Clubs whose region has no stored place are skipped and kept as they are
/// in the store. Stored clubs of this source that vanished from the feed are
/// deleted.
pub fn sync_feed(
    store: &dyn EntityStore,
    source: &SourceConfig,
    feed: &ClubFeed,
    synced_at: DateTime<Utc>,
    problems: &mut ProblemAccumulator,
) -> Result<FeedSyncOutcome, SyncError> {
    let _span = info_span!("feed_sync", source_id = %source.source_id).entered();
    let root = root_place(store, source)?;

    let mut regions: BTreeMap<String, Option<(EntityId, String)>> = BTreeMap::new();
    let mut kept = Vec::new();
    let mut skipped_keys = BTreeSet::new();
    let mut skipped_regions = Vec::new();
    for club in feed.clubs.iter().filter(|c| !c.is_admin_only()) {
        if !regions.contains_key(&club.region) {
            let place_name = source.place_name_for_region(&club.region);
            let place = store
                .find_by_display_name(root, EntityKind::Place, place_name)?
                .and_then(|p| Some((p.id?, p.short_name.clone())));
            if place.is_none() {
                problems.push(
                    ProblemKind::RegionNotFound,
                    format!("Region {} not found, skipping its clubs", club.region),
                );
                skipped_regions.push(club.region.clone());
            }
            regions.insert(club.region.clone(), place);
        }
        match regions.get(&club.region).cloned().flatten() {
            Some((place_id, place_short_name)) => kept.push(KeptClub {
                club,
                place_id,
                place_short_name,
            }),
            None => {
                skipped_keys.insert(club.unique_id.clone());
            }
        }
    }

    let threshold = source.cluster_distance_m;
    let feed_groups = group_by_distance(session_candidates(&source.source_id, &kept), threshold)?;
    check_names_across_groups(&feed_groups)?;
    let mut candidates: Vec<PoolCandidate> = feed_groups
        .into_iter()
        .filter_map(|group| merge(group, problems))
        .collect();
    candidates.extend(stored_pool_candidates(store, root, problems));
    let pool_groups = group_by_distance(candidates, threshold)?;
    let pools = classify_pool_groups(pool_groups, &source.source_id, store, problems)?;

    let mut built = Vec::with_capacity(kept.len());
    for entry in &kept {
        let BuiltClub {
            record,
            omitted_links,
        } = build_club(
            entry.club,
            &source.source_id,
            &feed.source.name,
            entry.place_id,
            &pools.short_names,
        )?;
        for link in omitted_links {
            problems.push(ProblemKind::NonHttpsLink, link);
        }
        built.push(record);
    }
    let stored_clubs: Vec<EntityRecord> = store
        .all_of_kind(EntityKind::Club)
        .into_iter()
        .filter(|c| {
            c.club_detail()
                .and_then(|d| d.source_short_name.as_deref())
                == Some(source.source_id.as_str())
        })
        .filter(|c| store.is_descendant_of(c, root))
        .filter(|c| !skipped_keys.contains(&club_source_key(c)))
        .cloned()
        .collect();
    let ignore: BTreeSet<Field> = CLUB_UPDATE_IGNORED.into_iter().collect();
    let clubs = classify(stored_clubs, built, club_source_key, &ignore)?;

    let mut source_record = store
        .source(&source.source_id)
        .cloned()
        .unwrap_or_else(|| SourceRecord::new(&source.source_id));
    source_record.name = feed.source.name.clone();
    source_record.logo_url = Some(feed.source.icon.clone()).filter(|icon| !icon.is_empty());
    source_record.place_id = Some(root);
    source_record.sync_timestamp = Some(synced_at);

    let pool_counts = pools.results.summary();
    let club_counts = clubs.summary();
    let mut changes = pools.results.into_change_set()?;
    changes.extend(clubs.into_change_set()?);
    changes.sources.push(source_record);

    info!(
        pools_added = pool_counts.added,
        pools_updated = pool_counts.updated,
        pools_deleted = pool_counts.deleted,
        clubs_added = club_counts.added,
        clubs_updated = club_counts.updated,
        clubs_deleted = club_counts.deleted,
        skipped_regions = skipped_regions.len(),
        "feed reconciled"
    );
    Ok(FeedSyncOutcome {
        pools: pool_counts,
        clubs: club_counts,
        changes,
        skipped_regions,
    })
}
