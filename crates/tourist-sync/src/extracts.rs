//! Matching text pulled from federation place pages to stored places.

use serde::Serialize;
use tracing::info;

use tourist_adapters::PlaceText;
use tourist_core::EntityKind;
use tourist_storage::EntityStore;

use crate::config::SourceConfig;
use crate::reconcile::{ProblemAccumulator, ProblemKind};
use crate::SyncError;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlaceExtract {
    pub source_id: String,
    pub url: String,
    pub place_short_name: String,
    pub place_name: String,
    pub text: String,
}

/// Looks every extracted place name up within the source's subtree.
/// Names with no stored place are reported and dropped.
pub fn match_place_texts(
    store: &dyn EntityStore,
    source: &SourceConfig,
    texts: Vec<PlaceText>,
    problems: &mut ProblemAccumulator,
) -> Result<Vec<PlaceExtract>, SyncError> {
    let root = store
        .find_by_short_name(&source.place_short_name)
        .filter(|r| r.kind() == EntityKind::Place)
        .and_then(|r| r.id)
        .ok_or_else(|| SyncError::UnknownPlace(source.place_short_name.clone()))?;

    let mut extracts = Vec::new();
    for text in texts {
        let place_name = source.place_name_for_region(&text.place_name);
        match store.find_by_display_name(root, EntityKind::Place, place_name)? {
            Some(place) => extracts.push(PlaceExtract {
                source_id: source.source_id.clone(),
                url: source.url.clone(),
                place_short_name: place.short_name.clone(),
                place_name: text.place_name.clone(),
                text: text.text,
            }),
            None => problems.push(
                ProblemKind::PlaceNotFound,
                format!("Can't find place {}", text.place_name),
            ),
        }
    }
    info!(source_id = %source.source_id, extracts = extracts.len(), "matched place pages");
    Ok(extracts)
}
