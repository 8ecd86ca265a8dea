//! Pool candidates and the provenance they carry through reconciliation.

use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

use crate::entity::EntityId;
use crate::geo::GeoPoint;
use crate::ModelError;

/// Source identifier used for candidates built from stored pools.
pub const STORE_SOURCE: &str = "store";

/// Where a pool was reported: the exact point and name a single session gave.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PoolKey {
    pub point: GeoPoint,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SourceProvenance {
    pub source_id: String,
    pub club_name: Option<String>,
    pub session_label: Option<String>,
    pub reported: Option<PoolKey>,
    pub place_id: Option<EntityId>,
    pub place_short_name: Option<String>,
    pub stored_pool_id: Option<EntityId>,
}

impl SourceProvenance {
    pub fn from_store(
        pool_id: EntityId,
        place_id: Option<EntityId>,
        place_short_name: Option<String>,
    ) -> Self {
        Self {
            source_id: STORE_SOURCE.to_string(),
            place_id,
            place_short_name,
            stored_pool_id: Some(pool_id),
            ..Self::default()
        }
    }
}

/// A reported pool location. Equality, hashing and order use
/// `(latitude, longitude, name)` only; provenance rides along.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolCandidate {
    pub point: GeoPoint,
    pub name: String,
    pub provenance: Vec<SourceProvenance>,
}

impl PoolCandidate {
    pub fn new(
        point: GeoPoint,
        name: impl Into<String>,
        provenance: Vec<SourceProvenance>,
    ) -> Self {
        Self {
            point,
            name: name.into(),
            provenance,
        }
    }

    pub fn key(&self) -> PoolKey {
        PoolKey {
            point: self.point,
            name: self.name.clone(),
        }
    }

    /// First three characters of the first three words, word characters only.
    pub fn signature_parts(&self) -> Vec<String> {
        self.name
            .to_lowercase()
            .split_whitespace()
            .take(3)
            .map(|word| word.chars().filter(|c| c.is_alphanumeric()).take(3).collect())
            .collect()
    }

    pub fn name_signature(&self) -> String {
        self.signature_parts().join(".")
    }

    pub fn source_set(&self) -> Vec<String> {
        self.provenance
            .iter()
            .map(|p| p.source_id.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// The one source this candidate came from; an error if there are several.
    pub fn single_source(&self) -> Result<&str, ModelError> {
        let sources = self.source_set();
        match sources.as_slice() {
            [_] => Ok(self.provenance[0].source_id.as_str()),
            _ => Err(ModelError::NotSingleSource {
                name: self.name.clone(),
                sources,
            }),
        }
    }

    /// Owning places named by the provenance, deduplicated by short name.
    pub fn place_short_names(&self) -> BTreeSet<String> {
        self.provenance
            .iter()
            .filter_map(|p| p.place_short_name.clone())
            .collect()
    }
}

impl PartialEq for PoolCandidate {
    fn eq(&self, other: &Self) -> bool {
        self.point == other.point && self.name == other.name
    }
}

impl Eq for PoolCandidate {}

impl Hash for PoolCandidate {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.point.hash(state);
        self.name.hash(state);
    }
}

impl Ord for PoolCandidate {
    fn cmp(&self, other: &Self) -> Ordering {
        self.point
            .cmp(&other.point)
            .then_with(|| self.name.cmp(&other.name))
    }
}

impl PartialOrd for PoolCandidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(name: &str, source: &str) -> PoolCandidate {
        PoolCandidate::new(
            GeoPoint::new(1.0, 2.0),
            name,
            vec![SourceProvenance {
                source_id: source.to_string(),
                ..SourceProvenance::default()
            }],
        )
    }

    #[test]
    fn name_signature_keeps_three_chars_of_three_words() {
        assert_eq!(candidate("Pool A", "f").name_signature(), "poo.a");
        assert_eq!(candidate("Pool Beta", "f").name_signature(), "poo.bet");
        assert_eq!(
            candidate("St. Mary's  Leisure_Centre Annex Extra", "f").name_signature(),
            "st.mar.lei"
        );
    }

    #[test]
    fn provenance_does_not_affect_equality() {
        assert_eq!(candidate("Pool", "a"), candidate("Pool", "b"));
        assert_ne!(candidate("Pool", "a"), candidate("Pool 2", "a"));
    }

    #[test]
    fn single_source_rejects_mixed_provenance() {
        let mut c = candidate("Pool", "feed");
        assert_eq!(c.single_source().expect("one source"), "feed");
        c.provenance.push(SourceProvenance {
            source_id: STORE_SOURCE.to_string(),
            ..SourceProvenance::default()
        });
        assert_eq!(c.source_set(), vec!["feed".to_string(), "store".to_string()]);
        assert!(c.single_source().is_err());
    }
}
