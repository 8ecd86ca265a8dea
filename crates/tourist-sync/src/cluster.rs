//! Union-find clustering of pool locations by geodesic distance.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use tourist_core::{GeoPoint, PoolCandidate, PoolKey};

use crate::reconcile::ReconcileError;

/// Disjoint sets over `0..n` with path halving and union by rank.
#[derive(Debug)]
struct DisjointSet {
    parent: Vec<usize>,
    rank: Vec<u32>,
}

impl DisjointSet {
    fn new(len: usize) -> Self {
        Self {
            parent: (0..len).collect(),
            rank: vec![0; len],
        }
    }

    fn find(&mut self, mut idx: usize) -> usize {
        while self.parent[idx] != idx {
            let grandparent = self.parent[self.parent[idx]];
            self.parent[idx] = grandparent;
            idx = grandparent;
        }
        idx
    }

    fn union(&mut self, a: usize, b: usize) {
        let (root_a, root_b) = (self.find(a), self.find(b));
        if root_a == root_b {
            return;
        }
        match self.rank[root_a].cmp(&self.rank[root_b]) {
            std::cmp::Ordering::Less => self.parent[root_a] = root_b,
            std::cmp::Ordering::Greater => self.parent[root_b] = root_a,
            std::cmp::Ordering::Equal => {
                self.parent[root_a] = root_b;
                self.rank[root_b] += 1;
            }
        }
    }
}

/// Partitions `points` so any two closer than `threshold_m` share a cluster.
///
/// Clusters come back ordered by their smallest point.
pub fn cluster(
    points: &BTreeSet<GeoPoint>,
    threshold_m: f64,
) -> Result<Vec<BTreeSet<GeoPoint>>, ReconcileError> {
    let points: Vec<GeoPoint> = points.iter().copied().collect();
    let mut sets = DisjointSet::new(points.len());
    for i in 0..points.len() {
        for j in (i + 1)..points.len() {
            if points[i].distance_m(&points[j]) < threshold_m {
                sets.union(i, j);
            }
        }
    }

    let mut by_root: BTreeMap<usize, BTreeSet<GeoPoint>> = BTreeMap::new();
    for (idx, point) in points.iter().enumerate() {
        by_root.entry(sets.find(idx)).or_default().insert(*point);
    }
    let mut clusters: Vec<BTreeSet<GeoPoint>> = by_root.into_values().collect();
    clusters.sort_by(|a, b| a.first().cmp(&b.first()));

    let clustered: usize = clusters.iter().map(BTreeSet::len).sum();
    if clustered != points.len() {
        return Err(ReconcileError::Partition {
            points: points.len(),
            clustered,
        });
    }
    Ok(clusters)
}

/// Groups candidates by the cluster of their point. Candidates at the same
/// point always share a group; within a group input order is kept.
pub fn group_by_distance(
    candidates: Vec<PoolCandidate>,
    threshold_m: f64,
) -> Result<Vec<Vec<PoolCandidate>>, ReconcileError> {
    let points: BTreeSet<GeoPoint> = candidates.iter().map(|c| c.point).collect();
    let clusters = cluster(&points, threshold_m)?;
    let group_of: BTreeMap<GeoPoint, usize> = clusters
        .iter()
        .enumerate()
        .flat_map(|(idx, cluster)| cluster.iter().map(move |p| (*p, idx)))
        .collect();
    let mut groups: Vec<Vec<PoolCandidate>> = vec![Vec::new(); clusters.len()];
    for candidate in candidates {
        let idx = group_of[&candidate.point];
        groups[idx].push(candidate);
    }
    Ok(groups)
}

/// Two pools and the distance between them.
#[derive(Debug, Clone, PartialEq)]
pub struct PoolDistance {
    pub meters: f64,
    pub first: PoolKey,
    pub second: PoolKey,
}

impl fmt::Display for PoolDistance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:.1} m between '{}' ({}, {}) and '{}' ({}, {})",
            self.meters,
            self.first.name,
            self.first.point.latitude,
            self.first.point.longitude,
            self.second.name,
            self.second.point.latitude,
            self.second.point.longitude,
        )
    }
}

impl PoolDistance {
    pub fn between(a: &PoolCandidate, b: &PoolCandidate) -> Self {
        Self {
            meters: a.point.distance_m(&b.point),
            first: a.key(),
            second: b.key(),
        }
    }
}

/// Every unordered pair, nearest first.
pub fn pairwise_distances(candidates: &[PoolCandidate]) -> Vec<PoolDistance> {
    let mut distances = Vec::new();
    for (i, a) in candidates.iter().enumerate() {
        for b in &candidates[i + 1..] {
            distances.push(PoolDistance::between(a, b));
        }
    }
    distances.sort_by(|a, b| a.meters.total_cmp(&b.meters));
    distances
}

#[cfg(test)]
mod tests {
    use super::*;

    /// At this latitude 0.01 degrees of longitude spans one kilometre.
    const LAT: f64 = 26.0624683;

    fn points(lons: &[f64]) -> BTreeSet<GeoPoint> {
        lons.iter().map(|lon| GeoPoint::new(LAT, *lon)).collect()
    }

    #[test]
    fn chains_within_threshold_and_separates_the_rest() {
        let clusters = cluster(&points(&[0.0, 0.009, 0.018, 0.038]), 1000.0).expect("cluster");
        assert_eq!(clusters.len(), 2);
        assert_eq!(clusters[0], points(&[0.0, 0.009, 0.018]));
        assert_eq!(clusters[1], points(&[0.038]));
    }

    #[test]
    fn clusters_partition_the_input() {
        let input = points(&[0.0, 0.5, 0.5001, 1.0, 1.00001, 2.0]);
        let clusters = cluster(&input, 100.0).expect("cluster");
        let mut seen = BTreeSet::new();
        for cluster in &clusters {
            for point in cluster {
                assert!(seen.insert(*point), "point in two clusters");
            }
        }
        assert_eq!(seen, input);
        assert!(cluster(&BTreeSet::new(), 100.0).expect("empty").is_empty());
    }

    #[test]
    fn candidates_at_one_point_share_a_group() {
        let here = GeoPoint::new(LAT, 0.0);
        let far = GeoPoint::new(LAT, 1.0);
        let groups = group_by_distance(
            vec![
                PoolCandidate::new(far, "Far", vec![]),
                PoolCandidate::new(here, "Pool", vec![]),
                PoolCandidate::new(here, "Pool Again", vec![]),
            ],
            200.0,
        )
        .expect("groups");
        let names: Vec<Vec<&str>> = groups
            .iter()
            .map(|g| g.iter().map(|c| c.name.as_str()).collect())
            .collect();
        assert_eq!(names, vec![vec!["Pool", "Pool Again"], vec!["Far"]]);
    }

    #[test]
    fn pairwise_distances_put_the_furthest_last() {
        let pools = vec![
            PoolCandidate::new(GeoPoint::new(LAT, 0.0), "A", vec![]),
            PoolCandidate::new(GeoPoint::new(LAT, 0.018), "C", vec![]),
            PoolCandidate::new(GeoPoint::new(LAT, 0.009), "B", vec![]),
        ];
        let distances = pairwise_distances(&pools);
        assert_eq!(distances.len(), 3);
        let furthest = distances.last().expect("furthest");
        assert_eq!(furthest.first.name, "A");
        assert_eq!(furthest.second.name, "C");
        assert!(furthest.meters > 1500.0);
    }
}
