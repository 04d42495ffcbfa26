//! Proximity clustering of device tracks
//!
//! Two tracks closer than epsilon belong to the same cluster, and membership
//! is transitive: A-B and B-C within epsilon puts A, B and C together even
//! when A-C is farther apart. Computed with union-find over all pairs.

use crate::error::DetectError;
use crate::geo::{centroid, haversine_m};
use crate::types::{BoundingBox, Cluster, DeviceTrack, GeoPoint, TrackStatus};
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Cooperative cancellation flag shared with a running clustering pass
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }
}

struct DisjointSet {
    parent: Vec<usize>,
    rank: Vec<u8>,
}

impl DisjointSet {
    fn new(n: usize) -> Self {
        Self {
            parent: (0..n).collect(),
            rank: vec![0; n],
        }
    }

    fn find(&mut self, mut x: usize) -> usize {
        while self.parent[x] != x {
            self.parent[x] = self.parent[self.parent[x]];
            x = self.parent[x];
        }
        x
    }

    fn union(&mut self, a: usize, b: usize) {
        let (ra, rb) = (self.find(a), self.find(b));
        if ra == rb {
            return;
        }
        match self.rank[ra].cmp(&self.rank[rb]) {
            std::cmp::Ordering::Less => self.parent[ra] = rb,
            std::cmp::Ordering::Greater => self.parent[rb] = ra,
            std::cmp::Ordering::Equal => {
                self.parent[rb] = ra;
                self.rank[ra] += 1;
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    /// About to link the next row of the pair scan
    Row,
    /// Every pair is linked and members are grouped
    Grouped,
}

/// Groups tracks by proximity
#[derive(Debug, Clone, Copy, Default)]
pub struct GeoClusterer;

impl GeoClusterer {
    /// Cluster tracks with single-linkage distance `epsilon_m`
    ///
    /// Output is deterministic for a given input order: clusters are ordered
    /// by their first member and members keep input order.
    pub fn cluster(tracks: &[DeviceTrack], epsilon_m: f64) -> Vec<Cluster> {
        // An untriggered token can never cancel
        Self::cluster_with_cancel(tracks, epsilon_m, &CancellationToken::new()).unwrap_or_default()
    }

    /// Cancellable variant; a cancelled run yields `Cancelled`, never partial output
    pub fn cluster_with_cancel(
        tracks: &[DeviceTrack],
        epsilon_m: f64,
        token: &CancellationToken,
    ) -> Result<Vec<Cluster>, DetectError> {
        Self::cluster_observed(tracks, epsilon_m, token, |_| {})
    }

    /// `observe` sees each phase just before the cancellation check that follows it
    fn cluster_observed(
        tracks: &[DeviceTrack],
        epsilon_m: f64,
        token: &CancellationToken,
        mut observe: impl FnMut(Phase),
    ) -> Result<Vec<Cluster>, DetectError> {
        let n = tracks.len();
        let mut sets = DisjointSet::new(n);

        for i in 0..n {
            observe(Phase::Row);
            if token.is_cancelled() {
                debug!(processed = i, total = n, "clustering cancelled");
                return Err(DetectError::Cancelled);
            }
            for j in (i + 1)..n {
                let d = haversine_m(
                    &tracks[i].representative_location,
                    &tracks[j].representative_location,
                );
                if d <= epsilon_m {
                    sets.union(i, j);
                }
            }
        }

        // Group by root in order of each group's first member
        let mut roots: Vec<usize> = Vec::new();
        let mut members: Vec<Vec<usize>> = Vec::new();
        for i in 0..n {
            let root = sets.find(i);
            match roots.iter().position(|&r| r == root) {
                Some(slot) => members[slot].push(i),
                None => {
                    roots.push(root);
                    members.push(vec![i]);
                }
            }
        }

        observe(Phase::Grouped);
        if token.is_cancelled() {
            debug!(total = n, "clustering cancelled before output");
            return Err(DetectError::Cancelled);
        }

        let clusters = members
            .into_iter()
            .enumerate()
            .filter_map(|(index, idx)| build_cluster(index, idx.iter().map(|&i| &tracks[i])))
            .collect::<Vec<_>>();

        debug!(tracks = n, clusters = clusters.len(), "clustering complete");
        Ok(clusters)
    }

    /// Cluster of ACTIVE tracks whose centroid is nearest to `origin`
    ///
    /// Returns None when no track is active.
    pub fn nearest_cluster(
        tracks: &[DeviceTrack],
        epsilon_m: f64,
        origin: &GeoPoint,
    ) -> Option<Cluster> {
        let active: Vec<DeviceTrack> = tracks
            .iter()
            .filter(|t| t.status == TrackStatus::Active)
            .cloned()
            .collect();

        Self::cluster(&active, epsilon_m).into_iter().min_by(|a, b| {
            haversine_m(&a.centroid, origin).total_cmp(&haversine_m(&b.centroid, origin))
        })
    }
}

fn build_cluster<'a>(
    index: usize,
    members: impl Iterator<Item = &'a DeviceTrack> + Clone,
) -> Option<Cluster> {
    let points: Vec<GeoPoint> = members.clone().map(|t| t.representative_location).collect();
    Some(Cluster {
        index,
        track_ids: members.clone().map(|t| t.track_id).collect(),
        centroid: centroid(&points)?,
        bbox: BoundingBox::enclosing(&points)?,
        max_confidence: members.clone().map(|t| t.best_confidence).fold(0.0, f64::max),
        device_types: members.map(|t| t.device_type_guess).collect::<BTreeSet<_>>(),
    })
}
