//! Detection deduplication into device tracks
//!
//! Detections of the same device, seen repeatedly from slightly different
//! positions, collapse into one `DeviceTrack`. A detection attaches to the
//! nearest track that lies within the merge radius, was last seen within the
//! merge gap of the detection, and is still active at the detection time.
//! The detection must also chain to the track: at least one member lies within
//! the radius and the gap of it, so a centroid pulled between far-apart
//! members never attracts a detection none of them is close to.
//! Ties on distance go to the most recently seen track.
//!
//! Locking: every track sits behind its own mutex inside a registry-wide
//! read/write lock. Merges into existing tracks only take the read lock, so
//! merges into different tracks run concurrently. The write lock is taken
//! only to create a track, and the match is re-checked under it so two racing
//! detections of a new device still end up in one track.

use crate::config::TrackingConfig;
use crate::geo::haversine_m;
use crate::staleness::StalenessPolicy;
use crate::types::{
    BoundingBox, CentroidSum, Detection, DeviceTrack, GeoPoint, MemberPoint, StatusFilter,
    TrackStatus,
};
use chrono::{DateTime, Duration, Utc};
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

type TrackHandle = Arc<Mutex<DeviceTrack>>;

/// Registry of device tracks (the deduplicator)
pub struct TrackRegistry {
    config: TrackingConfig,
    // Creation order is preserved so clustering output is deterministic.
    tracks: RwLock<Vec<TrackHandle>>,
}

/// Alias matching the pipeline stage name
pub type DetectionDeduplicator = TrackRegistry;

impl Default for TrackRegistry {
    fn default() -> Self {
        Self::new(TrackingConfig::default())
    }
}

impl TrackRegistry {
    pub fn new(config: TrackingConfig) -> Self {
        Self {
            config,
            tracks: RwLock::new(Vec::new()),
        }
    }

    pub fn config(&self) -> &TrackingConfig {
        &self.config
    }

    pub fn len(&self) -> usize {
        self.tracks.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.read().is_empty()
    }

    /// Merge a detection into an existing track or start a new one
    ///
    /// Returns a snapshot of the affected track, or None when the detection
    /// has no location. Merging a detection already recorded on a track is a
    /// no-op that returns the current snapshot.
    pub fn merge(&self, detection: &Detection) -> Option<DeviceTrack> {
        let location = detection.location?;

        {
            let tracks = self.tracks.read();
            if let Some(handle) = self.find_match(&tracks, &location, detection.created_at) {
                let mut track = handle.lock();
                // The track may have moved between the scan and taking its lock
                if self.is_eligible(&track, &location, detection.created_at) {
                    return Some(self.apply(&mut track, detection, &location));
                }
            }
        }

        let mut tracks = self.tracks.write();
        if let Some(handle) = self.find_match(&tracks, &location, detection.created_at) {
            let mut track = handle.lock();
            return Some(self.apply(&mut track, detection, &location));
        }

        let track = new_track(detection, &location);
        info!(
            track_id = %track.track_id,
            lat = location.lat,
            lng = location.lng,
            confidence = track.best_confidence,
            "new device track"
        );
        tracks.push(Arc::new(Mutex::new(track.clone())));
        Some(track)
    }

    /// Snapshot of every track, in creation order
    pub fn tracks(&self) -> Vec<DeviceTrack> {
        self.tracks.read().iter().map(|h| h.lock().clone()).collect()
    }

    /// Snapshot of one track
    pub fn get(&self, track_id: Uuid) -> Option<DeviceTrack> {
        self.tracks.read().iter().find_map(|h| {
            let track = h.lock();
            (track.track_id == track_id).then(|| track.clone())
        })
    }

    /// Tracks whose representative location lies in `bbox` and whose status matches
    ///
    /// Status is as of the last `refresh_statuses` call.
    pub fn query(&self, bbox: &BoundingBox, filter: StatusFilter) -> Vec<DeviceTrack> {
        self.tracks
            .read()
            .iter()
            .filter_map(|h| {
                let track = h.lock();
                (bbox.contains(&track.representative_location) && filter.matches(track.status))
                    .then(|| track.clone())
            })
            .collect()
    }

    /// Mark tracks STALE whose last detection is older than the policy allows
    ///
    /// Returns the number of tracks that changed status.
    pub fn refresh_statuses(&self, now: DateTime<Utc>, policy: &StalenessPolicy) -> usize {
        let mut changed = 0;
        for handle in self.tracks.read().iter() {
            let mut track = handle.lock();
            let status = policy.status_at(track.last_seen_at, now);
            if status != track.status {
                debug!(track_id = %track.track_id, ?status, "track status changed");
                track.status = status;
                changed += 1;
            }
        }
        changed
    }

    /// Serialize all tracks as a JSON array
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(&self.tracks())
    }

    /// Replace the registry contents with tracks from a JSON array
    pub fn load_json(&self, json: &str) -> Result<usize, serde_json::Error> {
        let loaded: Vec<DeviceTrack> = serde_json::from_str(json)?;
        let count = loaded.len();
        *self.tracks.write() = loaded
            .into_iter()
            .map(|t| Arc::new(Mutex::new(t)))
            .collect();
        Ok(count)
    }

    fn find_match(
        &self,
        tracks: &[TrackHandle],
        location: &GeoPoint,
        at: DateTime<Utc>,
    ) -> Option<TrackHandle> {
        let mut best: Option<(f64, DateTime<Utc>, &TrackHandle)> = None;
        for handle in tracks {
            let track = handle.lock();
            if !self.is_eligible(&track, location, at) {
                continue;
            }
            let distance = haversine_m(&track.representative_location, location);
            let better = match &best {
                None => true,
                Some((d, seen, _)) => {
                    distance < *d || (distance == *d && track.last_seen_at > *seen)
                }
            };
            if better {
                best = Some((distance, track.last_seen_at, handle));
            }
        }
        best.map(|(_, _, handle)| Arc::clone(handle))
    }

    fn is_eligible(&self, track: &DeviceTrack, location: &GeoPoint, at: DateTime<Utc>) -> bool {
        let gap = (at - track.last_seen_at).abs();
        if gap > Duration::seconds(self.config.max_gap_secs) {
            return false;
        }
        if at - track.last_seen_at > Duration::seconds(self.config.stale_after_secs) {
            return false;
        }
        if haversine_m(&track.representative_location, location) > self.config.radius_m {
            return false;
        }
        // Tracks saved without member points only carry their centroid
        track.member_points.is_empty()
            || track.member_points.iter().any(|member| {
                (at - member.seen_at).abs() <= Duration::seconds(self.config.max_gap_secs)
                    && haversine_m(&member.location, location) <= self.config.radius_m
            })
    }

    fn apply(&self, track: &mut DeviceTrack, detection: &Detection, location: &GeoPoint) -> DeviceTrack {
        if track.member_detection_ids.contains(&detection.id) {
            return track.clone();
        }

        if track.status == TrackStatus::Stale {
            info!(track_id = %track.track_id, "device track reactivated");
        }

        track.centroid_sum.add(location);
        if let Some(centroid) = track.centroid_sum.centroid() {
            track.representative_location = centroid;
        }
        if detection.confidence > track.best_confidence {
            track.best_confidence = detection.confidence;
            track.device_type_guess = detection.device_type_guess;
        }
        track.member_detection_ids.push(detection.id);
        track.member_points.push(MemberPoint {
            location: *location,
            seen_at: detection.created_at,
        });
        track.sensors.extend(detection.contributing_sensors.iter().copied());
        track.first_seen_at = track.first_seen_at.min(detection.created_at);
        track.last_seen_at = track.last_seen_at.max(detection.created_at);
        track.status = TrackStatus::Active;

        debug!(
            track_id = %track.track_id,
            members = track.member_detection_ids.len(),
            "detection merged into track"
        );
        track.clone()
    }
}

fn new_track(detection: &Detection, location: &GeoPoint) -> DeviceTrack {
    let mut centroid_sum = CentroidSum::default();
    centroid_sum.add(location);
    DeviceTrack {
        track_id: Uuid::new_v4(),
        representative_location: centroid_sum.centroid().unwrap_or(*location),
        best_confidence: detection.confidence,
        device_type_guess: detection.device_type_guess,
        first_seen_at: detection.created_at,
        last_seen_at: detection.created_at,
        status: TrackStatus::Active,
        member_detection_ids: vec![detection.id],
        sensors: detection.contributing_sensors.clone(),
        centroid_sum,
        member_points: vec![MemberPoint {
            location: *location,
            seen_at: detection.created_at,
        }],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{DeviceTypeGuess, SensorKind};
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;
    use std::collections::{BTreeMap, BTreeSet};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 5, 12, 0, 0).unwrap()
    }

    fn detection(lat: f64, lng: f64, secs: i64, confidence: f64) -> Detection {
        Detection {
            id: Uuid::new_v4(),
            location: Some(GeoPoint::new(lat, lng)),
            confidence,
            device_type_guess: DeviceTypeGuess::AsicBitcoin,
            contributing_sensors: BTreeSet::from([SensorKind::Rf]),
            partial_scores: BTreeMap::from([(SensorKind::Rf, confidence)]),
            created_at: t0() + Duration::seconds(secs),
        }
    }

    #[test]
    fn test_nearby_detections_merge() {
        let registry = TrackRegistry::default();
        let first = registry.merge(&detection(35.6892, 51.3890, 0, 0.7)).unwrap();
        let second = registry.merge(&detection(35.6893, 51.3891, 30, 0.9)).unwrap();

        assert_eq!(first.track_id, second.track_id);
        assert_eq!(second.member_detection_ids.len(), 2);
        assert_eq!(second.best_confidence, 0.9);
        assert_eq!(second.first_seen_at, t0());
        assert_eq!(second.last_seen_at, t0() + Duration::seconds(30));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_far_detection_starts_new_track() {
        let registry = TrackRegistry::default();
        registry.merge(&detection(35.6892, 51.3890, 0, 0.7));
        // ~1.1 km north
        registry.merge(&detection(35.6992, 51.3890, 10, 0.7));
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_gap_exceeded_starts_new_track() {
        let registry = TrackRegistry::default();
        registry.merge(&detection(35.6892, 51.3890, 0, 0.7));
        registry.merge(&detection(35.6892, 51.3890, 301, 0.7));
        assert_eq!(registry.len(), 2);

        // Exactly at the gap still merges
        let registry = TrackRegistry::default();
        registry.merge(&detection(35.6892, 51.3890, 0, 0.7));
        registry.merge(&detection(35.6892, 51.3890, 300, 0.7));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_detection_must_chain_to_a_member() {
        let registry = TrackRegistry::default();
        // B ~90 m east of A; their centroid sits ~45 m from each
        let a = registry.merge(&detection(35.6892, 51.3890, 0, 0.7)).unwrap();
        registry.merge(&detection(35.6892, 51.3900, 10, 0.7));
        assert_eq!(registry.len(), 1);

        // ~95 m north of the centroid but ~105 m from both members
        let c = registry.merge(&detection(35.69005, 51.3895, 20, 0.7)).unwrap();
        assert_ne!(c.track_id, a.track_id);
        assert_eq!(registry.get(a.track_id).unwrap().member_detection_ids.len(), 2);

        // ~45 m north of the centroid, within reach of both members
        let d = registry.merge(&detection(35.6896, 51.3895, 30, 0.7)).unwrap();
        assert_eq!(d.track_id, a.track_id);
        assert_eq!(d.member_points.len(), 3);
    }

    #[test]
    fn test_unlocated_detection_is_not_tracked() {
        let registry = TrackRegistry::default();
        let mut d = detection(0.0, 0.0, 0, 0.9);
        d.location = None;
        assert!(registry.merge(&d).is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_centroid_is_order_independent() {
        let points = [
            (35.68920, 51.38900),
            (35.68940, 51.38930),
            (35.68910, 51.38880),
            (35.68935, 51.38915),
        ];

        let forward = TrackRegistry::default();
        for (i, (lat, lng)) in points.iter().enumerate() {
            forward.merge(&detection(*lat, *lng, i as i64 * 10, 0.6));
        }
        let backward = TrackRegistry::default();
        for (i, (lat, lng)) in points.iter().rev().enumerate() {
            backward.merge(&detection(*lat, *lng, i as i64 * 10, 0.6));
        }

        let a = forward.tracks()[0].representative_location;
        let b = backward.tracks()[0].representative_location;
        let mean_lat = points.iter().map(|p| p.0).sum::<f64>() / 4.0;
        let mean_lng = points.iter().map(|p| p.1).sum::<f64>() / 4.0;
        assert!((a.lat - b.lat).abs() < 1e-12 && (a.lng - b.lng).abs() < 1e-12);
        assert!((a.lat - mean_lat).abs() < 1e-12 && (a.lng - mean_lng).abs() < 1e-12);
    }

    #[test]
    fn test_nearest_track_wins() {
        let registry = TrackRegistry::new(TrackingConfig {
            radius_m: 200.0,
            ..TrackingConfig::default()
        });
        let west = registry.merge(&detection(35.6892, 51.3880, 0, 0.7)).unwrap();
        let east = registry.merge(&detection(35.6892, 51.3910, 0, 0.7)).unwrap();
        assert_ne!(west.track_id, east.track_id);

        // Closer to the eastern track, inside the radius of both
        let merged = registry.merge(&detection(35.6892, 51.3898, 20, 0.7)).unwrap();
        assert_eq!(merged.track_id, east.track_id);
    }

    #[test]
    fn test_duplicate_detection_is_idempotent() {
        let registry = TrackRegistry::default();
        let d = detection(35.6892, 51.3890, 0, 0.7);
        registry.merge(&d);
        let again = registry.merge(&d).unwrap();
        assert_eq!(again.member_detection_ids, vec![d.id]);
    }

    #[test]
    fn test_stale_track_reactivates_on_merge() {
        let registry = TrackRegistry::default();
        registry.merge(&detection(35.6892, 51.3890, 0, 0.7));
        let policy = StalenessPolicy::default();

        assert_eq!(registry.refresh_statuses(t0() + Duration::seconds(1000), &policy), 1);
        assert_eq!(
            registry.query(&BoundingBox::world(), StatusFilter::Stale).len(),
            1
        );

        // A late-arriving detection stamped within the gap still attaches
        let track = registry.merge(&detection(35.6892, 51.3890, 120, 0.8)).unwrap();
        assert_eq!(track.status, TrackStatus::Active);
        assert_eq!(track.member_detection_ids.len(), 2);
    }

    #[test]
    fn test_json_round_trip_preserves_tracks() {
        let registry = TrackRegistry::default();
        registry.merge(&detection(35.6892, 51.3890, 0, 0.7));
        registry.merge(&detection(35.6893, 51.3891, 30, 0.9));
        registry.merge(&detection(32.6539, 51.6660, 40, 0.5));

        let json = registry.to_json().unwrap();
        let restored = TrackRegistry::default();
        assert_eq!(restored.load_json(&json).unwrap(), 2);
        assert_eq!(restored.tracks(), registry.tracks());
    }

    #[test]
    fn test_concurrent_merges_into_disjoint_and_shared_tracks() {
        let registry = TrackRegistry::default();
        std::thread::scope(|scope| {
            for worker in 0..4 {
                let registry = &registry;
                scope.spawn(move || {
                    // Each worker owns a site ~11 km apart; all hit the shared site too
                    let lat = 35.0 + worker as f64 * 0.1;
                    for i in 0..25 {
                        registry.merge(&detection(lat, 51.0, i, 0.6));
                        registry.merge(&detection(36.0, 52.0, i, 0.6));
                    }
                });
            }
        });

        let tracks = registry.tracks();
        assert_eq!(tracks.len(), 5);
        let shared = tracks
            .iter()
            .find(|t| (t.representative_location.lat - 36.0).abs() < 1e-9)
            .unwrap();
        assert_eq!(shared.member_detection_ids.len(), 100);
    }
}
