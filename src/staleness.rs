//! Track staleness and confidence decay
//!
//! A track is ACTIVE while its last detection is recent and STALE after an
//! inactivity timeout. For display and routing, the best confidence of a track
//! also decays exponentially with its age, so an old certain sighting ranks
//! below a fresh likely one.

use crate::config::TrackingConfig;
use crate::types::{DeviceTrack, TrackStatus};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Staleness timeout and decay half-life
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StalenessPolicy {
    pub stale_after: Duration,
    pub half_life_secs: f64,
}

impl Default for StalenessPolicy {
    fn default() -> Self {
        Self::from_config(&TrackingConfig::default())
    }
}

impl StalenessPolicy {
    pub fn from_config(config: &TrackingConfig) -> Self {
        Self {
            stale_after: Duration::seconds(config.stale_after_secs),
            half_life_secs: config.decay_half_life_secs,
        }
    }

    /// Status of a track whose last detection was at `last_seen_at`, as of `at`
    pub fn status_at(&self, last_seen_at: DateTime<Utc>, at: DateTime<Utc>) -> TrackStatus {
        if at - last_seen_at > self.stale_after {
            TrackStatus::Stale
        } else {
            TrackStatus::Active
        }
    }

    /// Freshness-decayed view of a track as of `now`
    pub fn decayed(&self, track: &DeviceTrack, now: DateTime<Utc>) -> DecayedConfidence {
        // Detections stamped in the future count as brand new
        let age_seconds = (now - track.last_seen_at).num_seconds().max(0);
        let decay_factor = 0.5_f64.powf(age_seconds as f64 / self.half_life_secs);

        DecayedConfidence {
            base_confidence: track.best_confidence,
            decayed_confidence: (track.best_confidence * decay_factor).clamp(0.0, 1.0),
            age_seconds,
            status: self.status_at(track.last_seen_at, now),
        }
    }
}

/// Track confidence with staleness decay applied
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DecayedConfidence {
    pub base_confidence: f64,
    pub decayed_confidence: f64,
    pub age_seconds: i64,
    pub status: TrackStatus,
}

impl DecayedConfidence {
    /// Fraction of the base confidence still standing (1.0 = fresh)
    pub fn freshness(&self) -> f64 {
        if self.base_confidence > 0.0 {
            (self.decayed_confidence / self.base_confidence).clamp(0.0, 1.0)
        } else {
            0.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{CentroidSum, DeviceTypeGuess, GeoPoint};
    use chrono::TimeZone;
    use std::collections::BTreeSet;
    use uuid::Uuid;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 5, 12, 0, 0).unwrap()
    }

    fn track(confidence: f64, last_seen_at: DateTime<Utc>) -> DeviceTrack {
        DeviceTrack {
            track_id: Uuid::new_v4(),
            representative_location: GeoPoint::new(35.6892, 51.3890),
            best_confidence: confidence,
            device_type_guess: DeviceTypeGuess::AsicBitcoin,
            first_seen_at: last_seen_at,
            last_seen_at,
            status: TrackStatus::Active,
            member_detection_ids: vec![Uuid::new_v4()],
            sensors: BTreeSet::new(),
            centroid_sum: CentroidSum::default(),
            member_points: Vec::new(),
        }
    }

    #[test]
    fn test_status_boundary() {
        let policy = StalenessPolicy::default();
        assert_eq!(policy.status_at(t0(), t0() + Duration::seconds(900)), TrackStatus::Active);
        assert_eq!(policy.status_at(t0(), t0() + Duration::seconds(901)), TrackStatus::Stale);
    }

    #[test]
    fn test_half_life_decay() {
        let policy = StalenessPolicy {
            stale_after: Duration::seconds(900),
            half_life_secs: 3600.0,
        };
        let decayed = policy.decayed(&track(0.8, t0()), t0() + Duration::hours(1));

        assert!((decayed.decayed_confidence - 0.4).abs() < 1e-9);
        assert!((decayed.freshness() - 0.5).abs() < 1e-9);
        assert_eq!(decayed.age_seconds, 3600);
        assert_eq!(decayed.status, TrackStatus::Stale);
    }

    #[test]
    fn test_future_detection_counts_as_fresh() {
        let policy = StalenessPolicy::default();
        let decayed = policy.decayed(&track(0.9, t0() + Duration::seconds(10)), t0());
        assert_eq!(decayed.age_seconds, 0);
        assert_eq!(decayed.decayed_confidence, 0.9);
    }
}
