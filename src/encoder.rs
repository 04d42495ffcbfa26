//! Report encoding
//!
//! This module packages detections, tracks and clusters into a `ScanReport`
//! JSON document with producer metadata and a summary block.

use crate::error::DetectError;
use crate::pipeline::DetectionEngine;
use crate::staleness::DecayedConfidence;
use crate::types::{Cluster, Detection, DeviceTrack, DeviceTypeGuess, TrackStatus};
use crate::{ENGINE_VERSION, PRODUCER_NAME};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Current report schema version
pub const REPORT_VERSION: &str = "1.0.0";

/// Software that produced a report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportProducer {
    pub name: String,
    pub version: String,
    pub instance_id: String,
}

/// Headline counts of a report
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReportSummary {
    pub detections: usize,
    pub tracks: usize,
    pub active_tracks: usize,
    pub stale_tracks: usize,
    pub clusters: usize,
    /// Track count per device type guess
    pub tracks_by_device_type: BTreeMap<DeviceTypeGuess, usize>,
    /// Highest confidence of any detection or track, None when both are empty
    pub max_confidence: Option<f64>,
}

/// A track with its freshness-decayed confidence at report time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackReport {
    #[serde(flatten)]
    pub track: DeviceTrack,
    pub decayed_confidence: f64,
    pub age_seconds: i64,
}

/// Output document of a scan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanReport {
    pub report_version: String,
    pub producer: ReportProducer,
    pub generated_at_utc: String,
    pub summary: ReportSummary,
    pub detections: Vec<Detection>,
    pub tracks: Vec<TrackReport>,
    pub clusters: Vec<Cluster>,
}

/// Encoder for scan reports
pub struct ReportEncoder {
    instance_id: String,
}

impl Default for ReportEncoder {
    fn default() -> Self {
        Self::new()
    }
}

impl ReportEncoder {
    /// Create a new encoder with a unique instance ID
    pub fn new() -> Self {
        Self {
            instance_id: Uuid::new_v4().to_string(),
        }
    }

    /// Create an encoder with a specific instance ID
    pub fn with_instance_id(instance_id: String) -> Self {
        Self { instance_id }
    }

    /// Build a report from parts
    pub fn encode(
        &self,
        generated_at: DateTime<Utc>,
        detections: Vec<Detection>,
        tracks: Vec<(DeviceTrack, DecayedConfidence)>,
        clusters: Vec<Cluster>,
    ) -> ScanReport {
        let tracks: Vec<TrackReport> = tracks
            .into_iter()
            .map(|(track, decayed)| TrackReport {
                track,
                decayed_confidence: decayed.decayed_confidence,
                age_seconds: decayed.age_seconds,
            })
            .collect();

        ScanReport {
            report_version: REPORT_VERSION.to_string(),
            producer: ReportProducer {
                name: PRODUCER_NAME.to_string(),
                version: ENGINE_VERSION.to_string(),
                instance_id: self.instance_id.clone(),
            },
            generated_at_utc: generated_at.to_rfc3339(),
            summary: summarize(&detections, &tracks, clusters.len()),
            detections,
            tracks,
            clusters,
        }
    }

    /// Build a report of an engine's current state plus the given detections
    pub fn encode_engine(&self, engine: &DetectionEngine, detections: Vec<Detection>) -> ScanReport {
        self.encode(engine.now(), detections, engine.ranked_tracks(), engine.clusters())
    }

    /// Encode to JSON string
    pub fn to_json(&self, report: &ScanReport, pretty: bool) -> Result<String, DetectError> {
        let json = if pretty {
            serde_json::to_string_pretty(report)?
        } else {
            serde_json::to_string(report)?
        };
        Ok(json)
    }
}

fn summarize(detections: &[Detection], tracks: &[TrackReport], clusters: usize) -> ReportSummary {
    let mut summary = ReportSummary {
        detections: detections.len(),
        tracks: tracks.len(),
        clusters,
        ..Default::default()
    };

    for report in tracks {
        match report.track.status {
            TrackStatus::Active => summary.active_tracks += 1,
            TrackStatus::Stale => summary.stale_tracks += 1,
        }
        *summary
            .tracks_by_device_type
            .entry(report.track.device_type_guess)
            .or_insert(0) += 1;
    }

    summary.max_confidence = detections
        .iter()
        .map(|d| d.confidence)
        .chain(tracks.iter().map(|t| t.track.best_confidence))
        .reduce(f64::max);

    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{CentroidSum, GeoPoint, SensorKind};
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;
    use std::collections::BTreeSet;

    fn at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 5, 12, 0, 0).unwrap()
    }

    fn detection(confidence: f64) -> Detection {
        Detection {
            id: Uuid::new_v4(),
            location: Some(GeoPoint::new(35.6892, 51.3890)),
            confidence,
            device_type_guess: DeviceTypeGuess::AsicBitcoin,
            contributing_sensors: BTreeSet::from([SensorKind::Rf]),
            partial_scores: BTreeMap::from([(SensorKind::Rf, confidence)]),
            created_at: at(),
        }
    }

    fn track(guess: DeviceTypeGuess, status: TrackStatus, confidence: f64) -> (DeviceTrack, DecayedConfidence) {
        let track = DeviceTrack {
            track_id: Uuid::new_v4(),
            representative_location: GeoPoint::new(35.6892, 51.3890),
            best_confidence: confidence,
            device_type_guess: guess,
            first_seen_at: at(),
            last_seen_at: at(),
            status,
            member_detection_ids: vec![Uuid::new_v4()],
            sensors: BTreeSet::from([SensorKind::Rf]),
            centroid_sum: CentroidSum::default(),
            member_points: Vec::new(),
        };
        let decayed = DecayedConfidence {
            base_confidence: confidence,
            decayed_confidence: confidence / 2.0,
            age_seconds: 3600,
            status,
        };
        (track, decayed)
    }

    #[test]
    fn test_summary_counts() {
        let encoder = ReportEncoder::with_instance_id("scan-1".to_string());
        let report = encoder.encode(
            at(),
            vec![detection(0.6), detection(0.95)],
            vec![
                track(DeviceTypeGuess::AsicBitcoin, TrackStatus::Active, 0.9),
                track(DeviceTypeGuess::GpuRig, TrackStatus::Stale, 0.5),
                track(DeviceTypeGuess::AsicBitcoin, TrackStatus::Active, 0.7),
            ],
            Vec::new(),
        );

        assert_eq!(report.producer.instance_id, "scan-1");
        assert_eq!(report.producer.name, PRODUCER_NAME);
        assert_eq!(report.summary.detections, 2);
        assert_eq!(report.summary.active_tracks, 2);
        assert_eq!(report.summary.stale_tracks, 1);
        assert_eq!(
            report.summary.tracks_by_device_type,
            BTreeMap::from([(DeviceTypeGuess::AsicBitcoin, 2), (DeviceTypeGuess::GpuRig, 1)])
        );
        assert_eq!(report.summary.max_confidence, Some(0.95));
        assert_eq!(report.tracks[1].decayed_confidence, 0.25);
    }

    #[test]
    fn test_empty_report() {
        let report = ReportEncoder::new().encode(at(), Vec::new(), Vec::new(), Vec::new());
        assert_eq!(report.summary, ReportSummary::default());
        assert_eq!(report.report_version, REPORT_VERSION);
    }

    #[test]
    fn test_json_flattens_track_fields() {
        let encoder = ReportEncoder::new();
        let report = encoder.encode(
            at(),
            Vec::new(),
            vec![track(DeviceTypeGuess::GpuRig, TrackStatus::Active, 0.8)],
            Vec::new(),
        );
        let json = encoder.to_json(&report, false).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();

        let first = &value["tracks"][0];
        assert_eq!(first["device_type_guess"], "gpu_rig");
        assert_eq!(first["decayed_confidence"], 0.4);
        assert_eq!(value["summary"]["tracks_by_device_type"]["gpu_rig"], 1);
    }
}
