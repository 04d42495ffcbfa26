//! Pipeline orchestration
//!
//! This module provides the public API for Minerscope.
//! `DetectionEngine` wires the stages together:
//! 1. SampleIngestor - Validate samples and buffer them per sensor kind
//! 2. FeatureExtractor - Summarize a window per sensor kind
//! 3. ConfidenceScorer - Fuse partial scores into a detection
//! 4. TrackRegistry - Deduplicate detections into device tracks
//! 5. DetectionStore - Commit detections and track snapshots
//!
//! Every operation takes `&self`, so one engine can be shared across ingest,
//! evaluation and query threads. Track queries report ACTIVE/STALE as of the
//! engine clock.

use crate::clock::Clock;
use crate::cluster::{CancellationToken, GeoClusterer};
use crate::config::EngineConfig;
use crate::dedup::TrackRegistry;
use crate::error::DetectError;
use crate::features::{FeatureExtractor, InsufficientData};
use crate::ingest::SampleIngestor;
use crate::schema::RawSample;
use crate::scoring::ConfidenceScorer;
use crate::staleness::{DecayedConfidence, StalenessPolicy};
use crate::store::{DetectionStore, StoreError};
use crate::types::{
    BoundingBox, Cluster, Detection, DeviceTrack, GeoPoint, Observation, SensorKind, StatusFilter,
};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Outcome of one window evaluation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Evaluation {
    pub detection: Detection,
    /// Track the detection was merged into; None when unlocated or below the
    /// tracking threshold
    pub track: Option<DeviceTrack>,
    /// Sensor kinds skipped for lack of samples
    pub skipped: Vec<InsufficientData>,
}

/// One rejected sample of a batch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestRejection {
    pub index: usize,
    pub sample_id: Option<String>,
    pub error: String,
}

/// Result of ingesting a batch
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IngestSummary {
    pub accepted: usize,
    pub rejected: usize,
    pub rejections: Vec<IngestRejection>,
}

/// A detection (and its track snapshot) the store has not yet acknowledged
#[derive(Debug, Clone)]
struct PendingCommit {
    detection: Detection,
    detection_stored: bool,
    track: Option<DeviceTrack>,
}

/// Stateful detection engine
pub struct DetectionEngine {
    config: EngineConfig,
    ingestor: SampleIngestor,
    extractor: FeatureExtractor,
    scorer: ConfidenceScorer,
    registry: TrackRegistry,
    staleness: StalenessPolicy,
    store: Arc<dyn DetectionStore>,
    clock: Arc<dyn Clock>,
    pending: Mutex<VecDeque<PendingCommit>>,
    dropped_commits: AtomicUsize,
}

impl DetectionEngine {
    /// Create an engine; fails on an invalid configuration
    pub fn new(
        config: EngineConfig,
        store: Arc<dyn DetectionStore>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, DetectError> {
        config.validate()?;
        Ok(Self {
            ingestor: SampleIngestor::new(&config.ingest),
            extractor: FeatureExtractor::new(config.features.clone()),
            scorer: ConfidenceScorer::new(config.scoring.clone(), config.features.clone()),
            registry: TrackRegistry::new(config.tracking.clone()),
            staleness: StalenessPolicy::from_config(&config.tracking),
            store,
            clock,
            pending: Mutex::new(VecDeque::new()),
            dropped_commits: AtomicUsize::new(0),
            config,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Validate and buffer one raw sample
    pub fn ingest(&self, sample: RawSample) -> Result<Observation, DetectError> {
        Ok(self.ingestor.ingest(sample)?)
    }

    /// Ingest samples in order; rejected samples are counted and logged, never fatal
    pub fn ingest_batch(&self, samples: impl IntoIterator<Item = RawSample>) -> IngestSummary {
        let mut summary = IngestSummary::default();
        for (index, sample) in samples.into_iter().enumerate() {
            let sample_id = sample.sample_id.clone();
            match self.ingestor.ingest(sample) {
                Ok(_) => summary.accepted += 1,
                Err(err) => {
                    warn!(index, sample_id = ?sample_id, error = %err, "sample rejected");
                    summary.rejected += 1;
                    summary.rejections.push(IngestRejection {
                        index,
                        sample_id,
                        error: err.to_string(),
                    });
                }
            }
        }
        summary
    }

    /// Number of buffered observations of one sensor kind
    pub fn buffered(&self, kind: SensorKind) -> usize {
        self.ingestor.buffered(kind)
    }

    /// Evaluate the window ending at `window_end`
    ///
    /// Kinds without enough samples are skipped; the call fails with
    /// `InsufficientWindow` only when every kind is short. When the store
    /// rejects the commit, the in-memory track is already updated, the commit
    /// is queued for `retry_pending` and `StoreUnavailable` is returned.
    pub fn evaluate_window(&self, window_end: DateTime<Utc>) -> Result<Evaluation, DetectError> {
        let mut vectors = BTreeMap::new();
        let mut skipped = Vec::new();
        for kind in SensorKind::ALL {
            match self.extractor.extract(&self.ingestor, kind, window_end) {
                Ok(vector) => {
                    vectors.insert(kind, vector);
                }
                Err(shortfall) => skipped.push(shortfall),
            }
        }

        if vectors.is_empty() {
            debug!(%window_end, "no sensor kind has enough samples");
            return Err(DetectError::InsufficientWindow {
                window_end,
                shortfalls: skipped,
            });
        }

        let location = self.ingestor.latest_location(window_end);
        let detection = self.scorer.score(&vectors, location, window_end);
        debug!(
            detection_id = %detection.id,
            confidence = detection.confidence,
            guess = detection.device_type_guess.as_str(),
            sensors = vectors.len(),
            "window scored"
        );

        let track = if detection.confidence >= self.config.tracking.min_track_confidence {
            self.registry.merge(&detection)
        } else {
            None
        };

        let mut pending = PendingCommit {
            detection: detection.clone(),
            detection_stored: false,
            track: track.clone(),
        };
        if let Err(err) = self.commit(&mut pending) {
            warn!(
                detection_id = %detection.id,
                error = %err,
                "detection store unavailable, commit queued for retry"
            );
            self.enqueue(pending);
            return Err(err.into());
        }

        Ok(Evaluation {
            detection,
            track,
            skipped,
        })
    }

    /// Evaluate the window ending at the clock's current time
    pub fn evaluate_now(&self) -> Result<Evaluation, DetectError> {
        self.evaluate_window(self.clock.now())
    }

    /// Number of commits waiting for the store
    pub fn pending_commits(&self) -> usize {
        self.pending.lock().len()
    }

    /// Commits discarded because the retry queue was full
    pub fn dropped_commits(&self) -> usize {
        self.dropped_commits.load(Ordering::Relaxed)
    }

    /// Replay queued commits in order, stopping at the first failure
    ///
    /// Returns how many commits went through.
    pub fn retry_pending(&self) -> Result<usize, DetectError> {
        let mut committed = 0;
        loop {
            let Some(mut pending) = self.pending.lock().pop_front() else {
                break;
            };
            // Replay the freshest snapshot so an old one never supersedes a newer one
            if let Some(track) = &pending.track {
                if let Some(latest) = self.registry.get(track.track_id) {
                    pending.track = Some(latest);
                }
            }
            if let Err(err) = self.commit(&mut pending) {
                self.pending.lock().push_front(pending);
                warn!(committed, error = %err, "retry of pending commits stopped");
                return Err(err.into());
            }
            committed += 1;
        }
        if committed > 0 {
            info!(committed, "pending commits flushed");
        }
        Ok(committed)
    }

    /// Tracks inside `bbox` matching `filter`
    pub fn query_tracks(&self, bbox: &BoundingBox, filter: StatusFilter) -> Vec<DeviceTrack> {
        self.refresh_statuses();
        self.registry.query(bbox, filter)
    }

    /// Every track, in creation order
    pub fn tracks(&self) -> Vec<DeviceTrack> {
        self.refresh_statuses();
        self.registry.tracks()
    }

    /// Tracks with their freshness-decayed confidence, freshest-strongest first
    pub fn ranked_tracks(&self) -> Vec<(DeviceTrack, DecayedConfidence)> {
        let now = self.clock.now();
        self.registry.refresh_statuses(now, &self.staleness);
        let mut ranked: Vec<_> = self
            .registry
            .tracks()
            .into_iter()
            .map(|t| {
                let decayed = self.staleness.decayed(&t, now);
                (t, decayed)
            })
            .collect();
        ranked.sort_by(|a, b| b.1.decayed_confidence.total_cmp(&a.1.decayed_confidence));
        ranked
    }

    /// Mark tracks STALE against the clock; returns how many changed
    pub fn refresh_statuses(&self) -> usize {
        self.registry.refresh_statuses(self.clock.now(), &self.staleness)
    }

    pub fn clusters(&self) -> Vec<Cluster> {
        GeoClusterer::cluster(&self.tracks(), self.config.cluster.epsilon_m)
    }

    pub fn clusters_with_cancel(&self, token: &CancellationToken) -> Result<Vec<Cluster>, DetectError> {
        GeoClusterer::cluster_with_cancel(&self.tracks(), self.config.cluster.epsilon_m, token)
    }

    /// Nearest cluster of tracks ACTIVE as of the clock to `origin`
    pub fn nearest_cluster(&self, origin: &GeoPoint) -> Option<Cluster> {
        GeoClusterer::nearest_cluster(&self.tracks(), self.config.cluster.epsilon_m, origin)
    }

    /// Stored detections inside `bbox`
    pub fn query_detections(&self, bbox: &BoundingBox) -> Result<Vec<Detection>, DetectError> {
        Ok(self.store.query_by_bbox(bbox)?)
    }

    /// Save track state to JSON
    pub fn save_tracks(&self) -> Result<String, DetectError> {
        Ok(self.registry.to_json()?)
    }

    /// Load track state from JSON, replacing the current tracks
    pub fn load_tracks(&self, json: &str) -> Result<usize, DetectError> {
        let count = self
            .registry
            .load_json(json)
            .map_err(|e| DetectError::ParseError(format!("track state: {e}")))?;
        info!(tracks = count, "track state loaded");
        Ok(count)
    }

    /// Queue a failed commit, keeping at most `store.pending_capacity`
    fn enqueue(&self, pending: PendingCommit) {
        let mut queue = self.pending.lock();
        // Retry sends the registry's latest snapshot, so one queued snapshot per track is enough
        if let Some(track) = &pending.track {
            for queued in queue.iter_mut() {
                if queued.track.as_ref().is_some_and(|t| t.track_id == track.track_id) {
                    queued.track = None;
                }
            }
        }
        queue.push_back(pending);

        while queue.len() > self.config.store.pending_capacity {
            let Some(dropped) = queue.pop_front() else {
                break;
            };
            let total = self.dropped_commits.fetch_add(1, Ordering::Relaxed) + 1;
            warn!(
                detection_id = %dropped.detection.id,
                dropped_total = total,
                capacity = self.config.store.pending_capacity,
                "pending commit queue full, oldest commit dropped"
            );
        }
    }

    fn commit(&self, pending: &mut PendingCommit) -> Result<(), StoreError> {
        if !pending.detection_stored {
            self.store.append_detection(&pending.detection)?;
            pending.detection_stored = true;
        }
        if let Some(track) = &pending.track {
            self.store.append_track(track)?;
        }
        Ok(())
    }
}
