//! Minerscope - Detection and correlation engine for cryptocurrency mining devices
//!
//! Minerscope turns field sensor samples (RF, magnetometer, thermal camera and
//! network metadata) into scored detections and deduplicated device tracks
//! through an explicit pipeline: ingestion → per-kind feature extraction →
//! confidence scoring → track deduplication → proximity clustering.
//!
//! ## Example
//!
//! ```ignore
//! let engine = DetectionEngine::new(
//!     EngineConfig::default(),
//!     Arc::new(MemoryStore::new()),
//!     Arc::new(SystemClock),
//! )?;
//! engine.ingest(RawSample::rf(ts, 2.4e9, -30.0).at(GeoPoint::new(35.6892, 51.3890)))?;
//! let evaluation = engine.evaluate_now()?;
//! ```

pub mod baseline;
pub mod clock;
pub mod cluster;
pub mod config;
pub mod dedup;
pub mod encoder;
pub mod error;
pub mod features;
pub mod geo;
pub mod ingest;
pub mod pipeline;
pub mod schema;
pub mod scoring;
pub mod staleness;
pub mod store;
pub mod types;

pub use clock::{Clock, ManualClock, ReplaySchedule, SystemClock};
pub use cluster::{CancellationToken, GeoClusterer};
pub use config::EngineConfig;
pub use dedup::{DetectionDeduplicator, TrackRegistry};
pub use encoder::{ReportEncoder, ScanReport};
pub use error::DetectError;
pub use features::{FeatureExtractor, InsufficientData};
pub use ingest::SampleIngestor;
pub use pipeline::{DetectionEngine, Evaluation, IngestSummary};
pub use scoring::ConfidenceScorer;
pub use staleness::StalenessPolicy;
pub use store::{DetectionStore, MemoryStore, NdjsonLogStore, StoreError};
pub use types::*;

// Schema exports
pub use schema::{RawSample, RawSampleAdapter, ValidationError, SCHEMA_VERSION};

/// Engine version embedded in every report
pub const ENGINE_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Producer name for reports
pub const PRODUCER_NAME: &str = "minerscope";
