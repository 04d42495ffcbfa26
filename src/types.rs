//! Core types for the Minerscope pipeline
//!
//! This module defines the data structures that flow through each stage of the
//! pipeline: observations, feature vectors, detections, tracks and clusters.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use uuid::Uuid;

/// Sensor kind an observation originates from
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SensorKind {
    Rf,
    Magnetic,
    Thermal,
    Network,
}

impl SensorKind {
    /// All sensor kinds, in declaration order
    pub const ALL: [SensorKind; 4] = [
        SensorKind::Rf,
        SensorKind::Magnetic,
        SensorKind::Thermal,
        SensorKind::Network,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SensorKind::Rf => "rf",
            SensorKind::Magnetic => "magnetic",
            SensorKind::Thermal => "thermal",
            SensorKind::Network => "network",
        }
    }

    /// Rank used to break ties between equal partial scores (higher wins).
    ///
    /// Network signatures are the most specific evidence, magnetic the least.
    pub fn tie_break_rank(&self) -> u8 {
        match self {
            SensorKind::Network => 3,
            SensorKind::Rf => 2,
            SensorKind::Thermal => 1,
            SensorKind::Magnetic => 0,
        }
    }
}

impl fmt::Display for SensorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Best guess at the class of mining hardware behind a detection
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceTypeGuess {
    AsicBitcoin,
    GpuRig,
    Unknown,
}

impl DeviceTypeGuess {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceTypeGuess::AsicBitcoin => "asic_bitcoin",
            DeviceTypeGuess::GpuRig => "gpu_rig",
            DeviceTypeGuess::Unknown => "unknown",
        }
    }
}

/// A WGS84 position with horizontal accuracy
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    /// Latitude in degrees
    pub lat: f64,
    /// Longitude in degrees
    pub lng: f64,
    /// Horizontal accuracy radius (meters)
    #[serde(default)]
    pub accuracy_m: f64,
}

impl GeoPoint {
    pub fn new(lat: f64, lng: f64) -> Self {
        Self {
            lat,
            lng,
            accuracy_m: 0.0,
        }
    }

    pub fn with_accuracy(mut self, accuracy_m: f64) -> Self {
        self.accuracy_m = accuracy_m;
        self
    }
}

/// Axis-aligned latitude/longitude bounding box
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min_lat: f64,
    pub min_lng: f64,
    pub max_lat: f64,
    pub max_lng: f64,
}

impl BoundingBox {
    pub fn new(min_lat: f64, min_lng: f64, max_lat: f64, max_lng: f64) -> Self {
        Self {
            min_lat,
            min_lng,
            max_lat,
            max_lng,
        }
    }

    /// Box covering the whole globe
    pub fn world() -> Self {
        Self::new(-90.0, -180.0, 90.0, 180.0)
    }

    /// Inclusive containment test
    pub fn contains(&self, point: &GeoPoint) -> bool {
        point.lat >= self.min_lat
            && point.lat <= self.max_lat
            && point.lng >= self.min_lng
            && point.lng <= self.max_lng
    }

    /// Smallest box covering every point, or None for an empty iterator
    pub fn enclosing<'a>(points: impl IntoIterator<Item = &'a GeoPoint>) -> Option<Self> {
        let mut iter = points.into_iter();
        let first = iter.next()?;
        let mut bbox = Self::new(first.lat, first.lng, first.lat, first.lng);
        for p in iter {
            bbox.min_lat = bbox.min_lat.min(p.lat);
            bbox.min_lng = bbox.min_lng.min(p.lng);
            bbox.max_lat = bbox.max_lat.max(p.lat);
            bbox.max_lng = bbox.max_lng.max(p.lng);
        }
        Some(bbox)
    }
}

/// RF spectrum reading
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RfReading {
    pub frequency_hz: f64,
    pub power_dbm: f64,
}

/// Three-axis magnetometer reading (microtesla)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MagneticReading {
    pub x_ut: f64,
    pub y_ut: f64,
    pub z_ut: f64,
}

impl MagneticReading {
    /// Total field magnitude (microtesla)
    pub fn magnitude(&self) -> f64 {
        (self.x_ut * self.x_ut + self.y_ut * self.y_ut + self.z_ut * self.z_ut).sqrt()
    }
}

/// Row-major thermal frame in degrees Celsius
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThermalFrame {
    pub width: usize,
    pub height: usize,
    pub pixels_c: Vec<f64>,
}

/// Thermal camera reading
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThermalReading {
    pub max_temp_c: f64,
    /// Hotspot count reported by the camera firmware
    pub hotspot_count: u32,
    /// Full frame, when the driver forwards one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frame: Option<ThermalFrame>,
}

/// Network flow summary for one remote endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkReading {
    pub remote_ip: String,
    pub ports: BTreeSet<u16>,
    pub bytes_per_sec: f64,
    /// Application protocol hint from the flow monitor (e.g. "stratum+tcp")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protocol: Option<String>,
}

/// Sensor-specific observation payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObservationPayload {
    Rf(RfReading),
    Magnetic(MagneticReading),
    Thermal(ThermalReading),
    Network(NetworkReading),
}

impl ObservationPayload {
    pub fn kind(&self) -> SensorKind {
        match self {
            ObservationPayload::Rf(_) => SensorKind::Rf,
            ObservationPayload::Magnetic(_) => SensorKind::Magnetic,
            ObservationPayload::Thermal(_) => SensorKind::Thermal,
            ObservationPayload::Network(_) => SensorKind::Network,
        }
    }
}

/// One validated, normalized sensor reading
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub sensor_kind: SensorKind,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<GeoPoint>,
    pub payload: ObservationPayload,
}

/// Per-kind feature summary of one window
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SensorFeatures {
    Rf {
        dominant_frequency_hz: f64,
        peak_power_dbm: f64,
        mean_power_dbm: f64,
    },
    Magnetic {
        mean_magnitude_ut: f64,
        baseline_ut: f64,
        mean_delta_ut: f64,
        peak_delta_ut: f64,
    },
    Thermal {
        peak_temp_c: f64,
        mean_max_temp_c: f64,
        hotspot_regions: u32,
    },
    Network {
        ports: BTreeSet<u16>,
        miner_ports: BTreeSet<u16>,
        distinct_remotes: usize,
        mean_bytes_per_sec: f64,
        stratum_seen: bool,
    },
}

/// Derived summary of one sensor kind over one window
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureVector {
    pub sensor_kind: SensorKind,
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    pub sample_count: usize,
    pub features: SensorFeatures,
}

/// Scored evaluation of one window
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub id: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<GeoPoint>,
    pub confidence: f64,
    pub device_type_guess: DeviceTypeGuess,
    pub contributing_sensors: BTreeSet<SensorKind>,
    /// Partial score of each contributing sensor kind
    #[serde(default)]
    pub partial_scores: BTreeMap<SensorKind, f64>,
    pub created_at: DateTime<Utc>,
}

/// Activity state of a track
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackStatus {
    Active,
    Stale,
}

/// Status filter for track queries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusFilter {
    #[default]
    Any,
    Active,
    Stale,
}

impl StatusFilter {
    pub fn matches(&self, status: TrackStatus) -> bool {
        match self {
            StatusFilter::Any => true,
            StatusFilter::Active => status == TrackStatus::Active,
            StatusFilter::Stale => status == TrackStatus::Stale,
        }
    }
}

/// Running coordinate sums behind a track's centroid
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct CentroidSum {
    pub lat_sum: f64,
    pub lng_sum: f64,
    pub count: usize,
}

impl CentroidSum {
    pub fn add(&mut self, point: &GeoPoint) {
        self.lat_sum += point.lat;
        self.lng_sum += point.lng;
        self.count += 1;
    }

    pub fn centroid(&self) -> Option<GeoPoint> {
        if self.count == 0 {
            return None;
        }
        let n = self.count as f64;
        Some(GeoPoint::new(self.lat_sum / n, self.lng_sum / n))
    }
}

/// Where and when one member detection of a track was seen
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MemberPoint {
    pub location: GeoPoint,
    pub seen_at: DateTime<Utc>,
}

/// A deduplicated device believed seen across one or more detections
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceTrack {
    pub track_id: Uuid,
    pub representative_location: GeoPoint,
    pub best_confidence: f64,
    /// Guess carried by the highest-confidence member
    pub device_type_guess: DeviceTypeGuess,
    pub first_seen_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
    pub status: TrackStatus,
    pub member_detection_ids: Vec<Uuid>,
    /// Union of sensor kinds across all members
    pub sensors: BTreeSet<SensorKind>,
    pub centroid_sum: CentroidSum,
    /// Member positions, parallel to `member_detection_ids`
    #[serde(default)]
    pub member_points: Vec<MemberPoint>,
}

/// Proximity grouping of tracks for map display and routing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cluster {
    /// Position of the cluster in the clustering output
    pub index: usize,
    /// Member track ids, in input order
    pub track_ids: Vec<Uuid>,
    pub centroid: GeoPoint,
    pub bbox: BoundingBox,
    pub max_confidence: f64,
    pub device_types: BTreeSet<DeviceTypeGuess>,
}
