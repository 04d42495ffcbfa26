//! Engine configuration
//!
//! Every threshold, window and lookup table the pipeline uses lives here.
//! All structs carry defaults and accept partial JSON.

use crate::error::DetectError;
use crate::types::DeviceTypeGuess;
use serde::{Deserialize, Serialize};

/// Default ring buffer capacity: the 60 s evaluation window plus the 300 s
/// magnetic baseline at 10 Hz
pub const DEFAULT_RING_CAPACITY: usize = 3_600;

/// Default bound on commits queued while the store is down
pub const DEFAULT_PENDING_CAPACITY: usize = 10_000;

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub ingest: IngestConfig,
    pub features: FeatureConfig,
    pub scoring: ScoringConfig,
    pub tracking: TrackingConfig,
    pub cluster: ClusterConfig,
    pub store: StoreConfig,
}

impl EngineConfig {
    /// Load configuration from JSON
    pub fn from_json(json: &str) -> Result<Self, DetectError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize configuration to JSON
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Reject values the pipeline cannot work with
    pub fn validate(&self) -> Result<(), DetectError> {
        let invalid = |msg: &str| Err(DetectError::InvalidConfig(msg.to_string()));

        if self.ingest.ring_capacity == 0 {
            return invalid("ingest.ring_capacity must be positive");
        }
        if !(self.ingest.expected_rate_hz >= 0.0) {
            return invalid("ingest.expected_rate_hz must be non-negative");
        }
        if self.features.window_secs <= 0 {
            return invalid("features.window_secs must be positive");
        }
        if self.features.magnetic_baseline_secs <= 0 {
            return invalid("features.magnetic_baseline_secs must be positive");
        }
        if self.features.min_samples == 0 {
            return invalid("features.min_samples must be at least 1");
        }
        if !(self.features.rf_bin_width_hz > 0.0) {
            return invalid("features.rf_bin_width_hz must be positive");
        }
        if self.scoring.rf_power_full_dbm <= self.scoring.rf_power_floor_dbm {
            return invalid("scoring.rf_power_full_dbm must exceed rf_power_floor_dbm");
        }
        if self.scoring.magnetic_delta_full_ut <= self.scoring.magnetic_delta_floor_ut {
            return invalid("scoring.magnetic_delta_full_ut must exceed magnetic_delta_floor_ut");
        }
        if self.scoring.thermal_full_c <= self.scoring.thermal_floor_c {
            return invalid("scoring.thermal_full_c must exceed thermal_floor_c");
        }
        if !(self.tracking.radius_m > 0.0) {
            return invalid("tracking.radius_m must be positive");
        }
        if self.tracking.max_gap_secs < 0 || self.tracking.stale_after_secs <= 0 {
            return invalid("tracking gap and stale timeout must be non-negative and positive");
        }
        if !(self.tracking.decay_half_life_secs > 0.0) {
            return invalid("tracking.decay_half_life_secs must be positive");
        }
        if !(self.cluster.epsilon_m >= 0.0) {
            return invalid("cluster.epsilon_m must be non-negative");
        }
        if self.store.pending_capacity == 0 {
            return invalid("store.pending_capacity must be positive");
        }

        // Features read the window plus the magnetic baseline before it
        let span_secs = self.features.window_secs + self.features.magnetic_baseline_secs;
        let needed = (self.ingest.expected_rate_hz * span_secs as f64).ceil();
        if (self.ingest.ring_capacity as f64) < needed {
            return Err(DetectError::InvalidConfig(format!(
                "ingest.ring_capacity {} holds less than {span_secs} s at {} Hz ({needed} samples)",
                self.ingest.ring_capacity, self.ingest.expected_rate_hz
            )));
        }
        Ok(())
    }
}

/// Ingestion settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    /// Observations retained per sensor kind
    pub ring_capacity: usize,
    /// Sample rate per sensor kind the ring must cover (Hz); 0 skips the check
    pub expected_rate_hz: f64,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            ring_capacity: DEFAULT_RING_CAPACITY,
            expected_rate_hz: 10.0,
        }
    }
}

/// Feature extraction settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureConfig {
    /// Evaluation window length (seconds)
    pub window_secs: i64,
    /// Minimum samples a window needs before features are computed
    pub min_samples: usize,
    /// RF spectral bin width (Hz); bins are centered on its multiples, so an
    /// emitter stays in one bin while within half a width of such a multiple
    pub rf_bin_width_hz: f64,
    /// Trailing window for the magnetic baseline median (seconds)
    pub magnetic_baseline_secs: i64,
    /// Pixel temperature above which a thermal region counts as a hotspot (°C)
    pub hotspot_threshold_c: f64,
    /// Destination ports associated with mining pools
    pub miner_ports: Vec<MinerPort>,
}

impl Default for FeatureConfig {
    fn default() -> Self {
        Self {
            window_secs: 60,
            min_samples: 3,
            rf_bin_width_hz: 20e6,
            magnetic_baseline_secs: 300,
            hotspot_threshold_c: 55.0,
            miner_ports: default_miner_ports(),
        }
    }
}

impl FeatureConfig {
    pub fn is_miner_port(&self, port: u16) -> bool {
        self.miner_ports.iter().any(|p| p.port == port)
    }

    pub fn miner_port(&self, port: u16) -> Option<&MinerPort> {
        self.miner_ports.iter().find(|p| p.port == port)
    }
}

/// A pool port and the hardware class it usually serves
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MinerPort {
    pub port: u16,
    pub device_type: DeviceTypeGuess,
}

fn default_miner_ports() -> Vec<MinerPort> {
    let entry = |port, device_type| MinerPort { port, device_type };
    vec![
        // Stratum ports of the large SHA-256 pools
        entry(3333, DeviceTypeGuess::AsicBitcoin),
        entry(3334, DeviceTypeGuess::AsicBitcoin),
        entry(25, DeviceTypeGuess::AsicBitcoin),
        entry(700, DeviceTypeGuess::AsicBitcoin),
        // Ethash/etchash pools served mostly GPU rigs
        entry(4444, DeviceTypeGuess::GpuRig),
        entry(5555, DeviceTypeGuess::GpuRig),
        entry(14444, DeviceTypeGuess::GpuRig),
        entry(8008, DeviceTypeGuess::GpuRig),
        entry(9999, DeviceTypeGuess::Unknown),
    ]
}

/// Known emitter frequency in the RF table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnownEmitter {
    pub frequency_hz: f64,
    /// Strength of the association with mining hardware (0-1)
    pub weight: f64,
    pub device_type: DeviceTypeGuess,
}

/// Partial-score rules and their thresholds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    pub known_emitters: Vec<KnownEmitter>,
    /// Maximum distance between dominant and table frequency (Hz)
    pub rf_tolerance_hz: f64,
    /// Power at which the RF power factor starts rising (dBm)
    pub rf_power_floor_dbm: f64,
    /// Power at which the RF power factor saturates (dBm)
    pub rf_power_full_dbm: f64,
    pub magnetic_delta_floor_ut: f64,
    pub magnetic_delta_full_ut: f64,
    pub thermal_floor_c: f64,
    pub thermal_full_c: f64,
    /// Hotspot regions at or above which thermal evidence suggests a GPU rig
    pub gpu_hotspot_min: u32,
    /// Sustained byte rate for full network confidence (bytes/s)
    pub network_rate_threshold: f64,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            known_emitters: vec![
                // Wi-Fi control boards on ASIC hash units
                KnownEmitter {
                    frequency_hz: 2.4e9,
                    weight: 1.0,
                    device_type: DeviceTypeGuess::AsicBitcoin,
                },
                // PSU switching harmonics observed near rig farms
                KnownEmitter {
                    frequency_hz: 1.8e9,
                    weight: 0.6,
                    device_type: DeviceTypeGuess::GpuRig,
                },
            ],
            rf_tolerance_hz: 15e6,
            rf_power_floor_dbm: -90.0,
            rf_power_full_dbm: -40.0,
            magnetic_delta_floor_ut: 5.0,
            magnetic_delta_full_ut: 50.0,
            thermal_floor_c: 45.0,
            thermal_full_c: 85.0,
            gpu_hotspot_min: 4,
            network_rate_threshold: 1_000.0,
        }
    }
}

/// Deduplication and staleness settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackingConfig {
    /// Spatial merge radius R (meters)
    pub radius_m: f64,
    /// Temporal merge gap G (seconds)
    pub max_gap_secs: i64,
    /// Inactivity after which a track is stale (seconds)
    pub stale_after_secs: i64,
    /// Half-life of the freshness-decayed confidence (seconds)
    pub decay_half_life_secs: f64,
    /// Detections below this confidence are stored but not tracked
    pub min_track_confidence: f64,
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            radius_m: 100.0,
            max_gap_secs: 300,
            stale_after_secs: 900,
            decay_half_life_secs: 3_600.0,
            min_track_confidence: 0.25,
        }
    }
}

/// Clustering settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterConfig {
    /// Link distance between tracks (meters)
    pub epsilon_m: f64,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self { epsilon_m: 250.0 }
    }
}

/// Persistence settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Commits kept for retry while the store is down; the oldest go first
    pub pending_capacity: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            pending_capacity: DEFAULT_PENDING_CAPACITY,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_partial_json_uses_defaults() {
        let config = EngineConfig::from_json(r#"{"tracking": {"radius_m": 50.0}}"#).unwrap();
        assert_eq!(config.tracking.radius_m, 50.0);
        assert_eq!(config.tracking.max_gap_secs, 300);
        assert_eq!(config.features, FeatureConfig::default());
    }

    #[test]
    fn test_config_roundtrip() {
        let config = EngineConfig::default();
        let json = config.to_json().unwrap();
        assert_eq!(EngineConfig::from_json(&json).unwrap(), config);
    }

    #[test]
    fn test_rejects_zero_window() {
        let result = EngineConfig::from_json(r#"{"features": {"window_secs": 0}}"#);
        assert!(matches!(result, Err(DetectError::InvalidConfig(_))));
    }

    #[test]
    fn test_rejects_inverted_power_ramp() {
        let mut config = EngineConfig::default();
        config.scoring.rf_power_full_dbm = -100.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_default_ring_covers_window_and_baseline() {
        let config = EngineConfig::default();
        let span = config.features.window_secs + config.features.magnetic_baseline_secs;
        assert!(config.ingest.ring_capacity as f64 >= config.ingest.expected_rate_hz * span as f64);
        assert!(config.validate().is_ok());

        let result = EngineConfig::from_json(r#"{"ingest": {"ring_capacity": 3000}}"#);
        assert!(matches!(result, Err(DetectError::InvalidConfig(_))));

        // Without a stated rate any positive capacity is accepted
        let config =
            EngineConfig::from_json(r#"{"ingest": {"ring_capacity": 3000, "expected_rate_hz": 0.0}}"#)
                .unwrap();
        assert_eq!(config.ingest.ring_capacity, 3000);
    }

    #[test]
    fn test_rejects_zero_pending_capacity() {
        let result = EngineConfig::from_json(r#"{"store": {"pending_capacity": 0}}"#);
        assert!(matches!(result, Err(DetectError::InvalidConfig(_))));
    }

    #[test]
    fn test_miner_port_lookup() {
        let features = FeatureConfig::default();
        assert!(features.is_miner_port(3333));
        assert!(!features.is_miner_port(443));
        assert_eq!(
            features.miner_port(4444).map(|p| p.device_type),
            Some(DeviceTypeGuess::GpuRig)
        );
    }
}
