//! mine.raw_sample.v1 schema definition
//!
//! A driver-agnostic envelope for field sensor data:
//! - RF spectrum readings (SDR sweeps)
//! - Magnetometer readings
//! - Thermal camera frames
//! - Network flow summaries

use crate::types::{
    GeoPoint, MagneticReading, NetworkReading, ObservationPayload, RfReading, SensorKind,
    ThermalReading,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Current schema version
pub const SCHEMA_VERSION: &str = "mine.raw_sample.v1";

/// Capturing hardware
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SampleSource {
    /// Device model (e.g., "HackRF One", "FLIR Lepton 3.5")
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_model: Option<String>,
    /// Unique device identifier
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,
    /// Firmware/driver version
    #[serde(skip_serializing_if = "Option::is_none")]
    pub firmware_version: Option<String>,
}

/// Sample payload, one variant per sensor kind
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SamplePayload {
    Rf(RfReading),
    Magnetic(MagneticReading),
    Thermal(ThermalReading),
    Network(NetworkReading),
}

impl SamplePayload {
    pub fn kind(&self) -> SensorKind {
        match self {
            SamplePayload::Rf(_) => SensorKind::Rf,
            SamplePayload::Magnetic(_) => SensorKind::Magnetic,
            SamplePayload::Thermal(_) => SensorKind::Thermal,
            SamplePayload::Network(_) => SensorKind::Network,
        }
    }

    pub(crate) fn into_observation_payload(self) -> ObservationPayload {
        match self {
            SamplePayload::Rf(r) => ObservationPayload::Rf(r),
            SamplePayload::Magnetic(m) => ObservationPayload::Magnetic(m),
            SamplePayload::Thermal(t) => ObservationPayload::Thermal(t),
            SamplePayload::Network(n) => ObservationPayload::Network(n),
        }
    }
}

/// The main mine.raw_sample.v1 schema
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawSample {
    /// Schema version identifier
    pub schema_version: String,
    /// Unique sample identifier
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sample_id: Option<String>,
    /// Capture timestamp (UTC)
    pub timestamp: DateTime<Utc>,
    /// Declared sensor kind
    pub sensor: SensorKind,
    /// Capturing hardware
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<SampleSource>,
    /// Position at capture, absent for network-only samples
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<GeoPoint>,
    /// Sensor payload (must match `sensor`)
    pub payload: SamplePayload,
}

impl RawSample {
    fn new(timestamp: DateTime<Utc>, payload: SamplePayload) -> Self {
        RawSample {
            schema_version: SCHEMA_VERSION.to_string(),
            sample_id: Some(uuid::Uuid::new_v4().to_string()),
            timestamp,
            sensor: payload.kind(),
            source: None,
            location: None,
            payload,
        }
    }

    /// Create an RF sample
    pub fn rf(timestamp: DateTime<Utc>, frequency_hz: f64, power_dbm: f64) -> Self {
        Self::new(
            timestamp,
            SamplePayload::Rf(RfReading {
                frequency_hz,
                power_dbm,
            }),
        )
    }

    /// Create a magnetometer sample
    pub fn magnetic(timestamp: DateTime<Utc>, x_ut: f64, y_ut: f64, z_ut: f64) -> Self {
        Self::new(
            timestamp,
            SamplePayload::Magnetic(MagneticReading { x_ut, y_ut, z_ut }),
        )
    }

    /// Create a thermal sample
    pub fn thermal(timestamp: DateTime<Utc>, reading: ThermalReading) -> Self {
        Self::new(timestamp, SamplePayload::Thermal(reading))
    }

    /// Create a network flow sample
    pub fn network(timestamp: DateTime<Utc>, reading: NetworkReading) -> Self {
        Self::new(timestamp, SamplePayload::Network(reading))
    }

    /// Attach a capture location
    pub fn at(mut self, location: GeoPoint) -> Self {
        self.location = Some(location);
        self
    }

    /// Attach source hardware details
    pub fn with_source(mut self, source: SampleSource) -> Self {
        self.source = Some(source);
        self
    }

    /// Validate the envelope (version and payload/sensor agreement)
    ///
    /// Physical ranges are checked by the ingestor.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.schema_version != SCHEMA_VERSION {
            return Err(ValidationError::InvalidSchemaVersion {
                expected: SCHEMA_VERSION.to_string(),
                actual: self.schema_version.clone(),
            });
        }

        if self.payload.kind() != self.sensor {
            return Err(ValidationError::PayloadKindMismatch {
                sensor: self.sensor,
                payload: self.payload.kind(),
            });
        }

        Ok(())
    }
}

/// Validation errors for raw samples
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValidationError {
    #[error("Invalid schema version: expected {expected}, got {actual}")]
    InvalidSchemaVersion { expected: String, actual: String },

    #[error("Payload kind mismatch: sensor is {sensor} but payload is {payload}")]
    PayloadKindMismatch {
        sensor: SensorKind,
        payload: SensorKind,
    },

    #[error("{field} out of range: {value} not in [{min}, {max}]")]
    OutOfRange {
        field: &'static str,
        value: f64,
        min: f64,
        max: f64,
    },

    #[error("{field} is not a finite number")]
    NotFinite { field: &'static str },

    #[error("Malformed payload: {0}")]
    Malformed(String),

    #[error("Non-increasing timestamp for {kind}: {timestamp} is not after {previous}")]
    NonMonotonicTimestamp {
        kind: SensorKind,
        timestamp: DateTime<Utc>,
        previous: DateTime<Utc>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::collections::BTreeSet;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 5, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_serialize_rf_sample() {
        let sample = RawSample::rf(t0(), 2.4e9, -30.0).at(GeoPoint::new(35.6892, 51.3890));
        let json = serde_json::to_string(&sample).unwrap();

        assert!(json.contains("mine.raw_sample.v1"));
        assert!(json.contains(r#""sensor":"rf""#));
        assert!(json.contains(r#""payload":{"rf":"#));
        assert!(json.contains("35.6892"));
    }

    #[test]
    fn test_deserialize_network_sample() {
        let json = r#"{
            "schema_version": "mine.raw_sample.v1",
            "timestamp": "2024-03-05T12:00:00Z",
            "sensor": "network",
            "payload": {
                "network": {
                    "remote_ip": "203.0.113.7",
                    "ports": [3333, 443],
                    "bytes_per_sec": 2048.0,
                    "protocol": "stratum+tcp"
                }
            }
        }"#;

        let sample: RawSample = serde_json::from_str(json).unwrap();
        assert_eq!(sample.sensor, SensorKind::Network);
        assert!(sample.location.is_none());
        match sample.payload {
            SamplePayload::Network(ref n) => {
                assert_eq!(n.ports, BTreeSet::from([443, 3333]));
                assert_eq!(n.protocol.as_deref(), Some("stratum+tcp"));
            }
            _ => panic!("expected network payload"),
        }
        assert!(sample.validate().is_ok());
    }

    #[test]
    fn test_validation_rejects_wrong_version() {
        let mut sample = RawSample::magnetic(t0(), 20.0, 30.0, 40.0);
        sample.schema_version = "mine.raw_sample.v0".to_string();
        assert!(matches!(
            sample.validate(),
            Err(ValidationError::InvalidSchemaVersion { .. })
        ));
    }

    #[test]
    fn test_validation_rejects_kind_mismatch() {
        let mut sample = RawSample::rf(t0(), 2.4e9, -30.0);
        sample.sensor = SensorKind::Thermal;
        assert_eq!(
            sample.validate(),
            Err(ValidationError::PayloadKindMismatch {
                sensor: SensorKind::Thermal,
                payload: SensorKind::Rf,
            })
        );
    }
}
