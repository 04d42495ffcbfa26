//! Sample ingestion
//!
//! This module turns raw samples into validated observations:
//! - Envelope validation (schema version, payload kind)
//! - Physical range validation per sensor kind
//! - Per-stream timestamp ordering
//! - Buffering in a bounded ring per sensor kind
//!
//! Out-of-range values are rejected, never clamped.

use crate::config::IngestConfig;
use crate::schema::{RawSample, ValidationError};
use crate::types::{
    GeoPoint, MagneticReading, NetworkReading, Observation, RfReading, SensorKind,
    ThermalReading,
};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::{HashMap, VecDeque};
use std::net::IpAddr;

/// RF frequency range accepted from receivers (Hz)
pub const RF_FREQUENCY_RANGE_HZ: (f64, f64) = (1e6, 6e9);
/// RF power range accepted from receivers (dBm)
pub const RF_POWER_RANGE_DBM: (f64, f64) = (-120.0, 0.0);
/// Per-axis magnetometer range (microtesla)
pub const MAGNETIC_AXIS_RANGE_UT: (f64, f64) = (-5_000.0, 5_000.0);
/// Thermal camera temperature range (°C)
pub const THERMAL_RANGE_C: (f64, f64) = (-40.0, 150.0);
/// Largest thermal frame edge accepted (pixels)
pub const MAX_THERMAL_FRAME_EDGE: usize = 1_024;
/// Largest plausible hotspot count per frame
pub const MAX_HOTSPOT_COUNT: u32 = 10_000;
/// Byte rate range for a single flow (bytes/s, up to 100 Gbit/s)
pub const NETWORK_RATE_RANGE: (f64, f64) = (0.0, 12.5e9);

/// Bounded FIFO of observations for one sensor kind
#[derive(Debug, Clone)]
pub struct ObservationRing {
    observations: VecDeque<Observation>,
    capacity: usize,
}

impl ObservationRing {
    pub fn new(capacity: usize) -> Self {
        Self {
            observations: VecDeque::with_capacity(capacity.min(4_096)),
            capacity,
        }
    }

    /// Append an observation, evicting the oldest when full
    pub fn push(&mut self, observation: Observation) {
        self.observations.push_back(observation);
        while self.observations.len() > self.capacity {
            self.observations.pop_front();
        }
    }

    pub fn len(&self) -> usize {
        self.observations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observations.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn last_timestamp(&self) -> Option<DateTime<Utc>> {
        self.observations.back().map(|o| o.timestamp)
    }

    /// Observations with `start <= timestamp <= end`, oldest first
    pub fn window(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Vec<Observation> {
        self.observations
            .iter()
            .filter(|o| o.timestamp >= start && o.timestamp <= end)
            .cloned()
            .collect()
    }

    /// Observations with `start <= timestamp < end`, oldest first
    pub fn window_exclusive(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Vec<Observation> {
        self.observations
            .iter()
            .filter(|o| o.timestamp >= start && o.timestamp < end)
            .cloned()
            .collect()
    }

    /// Most recent location-bearing observation at or before `at`
    pub fn latest_location(&self, at: DateTime<Utc>) -> Option<(DateTime<Utc>, GeoPoint)> {
        self.observations
            .iter()
            .rev()
            .filter(|o| o.timestamp <= at)
            .find_map(|o| o.location.map(|loc| (o.timestamp, loc)))
    }
}

/// Validates raw samples and buffers them per sensor kind
///
/// Each kind has its own lock, so streams of different kinds never contend.
/// Within a kind the ingestor expects a single writer.
#[derive(Debug)]
pub struct SampleIngestor {
    rings: HashMap<SensorKind, RwLock<ObservationRing>>,
}

impl Default for SampleIngestor {
    fn default() -> Self {
        Self::new(&IngestConfig::default())
    }
}

impl SampleIngestor {
    pub fn new(config: &IngestConfig) -> Self {
        let rings = SensorKind::ALL
            .iter()
            .map(|kind| (*kind, RwLock::new(ObservationRing::new(config.ring_capacity))))
            .collect();
        Self { rings }
    }

    /// Validate a raw sample and append the resulting observation to its ring
    pub fn ingest(&self, sample: RawSample) -> Result<Observation, ValidationError> {
        sample.validate()?;
        validate_sample_ranges(&sample)?;

        let kind = sample.sensor;
        let observation = Observation {
            sensor_kind: kind,
            timestamp: sample.timestamp,
            location: sample.location,
            payload: sample.payload.into_observation_payload(),
        };

        let mut ring = self.ring(kind).write();
        if let Some(previous) = ring.last_timestamp() {
            if observation.timestamp <= previous {
                return Err(ValidationError::NonMonotonicTimestamp {
                    kind,
                    timestamp: observation.timestamp,
                    previous,
                });
            }
        }
        ring.push(observation.clone());

        Ok(observation)
    }

    /// Copy of the observations of `kind` within `[start, end]`
    pub fn window(
        &self,
        kind: SensorKind,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Vec<Observation> {
        self.ring(kind).read().window(start, end)
    }

    /// Copy of the observations of `kind` within `[start, end)`
    pub fn window_exclusive(
        &self,
        kind: SensorKind,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Vec<Observation> {
        self.ring(kind).read().window_exclusive(start, end)
    }

    /// Most recent location reported by any sensor at or before `at`
    pub fn latest_location(&self, at: DateTime<Utc>) -> Option<GeoPoint> {
        SensorKind::ALL
            .iter()
            .filter_map(|kind| self.ring(*kind).read().latest_location(at))
            .max_by_key(|(ts, _)| *ts)
            .map(|(_, loc)| loc)
    }

    /// Number of buffered observations of `kind`
    pub fn buffered(&self, kind: SensorKind) -> usize {
        self.ring(kind).read().len()
    }

    fn ring(&self, kind: SensorKind) -> &RwLock<ObservationRing> {
        // Every kind is inserted in `new`
        &self.rings[&kind]
    }
}

/// Check every numeric field of a sample against its physical range
pub fn validate_sample_ranges(sample: &RawSample) -> Result<(), ValidationError> {
    use crate::schema::SamplePayload;

    if let Some(location) = &sample.location {
        validate_location(location)?;
    }

    match &sample.payload {
        SamplePayload::Rf(rf) => validate_rf(rf),
        SamplePayload::Magnetic(mag) => validate_magnetic(mag),
        SamplePayload::Thermal(thermal) => validate_thermal(thermal),
        SamplePayload::Network(net) => validate_network(net),
    }
}

fn check_range(field: &'static str, value: f64, range: (f64, f64)) -> Result<(), ValidationError> {
    if !value.is_finite() {
        return Err(ValidationError::NotFinite { field });
    }
    if value < range.0 || value > range.1 {
        return Err(ValidationError::OutOfRange {
            field,
            value,
            min: range.0,
            max: range.1,
        });
    }
    Ok(())
}

fn validate_location(location: &GeoPoint) -> Result<(), ValidationError> {
    check_range("location.lat", location.lat, (-90.0, 90.0))?;
    check_range("location.lng", location.lng, (-180.0, 180.0))?;
    check_range("location.accuracy_m", location.accuracy_m, (0.0, f64::MAX))
}

fn validate_rf(rf: &RfReading) -> Result<(), ValidationError> {
    check_range("rf.frequency_hz", rf.frequency_hz, RF_FREQUENCY_RANGE_HZ)?;
    check_range("rf.power_dbm", rf.power_dbm, RF_POWER_RANGE_DBM)
}

fn validate_magnetic(mag: &MagneticReading) -> Result<(), ValidationError> {
    check_range("magnetic.x_ut", mag.x_ut, MAGNETIC_AXIS_RANGE_UT)?;
    check_range("magnetic.y_ut", mag.y_ut, MAGNETIC_AXIS_RANGE_UT)?;
    check_range("magnetic.z_ut", mag.z_ut, MAGNETIC_AXIS_RANGE_UT)
}

fn validate_thermal(thermal: &ThermalReading) -> Result<(), ValidationError> {
    check_range("thermal.max_temp_c", thermal.max_temp_c, THERMAL_RANGE_C)?;
    if thermal.hotspot_count > MAX_HOTSPOT_COUNT {
        return Err(ValidationError::OutOfRange {
            field: "thermal.hotspot_count",
            value: thermal.hotspot_count as f64,
            min: 0.0,
            max: MAX_HOTSPOT_COUNT as f64,
        });
    }

    if let Some(frame) = &thermal.frame {
        if frame.width == 0
            || frame.height == 0
            || frame.width > MAX_THERMAL_FRAME_EDGE
            || frame.height > MAX_THERMAL_FRAME_EDGE
        {
            return Err(ValidationError::Malformed(format!(
                "thermal frame dimensions {}x{} outside 1..={}",
                frame.width, frame.height, MAX_THERMAL_FRAME_EDGE
            )));
        }
        if frame.pixels_c.len() != frame.width * frame.height {
            return Err(ValidationError::Malformed(format!(
                "thermal frame has {} pixels, expected {}",
                frame.pixels_c.len(),
                frame.width * frame.height
            )));
        }
        for pixel in &frame.pixels_c {
            check_range("thermal.frame.pixel", *pixel, THERMAL_RANGE_C)?;
        }
    }
    Ok(())
}

fn validate_network(net: &NetworkReading) -> Result<(), ValidationError> {
    if net.remote_ip.parse::<IpAddr>().is_err() {
        return Err(ValidationError::Malformed(format!(
            "network.remote_ip '{}' is not an IP address",
            net.remote_ip
        )));
    }
    if net.ports.contains(&0) {
        return Err(ValidationError::OutOfRange {
            field: "network.ports",
            value: 0.0,
            min: 1.0,
            max: u16::MAX as f64,
        });
    }
    check_range("network.bytes_per_sec", net.bytes_per_sec, NETWORK_RATE_RANGE)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ThermalFrame;
    use chrono::{Duration, TimeZone};
    use std::collections::BTreeSet;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 5, 12, 0, 0).unwrap()
    }

    fn flow(ip: &str, ports: &[u16], rate: f64) -> NetworkReading {
        NetworkReading {
            remote_ip: ip.to_string(),
            ports: ports.iter().copied().collect::<BTreeSet<_>>(),
            bytes_per_sec: rate,
            protocol: None,
        }
    }

    #[test]
    fn test_ingest_buffers_observation() {
        let ingestor = SampleIngestor::default();
        let obs = ingestor
            .ingest(RawSample::rf(t0(), 2.4e9, -30.0).at(GeoPoint::new(35.6892, 51.3890)))
            .unwrap();

        assert_eq!(obs.sensor_kind, SensorKind::Rf);
        assert_eq!(ingestor.buffered(SensorKind::Rf), 1);
        assert_eq!(ingestor.buffered(SensorKind::Thermal), 0);
    }

    #[test]
    fn test_rejects_out_of_range_rf_power() {
        let ingestor = SampleIngestor::default();
        let err = ingestor.ingest(RawSample::rf(t0(), 2.4e9, 10.0)).unwrap_err();
        assert!(matches!(
            err,
            ValidationError::OutOfRange {
                field: "rf.power_dbm",
                ..
            }
        ));
        assert_eq!(ingestor.buffered(SensorKind::Rf), 0);
    }

    #[test]
    fn test_rejects_non_finite() {
        let ingestor = SampleIngestor::default();
        let err = ingestor
            .ingest(RawSample::magnetic(t0(), f64::NAN, 0.0, 0.0))
            .unwrap_err();
        assert_eq!(err, ValidationError::NotFinite { field: "magnetic.x_ut" });
    }

    #[test]
    fn test_rejects_hot_thermal_reading() {
        let ingestor = SampleIngestor::default();
        let reading = ThermalReading {
            max_temp_c: 151.0,
            hotspot_count: 1,
            frame: None,
        };
        assert!(ingestor.ingest(RawSample::thermal(t0(), reading)).is_err());
    }

    #[test]
    fn test_rejects_malformed_thermal_frame() {
        let ingestor = SampleIngestor::default();
        let reading = ThermalReading {
            max_temp_c: 60.0,
            hotspot_count: 1,
            frame: Some(ThermalFrame {
                width: 2,
                height: 2,
                pixels_c: vec![20.0, 21.0, 60.0],
            }),
        };
        assert!(matches!(
            ingestor.ingest(RawSample::thermal(t0(), reading)),
            Err(ValidationError::Malformed(_))
        ));
    }

    #[test]
    fn test_rejects_bad_remote_ip() {
        let ingestor = SampleIngestor::default();
        let sample = RawSample::network(t0(), flow("pool.example.com", &[3333], 100.0));
        assert!(matches!(
            ingestor.ingest(sample),
            Err(ValidationError::Malformed(_))
        ));
    }

    #[test]
    fn test_rejects_bad_location() {
        let ingestor = SampleIngestor::default();
        let sample = RawSample::rf(t0(), 2.4e9, -30.0).at(GeoPoint::new(95.0, 51.0));
        assert!(ingestor.ingest(sample).is_err());
    }

    #[test]
    fn test_rejects_non_increasing_timestamp() {
        let ingestor = SampleIngestor::default();
        ingestor.ingest(RawSample::rf(t0(), 2.4e9, -30.0)).unwrap();

        let err = ingestor.ingest(RawSample::rf(t0(), 2.4e9, -31.0)).unwrap_err();
        assert!(matches!(err, ValidationError::NonMonotonicTimestamp { .. }));

        // Other streams keep their own ordering
        ingestor
            .ingest(RawSample::magnetic(t0(), 20.0, 0.0, 40.0))
            .unwrap();
    }

    #[test]
    fn test_ring_evicts_oldest() {
        let ingestor = SampleIngestor::new(&IngestConfig {
            ring_capacity: 3,
            ..IngestConfig::default()
        });
        for i in 0..5 {
            ingestor
                .ingest(RawSample::rf(t0() + Duration::seconds(i), 2.4e9, -30.0))
                .unwrap();
        }
        assert_eq!(ingestor.buffered(SensorKind::Rf), 3);
        let window = ingestor.window(SensorKind::Rf, t0(), t0() + Duration::seconds(10));
        assert_eq!(window[0].timestamp, t0() + Duration::seconds(2));
    }

    #[test]
    fn test_latest_location_across_kinds() {
        let ingestor = SampleIngestor::default();
        let a = GeoPoint::new(35.0, 51.0);
        let b = GeoPoint::new(35.1, 51.1);
        ingestor.ingest(RawSample::rf(t0(), 2.4e9, -30.0).at(a)).unwrap();
        ingestor
            .ingest(RawSample::magnetic(t0() + Duration::seconds(5), 20.0, 0.0, 40.0).at(b))
            .unwrap();
        ingestor
            .ingest(RawSample::network(
                t0() + Duration::seconds(9),
                flow("203.0.113.7", &[3333], 100.0),
            ))
            .unwrap();

        assert_eq!(ingestor.latest_location(t0() + Duration::seconds(10)), Some(b));
        assert_eq!(ingestor.latest_location(t0() + Duration::seconds(1)), Some(a));
        assert_eq!(ingestor.latest_location(t0() - Duration::seconds(1)), None);
    }
}
