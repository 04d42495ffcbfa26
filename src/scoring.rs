//! Confidence scoring
//!
//! Each sensor kind contributes an independent partial score in [0, 1]; the
//! partials are fused with a probabilistic OR:
//!
//! `confidence = 1 - Π(1 - partial_i)`
//!
//! so adding a corroborating sensor never lowers the result.

use crate::config::{FeatureConfig, ScoringConfig};
use crate::types::{Detection, DeviceTypeGuess, FeatureVector, GeoPoint, SensorFeatures, SensorKind};
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, BTreeSet};
use uuid::Uuid;

/// Partial score and hardware guess of one sensor kind
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PartialScore {
    pub kind: SensorKind,
    pub score: f64,
    pub guess: DeviceTypeGuess,
}

/// Fuses feature vectors into detections
pub struct ConfidenceScorer {
    scoring: ScoringConfig,
    features: FeatureConfig,
}

impl Default for ConfidenceScorer {
    fn default() -> Self {
        Self::new(ScoringConfig::default(), FeatureConfig::default())
    }
}

impl ConfidenceScorer {
    pub fn new(scoring: ScoringConfig, features: FeatureConfig) -> Self {
        Self { scoring, features }
    }

    /// Score a set of feature vectors into a detection.
    ///
    /// Never fails: an empty map yields confidence 0 and `Unknown`. The
    /// detection is stamped with the latest window end among the vectors,
    /// falling back to `fallback_time` when there are none.
    pub fn score(
        &self,
        vectors: &BTreeMap<SensorKind, FeatureVector>,
        location: Option<GeoPoint>,
        fallback_time: DateTime<Utc>,
    ) -> Detection {
        let partials: Vec<PartialScore> = vectors.values().map(|v| self.partial(v)).collect();

        let created_at = vectors
            .values()
            .map(|v| v.window_end)
            .max()
            .unwrap_or(fallback_time);

        Detection {
            id: Uuid::new_v4(),
            location,
            confidence: combine(partials.iter().map(|p| p.score)),
            device_type_guess: pick_guess(&partials),
            contributing_sensors: vectors.keys().copied().collect::<BTreeSet<_>>(),
            partial_scores: partials.iter().map(|p| (p.kind, p.score)).collect(),
            created_at,
        }
    }

    /// Partial score of a single feature vector
    pub fn partial(&self, vector: &FeatureVector) -> PartialScore {
        let (score, guess) = match &vector.features {
            SensorFeatures::Rf {
                dominant_frequency_hz,
                peak_power_dbm,
                ..
            } => self.rf_partial(*dominant_frequency_hz, *peak_power_dbm),
            SensorFeatures::Magnetic { mean_delta_ut, .. } => (
                ramp(
                    *mean_delta_ut,
                    self.scoring.magnetic_delta_floor_ut,
                    self.scoring.magnetic_delta_full_ut,
                ),
                DeviceTypeGuess::Unknown,
            ),
            SensorFeatures::Thermal {
                peak_temp_c,
                hotspot_regions,
                ..
            } => self.thermal_partial(*peak_temp_c, *hotspot_regions),
            SensorFeatures::Network {
                miner_ports,
                mean_bytes_per_sec,
                stratum_seen,
                ..
            } => self.network_partial(miner_ports, *mean_bytes_per_sec, *stratum_seen),
        };

        PartialScore {
            kind: vector.sensor_kind,
            score: score.clamp(0.0, 1.0),
            guess,
        }
    }

    /// Table match (weight) times power factor; 0 when no entry is in tolerance
    fn rf_partial(&self, frequency_hz: f64, peak_power_dbm: f64) -> (f64, DeviceTypeGuess) {
        let matched = self
            .scoring
            .known_emitters
            .iter()
            .map(|e| (e, (e.frequency_hz - frequency_hz).abs()))
            .filter(|(_, distance)| *distance <= self.scoring.rf_tolerance_hz)
            .min_by(|a, b| a.1.total_cmp(&b.1));

        match matched {
            Some((emitter, _)) => {
                let power_factor = ramp(
                    peak_power_dbm,
                    self.scoring.rf_power_floor_dbm,
                    self.scoring.rf_power_full_dbm,
                );
                (emitter.weight * power_factor, emitter.device_type)
            }
            None => (0.0, DeviceTypeGuess::Unknown),
        }
    }

    /// Temperature ramp, halved without a hotspot region.
    ///
    /// Many hotspots point at a multi-card GPU rig, few at an ASIC unit.
    fn thermal_partial(&self, peak_temp_c: f64, hotspot_regions: u32) -> (f64, DeviceTypeGuess) {
        let temp_factor = ramp(
            peak_temp_c,
            self.scoring.thermal_floor_c,
            self.scoring.thermal_full_c,
        );
        let score = if hotspot_regions > 0 {
            temp_factor
        } else {
            temp_factor * 0.5
        };
        let guess = if hotspot_regions >= self.scoring.gpu_hotspot_min {
            DeviceTypeGuess::GpuRig
        } else {
            DeviceTypeGuess::AsicBitcoin
        };
        (score, guess)
    }

    fn network_partial(
        &self,
        miner_ports: &BTreeSet<u16>,
        mean_bytes_per_sec: f64,
        stratum_seen: bool,
    ) -> (f64, DeviceTypeGuess) {
        if miner_ports.is_empty() && !stratum_seen {
            return (0.0, DeviceTypeGuess::Unknown);
        }

        let guess = miner_ports
            .iter()
            .find_map(|p| self.features.miner_port(*p))
            .map(|p| p.device_type)
            .unwrap_or(DeviceTypeGuess::Unknown);

        if mean_bytes_per_sec >= self.scoring.network_rate_threshold {
            (1.0, guess)
        } else {
            (0.5, guess)
        }
    }
}

/// Probabilistic OR of independent partial scores
pub fn combine(partials: impl IntoIterator<Item = f64>) -> f64 {
    let miss: f64 = partials
        .into_iter()
        .map(|p| 1.0 - p.clamp(0.0, 1.0))
        .product();
    (1.0 - miss).clamp(0.0, 1.0)
}

/// Guess of the strongest partial; ties go to the more specific sensor
fn pick_guess(partials: &[PartialScore]) -> DeviceTypeGuess {
    partials
        .iter()
        .filter(|p| p.score > 0.0)
        .max_by(|a, b| {
            a.score
                .total_cmp(&b.score)
                .then(a.kind.tie_break_rank().cmp(&b.kind.tie_break_rank()))
        })
        .map(|p| p.guess)
        .unwrap_or(DeviceTypeGuess::Unknown)
}

/// Linear ramp from 0 at `floor` to 1 at `full`
fn ramp(value: f64, floor: f64, full: f64) -> f64 {
    if !value.is_finite() {
        return 0.0;
    }
    ((value - floor) / (full - floor)).clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 5, 12, 0, 0).unwrap()
    }

    fn vector(kind: SensorKind, features: SensorFeatures) -> FeatureVector {
        FeatureVector {
            sensor_kind: kind,
            window_start: t0() - Duration::seconds(60),
            window_end: t0(),
            sample_count: 3,
            features,
        }
    }

    fn rf(freq: f64, power: f64) -> FeatureVector {
        vector(
            SensorKind::Rf,
            SensorFeatures::Rf {
                dominant_frequency_hz: freq,
                peak_power_dbm: power,
                mean_power_dbm: power,
            },
        )
    }

    fn magnetic(delta: f64) -> FeatureVector {
        vector(
            SensorKind::Magnetic,
            SensorFeatures::Magnetic {
                mean_magnitude_ut: 50.0 + delta,
                baseline_ut: 50.0,
                mean_delta_ut: delta,
                peak_delta_ut: delta,
            },
        )
    }

    fn thermal(peak: f64, regions: u32) -> FeatureVector {
        vector(
            SensorKind::Thermal,
            SensorFeatures::Thermal {
                peak_temp_c: peak,
                mean_max_temp_c: peak,
                hotspot_regions: regions,
            },
        )
    }

    fn network(ports: &[u16], rate: f64) -> FeatureVector {
        let ports: BTreeSet<u16> = ports.iter().copied().collect();
        let features = FeatureConfig::default();
        let miner_ports = ports.iter().copied().filter(|p| features.is_miner_port(*p)).collect();
        vector(
            SensorKind::Network,
            SensorFeatures::Network {
                ports,
                miner_ports,
                distinct_remotes: 1,
                mean_bytes_per_sec: rate,
                stratum_seen: false,
            },
        )
    }

    fn map(vectors: Vec<FeatureVector>) -> BTreeMap<SensorKind, FeatureVector> {
        vectors.into_iter().map(|v| (v.sensor_kind, v)).collect()
    }

    #[test]
    fn test_rf_known_frequency_scores_high() {
        let scorer = ConfidenceScorer::default();
        let detection = scorer.score(&map(vec![rf(2.4e9, -30.0)]), None, t0());

        assert!(detection.confidence >= 0.8);
        assert_eq!(detection.device_type_guess, DeviceTypeGuess::AsicBitcoin);
        assert_eq!(detection.contributing_sensors, BTreeSet::from([SensorKind::Rf]));
        assert_eq!(detection.created_at, t0());
    }

    #[test]
    fn test_rf_unknown_frequency_scores_zero() {
        let scorer = ConfidenceScorer::default();
        let detection = scorer.score(&map(vec![rf(0.9e9, -30.0)]), None, t0());
        assert_eq!(detection.confidence, 0.0);
        assert_eq!(detection.device_type_guess, DeviceTypeGuess::Unknown);
    }

    #[test]
    fn test_empty_vectors() {
        let scorer = ConfidenceScorer::default();
        let detection = scorer.score(&BTreeMap::new(), None, t0());
        assert_eq!(detection.confidence, 0.0);
        assert_eq!(detection.device_type_guess, DeviceTypeGuess::Unknown);
        assert!(detection.contributing_sensors.is_empty());
        assert_eq!(detection.created_at, t0());
    }

    #[test]
    fn test_combine_is_probabilistic_or() {
        assert!((combine([0.5, 0.5]) - 0.75).abs() < 1e-12);
        assert_eq!(combine(Vec::<f64>::new()), 0.0);
        assert_eq!(combine([1.0, 0.2]), 1.0);
    }

    #[test]
    fn test_adding_sensor_never_decreases_confidence() {
        let scorer = ConfidenceScorer::default();
        let candidates = vec![
            rf(2.4e9, -60.0),
            magnetic(20.0),
            thermal(70.0, 1),
            network(&[3333], 500.0),
        ];

        // Every subset, extended by every missing kind
        for mask in 0u32..16 {
            let base: Vec<FeatureVector> = candidates
                .iter()
                .enumerate()
                .filter(|(i, _)| mask & (1 << i) != 0)
                .map(|(_, v)| v.clone())
                .collect();
            let before = scorer.score(&map(base.clone()), None, t0()).confidence;

            for (i, extra) in candidates.iter().enumerate() {
                if mask & (1 << i) != 0 {
                    continue;
                }
                let mut extended = base.clone();
                extended.push(extra.clone());
                let after = scorer.score(&map(extended), None, t0()).confidence;
                assert!(after >= before, "mask {mask} + {i}: {after} < {before}");
            }
        }
    }

    #[test]
    fn test_guess_tie_prefers_network() {
        let scorer = ConfidenceScorer::default();
        // RF and network both score 1.0; network (GPU pool port) wins the tie
        let detection = scorer.score(
            &map(vec![rf(2.4e9, -30.0), network(&[4444], 5_000.0)]),
            None,
            t0(),
        );
        assert_eq!(detection.partial_scores[&SensorKind::Rf], 1.0);
        assert_eq!(detection.partial_scores[&SensorKind::Network], 1.0);
        assert_eq!(detection.device_type_guess, DeviceTypeGuess::GpuRig);
    }

    #[test]
    fn test_guess_follows_strongest_partial() {
        let scorer = ConfidenceScorer::default();
        let detection = scorer.score(
            &map(vec![network(&[3333], 10.0), thermal(85.0, 6)]),
            None,
            t0(),
        );
        // Network 0.5 (rate below threshold), thermal 1.0 with many hotspots
        assert_eq!(detection.device_type_guess, DeviceTypeGuess::GpuRig);
    }

    #[test]
    fn test_thermal_without_hotspots_is_halved() {
        let scorer = ConfidenceScorer::default();
        let with = scorer.partial(&thermal(65.0, 1)).score;
        let without = scorer.partial(&thermal(65.0, 0)).score;
        assert!((with - 0.5).abs() < 1e-12);
        assert!((without - 0.25).abs() < 1e-12);
    }

    #[test]
    fn test_magnetic_ramp() {
        let scorer = ConfidenceScorer::default();
        assert_eq!(scorer.partial(&magnetic(2.0)).score, 0.0);
        assert!((scorer.partial(&magnetic(27.5)).score - 0.5).abs() < 1e-12);
        assert_eq!(scorer.partial(&magnetic(80.0)).score, 1.0);
        assert_eq!(scorer.partial(&magnetic(80.0)).guess, DeviceTypeGuess::Unknown);
    }

    #[test]
    fn test_network_without_miner_ports() {
        let scorer = ConfidenceScorer::default();
        assert_eq!(scorer.partial(&network(&[443, 80], 1e6)).score, 0.0);
        assert_eq!(scorer.partial(&network(&[3333], 1e6)).score, 1.0);
    }
}
