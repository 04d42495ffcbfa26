//! Feature extraction
//!
//! This module summarizes a window of buffered observations into a
//! fixed-shape feature vector per sensor kind:
//! - RF: dominant frequency bin and power
//! - Magnetic: deviation from a trailing median baseline
//! - Thermal: contiguous hotspot regions and peak temperature
//! - Network: destination ports, allowlisted miner ports and byte rate
//!
//! All computations are deterministic for identical input samples.

use crate::baseline::estimate_baseline;
use crate::config::FeatureConfig;
use crate::ingest::SampleIngestor;
use crate::types::{
    FeatureVector, Observation, ObservationPayload, SensorFeatures, SensorKind, ThermalFrame,
};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

/// Not enough samples in a window; retry on a later tick
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("Insufficient data for {kind}: {available} samples in window, {required} required")]
pub struct InsufficientData {
    pub kind: SensorKind,
    pub available: usize,
    pub required: usize,
}

/// Extracts feature vectors from an ingestor's ring buffers
pub struct FeatureExtractor {
    config: FeatureConfig,
}

impl Default for FeatureExtractor {
    fn default() -> Self {
        Self::new(FeatureConfig::default())
    }
}

impl FeatureExtractor {
    pub fn new(config: FeatureConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &FeatureConfig {
        &self.config
    }

    /// Extract the feature vector of `kind` for the window ending at `window_end`
    pub fn extract(
        &self,
        ingestor: &SampleIngestor,
        kind: SensorKind,
        window_end: DateTime<Utc>,
    ) -> Result<FeatureVector, InsufficientData> {
        let window_start = window_end - Duration::seconds(self.config.window_secs);
        let samples = ingestor.window(kind, window_start, window_end);

        if samples.len() < self.config.min_samples {
            debug!(
                %kind,
                available = samples.len(),
                required = self.config.min_samples,
                "window below minimum sample count"
            );
            return Err(InsufficientData {
                kind,
                available: samples.len(),
                required: self.config.min_samples,
            });
        }

        let features = match kind {
            SensorKind::Rf => self.rf_features(&samples),
            SensorKind::Magnetic => {
                let trailing_start =
                    window_start - Duration::seconds(self.config.magnetic_baseline_secs);
                let trailing = ingestor.window_exclusive(kind, trailing_start, window_start);
                self.magnetic_features(&trailing, &samples)
            }
            SensorKind::Thermal => self.thermal_features(&samples),
            SensorKind::Network => self.network_features(&samples),
        };

        Ok(FeatureVector {
            sensor_kind: kind,
            window_start,
            window_end,
            sample_count: samples.len(),
            features,
        })
    }

    /// Spectral peak over the window.
    ///
    /// Samples are binned by `round(f / bin_width)`; the bin with the largest
    /// summed linear power wins (lowest bin on ties) and its power-weighted mean
    /// frequency is reported.
    ///
    /// Bins are centered on multiples of the bin width. An emitter whose
    /// frequency is such a multiple keeps all of its power in one bin while it
    /// drifts less than half a bin width; wider drift splits it across two
    /// bins. With the default 20 MHz bins that is ±10 MHz, which covers the
    /// ±15 MHz table tolerance only for emitters near a bin center, so table
    /// frequencies should sit on multiples of the bin width.
    fn rf_features(&self, samples: &[Observation]) -> SensorFeatures {
        let mut bins: BTreeMap<i64, (f64, f64)> = BTreeMap::new();
        let mut peak_power_dbm = f64::NEG_INFINITY;
        let mut power_sum_dbm = 0.0;
        let mut count = 0usize;

        for obs in samples {
            if let ObservationPayload::Rf(rf) = &obs.payload {
                let bin = (rf.frequency_hz / self.config.rf_bin_width_hz).round() as i64;
                let linear_mw = dbm_to_mw(rf.power_dbm);
                let entry = bins.entry(bin).or_insert((0.0, 0.0));
                entry.0 += linear_mw;
                entry.1 += linear_mw * rf.frequency_hz;

                peak_power_dbm = peak_power_dbm.max(rf.power_dbm);
                power_sum_dbm += rf.power_dbm;
                count += 1;
            }
        }

        let mut best: Option<(f64, f64)> = None;
        for (power, weighted_freq) in bins.values() {
            if best.map_or(true, |(p, _)| *power > p) {
                best = Some((*power, *weighted_freq));
            }
        }

        let dominant_frequency_hz = best
            .filter(|(power, _)| *power > 0.0)
            .map(|(power, weighted)| weighted / power)
            .unwrap_or(0.0);

        SensorFeatures::Rf {
            dominant_frequency_hz,
            peak_power_dbm,
            mean_power_dbm: if count > 0 {
                power_sum_dbm / count as f64
            } else {
                f64::NEG_INFINITY
            },
        }
    }

    fn magnetic_features(&self, trailing: &[Observation], window: &[Observation]) -> SensorFeatures {
        let trailing_mags = magnitudes(trailing);
        let window_mags = magnitudes(window);

        let baseline_ut = estimate_baseline(&trailing_mags, &window_mags)
            .map(|b| b.value)
            .unwrap_or(0.0);

        let n = window_mags.len().max(1) as f64;
        let mean_magnitude_ut = window_mags.iter().sum::<f64>() / n;
        let peak_delta_ut = window_mags
            .iter()
            .map(|m| (m - baseline_ut).abs())
            .fold(0.0, f64::max);

        SensorFeatures::Magnetic {
            mean_magnitude_ut,
            baseline_ut,
            mean_delta_ut: (mean_magnitude_ut - baseline_ut).abs(),
            peak_delta_ut,
        }
    }

    fn thermal_features(&self, samples: &[Observation]) -> SensorFeatures {
        let mut peak_temp_c = f64::NEG_INFINITY;
        let mut max_temp_sum = 0.0;
        let mut hotspot_regions = 0u32;
        let mut count = 0usize;

        for obs in samples {
            if let ObservationPayload::Thermal(thermal) = &obs.payload {
                let regions = match &thermal.frame {
                    Some(frame) => count_hotspot_regions(frame, self.config.hotspot_threshold_c),
                    None => thermal.hotspot_count,
                };
                hotspot_regions = hotspot_regions.max(regions);
                peak_temp_c = peak_temp_c.max(thermal.max_temp_c);
                max_temp_sum += thermal.max_temp_c;
                count += 1;
            }
        }

        SensorFeatures::Thermal {
            peak_temp_c,
            mean_max_temp_c: max_temp_sum / count.max(1) as f64,
            hotspot_regions,
        }
    }

    fn network_features(&self, samples: &[Observation]) -> SensorFeatures {
        let mut ports = BTreeSet::new();
        let mut remotes = BTreeSet::new();
        let mut rate_sum = 0.0;
        let mut count = 0usize;
        let mut stratum_seen = false;

        for obs in samples {
            if let ObservationPayload::Network(net) = &obs.payload {
                ports.extend(net.ports.iter().copied());
                remotes.insert(net.remote_ip.as_str());
                rate_sum += net.bytes_per_sec;
                count += 1;
                stratum_seen |= net
                    .protocol
                    .as_deref()
                    .map(|p| p.to_ascii_lowercase().starts_with("stratum"))
                    .unwrap_or(false);
            }
        }

        let miner_ports = ports
            .iter()
            .copied()
            .filter(|p| self.config.is_miner_port(*p))
            .collect();

        SensorFeatures::Network {
            ports,
            miner_ports,
            distinct_remotes: remotes.len(),
            mean_bytes_per_sec: rate_sum / count.max(1) as f64,
            stratum_seen,
        }
    }
}

fn dbm_to_mw(dbm: f64) -> f64 {
    10f64.powf(dbm / 10.0)
}

fn magnitudes(samples: &[Observation]) -> Vec<f64> {
    samples
        .iter()
        .filter_map(|o| match &o.payload {
            ObservationPayload::Magnetic(m) => Some(m.magnitude()),
            _ => None,
        })
        .collect()
}

/// Count 4-connected regions of pixels strictly above `threshold_c`
pub fn count_hotspot_regions(frame: &ThermalFrame, threshold_c: f64) -> u32 {
    let (w, h) = (frame.width, frame.height);
    if frame.pixels_c.len() != w * h {
        return 0;
    }

    let mut visited = vec![false; w * h];
    let mut regions = 0u32;
    let mut stack = Vec::new();

    for start in 0..w * h {
        if visited[start] || frame.pixels_c[start] <= threshold_c {
            continue;
        }
        regions += 1;
        visited[start] = true;
        stack.push(start);

        while let Some(idx) = stack.pop() {
            let (x, y) = (idx % w, idx / w);
            let mut visit = |nx: usize, ny: usize| {
                let n = ny * w + nx;
                if !visited[n] && frame.pixels_c[n] > threshold_c {
                    visited[n] = true;
                    stack.push(n);
                }
            };
            if x > 0 {
                visit(x - 1, y);
            }
            if x + 1 < w {
                visit(x + 1, y);
            }
            if y > 0 {
                visit(x, y - 1);
            }
            if y + 1 < h {
                visit(x, y + 1);
            }
        }
    }

    regions
}
