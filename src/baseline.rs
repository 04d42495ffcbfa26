//! Baseline estimation
//!
//! This module estimates the ambient magnetic field a window is compared
//! against. The baseline is the median field magnitude over a trailing
//! window that ends where the evaluation window starts, so a device switching
//! on inside the window does not drag its own baseline along.

use serde::{Deserialize, Serialize};

/// Where a baseline value came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BaselineSource {
    /// Median of the trailing window
    Trailing,
    /// Trailing window was empty; median of the evaluation window itself
    WindowFallback,
}

/// A baseline value and its provenance
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BaselineEstimate {
    pub value: f64,
    pub source: BaselineSource,
    pub samples: usize,
}

/// Estimate the baseline from trailing values, falling back to the window
///
/// Returns None only when both slices are empty.
pub fn estimate_baseline(trailing: &[f64], window: &[f64]) -> Option<BaselineEstimate> {
    if let Some(value) = median(trailing) {
        return Some(BaselineEstimate {
            value,
            source: BaselineSource::Trailing,
            samples: trailing.len(),
        });
    }
    median(window).map(|value| BaselineEstimate {
        value,
        source: BaselineSource::WindowFallback,
        samples: window.len(),
    })
}

/// Median of a slice (mean of the two middle values for even lengths)
pub fn median(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        Some((sorted[mid - 1] + sorted[mid]) / 2.0)
    } else {
        Some(sorted[mid])
    }
}
