//! Error types for Minerscope

use crate::features::InsufficientData;
use crate::schema::ValidationError;
use crate::store::StoreError;
use chrono::{DateTime, Utc};
use thiserror::Error;

/// Errors that can occur in the detection pipeline
///
/// None of these is fatal: the engine keeps its in-memory state usable after
/// every one of them.
#[derive(Debug, Error)]
pub enum DetectError {
    #[error("Invalid sample: {0}")]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    InsufficientData(#[from] InsufficientData),

    #[error("Insufficient data in window ending {window_end}: no sensor reached its minimum sample count")]
    InsufficientWindow {
        window_end: DateTime<Utc>,
        shortfalls: Vec<InsufficientData>,
    },

    #[error("Detection store unavailable: {0}")]
    StoreUnavailable(#[from] StoreError),

    #[error("Invalid JSON: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Failed to parse input: {0}")]
    ParseError(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Operation cancelled")]
    Cancelled,
}

impl DetectError {
    /// True for errors a scheduler should simply retry on its next tick
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            DetectError::InsufficientData(_)
                | DetectError::InsufficientWindow { .. }
                | DetectError::StoreUnavailable(_)
        )
    }
}
