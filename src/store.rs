//! Detection persistence
//!
//! The engine commits every detection and the track snapshot it produced to a
//! `DetectionStore`. Store calls are the only blocking I/O in the crate.

use crate::types::{BoundingBox, Detection, DeviceTrack};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{self, BufRead, BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::warn;

/// Failures of a detection store
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store call timed out after {0:?}")]
    Timeout(Duration),

    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("store I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("store encoding error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Durable sink and query surface for detections
pub trait DetectionStore: Send + Sync {
    fn append_detection(&self, detection: &Detection) -> Result<(), StoreError>;

    /// Persist the latest snapshot of a track (later snapshots supersede earlier ones)
    fn append_track(&self, track: &DeviceTrack) -> Result<(), StoreError>;

    /// Stored detections whose location lies inside `bbox`, in append order
    fn query_by_bbox(&self, bbox: &BoundingBox) -> Result<Vec<Detection>, StoreError>;
}

/// In-process store
#[derive(Debug, Default)]
pub struct MemoryStore {
    detections: Mutex<Vec<Detection>>,
    tracks: Mutex<Vec<DeviceTrack>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn detections(&self) -> Vec<Detection> {
        self.detections.lock().clone()
    }

    /// Every track snapshot appended so far
    pub fn track_snapshots(&self) -> Vec<DeviceTrack> {
        self.tracks.lock().clone()
    }
}

impl DetectionStore for MemoryStore {
    fn append_detection(&self, detection: &Detection) -> Result<(), StoreError> {
        self.detections.lock().push(detection.clone());
        Ok(())
    }

    fn append_track(&self, track: &DeviceTrack) -> Result<(), StoreError> {
        self.tracks.lock().push(track.clone());
        Ok(())
    }

    fn query_by_bbox(&self, bbox: &BoundingBox) -> Result<Vec<Detection>, StoreError> {
        Ok(self
            .detections
            .lock()
            .iter()
            .filter(|d| d.location.as_ref().is_some_and(|loc| bbox.contains(loc)))
            .cloned()
            .collect())
    }
}

/// One line of the NDJSON log
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "record", rename_all = "snake_case")]
pub enum LogRecord {
    Detection(Detection),
    Track(DeviceTrack),
}

/// Append-only newline-delimited JSON log file
///
/// A failed append is truncated away. Lines that still fail to decode, such
/// as a torn tail left by a crash, are skipped with a warning when reading.
#[derive(Debug)]
pub struct NdjsonLogStore {
    path: PathBuf,
    file: Mutex<File>,
}

impl NdjsonLogStore {
    /// Open (or create) the log at `path` for appending
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&path)?;

        // Terminate a torn last line so the next record starts on its own line
        if file.metadata()?.len() > 0 {
            let mut last = [0u8; 1];
            file.seek(SeekFrom::End(-1))?;
            file.read_exact(&mut last)?;
            if last[0] != b'\n' {
                warn!(path = %path.display(), "log ends in a partial line");
                file.write_all(b"\n")?;
            }
        }

        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn append(&self, record: &LogRecord) -> Result<(), StoreError> {
        let mut line = serde_json::to_string(record)?;
        line.push('\n');
        let mut file = self.file.lock();
        let len = file.metadata()?.len();
        let written = file.write_all(line.as_bytes()).and_then(|_| file.flush());
        if let Err(err) = written {
            // Drop whatever part of the line made it out
            if let Err(truncate_err) = file.set_len(len) {
                warn!(path = %self.path.display(), error = %truncate_err, "partial record left in log");
            }
            return Err(err.into());
        }
        Ok(())
    }

    /// Read every record back from the log
    pub fn records(&self) -> Result<Vec<LogRecord>, StoreError> {
        let reader = BufReader::new(File::open(&self.path)?);
        let mut records = Vec::new();
        for (index, line) in reader.lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str(&line) {
                Ok(record) => records.push(record),
                Err(err) => {
                    warn!(path = %self.path.display(), line = index + 1, error = %err, "undecodable log line skipped");
                }
            }
        }
        Ok(records)
    }
}

impl DetectionStore for NdjsonLogStore {
    fn append_detection(&self, detection: &Detection) -> Result<(), StoreError> {
        self.append(&LogRecord::Detection(detection.clone()))
    }

    fn append_track(&self, track: &DeviceTrack) -> Result<(), StoreError> {
        self.append(&LogRecord::Track(track.clone()))
    }

    fn query_by_bbox(&self, bbox: &BoundingBox) -> Result<Vec<Detection>, StoreError> {
        Ok(self
            .records()?
            .into_iter()
            .filter_map(|record| match record {
                LogRecord::Detection(d) => Some(d),
                LogRecord::Track(_) => None,
            })
            .filter(|d| d.location.as_ref().is_some_and(|loc| bbox.contains(loc)))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{DeviceTypeGuess, GeoPoint, SensorKind};
    use chrono::{TimeZone, Utc};
    use pretty_assertions::assert_eq;
    use std::collections::{BTreeMap, BTreeSet};
    use uuid::Uuid;

    fn detection(location: Option<GeoPoint>) -> Detection {
        Detection {
            id: Uuid::new_v4(),
            location,
            confidence: 0.9,
            device_type_guess: DeviceTypeGuess::AsicBitcoin,
            contributing_sensors: BTreeSet::from([SensorKind::Rf]),
            partial_scores: BTreeMap::from([(SensorKind::Rf, 0.9)]),
            created_at: Utc.with_ymd_and_hms(2024, 3, 5, 12, 0, 0).unwrap(),
        }
    }

    #[test]
    fn test_memory_store_bbox_query() {
        let store = MemoryStore::new();
        let inside = detection(Some(GeoPoint::new(35.69, 51.39)));
        let outside = detection(Some(GeoPoint::new(32.65, 51.67)));
        let unlocated = detection(None);
        for d in [&inside, &outside, &unlocated] {
            store.append_detection(d).unwrap();
        }

        let bbox = BoundingBox::new(35.0, 51.0, 36.0, 52.0);
        assert_eq!(store.query_by_bbox(&bbox).unwrap(), vec![inside]);
        assert_eq!(store.detections().len(), 3);
    }

    #[test]
    fn test_ndjson_log_store_appends_and_reads_back() {
        let path = std::env::temp_dir().join(format!("minerscope-store-{}.ndjson", Uuid::new_v4()));
        let store = NdjsonLogStore::open(&path).unwrap();
        let d = detection(Some(GeoPoint::new(35.69, 51.39)));
        store.append_detection(&d).unwrap();

        let found = store.query_by_bbox(&BoundingBox::world()).unwrap();
        assert_eq!(found, vec![d]);
        assert_eq!(store.records().unwrap().len(), 1);

        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_ndjson_log_store_survives_torn_line() {
        let path = std::env::temp_dir().join(format!("minerscope-torn-{}.ndjson", Uuid::new_v4()));
        let first = detection(Some(GeoPoint::new(35.69, 51.39)));
        let mut contents = serde_json::to_string(&LogRecord::Detection(first.clone())).unwrap();
        contents.push('\n');
        contents.push_str(r#"{"record":"detection","id":"#);
        std::fs::write(&path, contents).unwrap();

        let store = NdjsonLogStore::open(&path).unwrap();
        let second = detection(Some(GeoPoint::new(35.70, 51.40)));
        store.append_detection(&second).unwrap();

        assert_eq!(store.records().unwrap().len(), 2);
        assert_eq!(store.query_by_bbox(&BoundingBox::world()).unwrap(), vec![first, second]);

        std::fs::remove_file(&path).ok();
    }
}
