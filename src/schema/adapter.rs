//! Parsing helpers for mine.raw_sample.v1 input

use crate::error::DetectError;
use crate::schema::raw_sample::*;

/// Adapter for reading raw samples from JSON documents
pub struct RawSampleAdapter;

impl RawSampleAdapter {
    /// Parse a JSON string containing an array of RawSamples
    pub fn parse_array(json: &str) -> Result<Vec<RawSample>, DetectError> {
        let samples: Vec<RawSample> = serde_json::from_str(json)?;
        Ok(samples)
    }

    /// Parse NDJSON (newline-delimited JSON) containing RawSamples
    pub fn parse_ndjson(ndjson: &str) -> Result<Vec<RawSample>, DetectError> {
        let mut samples = Vec::new();
        for (line_num, line) in ndjson.lines().enumerate() {
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            match serde_json::from_str::<RawSample>(trimmed) {
                Ok(sample) => samples.push(sample),
                Err(e) => {
                    return Err(DetectError::ParseError(format!(
                        "Failed to parse line {}: {}",
                        line_num + 1,
                        e
                    )));
                }
            }
        }
        Ok(samples)
    }

    /// Envelope-validate a batch of samples, returning only the failures
    pub fn validate_samples(samples: &[RawSample]) -> Vec<ValidationResult> {
        samples
            .iter()
            .enumerate()
            .filter_map(|(idx, sample)| {
                sample.validate().err().map(|error| ValidationResult {
                    index: idx,
                    sample_id: sample.sample_id.clone(),
                    error,
                })
            })
            .collect()
    }
}

/// A failed sample validation
#[derive(Debug, Clone)]
pub struct ValidationResult {
    pub index: usize,
    pub sample_id: Option<String>,
    pub error: ValidationError,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SensorKind;

    #[test]
    fn test_parse_ndjson() {
        let ndjson = r#"{"schema_version":"mine.raw_sample.v1","timestamp":"2024-03-05T12:00:00Z","sensor":"rf","payload":{"rf":{"frequency_hz":2400000000.0,"power_dbm":-30.0}}}

{"schema_version":"mine.raw_sample.v1","timestamp":"2024-03-05T12:00:01Z","sensor":"magnetic","payload":{"magnetic":{"x_ut":20.0,"y_ut":5.0,"z_ut":-40.0}}}"#;

        let samples = RawSampleAdapter::parse_ndjson(ndjson).unwrap();
        assert_eq!(samples.len(), 2);
        assert_eq!(samples[0].sensor, SensorKind::Rf);
        assert_eq!(samples[1].sensor, SensorKind::Magnetic);
    }

    #[test]
    fn test_parse_ndjson_reports_line() {
        let ndjson = "{\"schema_version\":\"mine.raw_sample.v1\",\"timestamp\":\"2024-03-05T12:00:00Z\",\"sensor\":\"rf\",\"payload\":{\"rf\":{\"frequency_hz\":1.0e9,\"power_dbm\":-50.0}}}\nnot json";
        let err = RawSampleAdapter::parse_ndjson(ndjson).unwrap_err();
        assert!(err.to_string().contains("line 2"));
    }

    #[test]
    fn test_parse_array() {
        let json = r#"[{"schema_version":"mine.raw_sample.v1","timestamp":"2024-03-05T12:00:00Z","sensor":"rf","payload":{"rf":{"frequency_hz":2400000000.0,"power_dbm":-30.0}}}]"#;
        assert_eq!(RawSampleAdapter::parse_array(json).unwrap().len(), 1);
        assert!(RawSampleAdapter::parse_array("{}").is_err());
    }

    #[test]
    fn test_validate_samples() {
        let good = RawSample::rf(chrono::Utc::now(), 2.4e9, -30.0);
        let mut bad = good.clone();
        bad.sensor = SensorKind::Network;

        let failures = RawSampleAdapter::validate_samples(&[good, bad]);
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].index, 1);
    }
}
