use log::{info, warn};
use rustc_hash::FxHashMap;

use crate::db::models::Observation;

/// Why a single raw record did not become an Observation.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum SkipReason {
    #[error("record is not a JSON object")]
    NotAnObject,
    #[error("record has no properties bag")]
    MissingProperties,
    #[error("record has no timestamp")]
    MissingTimestamp,
    #[error("unparseable timestamp: {0}")]
    InvalidTimestamp(String),
    #[error("timestamp outside the storable range: {0}")]
    TimestampOutOfRange(String),
    #[error("field {field} is not a finite number: {value}")]
    InvalidMeasurement { field: &'static str, value: String },
    #[error("duplicate observation id within batch: {0}")]
    DuplicateId(String),
    #[error("document matches no known shape")]
    UnrecognizedDocument,
}

impl SkipReason {
    /// Stable label used to group skips in the batch summary.
    pub fn kind(&self) -> &'static str {
        match self {
            SkipReason::NotAnObject => "not_an_object",
            SkipReason::MissingProperties => "missing_properties",
            SkipReason::MissingTimestamp => "missing_timestamp",
            SkipReason::InvalidTimestamp(_) => "invalid_timestamp",
            SkipReason::TimestampOutOfRange(_) => "timestamp_out_of_range",
            SkipReason::InvalidMeasurement { .. } => "invalid_measurement",
            SkipReason::DuplicateId(_) => "duplicate_id",
            SkipReason::UnrecognizedDocument => "unrecognized_document",
        }
    }
}

/// A record the normalizer dropped, with where it sat in the document.
#[derive(Debug, Clone, PartialEq)]
pub struct SkippedRecord {
    pub location: String,
    pub reason: SkipReason,
}

/// Outcome of normalizing one or more raw documents.
#[derive(Debug, Default)]
pub struct NormalizeReport {
    pub observations: Vec<Observation>,
    pub skipped: Vec<SkippedRecord>,
}

impl NormalizeReport {
    pub(crate) fn record(&mut self, location: String, outcome: Result<Observation, SkipReason>) {
        match outcome {
            Ok(observation) => self.observations.push(observation),
            Err(reason) => {
                warn!("Skipping record at {}: {}", location, reason);
                self.skipped.push(SkippedRecord {
                    location,
                    reason,
                });
            },
        }
    }

    pub fn skipped_count(&self) -> usize {
        self.skipped.len()
    }

    /// Skip counts grouped by reason kind.
    pub fn skip_summary(&self) -> FxHashMap<&'static str, usize> {
        let mut summary = FxHashMap::default();
        for skipped in &self.skipped {
            *summary.entry(skipped.reason.kind()).or_insert(0) += 1;
        }
        summary
    }

    pub fn summary(&self) -> NormalizeSummary {
        NormalizeSummary {
            observations: self.observations.len(),
            skipped: self.skipped.len(),
        }
    }

    pub fn log_summary(&self) {
        if self.skipped.is_empty() {
            info!("Normalized {} observations", self.observations.len());
            return;
        }

        let mut parts: Vec<String> = self
            .skip_summary()
            .into_iter()
            .map(|(kind, count)| format!("{}:{}", kind, count))
            .collect();
        parts.sort();

        info!(
            "Normalized {} observations, skipped {} records ({})",
            self.observations.len(),
            self.skipped.len(),
            parts.join(", ")
        );
    }
}

/// Counts carried into the cycle report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct NormalizeSummary {
    pub observations: usize,
    pub skipped: usize,
}
