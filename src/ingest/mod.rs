//! Raw provider documents -> canonical observations.

pub mod normalizer;
pub mod report;
pub mod units;

pub use normalizer::Normalizer;
pub use report::{NormalizeReport, NormalizeSummary, SkipReason, SkippedRecord};
