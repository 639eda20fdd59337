use clickhouse::Row;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// Document shape an observation was normalized from.
///
/// Forecast readings are lower priority than measured ones and only
/// contribute to hours that no station or legacy document covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ObservationSource {
    Station,
    LegacyDaily,
    Forecast,
}

impl ObservationSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            ObservationSource::Station => "station",
            ObservationSource::LegacyDaily => "legacy_daily",
            ObservationSource::Forecast => "forecast",
        }
    }

    /// Unknown labels are treated as station data, the highest priority.
    pub fn parse(label: &str) -> Self {
        match label {
            "legacy_daily" => ObservationSource::LegacyDaily,
            "forecast" => ObservationSource::Forecast,
            _ => ObservationSource::Station,
        }
    }
}

/// One normalized physical measurement event (ClickHouse `weather_observations`).
///
/// Created once by the normalizer and never updated. The table is a
/// ReplacingMergeTree keyed on (timestamp, station_id, observation_id), so
/// re-ingesting an overlapping window collapses onto the same rows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Row)]
pub struct Observation {
    // Identifiers
    #[serde(rename = "observation_id")]
    pub id: String,
    pub station_id: String,
    #[serde(with = "clickhouse::serde::time::datetime")]
    pub timestamp: OffsetDateTime,

    // Measurements (canonical units)
    pub temperature_c: Option<f64>,
    pub rainfall_mm: Option<f64>,
    pub humidity_percent: Option<f64>,
    pub wind_speed_ms: Option<f64>,
    pub pressure_pa: Option<f64>,

    // Provenance
    #[serde(rename = "ingest_time_utc", with = "clickhouse::serde::time::datetime")]
    pub ingest_time: OffsetDateTime,
    #[serde(with = "clickhouse::serde::time::datetime")]
    pub source_timestamp: OffsetDateTime,
    #[serde(rename = "api_request_id")]
    pub request_id: String,
    #[serde(rename = "etl_batch_id")]
    pub batch_id: String,
    pub source: String,
}

impl Observation {
    pub fn source_kind(&self) -> ObservationSource {
        ObservationSource::parse(&self.source)
    }
}
