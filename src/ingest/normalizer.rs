//! Raw provider document normalization.
//!
//! Maps the document shapes found in the raw store onto canonical
//! [`Observation`] records. Every record is parsed independently into a
//! `Result<Observation, SkipReason>`; a bad record never drops its siblings.
//!
//! Recognized shapes:
//! - station observations: `observations` / `historical_observations` arrays of
//!   GeoJSON features with a `properties` bag
//! - legacy daily documents: `date` plus `max_temp_c` / `min_temp_c` / `precip_mm`
//! - forecast periods: `forecast` / `hourly_forecast` with `properties.periods`
//!
//! The Kelvin and meter heuristics apply to station and forecast readings only.
//! Legacy `max_temp_c` / `min_temp_c` / `precip_mm` are exempt and pass through.

use rustc_hash::FxHashSet;
use serde_json::{Map, Value};
use time::{
    format_description::{well_known::Rfc3339, FormatItem},
    macros::format_description,
    Date, OffsetDateTime, PrimitiveDateTime, UtcOffset,
};

use crate::{
    config::IngestSettings,
    db::models::{Observation, ObservationSource},
    ingest::{
        report::{NormalizeReport, SkipReason},
        units::{fahrenheit_to_celsius, normalize_rainfall, normalize_temperature},
    },
};

const STATION_SECTIONS: [&str; 2] = ["observations", "historical_observations"];
const FORECAST_SECTIONS: [&str; 2] = ["forecast", "hourly_forecast"];

/// Station id used when a record carries no resolvable station reference.
pub const UNKNOWN_STATION: &str = "unknown";

/// Warehouse `DateTime` columns are unsigned 32-bit seconds.
const MAX_STORABLE_UNIX: i64 = u32::MAX as i64;

const DATE_ONLY: &[FormatItem<'static>] = format_description!("[year]-[month]-[day]");
const NAIVE_DATETIME: &[FormatItem<'static>] =
    format_description!("[year]-[month]-[day]T[hour]:[minute]:[second]");

/// Document-level provenance shared by every record in one raw document.
struct DocumentContext {
    source_timestamp: Option<OffsetDateTime>,
    ingest_time: Option<OffsetDateTime>,
    request_id: String,
    batch_id: String,
    document_id: String,
}

impl DocumentContext {
    fn from_document(doc: &Map<String, Value>) -> Self {
        Self {
            source_timestamp: doc.get("source_timestamp").and_then(|v| parse_timestamp(v).ok()),
            ingest_time: doc.get("ingest_time_utc").and_then(|v| parse_timestamp(v).ok()),
            request_id: string_field(doc, "api_request_id"),
            batch_id: string_field(doc, "etl_batch_id"),
            document_id: document_id(doc.get("_id")),
        }
    }
}

/// Normalizes raw documents into Observations, fail-open per record.
#[derive(Debug, Clone)]
pub struct Normalizer {
    settings: IngestSettings,
}

impl Normalizer {
    pub fn new(settings: IngestSettings) -> Self {
        Self {
            settings,
        }
    }

    /// Normalize a single raw document.
    pub fn normalize(&self, document: &Value, ingest_time: OffsetDateTime) -> NormalizeReport {
        self.normalize_batch(std::slice::from_ref(document), ingest_time)
    }

    /// Normalize a batch of raw documents. Observation ids are unique across the
    /// whole batch; later duplicates are skipped.
    pub fn normalize_batch(&self, documents: &[Value], ingest_time: OffsetDateTime) -> NormalizeReport {
        let mut report = NormalizeReport::default();
        let mut seen = FxHashSet::default();

        for (index, document) in documents.iter().enumerate() {
            self.normalize_document(index, document, ingest_time, &mut seen, &mut report);
        }

        report
    }

    fn normalize_document(
        &self,
        index: usize,
        document: &Value,
        ingest_time: OffsetDateTime,
        seen: &mut FxHashSet<String>,
        report: &mut NormalizeReport,
    ) {
        let Some(doc) = document.as_object() else {
            report.record(format!("documents[{}]", index), Err(SkipReason::NotAnObject));
            return;
        };

        let context = DocumentContext::from_document(doc);
        let ingest_time = context.ingest_time.unwrap_or(ingest_time);
        let mut recognized = false;

        for section in STATION_SECTIONS {
            let Some(entries) = doc.get(section).and_then(Value::as_array) else {
                continue;
            };
            recognized = true;

            for (i, entry) in entries.iter().enumerate() {
                let outcome = parse_station_entry(entry, &context, ingest_time)
                    .and_then(|obs| unique(seen, obs));
                report.record(format!("documents[{}].{}[{}]", index, section, i), outcome);
            }
        }

        if is_legacy_daily(doc) {
            recognized = true;
            let outcome = self
                .parse_legacy_daily(doc, &context, ingest_time)
                .and_then(|obs| unique(seen, obs));
            report.record(format!("documents[{}].date", index), outcome);
        }

        for section in FORECAST_SECTIONS {
            let Some(periods) = doc
                .get(section)
                .and_then(|forecast| forecast.pointer("/properties/periods"))
                .and_then(Value::as_array)
            else {
                continue;
            };
            recognized = true;

            for (i, period) in periods.iter().enumerate() {
                let outcome = self
                    .parse_forecast_period(section, period, &context, ingest_time)
                    .and_then(|obs| unique(seen, obs));
                report.record(
                    format!("documents[{}].{}.periods[{}]", index, section, i),
                    outcome,
                );
            }
        }

        if !recognized {
            report.record(format!("documents[{}]", index), Err(SkipReason::UnrecognizedDocument));
        }
    }

    fn parse_legacy_daily(
        &self,
        doc: &Map<String, Value>,
        context: &DocumentContext,
        ingest_time: OffsetDateTime,
    ) -> Result<Observation, SkipReason> {
        let timestamp = required_timestamp(doc.get("date"))?;

        // Legacy fields are named in canonical units and pass through.
        let max_temp = optional_number(doc, "max_temp_c")?;
        let min_temp = optional_number(doc, "min_temp_c")?;
        let precip = optional_number(doc, "precip_mm")?;

        Ok(Observation {
            id: format!("daily_{}_{}", context.document_id, timestamp.unix_timestamp()),
            station_id: self.settings.legacy_station_id.clone(),
            timestamp,
            temperature_c: representative_temperature(max_temp, min_temp),
            rainfall_mm: precip,
            humidity_percent: None,
            wind_speed_ms: None,
            pressure_pa: None,
            ingest_time,
            source_timestamp: timestamp,
            request_id: context.request_id.clone(),
            batch_id: context.batch_id.clone(),
            source: ObservationSource::LegacyDaily.as_str().to_string(),
        })
    }

    fn parse_forecast_period(
        &self,
        section: &str,
        period: &Value,
        context: &DocumentContext,
        ingest_time: OffsetDateTime,
    ) -> Result<Observation, SkipReason> {
        let period = period.as_object().ok_or(SkipReason::NotAnObject)?;
        let timestamp = required_timestamp(period.get("startTime"))?;

        let fahrenheit = period.get("temperatureUnit").and_then(Value::as_str) == Some("F");
        let temperature_c = optional_number(period, "temperature")?.map(|t| {
            let t = if fahrenheit { fahrenheit_to_celsius(t) } else { t };
            normalize_temperature(t)
        });

        Ok(Observation {
            id: format!("{}_{}", section, timestamp.unix_timestamp()),
            station_id: self.settings.forecast_station_id.clone(),
            timestamp,
            temperature_c,
            rainfall_mm: None,
            humidity_percent: measurement(period, "relativeHumidity")?,
            wind_speed_ms: None,
            pressure_pa: None,
            ingest_time,
            source_timestamp: context.source_timestamp.unwrap_or(timestamp),
            request_id: context.request_id.clone(),
            batch_id: context.batch_id.clone(),
            source: ObservationSource::Forecast.as_str().to_string(),
        })
    }
}

fn parse_station_entry(
    entry: &Value,
    context: &DocumentContext,
    ingest_time: OffsetDateTime,
) -> Result<Observation, SkipReason> {
    let entry = entry.as_object().ok_or(SkipReason::NotAnObject)?;
    let props = entry
        .get("properties")
        .and_then(Value::as_object)
        .ok_or(SkipReason::MissingProperties)?;

    let timestamp = required_timestamp(props.get("timestamp"))?;
    let station_id = station_from_uri(props.get("station").and_then(Value::as_str));

    Ok(Observation {
        id: synthetic_id(&station_id, timestamp),
        station_id,
        timestamp,
        temperature_c: measurement(props, "temperature")?.map(normalize_temperature),
        rainfall_mm: measurement(props, "precipitationLastHour")?.map(normalize_rainfall),
        humidity_percent: measurement(props, "relativeHumidity")?,
        wind_speed_ms: measurement(props, "windSpeed")?,
        pressure_pa: measurement(props, "seaLevelPressure")?,
        ingest_time,
        source_timestamp: context.source_timestamp.unwrap_or(timestamp),
        request_id: context.request_id.clone(),
        batch_id: context.batch_id.clone(),
        source: ObservationSource::Station.as_str().to_string(),
    })
}

fn is_legacy_daily(doc: &Map<String, Value>) -> bool {
    doc.contains_key("date") && (doc.contains_key("max_temp_c") || doc.contains_key("min_temp_c"))
}

fn unique(seen: &mut FxHashSet<String>, observation: Observation) -> Result<Observation, SkipReason> {
    if seen.insert(observation.id.clone()) {
        Ok(observation)
    } else {
        Err(SkipReason::DuplicateId(observation.id))
    }
}

/// Representative temperature of a legacy daily document: the midpoint of the
/// bounds, or whichever single bound is present.
pub fn representative_temperature(max: Option<f64>, min: Option<f64>) -> Option<f64> {
    match (max, min) {
        (Some(max), Some(min)) => Some((max + min) / 2.0),
        (Some(bound), None) | (None, Some(bound)) => Some(bound),
        (None, None) => None,
    }
}

/// Final path segment of a station URI
/// (`https://api.weather.gov/stations/KSCK` -> `KSCK`).
pub fn station_from_uri(uri: Option<&str>) -> String {
    uri.and_then(|uri| uri.trim_end_matches('/').rsplit('/').next())
        .filter(|segment| !segment.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| UNKNOWN_STATION.to_string())
}

/// `<station>_<epoch seconds>`: stable across repeated ingestion of the same
/// window. Two reports from one station within the same second share an id.
pub fn synthetic_id(station_id: &str, timestamp: OffsetDateTime) -> String {
    format!("{}_{}", station_id, timestamp.unix_timestamp())
}

fn required_timestamp(value: Option<&Value>) -> Result<OffsetDateTime, SkipReason> {
    match value {
        None | Some(Value::Null) => Err(SkipReason::MissingTimestamp),
        Some(value) => parse_timestamp(value),
    }
}

/// Parses RFC 3339, bare dates, naive ISO date-times (read as UTC), epoch
/// milliseconds and MongoDB `{"$date": ...}` wrappers. Always returns UTC.
fn parse_timestamp(value: &Value) -> Result<OffsetDateTime, SkipReason> {
    let parsed = match value {
        Value::String(s) => parse_timestamp_str(s.trim())
            .ok_or_else(|| SkipReason::InvalidTimestamp(s.clone()))?,
        Value::Number(n) => {
            let millis = n
                .as_i64()
                .ok_or_else(|| SkipReason::InvalidTimestamp(n.to_string()))?;
            OffsetDateTime::from_unix_timestamp_nanos(millis as i128 * 1_000_000)
                .map_err(|_| SkipReason::TimestampOutOfRange(n.to_string()))?
        },
        Value::Object(wrapper) if wrapper.contains_key("$date") => {
            return parse_timestamp(&wrapper["$date"]);
        },
        other => return Err(SkipReason::InvalidTimestamp(other.to_string())),
    };

    let utc = parsed.to_offset(UtcOffset::UTC);
    if !(0..=MAX_STORABLE_UNIX).contains(&utc.unix_timestamp()) {
        return Err(SkipReason::TimestampOutOfRange(utc.to_string()));
    }
    Ok(utc)
}

fn parse_timestamp_str(s: &str) -> Option<OffsetDateTime> {
    if let Ok(ts) = OffsetDateTime::parse(s, &Rfc3339) {
        return Some(ts);
    }
    if let Ok(date) = Date::parse(s, DATE_ONLY) {
        return Some(date.midnight().assume_utc());
    }
    PrimitiveDateTime::parse(s, NAIVE_DATETIME)
        .ok()
        .map(PrimitiveDateTime::assume_utc)
}

/// Reads a quantitative value, either `{"value": x, "unitCode": ...}` or a bare number.
fn measurement(props: &Map<String, Value>, field: &'static str) -> Result<Option<f64>, SkipReason> {
    let raw = match props.get(field) {
        None | Some(Value::Null) => return Ok(None),
        Some(Value::Object(quantity)) => match quantity.get("value") {
            None | Some(Value::Null) => return Ok(None),
            Some(value) => value,
        },
        Some(value) => value,
    };
    finite(field, raw).map(Some)
}

fn optional_number(doc: &Map<String, Value>, field: &'static str) -> Result<Option<f64>, SkipReason> {
    match doc.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(value) => finite(field, value).map(Some),
    }
}

fn finite(field: &'static str, value: &Value) -> Result<f64, SkipReason> {
    value
        .as_f64()
        .filter(|v| v.is_finite())
        .ok_or_else(|| SkipReason::InvalidMeasurement {
            field,
            value: value.to_string(),
        })
}

fn string_field(doc: &Map<String, Value>, field: &str) -> String {
    doc.get(field)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

fn document_id(value: Option<&Value>) -> String {
    match value {
        Some(Value::String(id)) => id.clone(),
        Some(Value::Number(id)) => id.to_string(),
        Some(Value::Object(wrapper)) => wrapper
            .get("$oid")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| UNKNOWN_STATION.to_string()),
        _ => UNKNOWN_STATION.to_string(),
    }
}
