use std::collections::BTreeMap;

use time::{Date, OffsetDateTime, UtcOffset};

use crate::{
    db::models::{Observation, ObservationSource},
    rollup::fold,
};

/// `(UTC date, hour of day)`.
pub type HourKey = (Date, u8);

/// Ephemeral per-hour reduction of observations. Never persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct HourlyBucket {
    pub date: Date,
    pub hour: u8,
    pub avg_temperature_c: Option<f64>,
    /// Largest single rainfall reading in the hour. Stations repeat the same
    /// rolling-hour accumulation, so summing would double count.
    pub max_rainfall_mm: Option<f64>,
    pub avg_humidity_percent: Option<f64>,
    pub max_temperature_c: Option<f64>,
    pub min_temperature_c: Option<f64>,
    pub observation_count: u32,
    pub latest_observation: Option<OffsetDateTime>,
}

impl HourlyBucket {
    fn fold(key: HourKey, readings: &[&Observation]) -> Self {
        let temps = || readings.iter().map(|o| o.temperature_c);

        Self {
            date: key.0,
            hour: key.1,
            avg_temperature_c: fold::mean(temps()),
            max_rainfall_mm: fold::max(readings.iter().map(|o| o.rainfall_mm)),
            avg_humidity_percent: fold::mean(readings.iter().map(|o| o.humidity_percent)),
            max_temperature_c: fold::max(temps()),
            min_temperature_c: fold::min(temps()),
            observation_count: readings.len() as u32,
            latest_observation: readings.iter().map(|o| o.timestamp).max(),
        }
    }
}

/// Groups observations into `(date, hour)` buckets.
///
/// Observations without a temperature are left out. Within an hour, forecast
/// readings are dropped as soon as any measured reading exists. Readings are
/// folded in `(timestamp, station_id, id)` order, so input order never changes
/// the result.
pub fn bucket_hourly(observations: &[Observation]) -> BTreeMap<HourKey, HourlyBucket> {
    let mut grouped: BTreeMap<HourKey, Vec<&Observation>> = BTreeMap::new();

    for obs in observations.iter().filter(|o| o.temperature_c.is_some()) {
        let ts = obs.timestamp.to_offset(UtcOffset::UTC);
        grouped.entry((ts.date(), ts.hour())).or_default().push(obs);
    }

    grouped
        .into_iter()
        .map(|(key, mut readings)| {
            if readings.iter().any(|o| o.source_kind() != ObservationSource::Forecast) {
                readings.retain(|o| o.source_kind() != ObservationSource::Forecast);
            }
            readings.sort_by(|a, b| {
                (a.timestamp, &a.station_id, &a.id).cmp(&(b.timestamp, &b.station_id, &b.id))
            });
            (key, HourlyBucket::fold(key, &readings))
        })
        .collect()
}
