use serde::{Deserialize, Serialize};
use time::{format_description::FormatItem, macros::format_description, Duration, OffsetDateTime};

use crate::config::LocationSettings;
use crate::db::models::{DailyAggregate, MonthlyAggregate};

const DATE_FORMAT: &[FormatItem<'static>] = format_description!("[year]-[month]-[day]");

/// Served humidity is capped; raw rollups keep whatever the sensors reported.
const MAX_HUMIDITY_PERCENT: f64 = 100.0;

/// Logical cache entries materialized from the warehouse.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheKey {
    MonthlyAverages,
    DailyAverages,
}

impl CacheKey {
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheKey::MonthlyAverages => "monthly_averages",
            CacheKey::DailyAverages => "daily_averages",
        }
    }

    /// Full cache key under a namespace, e.g. `weather:stockton:monthly_averages`.
    pub fn qualified(&self, namespace: &str) -> String {
        format!("{}:{}", namespace, self.as_str())
    }
}

/// Period-wide summary embedded in every snapshot.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct OverallAverages {
    pub avg_temperature_c: Option<f64>,
    pub total_rainfall_mm: Option<f64>,
    pub avg_humidity_percent: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub period_months: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub period_days: Option<u32>,
}

impl OverallAverages {
    fn summarize(rows: &[(Option<f64>, Option<f64>, Option<f64>)]) -> Self {
        let temps: Vec<f64> = rows.iter().filter_map(|r| r.0).collect();
        let rain: Vec<f64> = rows.iter().filter_map(|r| r.1).collect();
        let humidity: Vec<f64> = rows.iter().filter_map(|r| r.2).collect();

        Self {
            avg_temperature_c: mean(&temps),
            total_rainfall_mm: if rain.is_empty() { None } else { Some(rain.iter().sum()) },
            avg_humidity_percent: mean(&humidity),
            period_months: None,
            period_days: None,
        }
    }

    pub fn from_monthly(rows: &[MonthlyAverage]) -> Self {
        let values: Vec<_> = rows
            .iter()
            .map(|r| (r.avg_temperature_c, r.total_rainfall_mm, r.avg_humidity_percent))
            .collect();
        Self {
            period_months: Some(rows.len() as u32),
            ..Self::summarize(&values)
        }
    }

    pub fn from_daily(rows: &[DailyAverage]) -> Self {
        let values: Vec<_> = rows
            .iter()
            .map(|r| (r.avg_temperature_c, r.total_rainfall_mm, r.avg_humidity_percent))
            .collect();
        Self {
            period_days: Some(rows.len() as u32),
            ..Self::summarize(&values)
        }
    }
}

fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}

fn cap_humidity(value: Option<f64>) -> Option<f64> {
    value.map(|h| h.min(MAX_HUMIDITY_PERCENT))
}

/// Daily rollup as served from the cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyAverage {
    pub date: String,
    pub avg_temperature_c: Option<f64>,
    pub total_rainfall_mm: Option<f64>,
    pub avg_humidity_percent: Option<f64>,
    pub max_temperature_c: Option<f64>,
    pub min_temperature_c: Option<f64>,
    pub observation_count: u32,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub latest_obs_timestamp: Option<OffsetDateTime>,
}

impl From<&DailyAggregate> for DailyAverage {
    fn from(row: &DailyAggregate) -> Self {
        Self {
            date: row
                .date
                .format(DATE_FORMAT)
                .unwrap_or_else(|_| row.date.to_string()),
            avg_temperature_c: row.avg_temperature_c,
            total_rainfall_mm: row.total_rainfall_mm,
            avg_humidity_percent: cap_humidity(row.avg_humidity_percent),
            max_temperature_c: row.max_temperature_c,
            min_temperature_c: row.min_temperature_c,
            observation_count: row.observation_count,
            latest_obs_timestamp: row.latest_observation_time,
        }
    }
}

/// Monthly rollup as served from the cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonthlyAverage {
    pub year: u16,
    pub month: u8,
    pub avg_temperature_c: Option<f64>,
    pub total_rainfall_mm: Option<f64>,
    pub avg_humidity_percent: Option<f64>,
    pub max_temperature_c: Option<f64>,
    pub min_temperature_c: Option<f64>,
    pub observation_count: u32,
}

impl From<&MonthlyAggregate> for MonthlyAverage {
    fn from(row: &MonthlyAggregate) -> Self {
        Self {
            year: row.year,
            month: row.month,
            avg_temperature_c: row.avg_temperature_c,
            total_rainfall_mm: row.total_rainfall_mm,
            avg_humidity_percent: cap_humidity(row.avg_humidity_percent),
            max_temperature_c: row.max_temperature_c,
            min_temperature_c: row.min_temperature_c,
            observation_count: row.observation_count,
        }
    }
}

/// Versioned, wholesale-replaced snapshot of current aggregates.
///
/// Serialized to JSON as one object per logical key. The TTL
/// (`refresh_interval_sec`) decides freshness, not warehouse correctness.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEnvelope {
    #[serde(with = "time::serde::rfc3339")]
    pub cache_timestamp: OffsetDateTime,
    pub data_version: String,
    pub refresh_interval_sec: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<LocationSettings>,
    pub overall_averages: OverallAverages,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub monthly_data: Option<Vec<MonthlyAverage>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub daily_data: Option<Vec<DailyAverage>>,
}

impl CacheEnvelope {
    /// Builds a monthly snapshot. `None` when there is nothing to serve.
    pub fn monthly(
        rows: &[MonthlyAggregate],
        cache_timestamp: OffsetDateTime,
        data_version: String,
        refresh_interval_sec: u64,
        location: Option<LocationSettings>,
    ) -> Option<Self> {
        if rows.is_empty() {
            return None;
        }
        let monthly_data: Vec<MonthlyAverage> = rows.iter().map(MonthlyAverage::from).collect();
        Some(Self {
            cache_timestamp,
            data_version,
            refresh_interval_sec,
            location,
            overall_averages: OverallAverages::from_monthly(&monthly_data),
            monthly_data: Some(monthly_data),
            daily_data: None,
        })
    }

    /// Builds a daily snapshot. `None` when there is nothing to serve.
    pub fn daily(
        rows: &[DailyAggregate],
        cache_timestamp: OffsetDateTime,
        data_version: String,
        refresh_interval_sec: u64,
        location: Option<LocationSettings>,
    ) -> Option<Self> {
        if rows.is_empty() {
            return None;
        }
        let daily_data: Vec<DailyAverage> = rows.iter().map(DailyAverage::from).collect();
        Some(Self {
            cache_timestamp,
            data_version,
            refresh_interval_sec,
            location,
            overall_averages: OverallAverages::from_daily(&daily_data),
            monthly_data: None,
            daily_data: Some(daily_data),
        })
    }

    pub fn expires_at(&self) -> OffsetDateTime {
        self.cache_timestamp + Duration::seconds(self.refresh_interval_sec as i64)
    }

    /// Remaining time-to-live at `now`, `None` once expired.
    pub fn remaining_ttl(&self, now: OffsetDateTime) -> Option<Duration> {
        let remaining = self.expires_at() - now;
        if remaining.is_positive() {
            Some(remaining)
        } else {
            None
        }
    }

    /// Numeric part of `data_version` (`v1700000000` -> 1700000000).
    pub fn version_number(&self) -> Option<i64> {
        self.data_version.strip_prefix('v')?.parse().ok()
    }
}

/// Version strictly greater than `previous`, derived from the write time.
pub fn next_data_version(now: OffsetDateTime, previous: Option<i64>) -> String {
    let candidate = now.unix_timestamp();
    let version = match previous {
        Some(prev) if prev >= candidate => prev + 1,
        _ => candidate,
    };
    format!("v{}", version)
}
