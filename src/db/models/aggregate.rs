use clickhouse::Row;
use serde::{Deserialize, Serialize};
use time::{Date, Month, OffsetDateTime};

/// Aggregate tier. Each tier has its own table and its own write lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tier {
    Daily,
    Monthly,
}

impl Tier {
    pub fn table(&self) -> &'static str {
        match self {
            Tier::Daily => "daily_weather_aggregates",
            Tier::Monthly => "monthly_weather_aggregates",
        }
    }
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Tier::Daily => write!(f, "daily"),
            Tier::Monthly => write!(f, "monthly"),
        }
    }
}

/// How a rollup cycle chose the periods it recomputed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LoadMode {
    /// Only months touched by newly ingested observations
    #[default]
    Incremental,
    /// Every month present in the warehouse
    Full,
}

impl LoadMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            LoadMode::Incremental => "incremental",
            LoadMode::Full => "full",
        }
    }
}

/// Calendar month key of the monthly tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Row)]
pub struct MonthKey {
    pub year: u16,
    pub month: u8,
}

impl MonthKey {
    pub fn new(year: u16, month: u8) -> Self {
        Self { year, month }
    }

    pub fn of(date: Date) -> Self {
        Self {
            year: date.year().clamp(0, u16::MAX as i32) as u16,
            month: date.month() as u8,
        }
    }

    /// First day of the month, `None` for an invalid month number.
    pub fn first_day(&self) -> Option<Date> {
        let month = Month::try_from(self.month).ok()?;
        Date::from_calendar_date(self.year as i32, month, 1).ok()
    }

    /// First day of the following month.
    pub fn next_first_day(&self) -> Option<Date> {
        let first = self.first_day()?;
        let (year, month) = match first.month() {
            Month::December => (first.year() + 1, Month::January),
            m => (first.year(), m.next()),
        };
        Date::from_calendar_date(year, month, 1).ok()
    }
}

impl std::fmt::Display for MonthKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

/// Measurement statistics shared by hourly buckets, days and months.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct RollupStats {
    pub avg_temperature_c: Option<f64>,
    pub total_rainfall_mm: Option<f64>,
    pub avg_humidity_percent: Option<f64>,
    pub max_temperature_c: Option<f64>,
    pub min_temperature_c: Option<f64>,
    pub observation_count: u32,
}

/// Load metadata stamped on every row written by one cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct LoadMetadata {
    pub load_time: OffsetDateTime,
    pub sync_interval_min: u16,
    pub load_mode: LoadMode,
}

/// Daily rollup (ClickHouse `daily_weather_aggregates`, SummingMergeTree ORDER BY date).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Row)]
pub struct DailyAggregate {
    #[serde(with = "clickhouse::serde::time::date")]
    pub date: Date,

    pub avg_temperature_c: Option<f64>,
    pub total_rainfall_mm: Option<f64>,
    pub avg_humidity_percent: Option<f64>,
    pub max_temperature_c: Option<f64>,
    pub min_temperature_c: Option<f64>,
    pub observation_count: u32,
    /// Timestamp of the day's most recent bucketed observation
    #[serde(rename = "latest_obs_timestamp", with = "clickhouse::serde::time::datetime::option")]
    pub latest_observation_time: Option<OffsetDateTime>,

    // Load metadata
    #[serde(rename = "warehouse_load_time", with = "clickhouse::serde::time::datetime")]
    pub load_time: OffsetDateTime,
    pub rows_loaded: u32,
    pub sync_interval_min: u16,
    pub load_mode: String,
}

impl DailyAggregate {
    pub fn new(date: Date, stats: RollupStats, meta: &LoadMetadata, rows_loaded: u32) -> Self {
        Self {
            date,
            avg_temperature_c: stats.avg_temperature_c,
            total_rainfall_mm: stats.total_rainfall_mm,
            avg_humidity_percent: stats.avg_humidity_percent,
            max_temperature_c: stats.max_temperature_c,
            min_temperature_c: stats.min_temperature_c,
            observation_count: stats.observation_count,
            latest_observation_time: None,
            load_time: meta.load_time,
            rows_loaded,
            sync_interval_min: meta.sync_interval_min,
            load_mode: meta.load_mode.as_str().to_string(),
        }
    }

    pub fn with_latest_observation(mut self, latest: Option<OffsetDateTime>) -> Self {
        self.latest_observation_time = latest;
        self
    }
}

/// Monthly rollup (ClickHouse `monthly_weather_aggregates`, ORDER BY (year, month)).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Row)]
pub struct MonthlyAggregate {
    pub year: u16,
    pub month: u8,

    pub avg_temperature_c: Option<f64>,
    pub total_rainfall_mm: Option<f64>,
    pub avg_humidity_percent: Option<f64>,
    pub max_temperature_c: Option<f64>,
    pub min_temperature_c: Option<f64>,
    pub observation_count: u32,

    // Load metadata
    #[serde(rename = "warehouse_load_time", with = "clickhouse::serde::time::datetime")]
    pub load_time: OffsetDateTime,
    pub rows_loaded: u32,
    pub sync_interval_min: u16,
    pub load_mode: String,
}

impl MonthlyAggregate {
    pub fn new(key: MonthKey, stats: RollupStats, meta: &LoadMetadata, rows_loaded: u32) -> Self {
        Self {
            year: key.year,
            month: key.month,
            avg_temperature_c: stats.avg_temperature_c,
            total_rainfall_mm: stats.total_rainfall_mm,
            avg_humidity_percent: stats.avg_humidity_percent,
            max_temperature_c: stats.max_temperature_c,
            min_temperature_c: stats.min_temperature_c,
            observation_count: stats.observation_count,
            load_time: meta.load_time,
            rows_loaded,
            sync_interval_min: meta.sync_interval_min,
            load_mode: meta.load_mode.as_str().to_string(),
        }
    }

    pub fn key(&self) -> MonthKey {
        MonthKey::new(self.year, self.month)
    }
}
