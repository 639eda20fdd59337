use config::{Config, ConfigError, File};
use serde::Deserialize;

/// ClickHouse warehouse connection configuration.
///
/// Holds the canonical observations table and the daily/monthly
/// aggregate tables.
#[derive(Debug, Deserialize, Clone)]
pub struct ClickHouseSettings {
    pub url: String,
    pub user: String,
    pub password: String,
    pub database: String,
    #[serde(default = "default_insert_max_rows")]
    pub insert_max_rows: u64,
}

fn default_insert_max_rows() -> u64 {
    100_000
}

/// PostgreSQL document store configuration.
///
/// Used for storing:
/// - Raw provider documents (JSONB)
/// - Cron job checkpoints
#[derive(Debug, Deserialize, Clone)]
pub struct PostgresSettings {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub database: String,
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,
}

fn default_pool_size() -> usize {
    4
}

/// Location echoed into every cache envelope.
#[derive(Debug, Deserialize, Clone, PartialEq, serde::Serialize)]
pub struct LocationSettings {
    pub city: String,
    pub state: String,
}

/// Snapshot cache configuration.
#[derive(Debug, Deserialize, Clone)]
pub struct CacheSettings {
    /// Key prefix, e.g. `weather:stockton` yields `weather:stockton:daily_averages`
    #[serde(default = "default_cache_namespace")]
    pub namespace: String,
    /// Time-to-live of every snapshot, also published as `refresh_interval_sec`
    #[serde(default = "default_cache_ttl_secs")]
    pub ttl_secs: u64,
    #[serde(default = "default_cache_max_capacity")]
    pub max_capacity: u64,
    #[serde(default = "default_cache_daily_days")]
    pub daily_days: u32,
    #[serde(default = "default_cache_monthly_months")]
    pub monthly_months: u32,
    #[serde(default)]
    pub location: Option<LocationSettings>,
}

fn default_cache_namespace() -> String {
    "weather:stockton".to_string()
}

fn default_cache_ttl_secs() -> u64 {
    3600
}

fn default_cache_max_capacity() -> u64 {
    64
}

fn default_cache_daily_days() -> u32 {
    30
}

fn default_cache_monthly_months() -> u32 {
    12
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            namespace: default_cache_namespace(),
            ttl_secs: default_cache_ttl_secs(),
            max_capacity: default_cache_max_capacity(),
            daily_days: default_cache_daily_days(),
            monthly_months: default_cache_monthly_months(),
            location: None,
        }
    }
}

/// Normalizer sentinels for document shapes that carry no station reference.
#[derive(Debug, Deserialize, Clone)]
pub struct IngestSettings {
    #[serde(default = "default_legacy_station_id")]
    pub legacy_station_id: String,
    #[serde(default = "default_forecast_station_id")]
    pub forecast_station_id: String,
}

fn default_legacy_station_id() -> String {
    "legacy_daily".to_string()
}

fn default_forecast_station_id() -> String {
    "forecast".to_string()
}

impl Default for IngestSettings {
    fn default() -> Self {
        Self {
            legacy_station_id: default_legacy_station_id(),
            forecast_station_id: default_forecast_station_id(),
        }
    }
}

/// Cron intervals for the rollup cycle and the cache refresh.
#[derive(Debug, Deserialize, Clone)]
pub struct CronIntervals {
    #[serde(default = "default_rollup_interval_secs")]
    pub rollup_interval_secs: u64,
    #[serde(default = "default_cache_refresh_interval_secs")]
    pub cache_refresh_interval_secs: u64,
    /// Run the first rollup cycle over every month in the warehouse
    #[serde(default)]
    pub full_rollup_on_start: bool,
}

fn default_rollup_interval_secs() -> u64 {
    3600
}

fn default_cache_refresh_interval_secs() -> u64 {
    1800
}

impl Default for CronIntervals {
    fn default() -> Self {
        Self {
            rollup_interval_secs: default_rollup_interval_secs(),
            cache_refresh_interval_secs: default_cache_refresh_interval_secs(),
            full_rollup_on_start: false,
        }
    }
}

impl CronIntervals {
    /// Rollup interval in whole minutes, stamped on aggregate rows.
    pub fn sync_interval_min(&self) -> u16 {
        (self.rollup_interval_secs / 60).min(u16::MAX as u64) as u16
    }
}

/// Root application configuration.
///
/// Loaded from `config.yaml` at startup.
#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    pub clickhouse: ClickHouseSettings,
    pub postgres: PostgresSettings,
    #[serde(default)]
    pub cache: CacheSettings,
    #[serde(default)]
    pub ingest: IngestSettings,
    #[serde(default)]
    pub cron: CronIntervals,
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        let s = Config::builder()
            .add_source(File::with_name("config"))
            .build()?;

        let settings: Settings = s.try_deserialize()?;

        Ok(settings)
    }
}
