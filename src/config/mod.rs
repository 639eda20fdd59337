//! Application settings loaded from `config.yaml`.

#[allow(clippy::module_inception)]
mod config;

pub use self::config::{
    CacheSettings, ClickHouseSettings, CronIntervals, IngestSettings, LocationSettings,
    PostgresSettings, Settings,
};
