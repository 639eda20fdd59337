pub mod config;
pub mod cron;
pub mod db;
pub mod freshness;
pub mod ingest;
pub mod pipeline;
pub mod rollup;
pub mod writer;

pub use config::Settings;
pub use cron::CronScheduler;
pub use db::Database;
pub use freshness::{CacheStatus, FreshnessMonitor, FreshnessStatus};
pub use pipeline::RollupCycle;
