use std::sync::Arc;

use log::info;

use crate::config::Settings;

pub mod cache;
pub mod clickhouse;
#[cfg(test)]
pub mod memory;
pub mod models;
pub mod postgres;
pub mod store;

pub use self::cache::MokaSnapshotCache;
pub use self::clickhouse::ClickhouseClient;
pub use self::postgres::PostgresClient;
pub use self::store::{CheckpointStore, FetchWindow, RawDocumentSource, SnapshotCache, Warehouse};

/// Production collaborators.
///
/// ClickHouse is the warehouse (observations and both aggregate tiers).
/// PostgreSQL holds the raw provider documents and the cron checkpoints.
/// The snapshot cache lives in process.
#[derive(Clone)]
pub struct Database {
    pub clickhouse: Arc<ClickhouseClient>,
    pub postgres: Arc<PostgresClient>,
    pub cache: Arc<MokaSnapshotCache>,
}

impl Database {
    pub async fn new(settings: Arc<Settings>) -> anyhow::Result<Self> {
        let clickhouse = ClickhouseClient::new(settings.clickhouse.clone()).await?;
        let postgres = PostgresClient::new(settings.postgres.clone()).await?;

        // Run migrations
        clickhouse.migrate().await?;
        postgres.migrate().await?;

        let cache = MokaSnapshotCache::new(&settings.cache);
        info!("Snapshot cache ready (ttl {}s)", settings.cache.ttl_secs);

        Ok(Self {
            clickhouse: Arc::new(clickhouse),
            postgres: Arc::new(postgres),
            cache: Arc::new(cache),
        })
    }
}
