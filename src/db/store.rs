//! Collaborator seams of the rollup engine.
//!
//! Each trait has one production adapter (ClickHouse, PostgreSQL, moka) and an
//! in-memory fake for tests. Adapters return `anyhow::Result`; the pipeline
//! maps failures onto its own error taxonomy.

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use time::OffsetDateTime;

use crate::{
    db::models::{CacheEnvelope, DailyAggregate, MonthKey, MonthlyAggregate, Observation, Tier},
    writer::DeletePredicate,
};

/// Half-open ingest-time window `[since, until)`. `since = None` reads from the beginning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchWindow {
    pub since: Option<OffsetDateTime>,
    pub until: OffsetDateTime,
}

impl FetchWindow {
    pub fn contains(&self, ts: OffsetDateTime) -> bool {
        self.since.map_or(true, |since| ts >= since) && ts < self.until
    }
}

/// Read side of the raw provider document store.
#[async_trait]
pub trait RawDocumentSource: Send + Sync {
    async fn fetch(&self, window: FetchWindow) -> Result<Vec<Value>>;
}

/// Canonical observation table plus both aggregate tiers.
///
/// The aggregate tables merge additively: inserting a key that already exists
/// sums the rows. Only the replace-window writer may call the delete/insert pair.
#[async_trait]
pub trait Warehouse: Send + Sync {
    /// Loads observations; rows with an existing `(timestamp, station_id, id)` replace it.
    async fn insert_observations(&self, rows: &[Observation]) -> Result<u64>;

    /// Observations with `from <= timestamp < to`.
    async fn observations_between(
        &self,
        from: OffsetDateTime,
        to: OffsetDateTime,
    ) -> Result<Vec<Observation>>;

    /// Every calendar month holding at least one observation, ascending.
    async fn observation_months(&self) -> Result<Vec<MonthKey>>;

    async fn delete_window(&self, predicate: &DeletePredicate) -> Result<()>;

    async fn insert_daily(&self, rows: &[DailyAggregate]) -> Result<()>;

    async fn insert_monthly(&self, rows: &[MonthlyAggregate]) -> Result<()>;

    /// The `limit` most recent days, oldest first.
    async fn latest_daily(&self, limit: usize) -> Result<Vec<DailyAggregate>>;

    /// The `limit` most recent months, oldest first.
    async fn latest_monthly(&self, limit: usize) -> Result<Vec<MonthlyAggregate>>;

    async fn has_rollups(&self, tier: Tier) -> Result<bool>;
}

/// Snapshot cache holding one envelope per qualified key.
#[async_trait]
pub trait SnapshotCache: Send + Sync {
    /// Replaces the entry wholesale.
    async fn put(&self, key: &str, envelope: &CacheEnvelope) -> Result<()>;

    async fn get(&self, key: &str) -> Result<Option<CacheEnvelope>>;
}

/// Last successful run per job.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    async fn get_checkpoint(&self, job_name: &str) -> Result<Option<OffsetDateTime>>;

    async fn set_checkpoint(&self, job_name: &str, last_run_at: OffsetDateTime) -> Result<()>;
}
