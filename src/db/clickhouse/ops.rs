use anyhow::{Context, Result};
use async_trait::async_trait;
use log::{debug, info};
use time::OffsetDateTime;

use crate::{
    db::{
        clickhouse::client::ClickhouseClient,
        models::{DailyAggregate, MonthKey, MonthlyAggregate, Observation, Tier},
        store::Warehouse,
    },
    writer::DeletePredicate,
};

const OBSERVATIONS_TABLE: &str = "weather_observations";

/// Streams concrete rows through a fresh inserter, yielding the flushed row count.
macro_rules! insert_all {
    ($client:expr, $row:ty, $table:expr, $rows:expr) => {{
        let mut inserter = $client.create_inserter::<$row>($table);
        for row in $rows {
            inserter
                .write(row)
                .await
                .with_context(|| format!("Failed to write row into {}", $table))?;
            inserter.commit().await?;
        }
        let stats = inserter
            .end()
            .await
            .with_context(|| format!("Failed to flush inserter for {}", $table))?;
        debug!("Inserted {} rows into {}", stats.rows, $table);
        stats.rows
    }};
}

#[async_trait]
impl Warehouse for ClickhouseClient {
    async fn insert_observations(&self, rows: &[Observation]) -> Result<u64> {
        if rows.is_empty() {
            return Ok(0);
        }
        Ok(insert_all!(self, Observation, OBSERVATIONS_TABLE, rows))
    }

    async fn observations_between(
        &self,
        from: OffsetDateTime,
        to: OffsetDateTime,
    ) -> Result<Vec<Observation>> {
        // FINAL collapses re-ingested duplicates that have not been merged yet.
        let query = r#"
            SELECT ?fields
            FROM weather_observations FINAL
            WHERE timestamp >= toDateTime(?, 'UTC')
              AND timestamp < toDateTime(?, 'UTC')
            ORDER BY timestamp, station_id, observation_id
        "#;

        self.client
            .query(query)
            .bind(from.unix_timestamp())
            .bind(to.unix_timestamp())
            .fetch_all::<Observation>()
            .await
            .context("Failed to read observations")
    }

    async fn observation_months(&self) -> Result<Vec<MonthKey>> {
        let query = r#"
            SELECT DISTINCT
                toUInt16(toYear(timestamp)) AS year,
                toUInt8(toMonth(timestamp)) AS month
            FROM weather_observations
            ORDER BY year, month
        "#;

        self.client
            .query(query)
            .fetch_all::<MonthKey>()
            .await
            .context("Failed to list observation months")
    }

    async fn delete_window(&self, predicate: &DeletePredicate) -> Result<()> {
        let statement = predicate.to_sql();
        debug!("Executing {}", statement);

        self.client
            .query(&statement)
            .execute()
            .await
            .with_context(|| format!("Failed to delete {} {} keys", predicate.len(), predicate.tier()))?;

        info!("Deleted {} {} keys", predicate.len(), predicate.tier());
        Ok(())
    }

    async fn insert_daily(&self, rows: &[DailyAggregate]) -> Result<()> {
        insert_all!(self, DailyAggregate, Tier::Daily.table(), rows);
        Ok(())
    }

    async fn insert_monthly(&self, rows: &[MonthlyAggregate]) -> Result<()> {
        insert_all!(self, MonthlyAggregate, Tier::Monthly.table(), rows);
        Ok(())
    }

    async fn latest_daily(&self, limit: usize) -> Result<Vec<DailyAggregate>> {
        let query = r#"
            SELECT ?fields
            FROM daily_weather_aggregates FINAL
            ORDER BY date DESC
            LIMIT ?
        "#;

        let mut rows = self
            .client
            .query(query)
            .bind(limit as u64)
            .fetch_all::<DailyAggregate>()
            .await
            .context("Failed to read daily aggregates")?;
        rows.reverse();
        Ok(rows)
    }

    async fn latest_monthly(&self, limit: usize) -> Result<Vec<MonthlyAggregate>> {
        let query = r#"
            SELECT ?fields
            FROM monthly_weather_aggregates FINAL
            ORDER BY year DESC, month DESC
            LIMIT ?
        "#;

        let mut rows = self
            .client
            .query(query)
            .bind(limit as u64)
            .fetch_all::<MonthlyAggregate>()
            .await
            .context("Failed to read monthly aggregates")?;
        rows.reverse();
        Ok(rows)
    }

    async fn has_rollups(&self, tier: Tier) -> Result<bool> {
        let query = format!("SELECT count() FROM {}", tier.table());

        let count = self
            .client
            .query(&query)
            .fetch_one::<u64>()
            .await
            .with_context(|| format!("Failed to count {} aggregates", tier))?;
        Ok(count > 0)
    }
}
