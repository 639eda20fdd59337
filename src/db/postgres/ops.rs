use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::{debug, error};
use serde_json::Value;
use time::OffsetDateTime;

use crate::db::{
    postgres::PostgresClient,
    store::{CheckpointStore, FetchWindow, RawDocumentSource},
};

// Convert from time::OffsetDateTime (application) to chrono::DateTime<Utc> (postgres)
fn to_chrono(ts: OffsetDateTime) -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp(ts.unix_timestamp(), ts.nanosecond()).unwrap_or_default()
}

fn from_chrono(ts: DateTime<Utc>) -> Result<OffsetDateTime> {
    Ok(OffsetDateTime::from_unix_timestamp(ts.timestamp())?
        .replace_nanosecond(ts.timestamp_subsec_nanos())?)
}

impl PostgresClient {
    // ==================== RAW DOCUMENTS ====================

    /// Raw provider documents that landed in `[since, until)`, oldest first.
    pub async fn get_raw_documents(&self, window: FetchWindow) -> Result<Vec<Value>> {
        let client = self.pool.get().await?;
        let query = r#"
            SELECT body
            FROM weather.raw_documents
            WHERE ($1::timestamptz IS NULL OR ingested_at >= $1)
              AND ingested_at < $2
            ORDER BY ingested_at, id
        "#;

        let since = window.since.map(to_chrono);
        let until = to_chrono(window.until);

        let rows = client
            .query(query, &[&since, &until])
            .await
            .context("Failed to read raw documents")?;

        debug!("Fetched {} raw documents", rows.len());
        Ok(rows.iter().map(|row| row.get::<_, Value>("body")).collect())
    }

    // ==================== CRON CHECKPOINTS ====================

    /// Get last run timestamp for a cron job
    pub async fn get_cron_checkpoint(&self, job_name: &str) -> Result<Option<OffsetDateTime>> {
        let client = self.pool.get().await?;
        let query = "SELECT last_run_at FROM weather.cron_checkpoints WHERE job_name = $1";

        let row = client.query_opt(query, &[&job_name]).await?;

        match row.and_then(|r| r.get::<_, Option<DateTime<Utc>>>("last_run_at")) {
            Some(last_run) => Ok(Some(from_chrono(last_run)?)),
            None => Ok(None),
        }
    }

    /// Set last run timestamp for a cron job
    pub async fn set_cron_checkpoint(&self, job_name: &str, last_run_at: OffsetDateTime) -> Result<()> {
        let client = self.pool.get().await?;
        let query = r#"
            INSERT INTO weather.cron_checkpoints (job_name, last_run_at, updated_at)
            VALUES ($1, $2, NOW())
            ON CONFLICT (job_name) DO UPDATE SET
                last_run_at = EXCLUDED.last_run_at,
                updated_at = NOW()
        "#;

        client
            .execute(query, &[&job_name, &to_chrono(last_run_at)])
            .await
            .map_err(|e| {
                error!("Failed to update checkpoint for cron job {}: {:?}", job_name, e);
                e
            })?;

        Ok(())
    }
}

#[async_trait]
impl RawDocumentSource for PostgresClient {
    async fn fetch(&self, window: FetchWindow) -> Result<Vec<Value>> {
        self.get_raw_documents(window).await
    }
}

#[async_trait]
impl CheckpointStore for PostgresClient {
    async fn get_checkpoint(&self, job_name: &str) -> Result<Option<OffsetDateTime>> {
        self.get_cron_checkpoint(job_name).await
    }

    async fn set_checkpoint(&self, job_name: &str, last_run_at: OffsetDateTime) -> Result<()> {
        self.set_cron_checkpoint(job_name, last_run_at).await
    }
}
