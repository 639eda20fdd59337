//! Cron scheduler for the periodic jobs:
//! - running the rollup cycle over newly landed raw documents
//! - refreshing the snapshot cache from the warehouse rollups
//!
//! Both jobs also run once at startup, before the first tick.

use std::sync::Arc;

use anyhow::Result;
use log::{error, info};
use tokio_cron_scheduler::{Job, JobScheduler};
use tokio_util::sync::CancellationToken;

use crate::{
    config::Settings,
    db::{
        models::{CacheKey, LoadMode},
        Database,
    },
    freshness::FreshnessMonitor,
    pipeline::RollupCycle,
};

use super::jobs;

/// Cron scheduler that manages periodic background jobs.
pub struct CronScheduler {
    db: Arc<Database>,
    settings: Arc<Settings>,
    cycle: Arc<RollupCycle>,
    freshness: Arc<FreshnessMonitor>,
}

impl CronScheduler {
    pub fn new(db: Arc<Database>, settings: Arc<Settings>) -> Self {
        let cycle = RollupCycle::new(
            db.postgres.clone(),
            db.clickhouse.clone(),
            settings.ingest.clone(),
            settings.cron.sync_interval_min(),
        );

        let freshness = FreshnessMonitor::new(
            db.cache.clone(),
            db.clickhouse.clone(),
            settings.cache.namespace.clone(),
        );

        Self {
            db,
            settings,
            cycle: Arc::new(cycle),
            freshness: Arc::new(freshness),
        }
    }

    /// Starts the cron scheduler and runs until cancellation.
    pub async fn run(&self, cancellation_token: CancellationToken) -> Result<()> {
        let mut scheduler = JobScheduler::new().await?;

        // Register all jobs
        self.register_rollup_cycle_job(&scheduler).await?;
        self.register_refresh_cache_job(&scheduler).await?;

        // Start the scheduler
        scheduler.start().await?;
        info!("Cron scheduler started with {} jobs", 2);

        self.run_startup_jobs().await;

        // Wait for cancellation
        cancellation_token.cancelled().await;
        info!("Cron scheduler shutting down...");

        scheduler.shutdown().await?;
        Ok(())
    }

    async fn run_startup_jobs(&self) {
        let mode = if self.settings.cron.full_rollup_on_start {
            LoadMode::Full
        } else {
            LoadMode::Incremental
        };

        if let Err(e) = jobs::rollup_cycle::run(&self.cycle, self.db.postgres.as_ref(), mode).await {
            error!("Startup rollup cycle failed: {:#}", e);
        }

        if let Err(e) = jobs::refresh_cache::run(
            self.db.clickhouse.as_ref(),
            self.db.cache.as_ref(),
            &self.settings.cache,
        )
        .await
        {
            error!("Startup cache refresh failed: {:#}", e);
        }
        log_freshness(&self.freshness).await;
    }

    async fn register_rollup_cycle_job(&self, scheduler: &JobScheduler) -> Result<()> {
        let db = self.db.clone();
        let cycle = self.cycle.clone();
        let interval = self.settings.cron.rollup_interval_secs;

        let job = Job::new_repeated_async(
            std::time::Duration::from_secs(interval),
            move |_uuid, _lock| {
                let db = db.clone();
                let cycle = cycle.clone();
                Box::pin(async move {
                    if let Err(e) =
                        jobs::rollup_cycle::run(&cycle, db.postgres.as_ref(), LoadMode::Incremental).await
                    {
                        error!("Failed to run rollup cycle: {:#}", e);
                    }
                })
            },
        )?;

        scheduler.add(job).await?;
        info!("Registered rollup_cycle job (every {}s)", interval);
        Ok(())
    }

    async fn register_refresh_cache_job(&self, scheduler: &JobScheduler) -> Result<()> {
        let db = self.db.clone();
        let settings = self.settings.clone();
        let freshness = self.freshness.clone();
        let interval = self.settings.cron.cache_refresh_interval_secs;

        let job = Job::new_repeated_async(
            std::time::Duration::from_secs(interval),
            move |_uuid, _lock| {
                let db = db.clone();
                let settings = settings.clone();
                let freshness = freshness.clone();
                Box::pin(async move {
                    if let Err(e) = jobs::refresh_cache::run(
                        db.clickhouse.as_ref(),
                        db.cache.as_ref(),
                        &settings.cache,
                    )
                    .await
                    {
                        error!("Failed to refresh cache: {:#}", e);
                    }
                    log_freshness(&freshness).await;
                })
            },
        )?;

        scheduler.add(job).await?;
        info!("Registered refresh_cache job (every {}s)", interval);
        Ok(())
    }
}

async fn log_freshness(freshness: &FreshnessMonitor) {
    let keys = [CacheKey::MonthlyAverages, CacheKey::DailyAverages];
    let statuses = futures::future::join_all(keys.iter().map(|key| async move {
        (freshness.status(*key).await, freshness.cache_status(*key).await)
    }))
    .await;

    for (status, cache) in statuses {
        info!(
            "Freshness of {}: {} (exists: {}, ttl: {:?}s, version: {})",
            cache.key,
            status,
            cache.exists,
            cache.ttl_seconds,
            cache.data_version.as_deref().unwrap_or("-")
        );
    }
}
