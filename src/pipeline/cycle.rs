use std::sync::Arc;

use log::{error, info};
use time::OffsetDateTime;

use crate::{
    config::IngestSettings,
    db::{
        models::{DailyAggregate, LoadMetadata, LoadMode, MonthKey, MonthlyAggregate, Observation},
        store::{FetchWindow, RawDocumentSource, Warehouse},
    },
    ingest::{NormalizeSummary, Normalizer},
    pipeline::errors::{CycleError, Stage},
    rollup::{bucket_hourly, rollup_daily, rollup_monthly},
    writer::{PredicateError, ReplaceWindowWriter, TierWrite, WriteError},
};

/// What happened to one aggregate tier during a cycle.
#[derive(Debug, Clone, PartialEq)]
pub enum TierOutcome {
    Written(TierWrite),
    /// Key validation failed; nothing was deleted or inserted for the tier.
    Failed(PredicateError),
}

impl TierOutcome {
    pub fn is_failed(&self) -> bool {
        matches!(self, TierOutcome::Failed(_))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CycleReport {
    pub window: FetchWindow,
    pub load_mode: LoadMode,
    pub documents: usize,
    pub normalized: NormalizeSummary,
    pub observations_loaded: u64,
    pub affected_months: Vec<MonthKey>,
    pub daily: TierOutcome,
    pub monthly: TierOutcome,
}

impl CycleReport {
    /// Both tiers written or skipped.
    pub fn is_complete(&self) -> bool {
        !self.daily.is_failed() && !self.monthly.is_failed()
    }
}

/// One ingestion-plus-rollup pass:
/// fetch -> normalize -> load -> read back affected months -> bucket -> daily
/// -> monthly -> replace-window write.
pub struct RollupCycle {
    source: Arc<dyn RawDocumentSource>,
    warehouse: Arc<dyn Warehouse>,
    normalizer: Normalizer,
    writer: ReplaceWindowWriter,
    sync_interval_min: u16,
}

impl RollupCycle {
    pub fn new(
        source: Arc<dyn RawDocumentSource>,
        warehouse: Arc<dyn Warehouse>,
        ingest: IngestSettings,
        sync_interval_min: u16,
    ) -> Self {
        Self {
            source,
            writer: ReplaceWindowWriter::new(warehouse.clone()),
            warehouse,
            normalizer: Normalizer::new(ingest),
            sync_interval_min,
        }
    }

    pub async fn run(&self, window: FetchWindow, mode: LoadMode) -> Result<CycleReport, CycleError> {
        self.run_at(window, mode, OffsetDateTime::now_utc()).await
    }

    /// Runs the cycle with `now` as ingest time and load time. Re-running the
    /// same window at the same `now` leaves the warehouse unchanged.
    pub async fn run_at(
        &self,
        window: FetchWindow,
        mode: LoadMode,
        now: OffsetDateTime,
    ) -> Result<CycleReport, CycleError> {
        let documents = self
            .source
            .fetch(window)
            .await
            .map_err(CycleError::connectivity(Stage::Fetch))?;
        info!("Fetched {} raw documents", documents.len());

        let normalized = self.normalizer.normalize_batch(&documents, now);
        normalized.log_summary();

        let observations_loaded = self
            .warehouse
            .insert_observations(&normalized.observations)
            .await
            .map_err(CycleError::connectivity(Stage::LoadObservations))?;

        let affected_months = match mode {
            LoadMode::Incremental => months_of(&normalized.observations),
            LoadMode::Full => self
                .warehouse
                .observation_months()
                .await
                .map_err(CycleError::connectivity(Stage::ReadBack))?,
        };

        let observations = self.read_back(&affected_months).await?;

        let meta = LoadMetadata {
            load_time: now,
            sync_interval_min: self.sync_interval_min,
            load_mode: mode,
        };
        let buckets = bucket_hourly(&observations);
        let daily = rollup_daily(&buckets, &meta);
        let monthly = rollup_monthly(&daily, &meta);
        info!(
            "Rolled up {} observations into {} hours, {} days, {} months",
            observations.len(),
            buckets.len(),
            daily.len(),
            monthly.len()
        );

        let (daily_outcome, monthly_outcome) = self.write_tiers(&daily, &monthly).await?;

        Ok(CycleReport {
            window,
            load_mode: mode,
            documents: documents.len(),
            normalized: normalized.summary(),
            observations_loaded,
            affected_months,
            daily: daily_outcome,
            monthly: monthly_outcome,
        })
    }

    /// All stored observations of the given months.
    async fn read_back(&self, months: &[MonthKey]) -> Result<Vec<Observation>, CycleError> {
        let mut observations = Vec::new();

        for month in months {
            let (Some(first), Some(next)) = (month.first_day(), month.next_first_day()) else {
                error!("Skipping invalid month key {}", month);
                continue;
            };
            let rows = self
                .warehouse
                .observations_between(first.midnight().assume_utc(), next.midnight().assume_utc())
                .await
                .map_err(CycleError::connectivity(Stage::ReadBack))?;
            observations.extend(rows);
        }

        Ok(observations)
    }

    /// Daily first, then monthly. A predicate failure fails only its own tier;
    /// a connectivity failure aborts the cycle.
    pub(crate) async fn write_tiers(
        &self,
        daily: &[DailyAggregate],
        monthly: &[MonthlyAggregate],
    ) -> Result<(TierOutcome, TierOutcome), CycleError> {
        let daily_outcome = tier_outcome(self.writer.replace_daily(daily).await, Stage::WriteDaily)?;
        let monthly_outcome =
            tier_outcome(self.writer.replace_monthly(monthly).await, Stage::WriteMonthly)?;
        Ok((daily_outcome, monthly_outcome))
    }
}

fn tier_outcome(result: Result<TierWrite, WriteError>, stage: Stage) -> Result<TierOutcome, CycleError> {
    match result {
        Ok(write) => Ok(TierOutcome::Written(write)),
        Err(WriteError::Predicate(e)) => {
            error!("Aborting {}: {}", stage, e);
            Ok(TierOutcome::Failed(e))
        },
        Err(e @ WriteError::Connectivity { .. }) => Err(CycleError::Connectivity {
            stage,
            source: e.into(),
        }),
    }
}

/// Distinct months of a set of observations, ascending.
fn months_of(observations: &[Observation]) -> Vec<MonthKey> {
    let mut months: Vec<MonthKey> = observations
        .iter()
        .map(|o| MonthKey::of(o.timestamp.date()))
        .collect();
    months.sort();
    months.dedup();
    months
}
