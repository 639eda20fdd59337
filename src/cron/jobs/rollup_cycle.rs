//! Job running one rollup cycle over the documents that landed since the last
//! successful run.
//!
//! The checkpoint only advances when both tiers were written, so a failed or
//! partially failed cycle is retried from the same point on the next tick.

use anyhow::Result;
use log::{info, warn};
use time::OffsetDateTime;

use crate::{
    db::{
        models::LoadMode,
        store::{CheckpointStore, FetchWindow},
    },
    pipeline::{CycleReport, RollupCycle},
};

pub const JOB_NAME: &str = "rollup_cycle";

pub async fn run(cycle: &RollupCycle, checkpoints: &dyn CheckpointStore, mode: LoadMode) -> Result<()> {
    run_at(cycle, checkpoints, mode, OffsetDateTime::now_utc()).await?;
    Ok(())
}

pub async fn run_at(
    cycle: &RollupCycle,
    checkpoints: &dyn CheckpointStore,
    mode: LoadMode,
    now: OffsetDateTime,
) -> Result<CycleReport> {
    info!("Starting rollup_cycle job ({})...", mode.as_str());

    let start = std::time::Instant::now();

    let since = checkpoints.get_checkpoint(JOB_NAME).await?;
    let window = FetchWindow {
        since,
        until: now,
    };

    let report = cycle.run_at(window, mode, now).await?;

    if report.is_complete() {
        checkpoints.set_checkpoint(JOB_NAME, now).await?;
    } else {
        warn!("Rollup cycle left a tier unwritten, checkpoint stays at {:?}", since);
    }

    info!(
        "Completed rollup_cycle job in {:?} ({} documents, {} observations, {} skipped, {} months, daily {:?}, monthly {:?})",
        start.elapsed(),
        report.documents,
        report.normalized.observations,
        report.normalized.skipped,
        report.affected_months.len(),
        report.daily,
        report.monthly
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::{
        config::IngestSettings,
        db::memory::{MemoryCheckpoints, MemoryDocumentSource, MemoryWarehouse},
        pipeline::{CycleError, Stage},
    };
    use serde_json::json;
    use time::macros::datetime;

    #[tokio::test]
    async fn test_checkpoint_advances_only_on_success() {
        let source = Arc::new(MemoryDocumentSource::default());
        let warehouse = Arc::new(MemoryWarehouse::default());
        let checkpoints = MemoryCheckpoints::default();
        let cycle = RollupCycle::new(source.clone(), warehouse.clone(), IngestSettings::default(), 60);

        source.push(
            datetime!(2024-03-01 12:00 UTC),
            json!({ "_id": "a", "date": "2024-03-01", "max_temp_c": 20.0, "min_temp_c": 10.0 }),
        );

        let first = datetime!(2024-03-02 00:00 UTC);
        run_at(&cycle, &checkpoints, LoadMode::Incremental, first).await.unwrap();
        assert_eq!(checkpoints.get_checkpoint(JOB_NAME).await.unwrap(), Some(first));

        source.fail(true);
        let second = datetime!(2024-03-03 00:00 UTC);
        let err = run_at(&cycle, &checkpoints, LoadMode::Incremental, second)
            .await
            .unwrap_err();
        let cycle_err = err.downcast_ref::<CycleError>().unwrap();
        assert_eq!(cycle_err.stage(), Stage::Fetch);
        assert_eq!(checkpoints.get_checkpoint(JOB_NAME).await.unwrap(), Some(first));
    }

    #[tokio::test]
    async fn test_window_starts_at_checkpoint() {
        let source = Arc::new(MemoryDocumentSource::default());
        let warehouse = Arc::new(MemoryWarehouse::default());
        let checkpoints = MemoryCheckpoints::default();
        let cycle = RollupCycle::new(source.clone(), warehouse.clone(), IngestSettings::default(), 60);

        source.push(
            datetime!(2024-03-01 12:00 UTC),
            json!({ "_id": "a", "date": "2024-03-01", "max_temp_c": 20.0 }),
        );
        run_at(&cycle, &checkpoints, LoadMode::Incremental, datetime!(2024-03-02 00:00 UTC))
            .await
            .unwrap();

        let report = run_at(&cycle, &checkpoints, LoadMode::Incremental, datetime!(2024-03-03 00:00 UTC))
            .await
            .unwrap();
        assert_eq!(report.window.since, Some(datetime!(2024-03-02 00:00 UTC)));
        assert_eq!(report.documents, 0);
        assert_eq!(warehouse.merged_daily().len(), 1);
    }
}
