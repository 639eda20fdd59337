//! Replace-window writer for the aggregate tiers.
//!
//! The aggregate tables merge additively, so inserting a recomputed row on top
//! of an existing one would double it. Each tier write therefore deletes exactly
//! the keys being written and then inserts the fresh rows. The pair is not
//! transactional: a failure after the delete leaves a gap until the next cycle
//! rewrites the same keys.

use std::sync::Arc;

use log::info;
use tokio::sync::Mutex;

use crate::db::{
    models::{DailyAggregate, MonthlyAggregate, Tier},
    store::Warehouse,
};

pub mod predicate;

pub use predicate::{DeletePredicate, PredicateError, MAX_WAREHOUSE_DATE, MIN_WAREHOUSE_DATE};

#[derive(thiserror::Error, Debug)]
pub enum WriteError {
    #[error(transparent)]
    Predicate(#[from] PredicateError),
    #[error("{tier} {operation} failed")]
    Connectivity {
        tier: Tier,
        operation: &'static str,
        #[source]
        source: anyhow::Error,
    },
}

/// Outcome of one tier write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TierWrite {
    /// Nothing computed for the tier; no statement issued.
    Skipped,
    Replaced { keys: usize, rows: usize },
}

/// The only code path that mutates persisted aggregate rows.
pub struct ReplaceWindowWriter {
    warehouse: Arc<dyn Warehouse>,
    daily_lock: Mutex<()>,
    monthly_lock: Mutex<()>,
}

impl ReplaceWindowWriter {
    pub fn new(warehouse: Arc<dyn Warehouse>) -> Self {
        Self {
            warehouse,
            daily_lock: Mutex::new(()),
            monthly_lock: Mutex::new(()),
        }
    }

    pub async fn replace_daily(&self, rows: &[DailyAggregate]) -> Result<TierWrite, WriteError> {
        if rows.is_empty() {
            info!("No daily rows computed, skipping daily write");
            return Ok(TierWrite::Skipped);
        }

        let predicate = DeletePredicate::daily(rows.iter().map(|r| r.date))?;

        let _guard = self.daily_lock.lock().await;
        self.delete(&predicate).await?;
        self.warehouse
            .insert_daily(rows)
            .await
            .map_err(|source| WriteError::Connectivity {
                tier: Tier::Daily,
                operation: "insert",
                source,
            })?;

        info!("Replaced {} daily rows", rows.len());
        Ok(TierWrite::Replaced {
            keys: predicate.len(),
            rows: rows.len(),
        })
    }

    pub async fn replace_monthly(&self, rows: &[MonthlyAggregate]) -> Result<TierWrite, WriteError> {
        if rows.is_empty() {
            info!("No monthly rows computed, skipping monthly write");
            return Ok(TierWrite::Skipped);
        }

        let predicate = DeletePredicate::monthly(rows.iter().map(MonthlyAggregate::key))?;

        let _guard = self.monthly_lock.lock().await;
        self.delete(&predicate).await?;
        self.warehouse
            .insert_monthly(rows)
            .await
            .map_err(|source| WriteError::Connectivity {
                tier: Tier::Monthly,
                operation: "insert",
                source,
            })?;

        info!("Replaced {} monthly rows", rows.len());
        Ok(TierWrite::Replaced {
            keys: predicate.len(),
            rows: rows.len(),
        })
    }

    async fn delete(&self, predicate: &DeletePredicate) -> Result<(), WriteError> {
        self.warehouse
            .delete_window(predicate)
            .await
            .map_err(|source| WriteError::Connectivity {
                tier: predicate.tier(),
                operation: "delete",
                source,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{
        memory::MemoryWarehouse,
        models::{LoadMetadata, LoadMode, MonthKey, RollupStats},
    };
    use time::{
        macros::{date, datetime},
        Date,
    };

    fn meta() -> LoadMetadata {
        LoadMetadata {
            load_time: datetime!(2024-04-01 00:00 UTC),
            sync_interval_min: 60,
            load_mode: LoadMode::Incremental,
        }
    }

    fn month(key: MonthKey, rain: f64) -> MonthlyAggregate {
        let stats = RollupStats {
            avg_temperature_c: Some(12.0),
            total_rainfall_mm: Some(rain),
            observation_count: 10,
            ..RollupStats::default()
        };
        MonthlyAggregate::new(key, stats, &meta(), 1)
    }

    fn day(date: Date, rain: f64) -> DailyAggregate {
        let stats = RollupStats {
            total_rainfall_mm: Some(rain),
            observation_count: 1,
            ..RollupStats::default()
        };
        DailyAggregate::new(date, stats, &meta(), 1)
    }

    #[tokio::test]
    async fn test_rewrite_replaces_instead_of_summing() {
        let warehouse = Arc::new(MemoryWarehouse::default());
        let writer = ReplaceWindowWriter::new(warehouse.clone());
        let key = MonthKey::new(2024, 3);

        writer.replace_monthly(&[month(key, 3.0)]).await.unwrap();
        writer.replace_monthly(&[month(key, 5.0)]).await.unwrap();

        let rows = warehouse.merged_monthly();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].total_rainfall_mm, Some(5.0));
        assert_eq!(rows[0].observation_count, 10);
    }

    #[tokio::test]
    async fn test_untouched_keys_survive() {
        let warehouse = Arc::new(MemoryWarehouse::default());
        let writer = ReplaceWindowWriter::new(warehouse.clone());

        writer
            .replace_daily(&[day(date!(2024 - 03 - 01), 1.0), day(date!(2024 - 03 - 02), 2.0)])
            .await
            .unwrap();
        let outcome = writer.replace_daily(&[day(date!(2024 - 03 - 02), 7.0)]).await.unwrap();

        assert_eq!(
            outcome,
            TierWrite::Replaced {
                keys: 1,
                rows: 1
            }
        );
        let rain: Vec<Option<f64>> =
            warehouse.merged_daily().iter().map(|d| d.total_rainfall_mm).collect();
        assert_eq!(rain, vec![Some(1.0), Some(7.0)]);
    }

    #[tokio::test]
    async fn test_empty_rows_issue_no_statements() {
        let warehouse = Arc::new(MemoryWarehouse::default());
        let writer = ReplaceWindowWriter::new(warehouse.clone());

        assert_eq!(writer.replace_daily(&[]).await.unwrap(), TierWrite::Skipped);
        assert_eq!(writer.replace_monthly(&[]).await.unwrap(), TierWrite::Skipped);
        assert_eq!(warehouse.delete_count(), 0);
    }

    #[tokio::test]
    async fn test_invalid_keys_abort_before_delete() {
        let warehouse = Arc::new(MemoryWarehouse::default());
        let writer = ReplaceWindowWriter::new(warehouse.clone());
        writer.replace_monthly(&[month(MonthKey::new(2024, 3), 3.0)]).await.unwrap();

        let duplicated = [month(MonthKey::new(2024, 3), 5.0), month(MonthKey::new(2024, 3), 5.0)];
        let err = writer.replace_monthly(&duplicated).await.unwrap_err();

        assert!(matches!(err, WriteError::Predicate(PredicateError::DuplicateKey { .. })));
        assert_eq!(warehouse.delete_count(), 1);
        assert_eq!(warehouse.merged_monthly()[0].total_rainfall_mm, Some(3.0));
    }

    #[tokio::test]
    async fn test_failed_delete_is_connectivity() {
        let warehouse = Arc::new(MemoryWarehouse::default());
        warehouse.fail_deletes(true);
        let writer = ReplaceWindowWriter::new(warehouse.clone());

        let err = writer.replace_daily(&[day(date!(2024 - 03 - 01), 1.0)]).await.unwrap_err();
        assert!(matches!(
            err,
            WriteError::Connectivity {
                tier: Tier::Daily,
                operation: "delete",
                ..
            }
        ));
        assert!(warehouse.merged_daily().is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_daily_writes_do_not_interleave() {
        let warehouse = Arc::new(MemoryWarehouse::default());
        let writer = ReplaceWindowWriter::new(warehouse.clone());
        let first = [day(date!(2024 - 03 - 01), 3.0)];
        let second = [day(date!(2024 - 03 - 01), 5.0)];

        let (a, b) = tokio::join!(writer.replace_daily(&first), writer.replace_daily(&second));
        a.unwrap();
        b.unwrap();

        assert_eq!(
            warehouse.calls(),
            vec!["delete daily", "insert daily", "delete daily", "insert daily"]
        );
        let rows = warehouse.merged_daily();
        assert_eq!(rows.len(), 1);
        assert!(matches!(rows[0].total_rainfall_mm, Some(r) if r == 3.0 || r == 5.0));
    }

    #[tokio::test]
    async fn test_monthly_write_does_not_wait_for_daily_lock() {
        let warehouse = Arc::new(MemoryWarehouse::default());
        let writer = ReplaceWindowWriter::new(warehouse.clone());
        let days = [day(date!(2024 - 03 - 01), 1.0)];
        let months = [month(MonthKey::new(2024, 3), 1.0)];

        let (a, b) = tokio::join!(writer.replace_daily(&days), writer.replace_monthly(&months));
        a.unwrap();
        b.unwrap();

        let calls = warehouse.calls();
        let position = |call: &str| calls.iter().position(|c| c == call).unwrap();
        assert_eq!(calls.len(), 4);
        assert!(position("delete monthly") < position("insert daily"));
        assert!(position("delete daily") < position("insert daily"));
        assert!(position("delete monthly") < position("insert monthly"));
    }
}
