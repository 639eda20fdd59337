//! Tri-state freshness verdict for downstream readers.
//!
//! Read-only: never writes the cache or the warehouse.

use std::{fmt, sync::Arc};

use log::warn;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::db::{
    models::{CacheKey, Tier},
    store::{SnapshotCache, Warehouse},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FreshnessStatus {
    /// A snapshot exists and its TTL has not elapsed.
    Full,
    /// No valid snapshot, but the warehouse holds rollups for the key's tier.
    Partial,
    /// Neither a valid snapshot nor rollups are available.
    OutOfSync,
}

impl fmt::Display for FreshnessStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FreshnessStatus::Full => write!(f, "full"),
            FreshnessStatus::Partial => write!(f, "partial"),
            FreshnessStatus::OutOfSync => write!(f, "out-of-sync"),
        }
    }
}

/// Per-key view of the snapshot cache.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CacheStatus {
    pub key: String,
    pub exists: bool,
    /// Whole seconds left before the snapshot expires, `None` once expired or absent.
    pub ttl_seconds: Option<i64>,
    pub fresh: bool,
    pub data_version: Option<String>,
}

fn tier_of(key: CacheKey) -> Tier {
    match key {
        CacheKey::MonthlyAverages => Tier::Monthly,
        CacheKey::DailyAverages => Tier::Daily,
    }
}

pub struct FreshnessMonitor {
    cache: Arc<dyn SnapshotCache>,
    warehouse: Arc<dyn Warehouse>,
    namespace: String,
}

impl FreshnessMonitor {
    pub fn new(cache: Arc<dyn SnapshotCache>, warehouse: Arc<dyn Warehouse>, namespace: String) -> Self {
        Self {
            cache,
            warehouse,
            namespace,
        }
    }

    pub async fn status(&self, key: CacheKey) -> FreshnessStatus {
        self.status_at(key, OffsetDateTime::now_utc()).await
    }

    /// Verdict at an explicit instant. Collaborator failures count as "absent".
    pub async fn status_at(&self, key: CacheKey, now: OffsetDateTime) -> FreshnessStatus {
        if self.cache_status_at(key, now).await.fresh {
            return FreshnessStatus::Full;
        }

        let tier = tier_of(key);
        match self.warehouse.has_rollups(tier).await {
            Ok(true) => FreshnessStatus::Partial,
            Ok(false) => FreshnessStatus::OutOfSync,
            Err(e) => {
                warn!("Checking {} rollups failed: {:#}", tier, e);
                FreshnessStatus::OutOfSync
            },
        }
    }

    pub async fn cache_status(&self, key: CacheKey) -> CacheStatus {
        self.cache_status_at(key, OffsetDateTime::now_utc()).await
    }

    /// An unreadable cache reports the key as missing.
    pub async fn cache_status_at(&self, key: CacheKey, now: OffsetDateTime) -> CacheStatus {
        let qualified = key.qualified(&self.namespace);

        let envelope = match self.cache.get(&qualified).await {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!("Snapshot lookup for {} failed: {:#}", qualified, e);
                None
            },
        };

        let ttl_seconds = envelope
            .as_ref()
            .and_then(|e| e.remaining_ttl(now))
            .map(|ttl| ttl.whole_seconds());

        CacheStatus {
            key: qualified,
            exists: envelope.is_some(),
            ttl_seconds,
            fresh: ttl_seconds.is_some(),
            data_version: envelope.map(|e| e.data_version),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{
        memory::{MemoryCache, MemoryWarehouse},
        models::{
            next_data_version, CacheEnvelope, LoadMetadata, LoadMode, MonthKey, MonthlyAggregate,
            RollupStats,
        },
    };
    use time::{macros::datetime, Duration};

    const NAMESPACE: &str = "weather:stockton";
    const WRITTEN: OffsetDateTime = datetime!(2024-03-02 12:00 UTC);

    struct Fixture {
        cache: Arc<MemoryCache>,
        warehouse: Arc<MemoryWarehouse>,
        monitor: FreshnessMonitor,
    }

    fn fixture() -> Fixture {
        let cache = Arc::new(MemoryCache::default());
        let warehouse = Arc::new(MemoryWarehouse::default());
        let monitor = FreshnessMonitor::new(cache.clone(), warehouse.clone(), NAMESPACE.to_string());
        Fixture {
            cache,
            warehouse,
            monitor,
        }
    }

    fn monthly_rows() -> Vec<MonthlyAggregate> {
        let meta = LoadMetadata {
            load_time: WRITTEN,
            sync_interval_min: 60,
            load_mode: LoadMode::Full,
        };
        let stats = RollupStats {
            avg_temperature_c: Some(11.0),
            observation_count: 3,
            ..RollupStats::default()
        };
        vec![MonthlyAggregate::new(MonthKey::new(2024, 2), stats, &meta, 1)]
    }

    async fn write_snapshot(fixture: &Fixture) {
        let envelope = CacheEnvelope::monthly(
            &monthly_rows(),
            WRITTEN,
            next_data_version(WRITTEN, None),
            3600,
            None,
        )
        .unwrap();
        fixture
            .cache
            .put(&CacheKey::MonthlyAverages.qualified(NAMESPACE), &envelope)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_transitions_with_one_hour_ttl() {
        let fixture = fixture();
        fixture.warehouse.insert_monthly(&monthly_rows()).await.unwrap();
        write_snapshot(&fixture).await;
        let key = CacheKey::MonthlyAverages;

        assert_eq!(fixture.monitor.status_at(key, WRITTEN).await, FreshnessStatus::Full);
        assert_eq!(
            fixture.monitor.status_at(key, WRITTEN + Duration::minutes(59)).await,
            FreshnessStatus::Full
        );
        assert_eq!(
            fixture.monitor.status_at(key, WRITTEN + Duration::minutes(61)).await,
            FreshnessStatus::Partial
        );

        fixture.cache.remove(&key.qualified(NAMESPACE));
        assert_eq!(fixture.monitor.status_at(key, WRITTEN).await, FreshnessStatus::Partial);
    }

    #[tokio::test]
    async fn test_nothing_anywhere_is_out_of_sync() {
        let fixture = fixture();
        assert_eq!(
            fixture.monitor.status_at(CacheKey::DailyAverages, WRITTEN).await,
            FreshnessStatus::OutOfSync
        );
    }

    #[tokio::test]
    async fn test_expired_snapshot_without_rollups_is_out_of_sync() {
        let fixture = fixture();
        write_snapshot(&fixture).await;
        assert_eq!(
            fixture
                .monitor
                .status_at(CacheKey::MonthlyAverages, WRITTEN + Duration::hours(2))
                .await,
            FreshnessStatus::OutOfSync
        );
    }

    #[tokio::test]
    async fn test_snapshot_of_other_key_does_not_count() {
        let fixture = fixture();
        write_snapshot(&fixture).await;
        assert_eq!(
            fixture.monitor.status_at(CacheKey::DailyAverages, WRITTEN).await,
            FreshnessStatus::OutOfSync
        );
    }

    #[tokio::test]
    async fn test_collaborator_errors_read_as_absent() {
        let fixture = fixture();
        fixture.warehouse.insert_monthly(&monthly_rows()).await.unwrap();
        write_snapshot(&fixture).await;

        fixture.cache.fail(true);
        assert_eq!(
            fixture.monitor.status_at(CacheKey::MonthlyAverages, WRITTEN).await,
            FreshnessStatus::Partial
        );

        fixture.warehouse.fail_reads(true);
        assert_eq!(
            fixture.monitor.status_at(CacheKey::MonthlyAverages, WRITTEN).await,
            FreshnessStatus::OutOfSync
        );
    }

    #[tokio::test]
    async fn test_cache_status_reports_ttl_and_version() {
        let fixture = fixture();
        write_snapshot(&fixture).await;
        let key = CacheKey::MonthlyAverages;

        let status = fixture.monitor.cache_status_at(key, WRITTEN + Duration::minutes(10)).await;
        assert_eq!(
            status,
            CacheStatus {
                key: "weather:stockton:monthly_averages".to_string(),
                exists: true,
                ttl_seconds: Some(3000),
                fresh: true,
                data_version: Some(format!("v{}", WRITTEN.unix_timestamp())),
            }
        );

        let expired = fixture.monitor.cache_status_at(key, WRITTEN + Duration::hours(2)).await;
        assert!(expired.exists);
        assert!(!expired.fresh);
        assert_eq!(expired.ttl_seconds, None);

        let missing = fixture.monitor.cache_status_at(CacheKey::DailyAverages, WRITTEN).await;
        assert!(!missing.exists);
        assert_eq!(missing.data_version, None);

        fixture.cache.fail(true);
        assert!(!fixture.monitor.cache_status_at(key, WRITTEN).await.exists);
    }

    #[test]
    fn test_status_labels() {
        assert_eq!(serde_json::to_string(&FreshnessStatus::OutOfSync).unwrap(), "\"out-of-sync\"");
        assert_eq!(FreshnessStatus::Partial.to_string(), "partial");
        assert_eq!(FreshnessStatus::Full.to_string(), "full");
    }
}
