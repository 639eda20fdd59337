//! Job materializing the snapshot cache from the warehouse rollups.
//!
//! Each logical key is rebuilt from scratch and overwritten; a key with no
//! rollups behind it is left alone.

use anyhow::{Context, Result};
use log::{info, warn};
use time::OffsetDateTime;

use crate::{
    config::CacheSettings,
    db::{
        models::{next_data_version, CacheEnvelope, CacheKey},
        store::{SnapshotCache, Warehouse},
    },
};

pub async fn run(warehouse: &dyn Warehouse, cache: &dyn SnapshotCache, settings: &CacheSettings) -> Result<()> {
    run_at(warehouse, cache, settings, OffsetDateTime::now_utc()).await?;
    Ok(())
}

/// Returns the number of keys written.
pub async fn run_at(
    warehouse: &dyn Warehouse,
    cache: &dyn SnapshotCache,
    settings: &CacheSettings,
    now: OffsetDateTime,
) -> Result<usize> {
    info!("Starting refresh_cache job...");

    let start = std::time::Instant::now();
    let mut written = 0;

    for key in [CacheKey::MonthlyAverages, CacheKey::DailyAverages] {
        let qualified = key.qualified(&settings.namespace);
        let previous = previous_version(cache, &qualified).await;
        let version = next_data_version(now, previous);

        let envelope = match key {
            CacheKey::MonthlyAverages => {
                let rows = warehouse
                    .latest_monthly(settings.monthly_months as usize)
                    .await
                    .context("Failed to read monthly rollups")?;
                CacheEnvelope::monthly(&rows, now, version, settings.ttl_secs, settings.location.clone())
            },
            CacheKey::DailyAverages => {
                let rows = warehouse
                    .latest_daily(settings.daily_days as usize)
                    .await
                    .context("Failed to read daily rollups")?;
                CacheEnvelope::daily(&rows, now, version, settings.ttl_secs, settings.location.clone())
            },
        };

        let Some(envelope) = envelope else {
            info!("No rollups for {}, leaving cache entry untouched", qualified);
            continue;
        };

        cache
            .put(&qualified, &envelope)
            .await
            .with_context(|| format!("Failed to write snapshot {}", qualified))?;
        written += 1;
    }

    info!("Completed refresh_cache job in {:?} ({} keys)", start.elapsed(), written);
    Ok(written)
}

async fn previous_version(cache: &dyn SnapshotCache, key: &str) -> Option<i64> {
    match cache.get(key).await {
        Ok(envelope) => envelope.and_then(|e| e.version_number()),
        Err(e) => {
            warn!("Could not read previous snapshot {}: {:#}", key, e);
            None
        },
    }
}
