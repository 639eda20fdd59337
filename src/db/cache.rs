use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use moka::future::Cache;

use crate::{
    config::CacheSettings,
    db::{models::CacheEnvelope, store::SnapshotCache},
};

/// In-process snapshot cache.
///
/// Entries are stored as the serialized JSON envelope, the same bytes a remote
/// key-value store would hold, and evicted by moka once the TTL has elapsed.
#[derive(Clone)]
pub struct MokaSnapshotCache {
    entries: Cache<String, String>,
}

impl MokaSnapshotCache {
    pub fn new(settings: &CacheSettings) -> Self {
        let entries = Cache::builder()
            .max_capacity(settings.max_capacity)
            .time_to_live(Duration::from_secs(settings.ttl_secs))
            .build();

        Self {
            entries,
        }
    }
}

#[async_trait]
impl SnapshotCache for MokaSnapshotCache {
    async fn put(&self, key: &str, envelope: &CacheEnvelope) -> Result<()> {
        let payload = serde_json::to_string(envelope)
            .with_context(|| format!("Failed to serialize snapshot for {}", key))?;
        self.entries.insert(key.to_string(), payload).await;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<CacheEnvelope>> {
        match self.entries.get(key).await {
            Some(payload) => {
                let envelope = serde_json::from_str(&payload)
                    .with_context(|| format!("Corrupt snapshot under {}", key))?;
                Ok(Some(envelope))
            },
            None => Ok(None),
        }
    }
}
