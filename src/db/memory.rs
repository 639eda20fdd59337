//! In-memory collaborators for tests.
//!
//! `MemoryWarehouse` keeps every inserted aggregate row and merges on read the
//! way a SummingMergeTree does after a background merge, so a missing delete
//! shows up as doubled values. Deletes yield to the scheduler before applying,
//! so concurrent writers get a chance to interleave.

use std::{
    collections::BTreeMap,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Mutex,
    },
};

use anyhow::{bail, Result};
use async_trait::async_trait;
use rustc_hash::FxHashMap;
use serde_json::Value;
use time::{Date, OffsetDateTime};

use crate::{
    db::{
        models::{
            CacheEnvelope, DailyAggregate, MonthKey, MonthlyAggregate, Observation,
            ObservationSource, Tier,
        },
        store::{CheckpointStore, FetchWindow, RawDocumentSource, SnapshotCache, Warehouse},
    },
    writer::DeletePredicate,
};

/// Station observation with provenance filled in.
pub fn observation(
    station: &str,
    timestamp: OffsetDateTime,
    temperature_c: Option<f64>,
    rainfall_mm: Option<f64>,
) -> Observation {
    Observation {
        id: format!("{}_{}", station, timestamp.unix_timestamp()),
        station_id: station.to_string(),
        timestamp,
        temperature_c,
        rainfall_mm,
        humidity_percent: None,
        wind_speed_ms: None,
        pressure_pa: None,
        ingest_time: timestamp,
        source_timestamp: timestamp,
        request_id: String::new(),
        batch_id: String::new(),
        source: ObservationSource::Station.as_str().to_string(),
    }
}

fn add(a: Option<f64>, b: Option<f64>) -> Option<f64> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a + b),
        (a, None) => a,
        (None, b) => b,
    }
}

type ObservationKey = (OffsetDateTime, String, String);

#[derive(Default)]
struct WarehouseState {
    observations: BTreeMap<ObservationKey, Observation>,
    daily: Vec<DailyAggregate>,
    monthly: Vec<MonthlyAggregate>,
}

#[derive(Default)]
pub struct MemoryWarehouse {
    state: Mutex<WarehouseState>,
    calls: Mutex<Vec<String>>,
    deletes: AtomicUsize,
    fail_deletes: AtomicBool,
    fail_inserts: AtomicBool,
    fail_reads: AtomicBool,
}

impl MemoryWarehouse {
    /// Aggregate writes in call order, e.g. `["delete daily", "insert daily"]`.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn fail_inserts(&self, fail: bool) {
        self.fail_inserts.store(fail, Ordering::SeqCst);
    }

    pub fn fail_deletes(&self, fail: bool) {
        self.fail_deletes.store(fail, Ordering::SeqCst);
    }

    pub fn fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    pub fn delete_count(&self) -> usize {
        self.deletes.load(Ordering::SeqCst)
    }

    pub fn observation_count(&self) -> usize {
        self.state.lock().unwrap().observations.len()
    }

    /// Daily rows as seen after the additive merge, ordered by date.
    pub fn merged_daily(&self) -> Vec<DailyAggregate> {
        let state = self.state.lock().unwrap();
        let mut merged: BTreeMap<Date, DailyAggregate> = BTreeMap::new();
        for row in &state.daily {
            match merged.get_mut(&row.date) {
                Some(acc) => {
                    acc.avg_temperature_c = add(acc.avg_temperature_c, row.avg_temperature_c);
                    acc.total_rainfall_mm = add(acc.total_rainfall_mm, row.total_rainfall_mm);
                    acc.avg_humidity_percent = add(acc.avg_humidity_percent, row.avg_humidity_percent);
                    acc.max_temperature_c = add(acc.max_temperature_c, row.max_temperature_c);
                    acc.min_temperature_c = add(acc.min_temperature_c, row.min_temperature_c);
                    acc.observation_count += row.observation_count;
                    acc.rows_loaded += row.rows_loaded;
                },
                None => {
                    merged.insert(row.date, row.clone());
                },
            }
        }
        merged.into_values().collect()
    }

    /// Monthly rows as seen after the additive merge, ordered by (year, month).
    pub fn merged_monthly(&self) -> Vec<MonthlyAggregate> {
        let state = self.state.lock().unwrap();
        let mut merged: BTreeMap<MonthKey, MonthlyAggregate> = BTreeMap::new();
        for row in &state.monthly {
            match merged.get_mut(&row.key()) {
                Some(acc) => {
                    acc.avg_temperature_c = add(acc.avg_temperature_c, row.avg_temperature_c);
                    acc.total_rainfall_mm = add(acc.total_rainfall_mm, row.total_rainfall_mm);
                    acc.avg_humidity_percent = add(acc.avg_humidity_percent, row.avg_humidity_percent);
                    acc.max_temperature_c = add(acc.max_temperature_c, row.max_temperature_c);
                    acc.min_temperature_c = add(acc.min_temperature_c, row.min_temperature_c);
                    acc.observation_count += row.observation_count;
                    acc.rows_loaded += row.rows_loaded;
                },
                None => {
                    merged.insert(row.key(), row.clone());
                },
            }
        }
        merged.into_values().collect()
    }

    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }

    fn check_reads(&self) -> Result<()> {
        if self.fail_reads.load(Ordering::SeqCst) {
            bail!("warehouse unreachable");
        }
        Ok(())
    }
}

#[async_trait]
impl Warehouse for MemoryWarehouse {
    async fn insert_observations(&self, rows: &[Observation]) -> Result<u64> {
        if self.fail_inserts.load(Ordering::SeqCst) {
            bail!("connection reset during insert");
        }
        let mut state = self.state.lock().unwrap();
        for row in rows {
            let key = (row.timestamp, row.station_id.clone(), row.id.clone());
            state.observations.insert(key, row.clone());
        }
        Ok(rows.len() as u64)
    }

    async fn observations_between(
        &self,
        from: OffsetDateTime,
        to: OffsetDateTime,
    ) -> Result<Vec<Observation>> {
        self.check_reads()?;
        let state = self.state.lock().unwrap();
        Ok(state
            .observations
            .values()
            .filter(|o| o.timestamp >= from && o.timestamp < to)
            .cloned()
            .collect())
    }

    async fn observation_months(&self) -> Result<Vec<MonthKey>> {
        self.check_reads()?;
        let state = self.state.lock().unwrap();
        let mut months: Vec<MonthKey> = state
            .observations
            .values()
            .map(|o| MonthKey::of(o.timestamp.date()))
            .collect();
        months.sort();
        months.dedup();
        Ok(months)
    }

    async fn delete_window(&self, predicate: &DeletePredicate) -> Result<()> {
        if self.fail_deletes.load(Ordering::SeqCst) {
            bail!("connection reset during delete");
        }
        self.record(format!("delete {}", predicate.tier()));
        for _ in 0..3 {
            tokio::task::yield_now().await;
        }
        self.deletes.fetch_add(1, Ordering::SeqCst);
        let mut state = self.state.lock().unwrap();
        state.daily.retain(|row| !predicate.matches_daily(row.date));
        state.monthly.retain(|row| !predicate.matches_monthly(row.key()));
        Ok(())
    }

    async fn insert_daily(&self, rows: &[DailyAggregate]) -> Result<()> {
        self.record(format!("insert {}", Tier::Daily));
        self.state.lock().unwrap().daily.extend_from_slice(rows);
        Ok(())
    }

    async fn insert_monthly(&self, rows: &[MonthlyAggregate]) -> Result<()> {
        self.record(format!("insert {}", Tier::Monthly));
        self.state.lock().unwrap().monthly.extend_from_slice(rows);
        Ok(())
    }

    async fn latest_daily(&self, limit: usize) -> Result<Vec<DailyAggregate>> {
        self.check_reads()?;
        let merged = self.merged_daily();
        let skip = merged.len().saturating_sub(limit);
        Ok(merged.into_iter().skip(skip).collect())
    }

    async fn latest_monthly(&self, limit: usize) -> Result<Vec<MonthlyAggregate>> {
        self.check_reads()?;
        let merged = self.merged_monthly();
        let skip = merged.len().saturating_sub(limit);
        Ok(merged.into_iter().skip(skip).collect())
    }

    async fn has_rollups(&self, tier: Tier) -> Result<bool> {
        self.check_reads()?;
        let state = self.state.lock().unwrap();
        Ok(match tier {
            Tier::Daily => !state.daily.is_empty(),
            Tier::Monthly => !state.monthly.is_empty(),
        })
    }
}

#[derive(Default)]
pub struct MemoryCache {
    entries: Mutex<FxHashMap<String, CacheEnvelope>>,
    fail: AtomicBool,
}

impl MemoryCache {
    pub fn fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn remove(&self, key: &str) {
        self.entries.lock().unwrap().remove(key);
    }
}

#[async_trait]
impl SnapshotCache for MemoryCache {
    async fn put(&self, key: &str, envelope: &CacheEnvelope) -> Result<()> {
        if self.fail.load(Ordering::SeqCst) {
            bail!("cache unreachable");
        }
        self.entries.lock().unwrap().insert(key.to_string(), envelope.clone());
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<CacheEnvelope>> {
        if self.fail.load(Ordering::SeqCst) {
            bail!("cache unreachable");
        }
        Ok(self.entries.lock().unwrap().get(key).cloned())
    }
}

/// Raw documents tagged with the time they landed in the store.
#[derive(Default)]
pub struct MemoryDocumentSource {
    documents: Mutex<Vec<(OffsetDateTime, Value)>>,
    fail: AtomicBool,
}

impl MemoryDocumentSource {
    pub fn push(&self, ingested_at: OffsetDateTime, document: Value) {
        self.documents.lock().unwrap().push((ingested_at, document));
    }

    pub fn fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl RawDocumentSource for MemoryDocumentSource {
    async fn fetch(&self, window: FetchWindow) -> Result<Vec<Value>> {
        if self.fail.load(Ordering::SeqCst) {
            bail!("document store unreachable");
        }
        Ok(self
            .documents
            .lock()
            .unwrap()
            .iter()
            .filter(|(ingested_at, _)| window.contains(*ingested_at))
            .map(|(_, doc)| doc.clone())
            .collect())
    }
}

#[derive(Default)]
pub struct MemoryCheckpoints {
    checkpoints: Mutex<FxHashMap<String, OffsetDateTime>>,
}

#[async_trait]
impl CheckpointStore for MemoryCheckpoints {
    async fn get_checkpoint(&self, job_name: &str) -> Result<Option<OffsetDateTime>> {
        Ok(self.checkpoints.lock().unwrap().get(job_name).copied())
    }

    async fn set_checkpoint(&self, job_name: &str, last_run_at: OffsetDateTime) -> Result<()> {
        self.checkpoints
            .lock()
            .unwrap()
            .insert(job_name.to_string(), last_run_at);
        Ok(())
    }
}
