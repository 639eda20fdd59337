use std::collections::BTreeMap;

use time::{Date, OffsetDateTime};

use crate::{
    db::models::{DailyAggregate, LoadMetadata, MonthKey, MonthlyAggregate, RollupStats},
    rollup::{bucket::HourKey, fold, HourlyBucket},
};

/// Reduces hourly buckets to one row per UTC date.
///
/// Daily rainfall is the sum of hourly maxima. Temperature and humidity are the
/// equal-weighted mean of hourly means, so a busy hour counts as much as a quiet one.
pub fn rollup_daily(
    buckets: &BTreeMap<HourKey, HourlyBucket>,
    meta: &LoadMetadata,
) -> Vec<DailyAggregate> {
    let mut days: BTreeMap<Date, Vec<&HourlyBucket>> = BTreeMap::new();
    for ((date, _), bucket) in buckets {
        days.entry(*date).or_default().push(bucket);
    }

    let stats: Vec<(Date, RollupStats, Option<OffsetDateTime>)> = days
        .into_iter()
        .map(|(date, hours)| {
            let stats = RollupStats {
                avg_temperature_c: fold::mean(hours.iter().map(|h| h.avg_temperature_c)),
                total_rainfall_mm: fold::sum(hours.iter().map(|h| h.max_rainfall_mm)),
                avg_humidity_percent: fold::mean(hours.iter().map(|h| h.avg_humidity_percent)),
                max_temperature_c: fold::max(hours.iter().map(|h| h.max_temperature_c)),
                min_temperature_c: fold::min(hours.iter().map(|h| h.min_temperature_c)),
                observation_count: hours.iter().map(|h| h.observation_count).sum(),
            };
            let latest = hours.iter().filter_map(|h| h.latest_observation).max();
            (date, stats, latest)
        })
        .collect();

    let rows_loaded = stats.len() as u32;
    stats
        .into_iter()
        .map(|(date, stats, latest)| {
            DailyAggregate::new(date, stats, meta, rows_loaded).with_latest_observation(latest)
        })
        .collect()
}

/// Reduces daily rows to one row per calendar month with the same recipe:
/// unweighted mean of daily means, sum of daily totals, extrema of extrema.
pub fn rollup_monthly(days: &[DailyAggregate], meta: &LoadMetadata) -> Vec<MonthlyAggregate> {
    let mut months: BTreeMap<MonthKey, Vec<&DailyAggregate>> = BTreeMap::new();
    for day in days {
        months.entry(MonthKey::of(day.date)).or_default().push(day);
    }

    let stats: Vec<(MonthKey, RollupStats)> = months
        .into_iter()
        .map(|(key, mut days)| {
            days.sort_by_key(|d| d.date);
            let stats = RollupStats {
                avg_temperature_c: fold::mean(days.iter().map(|d| d.avg_temperature_c)),
                total_rainfall_mm: fold::sum(days.iter().map(|d| d.total_rainfall_mm)),
                avg_humidity_percent: fold::mean(days.iter().map(|d| d.avg_humidity_percent)),
                max_temperature_c: fold::max(days.iter().map(|d| d.max_temperature_c)),
                min_temperature_c: fold::min(days.iter().map(|d| d.min_temperature_c)),
                observation_count: days.iter().map(|d| d.observation_count).sum(),
            };
            (key, stats)
        })
        .collect();

    let rows_loaded = stats.len() as u32;
    stats
        .into_iter()
        .map(|(key, stats)| MonthlyAggregate::new(key, stats, meta, rows_loaded))
        .collect()
}
