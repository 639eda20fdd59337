//! Hourly de-duplication and daily/monthly rollups.
//!
//! Pure functions of their inputs; no I/O.

pub mod aggregate;
pub mod bucket;
mod fold;

pub use aggregate::{rollup_daily, rollup_monthly};
pub use bucket::{bucket_hourly, HourKey, HourlyBucket};
