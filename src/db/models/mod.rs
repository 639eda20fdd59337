mod aggregate;
mod cache_snapshot;
mod observation;

pub use aggregate::{
    DailyAggregate, LoadMetadata, LoadMode, MonthKey, MonthlyAggregate, RollupStats, Tier,
};
pub use cache_snapshot::{
    next_data_version, CacheEnvelope, CacheKey, DailyAverage, MonthlyAverage, OverallAverages,
};
pub use observation::{Observation, ObservationSource};
