pub mod refresh_cache;
pub mod rollup_cycle;
