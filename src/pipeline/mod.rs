//! The rollup cycle: an explicit, ordered stage pipeline over the collaborators.

pub mod cycle;
pub mod errors;

pub use cycle::{CycleReport, RollupCycle, TierOutcome};
pub use errors::{CycleError, Stage};
