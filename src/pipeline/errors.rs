use std::fmt;

/// Pipeline stage that talks to a collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Fetch,
    LoadObservations,
    ReadBack,
    WriteDaily,
    WriteMonthly,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Stage::Fetch => "fetch",
            Stage::LoadObservations => "load_observations",
            Stage::ReadBack => "read_back",
            Stage::WriteDaily => "write_daily",
            Stage::WriteMonthly => "write_monthly",
        };
        f.write_str(label)
    }
}

/// Failure that aborts a whole cycle.
///
/// Parse failures never get here (records are skipped) and predicate failures
/// only fail their tier, so the only cycle-level error is a collaborator that
/// could not be reached.
#[derive(thiserror::Error, Debug)]
pub enum CycleError {
    #[error("rollup cycle aborted at stage {stage}")]
    Connectivity {
        stage: Stage,
        #[source]
        source: anyhow::Error,
    },
}

impl CycleError {
    pub fn connectivity(stage: Stage) -> impl FnOnce(anyhow::Error) -> Self {
        move |source| CycleError::Connectivity {
            stage,
            source,
        }
    }

    pub fn stage(&self) -> Stage {
        match self {
            CycleError::Connectivity { stage, .. } => *stage,
        }
    }
}
