use thiserror::Error;

use super::solver::SolverError;

#[derive(Debug, Error)]
pub enum PlanError {
    #[error("invalid configuration: {0}")]
    Configuration(String),

    #[error("income ceiling solve failed in year {year}: {source}")]
    Convergence {
        year: usize,
        #[source]
        source: SolverError,
    },
}
