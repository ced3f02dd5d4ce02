use settle_core::distribution::DistributionError;
use settle_services::{ConfigError, OutputError, StoreError};
use thiserror::Error;

/// Errors that abort a run. All of them are raised before the first step
/// or while writing results; the step loop itself never fails.
#[derive(Debug, Error)]
pub enum SetupError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("invalid particle distribution: {0}")]
    Distribution(#[from] DistributionError),

    #[error(transparent)]
    Output(#[from] OutputError),

    #[error(transparent)]
    Store(#[from] StoreError),
}
