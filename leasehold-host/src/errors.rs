use leasehold_core::LeaseError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, HostError>;

#[derive(Error, Debug)]
pub enum HostError {
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Configuration file error: {0}")]
    ConfigFile(#[from] serde_yaml::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Lease(#[from] LeaseError),

    #[error("ownership stream lagged by {0} events, consumer should resync from owned partitions")]
    EventsLagged(u64),
}
