use std::fmt;
use std::time::Duration;
use thiserror::Error;

pub type StoreResult<T> = std::result::Result<T, StoreError>;
pub type Result<T> = std::result::Result<T, LeaseError>;

/// Faults raised by a lease store backend.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Lease store has not been created")]
    NotBootstrapped,

    #[error("Lease store unavailable: {0}")]
    Unavailable(String),
}

/// The lease operation that was in flight when an error occurred.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LeaseAction {
    CheckingLeaseStore,
    CreatingLeaseStore,
    DeletingLeaseStore,
    GettingLease,
    GettingAllLeases,
    CreatingLease,
    DeletingLease,
    AcquiringLease,
    StealingLease,
    RenewingLease,
    ReleasingLease,
    UpdatingLease,
}

impl LeaseAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            LeaseAction::CheckingLeaseStore => "checking lease store",
            LeaseAction::CreatingLeaseStore => "creating lease store",
            LeaseAction::DeletingLeaseStore => "deleting lease store",
            LeaseAction::GettingLease => "getting lease",
            LeaseAction::GettingAllLeases => "getting all leases",
            LeaseAction::CreatingLease => "creating lease",
            LeaseAction::DeletingLease => "deleting lease",
            LeaseAction::AcquiringLease => "acquiring lease",
            LeaseAction::StealingLease => "stealing lease",
            LeaseAction::RenewingLease => "renewing lease",
            LeaseAction::ReleasingLease => "releasing lease",
            LeaseAction::UpdatingLease => "updating lease",
        }
    }
}

impl fmt::Display for LeaseAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors surfaced by lease operations, tagged with what was being attempted.
///
/// A lost lease is not an error: the `try_*` operations report it as `Ok(false)`.
#[derive(Error, Debug)]
pub enum LeaseError {
    #[error("lease store error while {action}: {source}")]
    Store {
        action: LeaseAction,
        #[source]
        source: StoreError,
    },

    #[error("timed out after {timeout:?} while {action}")]
    Timeout {
        action: LeaseAction,
        timeout: Duration,
    },

    #[error("lease store does not exist")]
    StoreMissing,
}

impl LeaseError {
    pub fn store(action: LeaseAction, source: StoreError) -> Self {
        LeaseError::Store { action, source }
    }

    /// The operation that failed, if the error is tied to one.
    pub fn action(&self) -> Option<LeaseAction> {
        match self {
            LeaseError::Store { action, .. } | LeaseError::Timeout { action, .. } => {
                Some(*action)
            }
            LeaseError::StoreMissing => None,
        }
    }
}
