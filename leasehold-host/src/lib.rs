//! Lease-based partition ownership.
//!
//! A fixed set of partitions is shared among any number of cooperating hosts. Each
//! host runs a [`PartitionScanner`] that renews the leases it holds, acquires leases
//! nobody holds and, when the distribution is uneven, steals one lease per cycle from
//! the busiest host. Safety comes entirely from the lease store's compare-and-set on
//! the lease epoch; there is no coordinator and no in-process locking between hosts.

mod config;
pub use config::{HostConfiguration, LeaseConfig};

mod errors;
pub use errors::{HostError, Result};

pub mod host_metrics;

mod lease_manager;
pub use lease_manager::LeaseManager;

mod ownership;
pub use ownership::{LossReason, OwnershipEvent, OwnershipStream};

mod scanner;
pub use scanner::{PartitionScanner, ScanSummary};

pub mod stealing;

#[cfg(test)]
mod test_support;
