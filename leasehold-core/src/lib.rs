pub mod clock;
pub use clock::{Clock, ManualClock, SystemClock};

mod lease;
pub use lease::Lease;

pub mod lease_store;
pub use lease_store::{
    LeaseAction, LeaseError, LeaseStore, MemoryLeaseStore, Result, StoreError, StoreResult,
};
