mod errors;
pub use errors::{LeaseAction, LeaseError, Result, StoreError, StoreResult};

mod store;
pub use store::LeaseStore;

pub mod conditions;

mod memory_store;
pub use memory_store::MemoryLeaseStore;
