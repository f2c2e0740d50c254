use async_trait::async_trait;
use std::time::Duration;

use super::errors::StoreResult;
use crate::lease::Lease;

/// Durable, shared storage for partition leases.
///
/// Every operation must be atomic with respect to concurrent callers on all hosts.
/// The `try_*` operations are compare-and-set writes against the stored
/// `epoch` / `owner` pair; the decision rules live in [`super::conditions`] so every
/// backend applies the same ones. On success the new stored record is written back
/// into the caller's `lease`; on failure neither the store nor `lease` is modified.
#[async_trait]
pub trait LeaseStore: Send + Sync + 'static {
    async fn store_exists(&self) -> StoreResult<bool>;

    /// Idempotent.
    async fn create_store_if_not_exists(&self) -> StoreResult<()>;

    /// Removes the store and every record in it. Administrative / test use only.
    /// Returns `false` if there was nothing to delete.
    async fn delete_store(&self) -> StoreResult<bool>;

    async fn get_lease(&self, partition_id: &str) -> StoreResult<Option<Lease>>;

    /// One entry per partition that has a record. Partitions without a record are
    /// simply absent.
    async fn get_all_leases(&self) -> StoreResult<Vec<Lease>>;

    /// Returns the existing record unchanged if there is one.
    async fn create_lease_if_not_exists(&self, partition_id: &str) -> StoreResult<Lease>;

    /// Succeeds when the record is already gone.
    async fn delete_lease(&self, lease: &Lease) -> StoreResult<()>;

    /// Takes the lease for `owner` iff the stored record is unowned or expired.
    async fn try_acquire(
        &self,
        lease: &mut Lease,
        owner: &str,
        duration: Duration,
    ) -> StoreResult<bool>;

    /// Takes the lease for `owner` iff the stored epoch and owner still match the
    /// caller's snapshot, even when the current owner's lease is still valid.
    async fn try_steal(
        &self,
        lease: &mut Lease,
        owner: &str,
        duration: Duration,
    ) -> StoreResult<bool>;

    /// Extends the lease iff the stored epoch and owner match the caller's copy.
    async fn try_renew(&self, lease: &mut Lease, duration: Duration) -> StoreResult<bool>;

    /// Gives the lease up iff the caller holds it and it has not expired.
    async fn try_release(&self, lease: &mut Lease) -> StoreResult<bool>;

    /// Renews and writes the caller's payload under the same condition as renew.
    async fn try_update(&self, lease: &mut Lease, duration: Duration) -> StoreResult<bool>;
}
