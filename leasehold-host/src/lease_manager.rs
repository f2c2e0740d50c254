use leasehold_core::Result as LeaseResult;
use leasehold_core::{Lease, LeaseAction, LeaseError, LeaseStore, StoreResult};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use crate::config::LeaseConfig;
use crate::errors::Result;

/// The only sanctioned way to touch the lease store.
///
/// Every call maps 1:1 onto a store operation, bounded by the configured operation
/// timeout and tagged with the action being attempted when it fails. The manager
/// keeps no state of its own besides the validated timing.
#[derive(Clone)]
pub struct LeaseManager {
    store: Arc<dyn LeaseStore>,
    config: LeaseConfig,
}

impl fmt::Debug for LeaseManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LeaseManager")
            .field("config", &self.config)
            .finish()
    }
}

impl LeaseManager {
    /// Fails if the renew interval is not below half the lease duration.
    pub fn new(store: Arc<dyn LeaseStore>, config: LeaseConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { store, config })
    }

    pub fn config(&self) -> &LeaseConfig {
        &self.config
    }

    pub fn renew_interval(&self) -> Duration {
        self.config.renew_interval()
    }

    pub fn lease_duration(&self) -> Duration {
        self.config.lease_duration()
    }

    async fn call<T>(
        &self,
        action: LeaseAction,
        op: impl Future<Output = StoreResult<T>>,
    ) -> LeaseResult<T> {
        let timeout = self.config.operation_timeout();
        match tokio::time::timeout(timeout, op).await {
            Ok(result) => result.map_err(|source| LeaseError::store(action, source)),
            Err(_) => Err(LeaseError::Timeout { action, timeout }),
        }
    }

    pub async fn lease_store_exists(&self) -> LeaseResult<bool> {
        self.call(LeaseAction::CheckingLeaseStore, self.store.store_exists())
            .await
    }

    pub async fn create_lease_store_if_not_exists(&self) -> LeaseResult<()> {
        self.call(
            LeaseAction::CreatingLeaseStore,
            self.store.create_store_if_not_exists(),
        )
        .await
    }

    /// Administrative / test use only.
    pub async fn delete_lease_store(&self) -> LeaseResult<bool> {
        self.call(LeaseAction::DeletingLeaseStore, self.store.delete_store())
            .await
    }

    /// Makes sure the store exists before the protocol starts. Without `create` a
    /// missing store is fatal.
    pub async fn ensure_lease_store(&self, create: bool) -> LeaseResult<()> {
        if self.lease_store_exists().await? {
            return Ok(());
        }
        if !create {
            return Err(LeaseError::StoreMissing);
        }
        self.create_lease_store_if_not_exists().await?;
        info!("created lease store");
        Ok(())
    }

    pub async fn get_lease(&self, partition_id: &str) -> LeaseResult<Option<Lease>> {
        self.call(LeaseAction::GettingLease, self.store.get_lease(partition_id))
            .await
    }

    pub async fn get_all_leases(&self) -> LeaseResult<Vec<Lease>> {
        self.call(LeaseAction::GettingAllLeases, self.store.get_all_leases())
            .await
    }

    pub async fn create_lease_if_not_exists(&self, partition_id: &str) -> LeaseResult<Lease> {
        self.call(
            LeaseAction::CreatingLease,
            self.store.create_lease_if_not_exists(partition_id),
        )
        .await
    }

    /// Administrative / test use only.
    pub async fn delete_lease(&self, lease: &Lease) -> LeaseResult<()> {
        self.call(LeaseAction::DeletingLease, self.store.delete_lease(lease))
            .await
    }

    /// Takes an unowned or expired lease for `owner`. `Ok(false)` means another host
    /// holds a valid lease.
    pub async fn acquire_lease(&self, lease: &mut Lease, owner: &str) -> LeaseResult<bool> {
        let duration = self.lease_duration();
        let acquired = self
            .call(
                LeaseAction::AcquiringLease,
                self.store.try_acquire(lease, owner, duration),
            )
            .await?;
        if acquired {
            debug!(partition = %lease.partition_id(), owner, epoch = lease.epoch, "lease acquired");
        }
        Ok(acquired)
    }

    /// Takes a lease from its current owner, valid or not, provided the record has not
    /// changed since `lease` was read.
    pub async fn steal_lease(&self, lease: &mut Lease, owner: &str) -> LeaseResult<bool> {
        let duration = self.lease_duration();
        let victim = lease.owner().map(str::to_owned);
        let stolen = self
            .call(
                LeaseAction::StealingLease,
                self.store.try_steal(lease, owner, duration),
            )
            .await?;
        if stolen {
            debug!(
                partition = %lease.partition_id(),
                owner,
                victim = victim.as_deref().unwrap_or("-"),
                epoch = lease.epoch,
                "lease stolen"
            );
        }
        Ok(stolen)
    }

    /// `Ok(false)` means the lease was lost (stolen, re-acquired after expiry, or released).
    pub async fn renew_lease(&self, lease: &mut Lease) -> LeaseResult<bool> {
        let duration = self.lease_duration();
        self.call(
            LeaseAction::RenewingLease,
            self.store.try_renew(lease, duration),
        )
        .await
    }

    /// `Ok(false)` means the lease had already expired or been taken.
    pub async fn release_lease(&self, lease: &mut Lease) -> LeaseResult<bool> {
        self.call(LeaseAction::ReleasingLease, self.store.try_release(lease))
            .await
    }

    /// Renews the lease and stores its payload in one step. `Ok(false)` means the
    /// lease was lost and nothing was written.
    pub async fn update_lease(&self, lease: &mut Lease) -> LeaseResult<bool> {
        let duration = self.lease_duration();
        self.call(
            LeaseAction::UpdatingLease,
            self.store.try_update(lease, duration),
        )
        .await
    }
}
