//! Shared fixtures for the unit tests in this crate.

use async_trait::async_trait;
use leasehold_core::{
    Clock, Lease, LeaseStore, ManualClock, MemoryLeaseStore, StoreError, StoreResult,
};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::config::LeaseConfig;
use crate::lease_manager::LeaseManager;

pub(crate) const START_MS: u64 = 1_000_000;
pub(crate) const RENEW_MS: u64 = 3_000;
pub(crate) const DURATION_MS: u64 = 10_000;

pub(crate) fn lease_config() -> LeaseConfig {
    LeaseConfig::new(RENEW_MS, DURATION_MS).expect("valid lease config")
}

pub(crate) fn partitions(count: usize) -> Vec<String> {
    (0..count).map(|i| format!("p-{}", i)).collect()
}

/// Wraps the in-memory store and fails or slows down calls on demand, the way an
/// unreachable remote store would.
#[derive(Debug)]
pub(crate) struct FaultyStore {
    inner: MemoryLeaseStore,
    unavailable: AtomicBool,
    snapshot_unavailable: AtomicBool,
    delay_ms: AtomicU64,
}

impl FaultyStore {
    pub(crate) fn new(inner: MemoryLeaseStore) -> Self {
        Self {
            inner,
            unavailable: AtomicBool::new(false),
            snapshot_unavailable: AtomicBool::new(false),
            delay_ms: AtomicU64::new(0),
        }
    }

    /// Every call fails.
    pub(crate) fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Only `get_all_leases` fails.
    pub(crate) fn set_snapshot_unavailable(&self, unavailable: bool) {
        self.snapshot_unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub(crate) fn set_delay(&self, delay: Duration) {
        self.delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    async fn gate(&self) -> StoreResult<()> {
        let delay = self.delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("injected failure".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl LeaseStore for FaultyStore {
    async fn store_exists(&self) -> StoreResult<bool> {
        self.gate().await?;
        self.inner.store_exists().await
    }

    async fn create_store_if_not_exists(&self) -> StoreResult<()> {
        self.gate().await?;
        self.inner.create_store_if_not_exists().await
    }

    async fn delete_store(&self) -> StoreResult<bool> {
        self.gate().await?;
        self.inner.delete_store().await
    }

    async fn get_lease(&self, partition_id: &str) -> StoreResult<Option<Lease>> {
        self.gate().await?;
        self.inner.get_lease(partition_id).await
    }

    async fn get_all_leases(&self) -> StoreResult<Vec<Lease>> {
        self.gate().await?;
        if self.snapshot_unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("injected snapshot failure".to_string()));
        }
        self.inner.get_all_leases().await
    }

    async fn create_lease_if_not_exists(&self, partition_id: &str) -> StoreResult<Lease> {
        self.gate().await?;
        self.inner.create_lease_if_not_exists(partition_id).await
    }

    async fn delete_lease(&self, lease: &Lease) -> StoreResult<()> {
        self.gate().await?;
        self.inner.delete_lease(lease).await
    }

    async fn try_acquire(
        &self,
        lease: &mut Lease,
        owner: &str,
        duration: Duration,
    ) -> StoreResult<bool> {
        self.gate().await?;
        self.inner.try_acquire(lease, owner, duration).await
    }

    async fn try_steal(
        &self,
        lease: &mut Lease,
        owner: &str,
        duration: Duration,
    ) -> StoreResult<bool> {
        self.gate().await?;
        self.inner.try_steal(lease, owner, duration).await
    }

    async fn try_renew(&self, lease: &mut Lease, duration: Duration) -> StoreResult<bool> {
        self.gate().await?;
        self.inner.try_renew(lease, duration).await
    }

    async fn try_release(&self, lease: &mut Lease) -> StoreResult<bool> {
        self.gate().await?;
        self.inner.try_release(lease).await
    }

    async fn try_update(&self, lease: &mut Lease, duration: Duration) -> StoreResult<bool> {
        self.gate().await?;
        self.inner.try_update(lease, duration).await
    }
}

/// A bootstrapped in-memory store driven by a manual clock.
pub(crate) async fn memory_store(clock: &ManualClock) -> MemoryLeaseStore {
    let clock: Arc<dyn Clock> = Arc::new(clock.clone());
    let store = MemoryLeaseStore::with_clock(clock);
    store
        .create_store_if_not_exists()
        .await
        .expect("create store");
    store
}

pub(crate) fn manager(store: Arc<dyn LeaseStore>) -> LeaseManager {
    LeaseManager::new(store, lease_config()).expect("valid manager")
}
