use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;

use super::{
    conditions,
    errors::{StoreError, StoreResult},
    store::LeaseStore,
};
use crate::clock::{Clock, SystemClock};
use crate::lease::Lease;

/// In-memory lease store. Clones share the same records, so several hosts in one
/// process can contend on it exactly as they would on a remote store.
///
/// Each compare-and-set runs while holding the map shard's write lock for that
/// partition, which makes it atomic against every other writer of the partition.
#[derive(Debug, Clone)]
pub struct MemoryLeaseStore {
    inner: Arc<DashMap<String, Lease>>,
    exists: Arc<AtomicBool>,
    clock: Arc<dyn Clock>,
}

impl Default for MemoryLeaseStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryLeaseStore {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        MemoryLeaseStore {
            inner: Arc::new(DashMap::new()),
            exists: Arc::new(AtomicBool::new(false)),
            clock,
        }
    }

    fn ensure_exists(&self) -> StoreResult<()> {
        if self.exists.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(StoreError::NotBootstrapped)
        }
    }

    /// Evaluates `rule` against the stored record and swaps the result in, all under
    /// the partition's entry lock. With `create_missing` a partition that has no
    /// record is evaluated as its bootstrap record; otherwise the write is rejected.
    fn compare_and_set<F>(
        &self,
        lease: &mut Lease,
        create_missing: bool,
        rule: F,
    ) -> StoreResult<bool>
    where
        F: FnOnce(&Lease, u64) -> Option<Lease>,
    {
        self.ensure_exists()?;
        let mut stored = if create_missing {
            self.inner
                .entry(lease.partition_id().to_owned())
                .or_insert_with(|| Lease::new(lease.partition_id()))
        } else {
            let Some(stored) = self.inner.get_mut(lease.partition_id()) else {
                return Ok(false);
            };
            stored
        };
        match rule(stored.value(), self.clock.now_ms()) {
            Some(next) => {
                *stored = next.clone();
                *lease = next;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

#[async_trait]
impl LeaseStore for MemoryLeaseStore {
    async fn store_exists(&self) -> StoreResult<bool> {
        Ok(self.exists.load(Ordering::Acquire))
    }

    async fn create_store_if_not_exists(&self) -> StoreResult<()> {
        self.exists.store(true, Ordering::Release);
        Ok(())
    }

    async fn delete_store(&self) -> StoreResult<bool> {
        let existed = self.exists.swap(false, Ordering::AcqRel);
        self.inner.clear();
        Ok(existed)
    }

    async fn get_lease(&self, partition_id: &str) -> StoreResult<Option<Lease>> {
        self.ensure_exists()?;
        Ok(self.inner.get(partition_id).map(|lease| lease.value().clone()))
    }

    async fn get_all_leases(&self) -> StoreResult<Vec<Lease>> {
        self.ensure_exists()?;
        let mut leases: Vec<Lease> = self.inner.iter().map(|e| e.value().clone()).collect();
        leases.sort_by(|a, b| a.partition_id().cmp(b.partition_id()));
        Ok(leases)
    }

    async fn create_lease_if_not_exists(&self, partition_id: &str) -> StoreResult<Lease> {
        self.ensure_exists()?;
        let lease = self
            .inner
            .entry(partition_id.to_owned())
            .or_insert_with(|| Lease::new(partition_id));
        Ok(lease.value().clone())
    }

    async fn delete_lease(&self, lease: &Lease) -> StoreResult<()> {
        self.ensure_exists()?;
        self.inner.remove(lease.partition_id());
        Ok(())
    }

    async fn try_acquire(
        &self,
        lease: &mut Lease,
        owner: &str,
        duration: Duration,
    ) -> StoreResult<bool> {
        self.compare_and_set(lease, true, |stored, now| {
            conditions::acquire(stored, owner, now, duration)
        })
    }

    async fn try_steal(
        &self,
        lease: &mut Lease,
        owner: &str,
        duration: Duration,
    ) -> StoreResult<bool> {
        let snapshot = lease.clone();
        self.compare_and_set(lease, false, |stored, now| {
            conditions::steal(stored, &snapshot, owner, now, duration)
        })
    }

    async fn try_renew(&self, lease: &mut Lease, duration: Duration) -> StoreResult<bool> {
        let request = lease.clone();
        self.compare_and_set(lease, false, |stored, now| {
            conditions::renew(stored, &request, now, duration)
        })
    }

    async fn try_release(&self, lease: &mut Lease) -> StoreResult<bool> {
        let request = lease.clone();
        self.compare_and_set(lease, false, |stored, now| {
            conditions::release(stored, &request, now)
        })
    }

    async fn try_update(&self, lease: &mut Lease, duration: Duration) -> StoreResult<bool> {
        let request = lease.clone();
        self.compare_and_set(lease, false, |stored, now| {
            conditions::update(stored, &request, now, duration)
        })
    }
}
