//! Shared helpers for `leasehold-host` integration tests.
//!
//! A [`Cluster`] is a set of scanners sharing one lease store and one manual clock.
//! Tests drive it in rounds: advance the clock, then run one cycle on each host that
//! is still alive, in host order. Nothing runs in the background, so every scenario
//! is deterministic.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use leasehold_core::{Clock, Lease, LeaseStore, ManualClock, MemoryLeaseStore};
use leasehold_host::{LeaseConfig, LeaseManager, PartitionScanner, ScanSummary};
use tracing_subscriber::EnvFilter;

pub const START_MS: u64 = 1_700_000_000_000;
pub const RENEW_MS: u64 = 3_000;
pub const DURATION_MS: u64 = 10_000;

/// Logs go to the test writer; set `RUST_LOG=leasehold_host=debug` to see cycles.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn partition_ids(count: usize) -> Vec<String> {
    (0..count).map(|i| format!("partition-{:02}", i)).collect()
}

pub struct Cluster {
    pub clock: ManualClock,
    pub store: Arc<dyn LeaseStore>,
    pub hosts: Vec<PartitionScanner>,
    alive: Vec<bool>,
}

impl Cluster {
    /// Bootstrapped in-memory store, hosts named `host-a`, `host-b`, ...
    pub async fn in_memory(host_count: usize, partition_count: usize, stealing: bool) -> Self {
        let clock = ManualClock::new(START_MS);
        let store = MemoryLeaseStore::with_clock(Arc::new(clock.clone()));
        Self::with_store(Arc::new(store), clock, host_count, partition_count, stealing).await
    }

    pub async fn with_store(
        store: Arc<dyn LeaseStore>,
        clock: ManualClock,
        host_count: usize,
        partition_count: usize,
        stealing: bool,
    ) -> Self {
        init_tracing();
        let config = LeaseConfig::new(RENEW_MS, DURATION_MS).expect("valid lease config");
        let partitions = partition_ids(partition_count);
        let hosts: Vec<PartitionScanner> = (0..host_count)
            .map(|i| {
                let manager = LeaseManager::new(store.clone(), config.clone()).expect("manager");
                let clock: Arc<dyn Clock> = Arc::new(clock.clone());
                PartitionScanner::new(host_name(i), partitions.clone(), manager, clock)
                    .with_stealing(stealing)
            })
            .collect();
        for host in &hosts {
            host.initialize(true).await.expect("initialize host");
        }
        let alive = vec![true; host_count];
        Self {
            clock,
            store,
            hosts,
            alive,
        }
    }

    pub fn now_ms(&self) -> u64 {
        self.clock.now_ms()
    }

    pub fn advance(&self, ms: u64) {
        self.clock.advance(Duration::from_millis(ms));
    }

    /// The host stops running cycles, as if its process died.
    pub fn stop(&mut self, index: usize) {
        self.alive[index] = false;
    }

    /// One cycle on every live host, in host order.
    pub async fn round(&mut self) -> Vec<ScanSummary> {
        let mut summaries = Vec::new();
        for (host, alive) in self.hosts.iter_mut().zip(&self.alive) {
            if *alive {
                summaries.push(host.run_cycle().await);
            }
        }
        summaries
    }

    pub async fn run_cycle(&mut self, index: usize) -> ScanSummary {
        self.hosts[index].run_cycle().await
    }

    pub async fn stored_leases(&self) -> Vec<Lease> {
        self.store.get_all_leases().await.expect("read leases")
    }

    /// Valid leases per owner according to the store.
    pub async fn store_counts(&self) -> BTreeMap<String, usize> {
        let now = self.now_ms();
        let mut counts = BTreeMap::new();
        for lease in self.stored_leases().await {
            if lease.is_owned(now) {
                if let Some(owner) = lease.owner() {
                    *counts.entry(owner.to_string()).or_insert(0) += 1;
                }
            }
        }
        counts
    }

    pub async fn unowned_count(&self) -> usize {
        let now = self.now_ms();
        self.stored_leases()
            .await
            .iter()
            .filter(|lease| !lease.is_owned(now))
            .count()
    }

    /// Hosts whose local copy of `partition_id` is unexpired.
    pub fn believed_owners(&self, partition_id: &str) -> Vec<&str> {
        let now = self.now_ms();
        self.hosts
            .iter()
            .filter(|host| {
                host.owned_lease(partition_id)
                    .is_some_and(|lease| !lease.is_expired(now))
            })
            .map(|host| host.host_name())
            .collect()
    }

    /// A host's unexpired local copy is only authoritative when its epoch is the
    /// stored epoch; at most one host can be in that position per partition, and it
    /// must be the stored owner.
    pub async fn assert_exclusive_ownership(&self) {
        let now = self.now_ms();
        for stored in self.stored_leases().await {
            let current: Vec<&PartitionScanner> = self
                .hosts
                .iter()
                .filter(|host| {
                    host.owned_lease(stored.partition_id()).is_some_and(|lease| {
                        lease.epoch == stored.epoch && !lease.is_expired(now)
                    })
                })
                .collect();
            assert!(
                current.len() <= 1,
                "{} held at epoch {} by {} hosts",
                stored.partition_id(),
                stored.epoch,
                current.len()
            );
            if let Some(host) = current.first() {
                assert_eq!(stored.owner(), Some(host.host_name()));
            }
            for host in &self.hosts {
                if let Some(local) = host.owned_lease(stored.partition_id()) {
                    assert!(local.epoch <= stored.epoch);
                }
            }
        }
    }
}

pub fn host_name(index: usize) -> String {
    let suffix = (b'a' + index as u8) as char;
    format!("host-{}", suffix)
}
