use futures::future::join_all;
use leasehold_core::Result as LeaseResult;
use leasehold_core::{Clock, Lease, LeaseError, LeaseStore};
use metrics::{counter, gauge, histogram};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::HostConfiguration;
use crate::errors::Result;
use crate::host_metrics::{
    LEASES_OWNED, LEASE_ACQUISITIONS_TOTAL, LEASE_LOSSES_TOTAL, LEASE_STEALS_TOTAL,
    LEASE_STORE_ERRORS_TOTAL, SCAN_CYCLE_DURATION_SECONDS,
};
use crate::lease_manager::LeaseManager;
use crate::ownership::{LossReason, OwnershipEvent, OwnershipStream};
use crate::stealing;

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Outcome of one scan cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanSummary {
    /// Owned leases the store accepted a renewal for.
    pub renewed: usize,
    /// Ownership changes in the order they happened.
    pub events: Vec<OwnershipEvent>,
    /// Store calls that failed or timed out.
    pub errors: usize,
    /// `get_all_leases` failed, so only renewals ran.
    pub snapshot_failed: bool,
}

impl ScanSummary {
    pub fn acquired(&self) -> Vec<&str> {
        self.events
            .iter()
            .filter(|event| event.is_acquired())
            .map(OwnershipEvent::partition_id)
            .collect()
    }

    pub fn lost(&self) -> Vec<&str> {
        self.events
            .iter()
            .filter(|event| !event.is_acquired())
            .map(OwnershipEvent::partition_id)
            .collect()
    }

    pub fn stolen(&self) -> Option<&str> {
        self.events.iter().find_map(|event| match event {
            OwnershipEvent::Acquired {
                partition_id,
                stolen_from: Some(_),
                ..
            } => Some(partition_id.as_str()),
            _ => None,
        })
    }
}

/// Per-host loop that keeps the leases this host owns alive and picks up the rest.
///
/// Each cycle renews every owned lease, acquires every partition without a valid
/// owner and, when nothing was unowned, steals at most one lease to even out the
/// distribution. The scanner is the single writer of its owned set; other hosts are
/// only ever observed through the store.
pub struct PartitionScanner {
    host_name: String,
    partitions: Vec<String>,
    manager: LeaseManager,
    clock: Arc<dyn Clock>,
    stealing_enabled: bool,
    owned: BTreeMap<String, Lease>,
    events: broadcast::Sender<OwnershipEvent>,
}

impl PartitionScanner {
    pub fn new(
        host_name: impl Into<String>,
        partitions: Vec<String>,
        manager: LeaseManager,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            host_name: host_name.into(),
            partitions,
            manager,
            clock,
            stealing_enabled: true,
            owned: BTreeMap::new(),
            events,
        }
    }

    /// Validates the configuration and wires a manager over `store`.
    pub fn from_configuration(
        config: &HostConfiguration,
        store: Arc<dyn LeaseStore>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        config.validate()?;
        let manager = LeaseManager::new(store, config.lease.clone())?;
        Ok(
            Self::new(config.host_name.clone(), config.partitions.clone(), manager, clock)
                .with_stealing(config.stealing_enabled),
        )
    }

    pub fn with_stealing(mut self, enabled: bool) -> Self {
        self.stealing_enabled = enabled;
        self
    }

    pub fn host_name(&self) -> &str {
        &self.host_name
    }

    pub fn manager(&self) -> &LeaseManager {
        &self.manager
    }

    /// Partitions this host currently believes it owns, sorted.
    pub fn owned_partitions(&self) -> Vec<String> {
        self.owned.keys().cloned().collect()
    }

    /// Local copy of an owned lease, as last confirmed by the store.
    pub fn owned_lease(&self, partition_id: &str) -> Option<&Lease> {
        self.owned.get(partition_id)
    }

    pub fn subscribe(&self) -> OwnershipStream {
        OwnershipStream::from_broadcast(self.events.subscribe())
    }

    /// Makes sure the store and a record for every configured partition exist.
    pub async fn initialize(&self, create_store: bool) -> LeaseResult<()> {
        if let Err(e) = self.manager.ensure_lease_store(create_store).await {
            error!(host = %self.host_name, error = %e, "lease store is not usable");
            return Err(e);
        }
        for partition_id in &self.partitions {
            self.manager.create_lease_if_not_exists(partition_id).await?;
        }
        info!(
            host = %self.host_name,
            partitions = self.partitions.len(),
            "lease records initialized"
        );
        Ok(())
    }

    /// Spawns the periodic loop. The first cycle runs immediately. On cancellation
    /// the in-flight cycle completes and the scanner is handed back; nothing is
    /// released, so other hosts take over only once the leases expire.
    pub fn start(mut self, cancel: CancellationToken) -> JoinHandle<Self> {
        tokio::spawn(async move {
            info!(
                host = %self.host_name,
                partitions = self.partitions.len(),
                renew_interval_ms = self.manager.config().renew_interval_ms,
                lease_duration_ms = self.manager.config().lease_duration_ms,
                stealing = self.stealing_enabled,
                "partition scanner started"
            );
            let mut ticker = tokio::time::interval(self.manager.renew_interval());
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        info!(
                            host = %self.host_name,
                            owned = self.owned.len(),
                            "partition scanner stopped"
                        );
                        break;
                    }
                    _ = ticker.tick() => {
                        self.run_cycle().await;
                    }
                }
            }
            self
        })
    }

    /// One renew / acquire / steal pass.
    pub async fn run_cycle(&mut self) -> ScanSummary {
        let started = Instant::now();
        let mut summary = ScanSummary::default();

        let snapshot = match self.manager.get_all_leases().await {
            Ok(leases) => Some((leases, self.clock.now_ms())),
            Err(e) => {
                self.record_error(None, &e, &mut summary);
                summary.snapshot_failed = true;
                None
            }
        };

        self.renew_owned(&mut summary).await;

        if let Some((leases, now_ms)) = snapshot {
            let (view, missing) = self.partition_view(leases);
            let saw_unowned = self
                .acquire_unowned(&view, &missing, now_ms, &mut summary)
                .await;
            if self.stealing_enabled && !saw_unowned {
                self.steal_one(&view, now_ms, &mut summary).await;
            }
        }

        gauge!(LEASES_OWNED.name, "host" => self.host_name.clone()).set(self.owned.len() as f64);
        histogram!(SCAN_CYCLE_DURATION_SECONDS.name, "host" => self.host_name.clone())
            .record(started.elapsed().as_secs_f64());
        debug!(
            host = %self.host_name,
            owned = self.owned.len(),
            renewed = summary.renewed,
            changes = summary.events.len(),
            errors = summary.errors,
            "scan cycle finished"
        );
        summary
    }

    /// Stores `payload` on an owned lease, renewing it at the same time. Returns
    /// `Ok(false)` if this host does not own the partition or the store rejected
    /// the write; the latter is an ownership loss.
    pub async fn update_payload(
        &mut self,
        partition_id: &str,
        payload: Vec<u8>,
    ) -> LeaseResult<bool> {
        let Some(mut lease) = self.owned.get(partition_id).cloned() else {
            return Ok(false);
        };
        lease.payload = Some(payload);
        if self.manager.update_lease(&mut lease).await? {
            self.owned.insert(partition_id.to_owned(), lease);
            return Ok(true);
        }
        let event = self.surrender(lease, LossReason::UpdateRejected);
        self.publish(event);
        Ok(false)
    }

    /// Gives up an owned partition so any host can take it on its next cycle.
    /// Returns `Ok(false)` if the partition was not owned or the lease was already
    /// gone; either way this host no longer owns it afterwards.
    pub async fn release_partition(&mut self, partition_id: &str) -> LeaseResult<bool> {
        let Some(mut lease) = self.owned.get(partition_id).cloned() else {
            return Ok(false);
        };
        let released = self.manager.release_lease(&mut lease).await?;
        let event = self.surrender(lease, LossReason::Released);
        self.publish(event);
        Ok(released)
    }

    /// Releases every owned partition and returns how many the store accepted.
    /// Failures are logged and the remaining partitions are still attempted.
    pub async fn release_all(&mut self) -> usize {
        let mut released = 0;
        for partition_id in self.owned_partitions() {
            match self.release_partition(&partition_id).await {
                Ok(true) => released += 1,
                Ok(false) => {}
                Err(e) => {
                    warn!(
                        host = %self.host_name,
                        partition = %partition_id,
                        error = %e,
                        "failed to release lease"
                    );
                }
            }
        }
        released
    }

    async fn renew_owned(&mut self, summary: &mut ScanSummary) {
        if self.owned.is_empty() {
            return;
        }
        let manager = &self.manager;
        let renewals = self.owned.values().cloned().map(|mut lease| async move {
            let result = manager.renew_lease(&mut lease).await;
            (lease, result)
        });
        let results = join_all(renewals).await;

        let now_ms = self.clock.now_ms();
        for (lease, result) in results {
            match result {
                Ok(true) => {
                    summary.renewed += 1;
                    self.owned.insert(lease.partition_id().to_owned(), lease);
                }
                Ok(false) => self.lose(lease, LossReason::RenewalRejected, summary),
                Err(e) => {
                    self.record_error(Some(lease.partition_id()), &e, summary);
                    // keep serving until the last confirmed expiry
                    if lease.is_expired(now_ms) {
                        self.lose(lease, LossReason::Expired, summary);
                    }
                }
            }
        }
    }

    /// One lease per configured partition, in partition order. Partitions with no
    /// record in the store get a placeholder and are reported as missing.
    fn partition_view(&self, leases: Vec<Lease>) -> (Vec<Lease>, BTreeSet<String>) {
        let mut by_partition: BTreeMap<String, Lease> = leases
            .into_iter()
            .map(|lease| (lease.partition_id().to_owned(), lease))
            .collect();
        let mut missing = BTreeSet::new();
        let view = self
            .partitions
            .iter()
            .map(|partition_id| {
                by_partition.remove(partition_id).unwrap_or_else(|| {
                    missing.insert(partition_id.clone());
                    Lease::new(partition_id.as_str())
                })
            })
            .collect();
        (view, missing)
    }

    /// Tries every lease without a valid owner. Returns whether any was seen.
    async fn acquire_unowned(
        &mut self,
        view: &[Lease],
        missing: &BTreeSet<String>,
        now_ms: u64,
        summary: &mut ScanSummary,
    ) -> bool {
        let mut saw_unowned = false;
        for lease in view {
            let partition_id = lease.partition_id();
            if self.owned.contains_key(partition_id) || lease.is_owned(now_ms) {
                continue;
            }
            saw_unowned = true;

            let mut candidate = if missing.contains(partition_id) {
                match self.manager.create_lease_if_not_exists(partition_id).await {
                    Ok(created) => created,
                    Err(e) => {
                        self.record_error(Some(partition_id), &e, summary);
                        continue;
                    }
                }
            } else {
                lease.clone()
            };

            match self
                .manager
                .acquire_lease(&mut candidate, &self.host_name)
                .await
            {
                Ok(true) => {
                    counter!(LEASE_ACQUISITIONS_TOTAL.name, "host" => self.host_name.clone())
                        .increment(1);
                    self.gain(candidate, None, summary);
                }
                Ok(false) => {
                    debug!(
                        host = %self.host_name,
                        partition = %partition_id,
                        "lease taken by another host first"
                    );
                }
                Err(e) => self.record_error(Some(partition_id), &e, summary),
            }
        }
        saw_unowned
    }

    async fn steal_one(&mut self, view: &[Lease], now_ms: u64, summary: &mut ScanSummary) {
        let held = |partition_id: &str| self.owned.contains_key(partition_id);
        let Some(decision) = stealing::select_lease_to_steal(view, &self.host_name, held, now_ms)
        else {
            return;
        };
        let Some(mut lease) = view
            .iter()
            .find(|lease| lease.partition_id() == decision.partition_id)
            .cloned()
        else {
            return;
        };
        debug!(
            host = %self.host_name,
            partition = %decision.partition_id,
            victim = %decision.victim,
            victim_count = decision.victim_count,
            own_count = decision.own_count,
            target = decision.target,
            "stealing lease to rebalance"
        );

        match self.manager.steal_lease(&mut lease, &self.host_name).await {
            Ok(true) => {
                counter!(LEASE_STEALS_TOTAL.name, "host" => self.host_name.clone()).increment(1);
                self.gain(lease, Some(decision.victim), summary);
            }
            Ok(false) => {
                debug!(
                    host = %self.host_name,
                    partition = %decision.partition_id,
                    "lease changed before it could be stolen"
                );
            }
            Err(e) => self.record_error(Some(&decision.partition_id), &e, summary),
        }
    }

    fn gain(&mut self, lease: Lease, stolen_from: Option<String>, summary: &mut ScanSummary) {
        info!(
            host = %self.host_name,
            partition = %lease.partition_id(),
            epoch = lease.epoch,
            stolen_from = stolen_from.as_deref().unwrap_or("-"),
            "acquired partition"
        );
        let event = OwnershipEvent::Acquired {
            partition_id: lease.partition_id().to_owned(),
            epoch: lease.epoch,
            stolen_from,
        };
        self.owned.insert(lease.partition_id().to_owned(), lease);
        self.publish(event.clone());
        summary.events.push(event);
    }

    fn lose(&mut self, lease: Lease, reason: LossReason, summary: &mut ScanSummary) {
        let event = self.surrender(lease, reason);
        self.publish(event.clone());
        summary.events.push(event);
    }

    fn surrender(&mut self, lease: Lease, reason: LossReason) -> OwnershipEvent {
        self.owned.remove(lease.partition_id());
        counter!(LEASE_LOSSES_TOTAL.name, "host" => self.host_name.clone()).increment(1);
        info!(
            host = %self.host_name,
            partition = %lease.partition_id(),
            epoch = lease.epoch,
            reason = ?reason,
            "lost partition"
        );
        OwnershipEvent::Lost {
            partition_id: lease.partition_id().to_owned(),
            epoch: lease.epoch,
            reason,
        }
    }

    fn publish(&self, event: OwnershipEvent) {
        // no subscribers is fine
        let _ = self.events.send(event);
    }

    fn record_error(
        &self,
        partition_id: Option<&str>,
        error: &LeaseError,
        summary: &mut ScanSummary,
    ) {
        summary.errors += 1;
        counter!(
            LEASE_STORE_ERRORS_TOTAL.name,
            "host" => self.host_name.clone(),
            "action" => error.action().map(|a| a.as_str()).unwrap_or("unknown")
        )
        .increment(1);
        warn!(
            host = %self.host_name,
            partition = partition_id.unwrap_or("-"),
            error = %error,
            "lease store call failed"
        );
    }
}
