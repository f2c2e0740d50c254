//! Lease stealing policy.
//!
//! Given a snapshot of every lease, decide whether this host should take one lease
//! from another live host to even out partition counts. The decision depends only on
//! its inputs, so the same snapshot always yields the same victim.
//!
//! Rules:
//! - only valid leases count toward an owner; this host is always counted, even at 0
//! - a lease the store shows as this host's counts only if this host is serving it;
//!   after a restart under the same name the old leases are nobody's until they expire
//! - target share is `ceil(partitions / owners)`
//! - steal only while below target, and only from an owner holding at least two more
//!   leases than this host, so a steal always narrows the gap
//! - the victim is the owner with most leases (ties: lowest owner id) and the lease
//!   taken is that owner's lowest partition id
//! - at most one lease per cycle

use leasehold_core::Lease;
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StealDecision {
    pub partition_id: String,
    pub victim: String,
    pub victim_count: usize,
    pub own_count: usize,
    pub target: usize,
}

/// Valid leases per owner, with `host` present even if it owns nothing. Leases the
/// store attributes to `host` are counted only when `held` accepts their partition id.
pub fn owner_counts<F>(
    leases: &[Lease],
    host: &str,
    held: F,
    now_ms: u64,
) -> BTreeMap<String, usize>
where
    F: Fn(&str) -> bool,
{
    let mut counts = BTreeMap::new();
    counts.insert(host.to_owned(), 0);
    for lease in leases {
        if !lease.is_owned(now_ms) {
            continue;
        }
        match lease.owner() {
            Some(owner) if owner == host && !held(lease.partition_id()) => {}
            Some(owner) => *counts.entry(owner.to_owned()).or_insert(0) += 1,
            None => {}
        }
    }
    counts
}

/// `ceil(total_partitions / owners)`.
pub fn fair_share(total_partitions: usize, owners: usize) -> usize {
    if owners == 0 {
        return total_partitions;
    }
    total_partitions.div_ceil(owners)
}

pub fn select_lease_to_steal<F>(
    leases: &[Lease],
    host: &str,
    held: F,
    now_ms: u64,
) -> Option<StealDecision>
where
    F: Fn(&str) -> bool,
{
    let counts = owner_counts(leases, host, held, now_ms);
    let own_count = counts.get(host).copied().unwrap_or(0);
    let target = fair_share(leases.len(), counts.len());
    if own_count >= target {
        return None;
    }

    let (victim, victim_count) = counts
        .iter()
        .filter(|(owner, _)| owner.as_str() != host)
        .max_by(|a, b| a.1.cmp(b.1).then_with(|| b.0.cmp(a.0)))?;
    if *victim_count <= own_count + 1 {
        return None;
    }

    let partition_id = leases
        .iter()
        .filter(|lease| lease.is_owned_by(victim, now_ms))
        .map(|lease| lease.partition_id())
        .min()?;

    Some(StealDecision {
        partition_id: partition_id.to_owned(),
        victim: victim.clone(),
        victim_count: *victim_count,
        own_count,
        target,
    })
}
