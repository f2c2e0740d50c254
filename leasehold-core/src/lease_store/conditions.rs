//! Compare-and-set rules for lease writes.
//!
//! Each rule takes the stored record and the caller's request and returns the record
//! that must replace the stored one, or `None` when the write is rejected. A backend
//! only has to evaluate a rule and write its result atomically with respect to other
//! writers of the same partition.

use std::time::Duration;

use crate::lease::Lease;

fn expiry(now_ms: u64, duration: Duration) -> u64 {
    now_ms.saturating_add(duration.as_millis() as u64)
}

/// The caller's copy still names the stored owner under the stored epoch.
fn holds(stored: &Lease, request: &Lease) -> bool {
    request.owner().is_some() && stored.epoch == request.epoch && stored.owner() == request.owner()
}

fn take(stored: &Lease, owner: &str, now_ms: u64, duration: Duration) -> Lease {
    let mut next = stored.clone();
    next.owner = Some(owner.to_owned());
    next.epoch = stored.epoch + 1;
    next.expires_at = expiry(now_ms, duration);
    next
}

/// Allowed iff nobody validly owns the record.
pub fn acquire(stored: &Lease, owner: &str, now_ms: u64, duration: Duration) -> Option<Lease> {
    if stored.is_owned(now_ms) {
        return None;
    }
    Some(take(stored, owner, now_ms, duration))
}

/// Allowed iff the record is exactly as the caller last observed it.
pub fn steal(
    stored: &Lease,
    snapshot: &Lease,
    owner: &str,
    now_ms: u64,
    duration: Duration,
) -> Option<Lease> {
    if stored.epoch != snapshot.epoch || stored.owner() != snapshot.owner() {
        return None;
    }
    Some(take(stored, owner, now_ms, duration))
}

/// Allowed iff the caller holds the current epoch. An expired lease that nobody
/// re-acquired can still be renewed.
pub fn renew(stored: &Lease, request: &Lease, now_ms: u64, duration: Duration) -> Option<Lease> {
    if !holds(stored, request) {
        return None;
    }
    let mut next = stored.clone();
    next.expires_at = expiry(now_ms, duration);
    Some(next)
}

/// Allowed iff the caller holds the current epoch and the lease is still valid.
/// The epoch is kept and the record becomes immediately acquirable.
pub fn release(stored: &Lease, request: &Lease, now_ms: u64) -> Option<Lease> {
    if !holds(stored, request) || stored.is_expired(now_ms) {
        return None;
    }
    let mut next = stored.clone();
    next.owner = None;
    next.expires_at = now_ms;
    Some(next)
}

/// Renew, then carry the caller's payload into the stored record.
pub fn update(stored: &Lease, request: &Lease, now_ms: u64, duration: Duration) -> Option<Lease> {
    let mut next = renew(stored, request, now_ms, duration)?;
    next.payload = request.payload.clone();
    Some(next)
}

#[cfg(test)]
mod tests {
    use super::*;

    const DURATION: Duration = Duration::from_millis(10_000);

    fn owned(owner: &str, epoch: u64, expires_at: u64) -> Lease {
        let mut lease = Lease::new("p-0");
        lease.owner = Some(owner.to_owned());
        lease.epoch = epoch;
        lease.expires_at = expires_at;
        lease
    }

    #[test]
    fn acquire_takes_unowned_and_expired_only() {
        let fresh = Lease::new("p-0");
        let next = acquire(&fresh, "a", 1_000, DURATION).unwrap();
        assert_eq!(next.owner(), Some("a"));
        assert_eq!(next.epoch, 1);
        assert_eq!(next.expires_at, 11_000);

        let valid = owned("b", 3, 5_000);
        assert!(acquire(&valid, "a", 4_999, DURATION).is_none());

        let expired = acquire(&valid, "a", 5_000, DURATION).unwrap();
        assert_eq!(expired.epoch, 4);
        assert_eq!(expired.owner(), Some("a"));
    }

    #[test]
    fn acquire_keeps_payload() {
        let mut stored = owned("b", 2, 0);
        stored.payload = Some(b"offset=42".to_vec());
        let next = acquire(&stored, "a", 1, DURATION).unwrap();
        assert_eq!(next.payload.as_deref(), Some(&b"offset=42"[..]));
    }

    #[test]
    fn steal_requires_unchanged_snapshot() {
        let stored = owned("b", 3, 50_000);
        let next = steal(&stored, &stored.clone(), "a", 1_000, DURATION).unwrap();
        assert_eq!(next.owner(), Some("a"));
        assert_eq!(next.epoch, 4);

        let stale_epoch = owned("b", 2, 50_000);
        assert!(steal(&stored, &stale_epoch, "a", 1_000, DURATION).is_none());

        let other_owner = owned("c", 3, 50_000);
        assert!(steal(&stored, &other_owner, "a", 1_000, DURATION).is_none());
    }

    #[test]
    fn renew_checks_epoch_and_owner() {
        let stored = owned("a", 5, 10_000);

        let renewed = renew(&stored, &owned("a", 5, 10_000), 8_000, DURATION).unwrap();
        assert_eq!(renewed.expires_at, 18_000);
        assert_eq!(renewed.epoch, 5);

        assert!(renew(&stored, &owned("a", 4, 10_000), 8_000, DURATION).is_none());
        assert!(renew(&stored, &owned("b", 5, 10_000), 8_000, DURATION).is_none());
    }

    #[test]
    fn renew_after_expiry_is_allowed_until_someone_else_acquires() {
        let stored = owned("a", 5, 10_000);
        assert!(renew(&stored, &stored.clone(), 20_000, DURATION).is_some());

        let taken = acquire(&stored, "b", 20_000, DURATION).unwrap();
        assert!(renew(&taken, &stored, 20_001, DURATION).is_none());
    }

    #[test]
    fn renew_rejects_released_lease() {
        let stored = owned("a", 5, 10_000);
        let released = release(&stored, &stored.clone(), 1_000).unwrap();
        assert_eq!(released.owner(), None);
        assert_eq!(released.epoch, 5);
        assert_eq!(released.expires_at, 1_000);

        assert!(renew(&released, &stored, 1_001, DURATION).is_none());
        assert!(acquire(&released, "b", 1_000, DURATION).is_some());
    }

    #[test]
    fn release_fails_once_expired() {
        let stored = owned("a", 5, 10_000);
        assert!(release(&stored, &stored.clone(), 10_000).is_none());
    }

    #[test]
    fn update_writes_payload_and_extends() {
        let stored = owned("a", 5, 10_000);
        let mut request = stored.clone();
        request.payload = Some(vec![1, 2, 3]);

        let next = update(&stored, &request, 9_000, DURATION).unwrap();
        assert_eq!(next.payload, Some(vec![1, 2, 3]));
        assert_eq!(next.expires_at, 19_000);

        let mut stale = request.clone();
        stale.epoch = 4;
        assert!(update(&stored, &stale, 9_000, DURATION).is_none());
    }
}
