use serde::{Deserialize, Serialize};
use std::fmt;

/// Ownership record for one partition.
///
/// A lease is owned iff `owner` is non-empty and `now < expires_at`. The `epoch`
/// is bumped by the store on every successful acquisition and is the token that
/// renew / release / update calls are checked against, so a host that has since
/// lost the lease cannot write with a stale copy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lease {
    partition_id: String,
    /// Host currently believed to hold the lease.
    #[serde(default)]
    pub owner: Option<String>,
    /// Expiry instant, milliseconds since the Unix epoch.
    #[serde(default)]
    pub expires_at: u64,
    #[serde(default)]
    pub epoch: u64,
    /// Opaque application data (typically a checkpoint), written only through an update.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Vec<u8>>,
}

impl Lease {
    /// The bootstrap record for a partition: unowned, epoch 0, already expired.
    pub fn new(partition_id: impl Into<String>) -> Self {
        Self {
            partition_id: partition_id.into(),
            owner: None,
            expires_at: 0,
            epoch: 0,
            payload: None,
        }
    }

    pub fn partition_id(&self) -> &str {
        &self.partition_id
    }

    /// The owner, with an empty string treated as no owner.
    pub fn owner(&self) -> Option<&str> {
        self.owner.as_deref().filter(|owner| !owner.is_empty())
    }

    pub fn is_expired(&self, now_ms: u64) -> bool {
        now_ms >= self.expires_at
    }

    pub fn is_owned(&self, now_ms: u64) -> bool {
        self.owner().is_some() && !self.is_expired(now_ms)
    }

    pub fn is_owned_by(&self, host: &str, now_ms: u64) -> bool {
        self.owner() == Some(host) && !self.is_expired(now_ms)
    }

    /// Remaining validity, zero once expired.
    pub fn remaining_ms(&self, now_ms: u64) -> u64 {
        self.expires_at.saturating_sub(now_ms)
    }
}

impl fmt::Display for Lease {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Lease(partition: {}, owner: {}, epoch: {}, expires_at: {})",
            self.partition_id,
            self.owner().unwrap_or("-"),
            self.epoch,
            self.expires_at
        )
    }
}
