use futures::stream::Stream;
use futures::StreamExt;
use std::task::{Context, Poll};
use std::{fmt, pin::Pin};
use tokio::sync::broadcast;
use tokio_stream::wrappers::{errors::BroadcastStreamRecvError, BroadcastStream};

use crate::errors::{HostError, Result};

/// Why this host stopped owning a partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LossReason {
    /// The store refused a renewal: the lease was stolen or re-acquired after expiry.
    RenewalRejected,
    /// The store refused a payload update for the same reasons.
    UpdateRejected,
    /// Renewals kept failing until the local copy of the lease ran out.
    Expired,
    /// Released on request.
    Released,
}

/// Ownership changes seen by one host. Consumers start per-partition work on
/// `Acquired` and stop it on `Lost`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OwnershipEvent {
    Acquired {
        partition_id: String,
        epoch: u64,
        /// Set when the lease was taken from a live host.
        stolen_from: Option<String>,
    },
    Lost {
        partition_id: String,
        epoch: u64,
        reason: LossReason,
    },
}

impl OwnershipEvent {
    pub fn partition_id(&self) -> &str {
        match self {
            OwnershipEvent::Acquired { partition_id, .. }
            | OwnershipEvent::Lost { partition_id, .. } => partition_id,
        }
    }

    pub fn is_acquired(&self) -> bool {
        matches!(self, OwnershipEvent::Acquired { .. })
    }
}

impl fmt::Display for OwnershipEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OwnershipEvent::Acquired {
                partition_id,
                epoch,
                stolen_from,
            } => {
                write!(f, "Acquired(partition: {}, epoch: {}", partition_id, epoch)?;
                if let Some(victim) = stolen_from {
                    write!(f, ", stolen_from: {}", victim)?;
                }
                write!(f, ")")
            }
            OwnershipEvent::Lost {
                partition_id,
                epoch,
                reason,
            } => write!(
                f,
                "Lost(partition: {}, epoch: {}, reason: {:?})",
                partition_id, epoch, reason
            ),
        }
    }
}

/// Stream of ownership changes for one scanner.
pub struct OwnershipStream {
    inner: Pin<Box<dyn Stream<Item = Result<OwnershipEvent>> + Send>>,
}

impl Stream for OwnershipStream {
    type Item = Result<OwnershipEvent>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.as_mut().poll_next(cx)
    }
}

impl OwnershipStream {
    /// Lag (a slow consumer) is surfaced as `HostError::EventsLagged` instead of
    /// silently skipping events.
    pub fn from_broadcast(rx: broadcast::Receiver<OwnershipEvent>) -> Self {
        let stream = BroadcastStream::new(rx).map(|result| match result {
            Ok(event) => Ok(event),
            Err(BroadcastStreamRecvError::Lagged(n)) => Err(HostError::EventsLagged(n)),
        });
        Self {
            inner: Box::pin(stream),
        }
    }
}
