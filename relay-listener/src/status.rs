//! The connecting/online/offline status observer surface shared by
//! [`crate::listener::Listener`] and [`crate::client::Client`].

use crate::error::RelayError;
use tokio::sync::watch;

/// A point-in-time connectivity state.
#[derive(Debug, Clone)]
pub enum RelayStatus {
    /// A control connection attempt is in flight.
    Connecting,
    /// The control channel is up and accepting rendezvous.
    Online,
    /// The control channel is down. Carries the error that caused the drop,
    /// or `None` on a clean, caller-initiated close.
    Offline(Option<RelayError>),
}

impl PartialEq for RelayStatus {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (RelayStatus::Connecting, RelayStatus::Connecting) => true,
            (RelayStatus::Online, RelayStatus::Online) => true,
            (RelayStatus::Offline(a), RelayStatus::Offline(b)) => a.is_none() == b.is_none(),
            _ => false,
        }
    }
}

/// Broadcasts [`RelayStatus`] transitions, coalescing consecutive identical
/// transitions so observers never see the same state reported twice in a row.
pub struct StatusBroadcaster {
    tx: watch::Sender<RelayStatus>,
}

impl StatusBroadcaster {
    pub fn new() -> Self {
        Self {
            tx: watch::channel(RelayStatus::Offline(None)).0,
        }
    }

    /// Subscribes to status changes. The subscriber's first `changed().await`
    /// resolves immediately with the current status.
    pub fn subscribe(&self) -> watch::Receiver<RelayStatus> {
        self.tx.subscribe()
    }

    /// The most recently published status.
    pub fn current(&self) -> RelayStatus {
        self.tx.borrow().clone()
    }

    /// Publishes `status`, unless it is identical to the currently published
    /// one (a `watch` channel already suppresses that case for most variants,
    /// but `Offline` needs the custom [`PartialEq`] above to collapse
    /// different errors into "still offline").
    pub fn publish(&self, status: RelayStatus) {
        self.tx.send_if_modified(|current| {
            if *current == status {
                false
            } else {
                *current = status;
                true
            }
        });
    }
}

impl Default for StatusBroadcaster {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{RelayError, RelayErrorKind};
    use crate::tracking::TrackingContext;

    #[tokio::test]
    async fn subscriber_sees_current_status_immediately() {
        let broadcaster = StatusBroadcaster::new();
        broadcaster.publish(RelayStatus::Online);
        let rx = broadcaster.subscribe();
        assert!(matches!(*rx.borrow(), RelayStatus::Online));
    }

    #[tokio::test]
    async fn repeated_offline_does_not_emit_duplicate_change() {
        let broadcaster = StatusBroadcaster::new();
        let mut rx = broadcaster.subscribe();
        broadcaster.publish(RelayStatus::Online);
        rx.changed().await.unwrap();

        broadcaster.publish(RelayStatus::Offline(Some(RelayError::new(
            RelayErrorKind::ConnectionLost,
            "first drop",
            TrackingContext::new("/listener"),
        ))));
        rx.changed().await.unwrap();

        broadcaster.publish(RelayStatus::Offline(Some(RelayError::new(
            RelayErrorKind::ConnectionLost,
            "second drop, same coalesced state",
            TrackingContext::new("/listener"),
        ))));

        let changed = tokio::time::timeout(std::time::Duration::from_millis(50), rx.changed()).await;
        assert!(changed.is_err(), "a second Offline publish must not emit another change");
    }

    #[tokio::test]
    async fn connecting_then_online_are_distinct_transitions() {
        let broadcaster = StatusBroadcaster::new();
        let mut rx = broadcaster.subscribe();
        broadcaster.publish(RelayStatus::Connecting);
        rx.changed().await.unwrap();
        assert!(matches!(*rx.borrow(), RelayStatus::Connecting));

        broadcaster.publish(RelayStatus::Online);
        rx.changed().await.unwrap();
        assert!(matches!(*rx.borrow(), RelayStatus::Online));
    }
}
