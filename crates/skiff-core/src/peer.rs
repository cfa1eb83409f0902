//! Per-peer connection state.

use crate::error::{LinkError, TransferError};
use crate::link::Link;
use skiff_discovery::DeviceId;
use skiff_files::WireMessage;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{MutexGuard, broadcast, watch};

/// Connection status of one peer state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PeerStatus {
    /// Handshake in progress
    Connecting,
    /// Direct link up
    Connected,
    /// Closed cleanly or peer left presence
    Disconnected,
    /// Handshake error, connect timeout or link failure
    Failed,
}

impl PeerStatus {
    /// `disconnected` or `failed`
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, PeerStatus::Disconnected | PeerStatus::Failed)
    }

    /// Check if transition to `next` is allowed
    #[must_use]
    pub fn can_transition_to(self, next: PeerStatus) -> bool {
        use PeerStatus::*;
        matches!(
            (self, next),
            (Connecting, Connected)
                | (Connecting, Disconnected)
                | (Connecting, Failed)
                | (Connected, Disconnected)
                | (Connected, Failed)
        )
    }

    /// Lowercase name
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            PeerStatus::Connecting => "connecting",
            PeerStatus::Connected => "connected",
            PeerStatus::Disconnected => "disconnected",
            PeerStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for PeerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status change notification
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerEvent {
    /// A peer state moved to a new status
    StatusChanged {
        /// Remote device
        peer_id: DeviceId,
        /// Instance that changed
        instance: u64,
        /// New status
        status: PeerStatus,
    },
}

/// One instance of the connection state for a peer.
///
/// Instances are never reused: reconnecting retires the old instance and
/// creates a new one with a higher instance number.
pub struct PeerConnection {
    peer_id: DeviceId,
    instance: u64,
    is_initiator: bool,
    link: Arc<dyn Link>,
    status: watch::Sender<PeerStatus>,
    events: broadcast::Sender<PeerEvent>,
    created_at: Instant,
    send_gate: tokio::sync::Mutex<()>,
}

impl PeerConnection {
    pub(crate) fn new(
        peer_id: DeviceId,
        instance: u64,
        is_initiator: bool,
        link: Arc<dyn Link>,
        events: broadcast::Sender<PeerEvent>,
    ) -> Self {
        let (status, _) = watch::channel(PeerStatus::Connecting);
        Self {
            peer_id,
            instance,
            is_initiator,
            link,
            status,
            events,
            created_at: Instant::now(),
            send_gate: tokio::sync::Mutex::new(()),
        }
    }

    /// Remote device id
    #[must_use]
    pub fn peer_id(&self) -> &str {
        &self.peer_id
    }

    /// Instance number, unique per manager
    #[must_use]
    pub fn instance(&self) -> u64 {
        self.instance
    }

    /// True if this side sends the offer
    #[must_use]
    pub fn is_initiator(&self) -> bool {
        self.is_initiator
    }

    /// Current status
    #[must_use]
    pub fn status(&self) -> PeerStatus {
        *self.status.borrow()
    }

    /// Watch status changes
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<PeerStatus> {
        self.status.subscribe()
    }

    /// Time since this instance was created
    #[must_use]
    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    pub(crate) fn link(&self) -> &Arc<dyn Link> {
        &self.link
    }

    /// Move to `next` if the state machine allows it. Returns true on change.
    pub(crate) fn transition(&self, next: PeerStatus) -> bool {
        let mut previous = next;
        let changed = self.status.send_if_modified(|current| {
            if !current.can_transition_to(next) {
                return false;
            }
            previous = *current;
            *current = next;
            true
        });

        if changed {
            tracing::info!(
                "Peer {} (instance {}) {} -> {}",
                self.peer_id,
                self.instance,
                previous,
                next
            );
            let _ = self.events.send(PeerEvent::StatusChanged {
                peer_id: self.peer_id.clone(),
                instance: self.instance,
                status: next,
            });
        }
        changed
    }

    /// Tear down: set a terminal status and close the link. Idempotent.
    pub(crate) fn retire(&self, status: PeerStatus) {
        debug_assert!(status.is_terminal());
        self.transition(status);
        self.link.close();
    }

    /// Mark failed and close the link
    pub fn fail(&self) {
        self.retire(PeerStatus::Failed);
    }

    /// Wait until this instance is connected.
    ///
    /// # Errors
    ///
    /// Returns [`TransferError::HandshakeTimeout`] if `timeout` elapses first,
    /// or [`TransferError::ConnectionFailed`] if the instance reaches a terminal
    /// status instead.
    pub async fn wait_connected(&self, timeout: Duration) -> Result<(), TransferError> {
        let mut rx = self.status.subscribe();
        let outcome = tokio::time::timeout(timeout, async {
            rx.wait_for(|status| *status != PeerStatus::Connecting)
                .await
                .map(|status| *status)
        })
        .await;

        match outcome {
            Err(_) => Err(TransferError::HandshakeTimeout(self.peer_id.clone())),
            Ok(Ok(PeerStatus::Connected)) => Ok(()),
            Ok(Ok(status)) => Err(TransferError::ConnectionFailed {
                peer: self.peer_id.clone(),
                status,
            }),
            Ok(Err(_)) => Err(TransferError::Aborted),
        }
    }

    /// Serialize sends on this connection
    pub(crate) async fn lock_sends(&self) -> MutexGuard<'_, ()> {
        self.send_gate.lock().await
    }

    /// Send one message while the instance is live
    pub(crate) async fn send(&self, message: WireMessage) -> Result<(), TransferError> {
        if self.status() != PeerStatus::Connected {
            return Err(TransferError::Aborted);
        }
        match self.link.send(message).await {
            Ok(()) => Ok(()),
            Err(_) if self.status().is_terminal() => Err(TransferError::Aborted),
            Err(LinkError::Closed) => Err(TransferError::Aborted),
            Err(e) => Err(TransferError::Send(e)),
        }
    }
}

impl fmt::Debug for PeerConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PeerConnection")
            .field("peer_id", &self.peer_id)
            .field("instance", &self.instance)
            .field("is_initiator", &self.is_initiator)
            .field("status", &self.status())
            .finish()
    }
}
