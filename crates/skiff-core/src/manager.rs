//! Connection lifecycle manager.
//!
//! Owns at most one [`PeerConnection`] per remote device. Every instance is
//! driven by its own task that consumes the link's [`LinkEvent`]s, so distinct
//! peers progress independently.
//!
//! ## State machine
//!
//! ```text
//!              handshake               remote close / left presence
//! connecting ------------> connected ------------------------------> disconnected
//!     |                        |
//!     | error / timeout        | unrecoverable error
//!     v                        v
//!   failed <-------------------+
//! ```
//!
//! `failed` is terminal until [`ConnectionManager::reconnect`]; `disconnected`
//! is terminal until the peer is (re)reconciled as present.

use crate::config::NodeConfig;
use crate::election::Role;
use crate::error::{LinkError, TransferError};
use crate::link::{Connector, LinkEvent, LinkSpec};
use crate::peer::{PeerConnection, PeerEvent, PeerStatus};
use crate::transfer::{self, TransferObserver, TransferOptions, TransferReport};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use skiff_discovery::{DeviceId, SignalEnvelope, SignalPayload, SignalRelay};
use skiff_files::{Frame, OutgoingFile, Reassembler, ReceivedFile};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};

/// Capacity of the status event broadcast
const EVENT_CAPACITY: usize = 256;

/// Handler for completed incoming files: `(sender, file)`
pub type FileHandler = Arc<dyn Fn(DeviceId, ReceivedFile) + Send + Sync>;

/// Result of one [`ConnectionManager::reconcile`] pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Peers that got a new `connecting` state
    pub created: Vec<DeviceId>,
    /// Peers torn down because they left presence
    pub retired: Vec<DeviceId>,
}

impl ReconcileReport {
    /// True if the pass changed nothing
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.created.is_empty() && self.retired.is_empty()
    }
}

/// What [`ConnectionManager::apply_signal`] did with an envelope
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalDisposition {
    /// Routed to the live state (possibly a duplicate no-op)
    Applied {
        /// Instance it was applied to
        instance: u64,
    },
    /// An offer created a fresh responding state, or a restart a fresh
    /// initiating one
    Created {
        /// New instance
        instance: u64,
    },
    /// No live state to route to
    Stale,
    /// Offer at an initiating state, restart at a responding one, or a
    /// self-addressed envelope
    Ignored,
    /// The link refused the payload and the state failed
    Rejected,
}

struct ManagerInner {
    local_id: DeviceId,
    peers: DashMap<DeviceId, Arc<PeerConnection>>,
    next_instance: AtomicU64,
    connector: Arc<dyn Connector>,
    relay: Arc<dyn SignalRelay>,
    on_file: FileHandler,
    events: broadcast::Sender<PeerEvent>,
    connect_timeout: Duration,
    transfer: TransferOptions,
}

/// Connection lifecycle manager
#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<ManagerInner>,
}

impl ConnectionManager {
    /// Create a manager for `local_id`
    pub fn new(
        local_id: impl Into<DeviceId>,
        config: &NodeConfig,
        connector: Arc<dyn Connector>,
        relay: Arc<dyn SignalRelay>,
        on_file: FileHandler,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            inner: Arc::new(ManagerInner {
                local_id: local_id.into(),
                peers: DashMap::new(),
                next_instance: AtomicU64::new(1),
                connector,
                relay,
                on_file,
                events,
                connect_timeout: config.connect_timeout,
                transfer: TransferOptions {
                    send_wait_timeout: config.send_wait_timeout,
                    chunk_size: config.chunk_size,
                },
            }),
        }
    }

    /// Local device id
    #[must_use]
    pub fn local_id(&self) -> &str {
        &self.inner.local_id
    }

    /// Bring the tracked peer set in line with `present`.
    ///
    /// Creates a `connecting` state for each present peer without a live one
    /// (a `disconnected` state is recreated, a `failed` one is left alone) and
    /// tears down every tracked peer that is no longer present.
    pub fn reconcile<I, S>(&self, present: I) -> ReconcileReport
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let present: HashSet<String> = present
            .into_iter()
            .map(|id| id.as_ref().to_string())
            .filter(|id| *id != self.inner.local_id)
            .collect();

        let mut report = ReconcileReport::default();

        let absent: Vec<DeviceId> = self
            .inner
            .peers
            .iter()
            .filter(|entry| !present.contains(entry.key()))
            .map(|entry| entry.key().clone())
            .collect();
        for peer_id in absent {
            if let Some((_, peer)) = self.inner.peers.remove(&peer_id) {
                peer.retire(PeerStatus::Disconnected);
                tracing::info!("Peer {} left", peer_id);
                report.retired.push(peer_id);
            }
        }

        let mut sorted: Vec<_> = present.into_iter().collect();
        sorted.sort();
        for peer_id in sorted {
            let role = Role::elect(&self.inner.local_id, &peer_id);
            let created = self.replace_if(&peer_id, role, |existing| {
                existing.is_none_or(|peer| peer.status() == PeerStatus::Disconnected)
            });
            match created {
                Ok(Some(_)) => report.created.push(peer_id),
                Ok(None) => {}
                Err(e) => tracing::warn!("Could not open link to {}: {}", peer_id, e),
            }
        }

        if !report.is_empty() {
            tracing::debug!(
                "Reconciled: {} created, {} retired",
                report.created.len(),
                report.retired.len()
            );
        }
        report
    }

    /// Route an envelope from the relay to its sender's state.
    ///
    /// Only an offer creates a state for a sender without a live one. Duplicate
    /// and out-of-order envelopes are no-ops. The caller deletes the envelope
    /// whatever the outcome.
    pub fn apply_signal(&self, envelope: &SignalEnvelope) -> SignalDisposition {
        let sender = envelope.sender.as_str();
        if sender == self.inner.local_id {
            return SignalDisposition::Ignored;
        }

        if envelope.data.is_restart() {
            return self.restart_for(sender);
        }

        let current = self.connection(sender).filter(|peer| !peer.status().is_terminal());

        let Some(peer) = current else {
            if !envelope.data.is_offer() {
                tracing::debug!("Stale {} from {}", envelope.data.kind(), sender);
                return SignalDisposition::Stale;
            }
            tracing::debug!("Offer from {} before presence", sender);
            return self.answer_fresh(sender, &envelope.data, None);
        };

        if envelope.data.is_offer() && peer.is_initiator() {
            tracing::debug!("Initiator ignoring offer from {}", sender);
            return SignalDisposition::Ignored;
        }

        match peer.link().signal(envelope.data.clone()) {
            Ok(()) => SignalDisposition::Applied {
                instance: peer.instance(),
            },
            Err(LinkError::OfferConflict) => {
                tracing::info!("New session offered by {}, replacing instance {}", sender, peer.instance());
                self.answer_fresh(sender, &envelope.data, Some(peer.instance()))
            }
            Err(e) => {
                tracing::warn!("Peer {} rejected {}: {}", sender, envelope.data.kind(), e);
                peer.fail();
                SignalDisposition::Rejected
            }
        }
    }

    /// Create a responding state for `sender` and hand it `offer`.
    ///
    /// `replacing` names the instance expected in the map; when `None` only a
    /// missing or terminal state is replaced.
    fn answer_fresh(
        &self,
        sender: &str,
        offer: &SignalPayload,
        replacing: Option<u64>,
    ) -> SignalDisposition {
        let created = self.replace_if(sender, Role::Responder, |existing| match (existing, replacing) {
            (None, _) => true,
            (Some(peer), Some(instance)) => peer.instance() == instance,
            (Some(peer), None) => peer.status().is_terminal(),
        });

        let peer = match created {
            Ok(Some(peer)) => peer,
            Ok(None) => {
                // Lost a race with another creator; route to whatever is there now
                return match self.connection(sender) {
                    Some(peer) if !peer.is_initiator() && peer.link().signal(offer.clone()).is_ok() => {
                        SignalDisposition::Applied {
                            instance: peer.instance(),
                        }
                    }
                    _ => SignalDisposition::Ignored,
                };
            }
            Err(e) => {
                tracing::warn!("Could not open link to {}: {}", sender, e);
                return SignalDisposition::Rejected;
            }
        };

        match peer.link().signal(offer.clone()) {
            Ok(()) => SignalDisposition::Created {
                instance: peer.instance(),
            },
            Err(e) => {
                tracing::warn!("Peer {} rejected offer: {}", sender, e);
                peer.fail();
                SignalDisposition::Rejected
            }
        }
    }

    /// A responding peer reconnected: start over as the initiator.
    fn restart_for(&self, sender: &str) -> SignalDisposition {
        if !Role::elect(&self.inner.local_id, sender).is_initiator() {
            tracing::debug!("Restart from {} ignored, it initiates", sender);
            return SignalDisposition::Ignored;
        }

        tracing::info!("Peer {} asked for a restart", sender);
        match self.replace_if(sender, Role::Initiator, |_| true) {
            Ok(Some(peer)) => SignalDisposition::Created {
                instance: peer.instance(),
            },
            Ok(None) => SignalDisposition::Ignored,
            Err(e) => {
                tracing::warn!("Could not open link to {}: {}", sender, e);
                SignalDisposition::Rejected
            }
        }
    }

    /// Invalidate any state for `peer_id` and start over with a fresh
    /// election.
    ///
    /// The initiating side offers on its own. A responding side also posts a
    /// restart request, since the initiator may be sitting in `failed` and
    /// will not offer again by itself.
    ///
    /// # Errors
    ///
    /// Returns error if a new link cannot be opened.
    pub fn reconnect(&self, peer_id: &str) -> Result<Arc<PeerConnection>, LinkError> {
        if peer_id == self.inner.local_id {
            return Err(LinkError::handshake("cannot connect to self"));
        }
        let role = Role::elect(&self.inner.local_id, peer_id);
        tracing::info!("Reconnecting to {} as {:?}", peer_id, role);
        let peer = self
            .replace_if(peer_id, role, |_| true)?
            .ok_or(LinkError::handshake("replacement refused"))?;

        if !role.is_initiator() {
            let relay = Arc::clone(&self.inner.relay);
            let recipient = peer_id.to_string();
            let envelope = SignalEnvelope::new(self.inner.local_id.clone(), SignalPayload::Restart);
            tokio::spawn(async move {
                if let Err(e) = relay.post(&recipient, &envelope).await {
                    tracing::warn!("Failed to ask {} for a restart: {}", recipient, e);
                }
            });
        }
        Ok(peer)
    }

    /// Atomically replace the state for `peer_id` when `should_replace`
    /// agrees. The previous instance is retired before the new one is
    /// inserted.
    fn replace_if<F>(
        &self,
        peer_id: &str,
        role: Role,
        should_replace: F,
    ) -> Result<Option<Arc<PeerConnection>>, LinkError>
    where
        F: FnOnce(Option<&Arc<PeerConnection>>) -> bool,
    {
        match self.inner.peers.entry(peer_id.to_string()) {
            Entry::Occupied(mut entry) => {
                if !should_replace(Some(entry.get())) {
                    return Ok(None);
                }
                entry.get().retire(PeerStatus::Disconnected);
                let peer = self.spawn_peer(peer_id, role)?;
                entry.insert(Arc::clone(&peer));
                Ok(Some(peer))
            }
            Entry::Vacant(entry) => {
                if !should_replace(None) {
                    return Ok(None);
                }
                let peer = self.spawn_peer(peer_id, role)?;
                entry.insert(Arc::clone(&peer));
                Ok(Some(peer))
            }
        }
    }

    fn spawn_peer(&self, peer_id: &str, role: Role) -> Result<Arc<PeerConnection>, LinkError> {
        let instance = self.inner.next_instance.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();
        let link = self.inner.connector.open(
            LinkSpec {
                local: self.inner.local_id.clone(),
                remote: peer_id.to_string(),
                initiator: role.is_initiator(),
            },
            tx,
        )?;

        let peer = Arc::new(PeerConnection::new(
            peer_id.to_string(),
            instance,
            role.is_initiator(),
            link,
            self.inner.events.clone(),
        ));

        tracing::info!(
            "Peer {} instance {} connecting as {:?}",
            peer_id,
            instance,
            role
        );

        tokio::spawn(drive(
            Arc::clone(&peer),
            rx,
            Driver {
                local_id: self.inner.local_id.clone(),
                relay: Arc::clone(&self.inner.relay),
                on_file: Arc::clone(&self.inner.on_file),
                connect_timeout: self.inner.connect_timeout,
            },
        ));

        Ok(peer)
    }

    /// Current status of `peer_id`, `disconnected` when unknown
    #[must_use]
    pub fn status(&self, peer_id: &str) -> PeerStatus {
        self.connection(peer_id)
            .map_or(PeerStatus::Disconnected, |peer| peer.status())
    }

    /// Snapshot of every tracked peer's status
    #[must_use]
    pub fn statuses(&self) -> BTreeMap<DeviceId, PeerStatus> {
        self.inner
            .peers
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().status()))
            .collect()
    }

    /// Current instance for `peer_id`
    #[must_use]
    pub fn connection(&self, peer_id: &str) -> Option<Arc<PeerConnection>> {
        self.inner.peers.get(peer_id).map(|entry| Arc::clone(entry.value()))
    }

    /// Subscribe to status transitions
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<PeerEvent> {
        self.inner.events.subscribe()
    }

    /// Send a file to `peer_id` over its current instance
    ///
    /// # Errors
    ///
    /// Returns the error also reported to `observer`.
    pub async fn send_file(
        &self,
        peer_id: &str,
        file: &OutgoingFile,
        observer: &dyn TransferObserver,
    ) -> Result<TransferReport, TransferError> {
        let Some(peer) = self.connection(peer_id) else {
            let error = TransferError::UnknownPeer(peer_id.to_string());
            observer.on_error(&error);
            return Err(error);
        };
        transfer::send_file(&peer, file, observer, &self.inner.transfer).await
    }

    /// Tear down every state
    pub fn shutdown(&self) {
        let ids: Vec<DeviceId> = self.inner.peers.iter().map(|e| e.key().clone()).collect();
        for peer_id in ids {
            if let Some((_, peer)) = self.inner.peers.remove(&peer_id) {
                peer.retire(PeerStatus::Disconnected);
            }
        }
        tracing::debug!("Connection manager for {} shut down", self.inner.local_id);
    }
}

/// Everything a driver task needs besides its peer
struct Driver {
    local_id: DeviceId,
    relay: Arc<dyn SignalRelay>,
    on_file: FileHandler,
    connect_timeout: Duration,
}

/// Drive one instance until it reaches a terminal status
async fn drive(
    peer: Arc<PeerConnection>,
    mut events: mpsc::UnboundedReceiver<LinkEvent>,
    driver: Driver,
) {
    let mut status = peer.subscribe();
    // Measured from state creation, not from when this task first ran
    let deadline = tokio::time::sleep(driver.connect_timeout.saturating_sub(peer.age()));
    tokio::pin!(deadline);
    let mut reassembler = Reassembler::new();

    loop {
        if peer.status().is_terminal() {
            break;
        }

        tokio::select! {
            event = events.recv() => {
                let Some(event) = event else { break };
                handle_event(&peer, event, &driver, &mut reassembler).await;
            }
            () = &mut deadline, if peer.status() == PeerStatus::Connecting => {
                tracing::warn!(
                    "Peer {} instance {} did not connect within {:?}",
                    peer.peer_id(),
                    peer.instance(),
                    driver.connect_timeout
                );
                peer.fail();
            }
            changed = status.changed() => {
                if changed.is_err() {
                    break;
                }
            }
        }
    }

    if let Some(metadata) = reassembler.abandon() {
        tracing::warn!(
            "Incoming transfer {} from {} abandoned",
            metadata.file_id,
            peer.peer_id()
        );
    }
    tracing::trace!("Driver for {} instance {} finished", peer.peer_id(), peer.instance());
}

async fn handle_event(
    peer: &PeerConnection,
    event: LinkEvent,
    driver: &Driver,
    reassembler: &mut Reassembler,
) {
    match event {
        LinkEvent::Signal(payload) => {
            let envelope = SignalEnvelope::new(driver.local_id.clone(), payload);
            if let Err(e) = driver.relay.post(peer.peer_id(), &envelope).await {
                tracing::warn!("Failed to relay {} to {}: {}", envelope.data.kind(), peer.peer_id(), e);
            }
        }
        LinkEvent::Connected => {
            peer.transition(PeerStatus::Connected);
        }
        LinkEvent::Message(message) => match Frame::decode(message) {
            Ok(frame) => {
                if let Some(file) = reassembler.handle(frame) {
                    (driver.on_file)(peer.peer_id().to_string(), file);
                }
            }
            Err(e) => tracing::warn!("Dropping frame from {}: {}", peer.peer_id(), e),
        },
        LinkEvent::Closed => {
            peer.retire(PeerStatus::Disconnected);
        }
        LinkEvent::Error(error) if error.is_benign() => {
            tracing::debug!("Ignoring benign error from {}: {}", peer.peer_id(), error);
        }
        LinkEvent::Error(error) => {
            tracing::warn!("Link to {} failed: {}", peer.peer_id(), error);
            peer.fail();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryNetwork;
    use skiff_discovery::memory::MemoryDirectory;
    use std::sync::Mutex;

    struct Harness {
        manager: ConnectionManager,
        relay: MemoryDirectory,
        received: Arc<Mutex<Vec<(DeviceId, ReceivedFile)>>>,
    }

    fn create_test_manager(local: &str, network: &MemoryNetwork, relay: &MemoryDirectory) -> Harness {
        let received = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&received);
        let config = NodeConfig {
            connect_timeout: Duration::from_millis(200),
            send_wait_timeout: Duration::from_millis(500),
            ..NodeConfig::default()
        };
        let manager = ConnectionManager::new(
            local,
            &config,
            Arc::new(network.clone()),
            Arc::new(relay.clone()),
            Arc::new(move |from, file| sink.lock().unwrap().push((from, file))),
        );
        Harness {
            manager,
            relay: relay.clone(),
            received,
        }
    }

    async fn settle() {
        for _ in 0..20 {
            tokio::task::yield_now().await;
        }
    }

    /// Move every pending envelope for `harness` into its manager
    async fn pump(harness: &Harness) -> usize {
        let local = harness.manager.local_id().to_string();
        let mailbox = harness.relay.watch_mailbox(&local).borrow().clone();
        for (key, value) in &mailbox {
            if let Ok(envelope) = SignalEnvelope::from_value(value) {
                harness.manager.apply_signal(&envelope);
            }
            harness.relay.delete(&local, key).await.unwrap();
        }
        mailbox.len()
    }

    /// Throw away every pending envelope for `harness` unapplied
    async fn drain(harness: &Harness) {
        let local = harness.manager.local_id().to_string();
        let mailbox = harness.relay.watch_mailbox(&local).borrow().clone();
        for key in mailbox.keys() {
            harness.relay.delete(&local, key).await.unwrap();
        }
    }

    async fn wait_failed(harness: &Harness, peer: &str) {
        let mut rx = harness.manager.connection(peer).unwrap().subscribe();
        tokio::time::timeout(Duration::from_secs(2), rx.wait_for(|s| *s == PeerStatus::Failed))
            .await
            .unwrap()
            .unwrap();
    }

    async fn exchange(a: &Harness, b: &Harness) {
        for _ in 0..10 {
            settle().await;
            let moved = pump(a).await + pump(b).await;
            if moved == 0 {
                settle().await;
                if pump(a).await + pump(b).await == 0 {
                    return;
                }
            }
        }
    }

    #[tokio::test]
    async fn test_reconcile_elects_roles() {
        let network = MemoryNetwork::new();
        let relay = MemoryDirectory::new();
        let h = create_test_manager("m", &network, &relay);

        let report = h.manager.reconcile(["a", "z", "m"]);
        assert_eq!(report.created, vec!["a".to_string(), "z".to_string()]);

        assert!(h.manager.connection("a").unwrap().is_initiator());
        assert!(!h.manager.connection("z").unwrap().is_initiator());
        assert_eq!(h.manager.status("a"), PeerStatus::Connecting);
        assert_eq!(h.manager.status("nobody"), PeerStatus::Disconnected);

        // Second pass with the same set changes nothing
        assert!(h.manager.reconcile(["a", "z"]).is_empty());
    }

    #[tokio::test]
    async fn test_initiator_posts_offer() {
        let network = MemoryNetwork::new();
        let relay = MemoryDirectory::new();
        let h = create_test_manager("b", &network, &relay);

        h.manager.reconcile(["a"]);
        settle().await;

        let mailbox = relay.watch_mailbox("a").borrow().clone();
        let kinds: Vec<_> = mailbox
            .values()
            .map(|v| SignalEnvelope::from_value(v).unwrap())
            .map(|e| {
                assert_eq!(e.sender, "b");
                e.data.kind()
            })
            .collect();
        assert_eq!(kinds, vec!["offer", "candidate"]);
    }

    #[tokio::test]
    async fn test_pair_connects() {
        let network = MemoryNetwork::new();
        let relay = MemoryDirectory::new();
        let a = create_test_manager("a", &network, &relay);
        let b = create_test_manager("b", &network, &relay);

        a.manager.reconcile(["a", "b"]);
        b.manager.reconcile(["a", "b"]);
        exchange(&a, &b).await;

        assert_eq!(a.manager.status("b"), PeerStatus::Connected);
        assert_eq!(b.manager.status("a"), PeerStatus::Connected);
    }

    #[tokio::test]
    async fn test_offer_before_presence_creates_responder() {
        let network = MemoryNetwork::new();
        let relay = MemoryDirectory::new();
        let a = create_test_manager("a", &network, &relay);
        let b = create_test_manager("b", &network, &relay);

        // Only the initiator has seen presence
        b.manager.reconcile(["a"]);
        settle().await;

        let mailbox = relay.watch_mailbox("a").borrow().clone();
        let offer = mailbox
            .values()
            .map(|v| SignalEnvelope::from_value(v).unwrap())
            .find(|e| e.data.is_offer())
            .unwrap();

        let disposition = a.manager.apply_signal(&offer);
        assert!(matches!(disposition, SignalDisposition::Created { .. }));
        assert!(!a.manager.connection("b").unwrap().is_initiator());

        // Applying the same offer again is a no-op on the same instance
        let again = a.manager.apply_signal(&offer);
        let SignalDisposition::Created { instance } = disposition else { unreachable!() };
        assert_eq!(again, SignalDisposition::Applied { instance });

        exchange(&a, &b).await;
        assert_eq!(a.manager.status("b"), PeerStatus::Connected);
        assert_eq!(b.manager.status("a"), PeerStatus::Connected);
    }

    #[tokio::test]
    async fn test_stale_answer_without_state() {
        let network = MemoryNetwork::new();
        let relay = MemoryDirectory::new();
        let h = create_test_manager("a", &network, &relay);

        let answer = SignalEnvelope::new("b", SignalPayload::Answer { sdp: "memory:x".into() });
        assert_eq!(h.manager.apply_signal(&answer), SignalDisposition::Stale);
        assert!(h.manager.connection("b").is_none());
    }

    #[tokio::test]
    async fn test_offer_at_initiator_ignored() {
        let network = MemoryNetwork::new();
        let relay = MemoryDirectory::new();
        let h = create_test_manager("b", &network, &relay);
        h.manager.reconcile(["a"]);

        let offer = SignalEnvelope::new("a", SignalPayload::Offer { sdp: "memory:x".into() });
        assert_eq!(h.manager.apply_signal(&offer), SignalDisposition::Ignored);
        assert_eq!(h.manager.status("a"), PeerStatus::Connecting);
    }

    #[tokio::test]
    async fn test_connect_timeout_fails_state() {
        let network = MemoryNetwork::new();
        let relay = MemoryDirectory::new();
        let h = create_test_manager("zz", &network, &relay);

        h.manager.reconcile(["aa"]);
        let mut rx = h.manager.connection("aa").unwrap().subscribe();
        tokio::time::timeout(Duration::from_secs(2), rx.wait_for(|s| *s == PeerStatus::Failed))
            .await
            .unwrap()
            .unwrap();

        // Failed stays put through reconcile
        assert!(h.manager.reconcile(["aa"]).is_empty());
        assert_eq!(h.manager.status("aa"), PeerStatus::Failed);
    }

    #[tokio::test]
    async fn test_absent_peer_retired() {
        let network = MemoryNetwork::new();
        let relay = MemoryDirectory::new();
        let h = create_test_manager("m", &network, &relay);
        h.manager.reconcile(["a"]);
        let old = h.manager.connection("a").unwrap();

        let report = h.manager.reconcile(Vec::<String>::new());
        assert_eq!(report.retired, vec!["a".to_string()]);
        assert_eq!(old.status(), PeerStatus::Disconnected);
        assert_eq!(h.manager.status("a"), PeerStatus::Disconnected);
        assert!(h.manager.statuses().is_empty());
    }

    #[tokio::test]
    async fn test_reconnect_replaces_instance() {
        let network = MemoryNetwork::new();
        let relay = MemoryDirectory::new();
        let h = create_test_manager("m", &network, &relay);
        h.manager.reconcile(["a"]);
        let old = h.manager.connection("a").unwrap();
        old.fail();

        let new = h.manager.reconnect("a").unwrap();
        assert!(new.instance() > old.instance());
        assert_eq!(new.status(), PeerStatus::Connecting);
        assert_eq!(old.status(), PeerStatus::Failed);
        assert!(h.manager.reconnect("m").is_err());
    }

    #[tokio::test]
    async fn test_responder_reconnect_recovers_after_both_failed() {
        let network = MemoryNetwork::new();
        let relay = MemoryDirectory::new();
        let a = create_test_manager("a", &network, &relay);
        let b = create_test_manager("b", &network, &relay);

        // Every handshake signal is lost, both sides time out
        a.manager.reconcile(["b"]);
        b.manager.reconcile(["a"]);
        settle().await;
        drain(&a).await;
        drain(&b).await;
        wait_failed(&a, "b").await;
        wait_failed(&b, "a").await;
        drain(&a).await;

        // "a" is the responder; its retry must bring the pair back
        let fresh = a.manager.reconnect("b").unwrap();
        assert!(!fresh.is_initiator());

        let recovered = tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                exchange(&a, &b).await;
                if a.manager.status("b") == PeerStatus::Connected
                    && b.manager.status("a") == PeerStatus::Connected
                {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await;
        assert!(
            recovered.is_ok(),
            "a->b={} b->a={}",
            a.manager.status("b"),
            b.manager.status("a")
        );
        assert!(b.manager.connection("a").unwrap().is_initiator());
        assert_eq!(a.manager.connection("b").unwrap().instance(), fresh.instance());
    }

    #[tokio::test]
    async fn test_restart_only_honoured_by_initiator() {
        let network = MemoryNetwork::new();
        let relay = MemoryDirectory::new();
        let h = create_test_manager("a", &network, &relay);

        // "a" responds to "b", so a restart from "b" is meaningless
        let restart = SignalEnvelope::new("b", SignalPayload::Restart);
        assert_eq!(h.manager.apply_signal(&restart), SignalDisposition::Ignored);
        assert!(h.manager.connection("b").is_none());

        // "a" initiates towards "0"; a restart replaces even a failed state
        h.manager.reconcile(["0"]);
        let old = h.manager.connection("0").unwrap();
        old.fail();
        let restart = SignalEnvelope::new("0", SignalPayload::Restart);
        let SignalDisposition::Created { instance } = h.manager.apply_signal(&restart) else {
            panic!("restart did not create a new state");
        };
        assert!(instance > old.instance());
        assert_eq!(h.manager.status("0"), PeerStatus::Connecting);
        assert!(h.manager.connection("0").unwrap().is_initiator());
    }

    #[tokio::test]
    async fn test_initiator_reconnect_posts_no_restart() {
        let network = MemoryNetwork::new();
        let relay = MemoryDirectory::new();
        let h = create_test_manager("m", &network, &relay);
        h.manager.reconcile(["a"]);
        h.manager.reconnect("a").unwrap();
        settle().await;

        let kinds: Vec<_> = relay
            .watch_mailbox("a")
            .borrow()
            .values()
            .map(|v| SignalEnvelope::from_value(v).unwrap().data.kind())
            .collect();
        assert!(!kinds.contains(&"restart"));
        assert!(kinds.contains(&"offer"));
    }

    #[tokio::test]
    async fn test_send_to_unknown_peer() {
        let network = MemoryNetwork::new();
        let relay = MemoryDirectory::new();
        let h = create_test_manager("m", &network, &relay);
        let file = OutgoingFile::from_bytes("x", "text/plain", vec![1u8]);

        let err = h
            .manager
            .send_file("ghost", &file, &crate::transfer::NoopObserver)
            .await
            .unwrap_err();
        assert_eq!(err, TransferError::UnknownPeer("ghost".into()));
    }

    #[tokio::test]
    async fn test_file_delivered_to_handler() {
        let network = MemoryNetwork::new();
        let relay = MemoryDirectory::new();
        let a = create_test_manager("a", &network, &relay);
        let b = create_test_manager("b", &network, &relay);
        a.manager.reconcile(["b"]);
        b.manager.reconcile(["a"]);
        exchange(&a, &b).await;

        let file = OutgoingFile::from_bytes("hello.txt", "text/plain", b"hello".to_vec());
        b.manager
            .send_file("a", &file, &crate::transfer::NoopObserver)
            .await
            .unwrap();
        settle().await;

        let received = a.received.lock().unwrap();
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].0, "b");
        assert_eq!(received[0].1.payload, b"hello");
    }

    #[tokio::test]
    async fn test_shutdown_retires_everything() {
        let network = MemoryNetwork::new();
        let relay = MemoryDirectory::new();
        let h = create_test_manager("m", &network, &relay);
        h.manager.reconcile(["a", "b"]);
        let peers = [h.manager.connection("a").unwrap(), h.manager.connection("b").unwrap()];

        h.manager.shutdown();
        assert!(h.manager.statuses().is_empty());
        assert!(peers.iter().all(|p| p.status() == PeerStatus::Disconnected));
    }
}
