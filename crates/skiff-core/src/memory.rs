//! In-memory direct-link network.
//!
//! [`MemoryNetwork`] is a loopback [`Connector`]: links opened on the same
//! network reach each other once they have exchanged an offer, an answer and
//! one candidate in each direction through the signaling relay.
//!
//! ```text
//! Initiator                                   Responder
//!    |-- offer "memory:<session>" ------------->|  adopt session
//!    |-- candidate ---------------------------->|  remote description + candidate:
//!    |<------------------------------- answer --|    Connected
//!    |<---------------------------- candidate --|
//!  Connected                                    |
//! ```
//!
//! The network also injects faults (benign channel aborts, hard link
//! failures, severed paths) and counts traffic per direction.

use crate::error::LinkError;
use crate::link::{Connector, Link, LinkEvent, LinkEvents, LinkSpec};
use async_trait::async_trait;
use dashmap::DashMap;
use rand::RngCore;
use skiff_discovery::{DeviceId, SignalPayload};
use skiff_files::WireMessage;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};

const DESCRIPTION_PREFIX: &str = "memory:";
const CANDIDATE_PREFIX: &str = "memory-candidate:";

/// Traffic counters for one direction of one device pair
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LinkStats {
    /// Messages delivered
    pub messages: u64,
    /// Binary frames delivered
    pub binary_frames: u64,
    /// Payload bytes delivered
    pub bytes: u64,
}

/// `(owner, remote)`
type EndpointKey = (DeviceId, DeviceId);

#[derive(Clone)]
struct Endpoint {
    link_id: u64,
    session: String,
    events: LinkEvents,
}

#[derive(Default)]
struct NetworkInner {
    endpoints: DashMap<EndpointKey, Endpoint>,
    stats: DashMap<EndpointKey, LinkStats>,
    next_link: AtomicU64,
}

impl NetworkInner {
    fn endpoint(&self, owner: &str, remote: &str) -> Option<Endpoint> {
        self.endpoints
            .get(&(owner.to_string(), remote.to_string()))
            .map(|e| e.clone())
    }
}

/// Loopback network for links between devices in one process
#[derive(Clone, Default)]
pub struct MemoryNetwork {
    inner: Arc<NetworkInner>,
}

impl MemoryNetwork {
    /// Create an empty network
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Deliver a benign channel abort to the link `owner` holds towards
    /// `remote`. Returns false if no such link is bound.
    pub fn abort_channel(&self, owner: &str, remote: &str) -> bool {
        self.inject(
            owner,
            remote,
            LinkEvent::Error(LinkError::ChannelAbort("User-Initiated Abort".into())),
        )
    }

    /// Deliver a hard link failure to the link `owner` holds towards `remote`
    pub fn fail_link(&self, owner: &str, remote: &str) -> bool {
        self.inject(
            owner,
            remote,
            LinkEvent::Error(LinkError::handshake("connection failed")),
        )
    }

    /// Drop both endpoints of a pair without telling either side. Later sends
    /// on the old links fail.
    pub fn sever(&self, a: &str, b: &str) {
        self.inner.endpoints.remove(&(a.to_string(), b.to_string()));
        self.inner.endpoints.remove(&(b.to_string(), a.to_string()));
        tracing::debug!("Severed memory links between {} and {}", a, b);
    }

    /// Traffic delivered from `from` to `to`
    #[must_use]
    pub fn stats(&self, from: &str, to: &str) -> LinkStats {
        self.inner
            .stats
            .get(&(from.to_string(), to.to_string()))
            .map(|s| *s)
            .unwrap_or_default()
    }

    /// True if `owner` has a link bound towards `remote`
    #[must_use]
    pub fn is_bound(&self, owner: &str, remote: &str) -> bool {
        self.inner.endpoint(owner, remote).is_some()
    }

    fn inject(&self, owner: &str, remote: &str, event: LinkEvent) -> bool {
        match self.inner.endpoint(owner, remote) {
            Some(endpoint) => endpoint.events.send(event).is_ok(),
            None => false,
        }
    }
}

impl Connector for MemoryNetwork {
    fn open(&self, spec: LinkSpec, events: LinkEvents) -> Result<Arc<dyn Link>, LinkError> {
        let link_id = self.inner.next_link.fetch_add(1, Ordering::Relaxed);
        let link = MemoryLink {
            network: Arc::downgrade(&self.inner),
            link_id,
            spec,
            events,
            state: Mutex::new(HandshakeState::default()),
            closed: AtomicBool::new(false),
        };

        if link.spec.initiator {
            let mut session = [0u8; 8];
            rand::thread_rng().fill_bytes(&mut session);
            let session = hex::encode(session);
            link.bind(&session)?;
            link.emit(LinkEvent::Signal(SignalPayload::Offer {
                sdp: format!("{DESCRIPTION_PREFIX}{session}"),
            }));
            link.emit_candidate(&session);
        }

        Ok(Arc::new(link))
    }
}

#[derive(Debug, Default)]
struct HandshakeState {
    session: Option<String>,
    remote_description: bool,
    remote_candidate: bool,
    connected: bool,
}

impl HandshakeState {
    /// Marks connected the first time both halves are present
    fn try_connect(&mut self) -> bool {
        if self.connected || !self.remote_description || !self.remote_candidate {
            return false;
        }
        self.connected = true;
        true
    }
}

/// One end of a loopback link
pub struct MemoryLink {
    network: Weak<NetworkInner>,
    link_id: u64,
    spec: LinkSpec,
    events: LinkEvents,
    state: Mutex<HandshakeState>,
    closed: AtomicBool,
}

impl MemoryLink {
    fn state(&self) -> std::sync::MutexGuard<'_, HandshakeState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn emit(&self, event: LinkEvent) {
        // Receiver gone means the owning peer state has been retired
        let _ = self.events.send(event);
    }

    fn emit_candidate(&self, session: &str) {
        self.emit(LinkEvent::Signal(SignalPayload::Candidate {
            candidate: format!("{CANDIDATE_PREFIX}{session}"),
            sdp_mid: Some("0".to_string()),
        }));
    }

    fn key(&self) -> EndpointKey {
        (self.spec.local.clone(), self.spec.remote.clone())
    }

    /// Register this link as the endpoint for its pair
    fn bind(&self, session: &str) -> Result<(), LinkError> {
        let network = self.network.upgrade().ok_or(LinkError::Closed)?;
        network.endpoints.insert(
            self.key(),
            Endpoint {
                link_id: self.link_id,
                session: session.to_string(),
                events: self.events.clone(),
            },
        );
        self.state().session = Some(session.to_string());
        Ok(())
    }

    fn apply_offer(&self, sdp: &str) -> Result<(), LinkError> {
        if self.spec.initiator {
            tracing::debug!("Initiator {} ignoring offer from {}", self.spec.local, self.spec.remote);
            return Ok(());
        }

        let session = sdp
            .strip_prefix(DESCRIPTION_PREFIX)
            .ok_or_else(|| LinkError::handshake("unrecognized session description"))?;

        let bound = self.state().session.clone();
        match bound {
            Some(current) if current == session => Ok(()),
            Some(_) => Err(LinkError::OfferConflict),
            None => {
                self.bind(session)?;
                let connected = {
                    let mut state = self.state();
                    state.remote_description = true;
                    state.try_connect()
                };
                self.emit(LinkEvent::Signal(SignalPayload::Answer {
                    sdp: format!("{DESCRIPTION_PREFIX}{session}"),
                }));
                self.emit_candidate(session);
                if connected {
                    self.emit(LinkEvent::Connected);
                }
                Ok(())
            }
        }
    }

    fn apply_answer(&self, sdp: &str) {
        if !self.spec.initiator {
            return;
        }
        let connected = {
            let mut state = self.state();
            if sdp.strip_prefix(DESCRIPTION_PREFIX) != state.session.as_deref() {
                tracing::debug!("Ignoring answer for a stale session from {}", self.spec.remote);
                return;
            }
            state.remote_description = true;
            state.try_connect()
        };
        if connected {
            self.emit(LinkEvent::Connected);
        }
    }

    fn apply_candidate(&self, candidate: &str) {
        let connected = {
            let mut state = self.state();
            if state.session.is_none()
                || candidate.strip_prefix(CANDIDATE_PREFIX) != state.session.as_deref()
            {
                tracing::debug!("Ignoring candidate for an unknown session from {}", self.spec.remote);
                return;
            }
            state.remote_candidate = true;
            state.try_connect()
        };
        if connected {
            self.emit(LinkEvent::Connected);
        }
    }
}

#[async_trait]
impl Link for MemoryLink {
    fn signal(&self, payload: SignalPayload) -> Result<(), LinkError> {
        if self.is_closed() {
            return Ok(());
        }
        match payload {
            SignalPayload::Offer { sdp } => self.apply_offer(&sdp),
            SignalPayload::Answer { sdp } => {
                self.apply_answer(&sdp);
                Ok(())
            }
            SignalPayload::Candidate { candidate, .. } => {
                self.apply_candidate(&candidate);
                Ok(())
            }
            // Handled by the connection manager before it reaches a link
            SignalPayload::Restart => Ok(()),
        }
    }

    async fn send(&self, message: WireMessage) -> Result<(), LinkError> {
        if self.is_closed() {
            return Err(LinkError::Closed);
        }

        let session = {
            let state = self.state();
            if !state.connected {
                return Err(LinkError::send("not connected"));
            }
            state.session.clone()
        };

        let network = self.network.upgrade().ok_or(LinkError::Closed)?;
        if network
            .endpoints
            .get(&self.key())
            .is_none_or(|own| own.link_id != self.link_id)
        {
            return Err(LinkError::send("path to peer lost"));
        }

        let remote = network
            .endpoint(&self.spec.remote, &self.spec.local)
            .filter(|endpoint| Some(&endpoint.session) == session.as_ref())
            .ok_or_else(|| LinkError::send("remote endpoint gone"))?;

        let len = message.len() as u64;
        let binary = message.is_binary();
        remote
            .events
            .send(LinkEvent::Message(message))
            .map_err(|_| LinkError::send("remote endpoint gone"))?;

        let mut stats = network.stats.entry(self.key()).or_default();
        stats.messages += 1;
        stats.bytes += len;
        if binary {
            stats.binary_frames += 1;
        }
        drop(stats);

        // Let the receiving side run between frames
        tokio::task::yield_now().await;
        Ok(())
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let Some(network) = self.network.upgrade() else {
            return;
        };

        let removed = network
            .endpoints
            .remove_if(&self.key(), |_, endpoint| endpoint.link_id == self.link_id)
            .is_some();

        let (connected, session) = {
            let state = self.state();
            (state.connected, state.session.clone())
        };
        if removed && connected {
            if let Some(remote) = network
                .endpoint(&self.spec.remote, &self.spec.local)
                .filter(|endpoint| Some(&endpoint.session) == session.as_ref())
            {
                let _ = remote.events.send(LinkEvent::Closed);
            }
        }
        tracing::trace!("Closed memory link {} -> {}", self.spec.local, self.spec.remote);
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

impl Drop for MemoryLink {
    fn drop(&mut self) {
        self.close();
    }
}
