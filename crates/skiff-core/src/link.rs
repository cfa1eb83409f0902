//! Direct-link boundary.
//!
//! A [`Link`] wraps the low-level handshake machinery for one peer: it
//! produces signaling payloads to forward, consumes the remote side's
//! payloads, and once connected carries [`WireMessage`]s. Lifecycle events
//! are delivered on the channel handed to [`Connector::open`], so each peer
//! state can be driven by a single task.

use crate::error::LinkError;
use async_trait::async_trait;
use skiff_discovery::{DeviceId, SignalPayload};
use skiff_files::WireMessage;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Lifecycle event emitted by a link
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    /// Payload to forward to the remote mailbox
    Signal(SignalPayload),
    /// Handshake complete, messages can flow
    Connected,
    /// Message from the remote side
    Message(WireMessage),
    /// Remote side closed the link cleanly
    Closed,
    /// Link-level error
    Error(LinkError),
}

/// Sending half of a link's event channel
pub type LinkEvents = mpsc::UnboundedSender<LinkEvent>;

/// Parameters for opening a link
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkSpec {
    /// Local device id
    pub local: DeviceId,
    /// Remote device id
    pub remote: DeviceId,
    /// True if this side sends the offer
    pub initiator: bool,
}

/// One direct link to a peer
#[async_trait]
pub trait Link: Send + Sync {
    /// Apply a payload received from the remote side.
    ///
    /// Duplicate and stale payloads are accepted as no-ops.
    ///
    /// # Errors
    ///
    /// Returns [`LinkError::OfferConflict`] if this side is already bound to a
    /// different session, or [`LinkError::Handshake`] if the payload cannot be
    /// used.
    fn signal(&self, payload: SignalPayload) -> Result<(), LinkError>;

    /// Send one message to the remote side
    ///
    /// # Errors
    ///
    /// Returns error if the link is not connected or the write fails.
    async fn send(&self, message: WireMessage) -> Result<(), LinkError>;

    /// Close the link. Idempotent.
    fn close(&self);

    /// True once [`Link::close`] has been called
    fn is_closed(&self) -> bool;
}

/// Factory for links
pub trait Connector: Send + Sync {
    /// Open a link. An initiating link starts emitting its offer right away.
    ///
    /// # Errors
    ///
    /// Returns error if the handshake machinery cannot be set up.
    fn open(&self, spec: LinkSpec, events: LinkEvents) -> Result<Arc<dyn Link>, LinkError>;
}
