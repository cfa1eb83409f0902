//! Error types for the Skiff core.
//!
//! Errors are split by where they surface:
//!
//! - [`LinkError`]: raised by a direct link. Stays inside the owning peer's
//!   state machine, where it either fails the peer or is ignored as benign.
//! - [`TransferError`]: reported through the transfer observer and the
//!   `Result` of a send.
//! - [`NodeError`]: returned by node-level operations (join, reconnect).
//!
//! Nothing here is fatal to the process.

use crate::peer::PeerStatus;
use skiff_discovery::{DeviceId, DiscoveryError, RelayError};
use skiff_files::FilesError;
use std::borrow::Cow;
use thiserror::Error;

/// Errors raised by a direct link
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LinkError {
    /// Handshake did not complete in time
    #[error("Handshake timed out")]
    HandshakeTimeout,

    /// Handshake failed
    #[error("Handshake failed: {0}")]
    Handshake(Cow<'static, str>),

    /// Data channel was aborted by the user agent. Benign.
    #[error("Channel aborted: {0}")]
    ChannelAbort(Cow<'static, str>),

    /// Message could not be sent
    #[error("Send failed: {0}")]
    Send(Cow<'static, str>),

    /// Link already closed
    #[error("Link closed")]
    Closed,

    /// Offer belongs to a different session than the one this side is bound to
    #[error("Offer conflicts with the bound session")]
    OfferConflict,
}

impl LinkError {
    /// True for errors that never change peer status
    #[must_use]
    pub fn is_benign(&self) -> bool {
        matches!(self, LinkError::ChannelAbort(_))
    }

    /// Create a handshake error with static context (zero allocation)
    #[must_use]
    pub const fn handshake(context: &'static str) -> Self {
        LinkError::Handshake(Cow::Borrowed(context))
    }

    /// Create a send error with static context (zero allocation)
    #[must_use]
    pub const fn send(context: &'static str) -> Self {
        LinkError::Send(Cow::Borrowed(context))
    }
}

/// Errors reported for one file send
#[derive(Debug, Error, Clone, PartialEq)]
pub enum TransferError {
    /// No peer state exists for the target
    #[error("No connection to {0}")]
    UnknownPeer(DeviceId),

    /// Peer did not reach `connected` within the send wait timeout
    #[error("Timed out waiting for connection to {0}")]
    HandshakeTimeout(DeviceId),

    /// Peer reached a terminal status before it connected
    #[error("Connection to {peer} {status}")]
    ConnectionFailed {
        /// Target peer
        peer: DeviceId,
        /// Status observed
        status: PeerStatus,
    },

    /// Writing to the link failed
    #[error("Send failed: {0}")]
    Send(#[from] LinkError),

    /// Reading the source file failed
    #[error("Read failed: {0}")]
    Read(#[from] FilesError),

    /// Peer state was torn down while the transfer was running
    #[error("Connection torn down mid-transfer")]
    Aborted,
}

impl TransferError {
    /// True if trying the send again after a reconnect can succeed
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            TransferError::HandshakeTimeout(_)
                | TransferError::ConnectionFailed { .. }
                | TransferError::Send(_)
                | TransferError::Aborted
        )
    }
}

/// Errors that can occur in node operations
#[derive(Debug, Error)]
pub enum NodeError {
    // ============ Discovery Errors ============
    /// Presence directory failed
    #[error("Discovery error: {0}")]
    Discovery(#[from] DiscoveryError),

    /// Signaling relay failed
    #[error("Relay error: {0}")]
    Relay(#[from] RelayError),

    // ============ Connection Errors ============
    /// Direct link could not be opened
    #[error("Link error: {0}")]
    Link(#[from] LinkError),

    /// Peer is not tracked
    #[error("Peer not found: {0}")]
    PeerNotFound(DeviceId),

    // ============ Transfer Errors ============
    /// File send failed
    #[error("Transfer error: {0}")]
    Transfer(#[from] TransferError),

    /// File could not be prepared
    #[error("File error: {0}")]
    Files(#[from] FilesError),

    // ============ Configuration & State Errors ============
    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(Cow<'static, str>),

    /// Node has already left
    #[error("Invalid state: {0}")]
    InvalidState(Cow<'static, str>),
}

impl NodeError {
    /// Returns true if this error is transient and may succeed on retry
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            NodeError::Discovery(DiscoveryError::Unavailable(_)) => true,
            NodeError::Relay(err) => err.is_transient(),
            NodeError::Link(err) => !matches!(err, LinkError::OfferConflict),
            NodeError::Transfer(err) => err.is_transient(),
            _ => false,
        }
    }

    /// Returns true if this error is permanent and will not succeed on retry
    #[must_use]
    pub fn is_permanent(&self) -> bool {
        matches!(
            self,
            NodeError::InvalidConfig(_)
                | NodeError::InvalidState(_)
                | NodeError::PeerNotFound(_)
                | NodeError::Discovery(DiscoveryError::InvalidDeviceId(_))
        )
    }

    /// Create an invalid configuration error with static context (zero allocation)
    #[must_use]
    pub const fn invalid_config(context: &'static str) -> Self {
        NodeError::InvalidConfig(Cow::Borrowed(context))
    }

    /// Create an invalid state error with static context (zero allocation)
    #[must_use]
    pub const fn invalid_state(context: &'static str) -> Self {
        NodeError::InvalidState(Cow::Borrowed(context))
    }
}

/// Result type for node operations
pub type Result<T> = std::result::Result<T, NodeError>;
