//! Signaling relay message definitions.
//!
//! A relay entry on the wire looks like
//! `{"sender": "<device id>", "data": {"type": "offer", "sdp": "..."}}`.

use crate::presence::DeviceId;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Connection-setup payload produced by the direct-link handshake machinery
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum SignalPayload {
    /// Session description from the initiating side
    Offer {
        /// Session description
        sdp: String,
    },

    /// Session description from the responding side
    Answer {
        /// Session description
        sdp: String,
    },

    /// One trickled connectivity candidate
    Candidate {
        /// Candidate line
        candidate: String,
        /// Media stream the candidate belongs to
        #[serde(rename = "sdpMid", default, skip_serializing_if = "Option::is_none")]
        sdp_mid: Option<String>,
    },

    /// Ask the initiating side to drop its state and offer again. Sent by a
    /// responding side that reconnects.
    Restart,
}

impl SignalPayload {
    /// Get the payload type name as it appears on the wire
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            SignalPayload::Offer { .. } => "offer",
            SignalPayload::Answer { .. } => "answer",
            SignalPayload::Candidate { .. } => "candidate",
            SignalPayload::Restart => "restart",
        }
    }

    /// True for offers
    #[must_use]
    pub fn is_offer(&self) -> bool {
        matches!(self, SignalPayload::Offer { .. })
    }

    /// True for restart requests
    #[must_use]
    pub fn is_restart(&self) -> bool {
        matches!(self, SignalPayload::Restart)
    }
}

/// A signaling message addressed to one recipient mailbox
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignalEnvelope {
    /// Device that produced the payload
    pub sender: DeviceId,
    /// Negotiation payload
    pub data: SignalPayload,
}

impl SignalEnvelope {
    /// Create a new envelope
    #[must_use]
    pub fn new(sender: impl Into<DeviceId>, data: SignalPayload) -> Self {
        Self {
            sender: sender.into(),
            data,
        }
    }

    /// Encode as a relay entry value
    pub fn to_value(&self) -> Result<Value, RelayError> {
        serde_json::to_value(self).map_err(|e| RelayError::Serialization(e.to_string()))
    }

    /// Decode a relay entry value.
    ///
    /// Anything that is not a well-formed envelope maps to
    /// [`RelayError::MalformedSignal`]; the caller is still expected to delete
    /// the entry.
    pub fn from_value(value: &Value) -> Result<Self, RelayError> {
        let envelope = Self::deserialize(value)
            .map_err(|e| RelayError::MalformedSignal(e.to_string()))?;

        if !crate::is_valid_key(&envelope.sender) {
            return Err(RelayError::MalformedSignal(format!(
                "unusable sender id {:?}",
                envelope.sender
            )));
        }

        Ok(envelope)
    }
}

/// Relay errors
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RelayError {
    /// Entry could not be parsed as a signal envelope
    #[error("malformed signal: {0}")]
    MalformedSignal(String),

    /// Envelope could not be encoded
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Recipient id is unusable as a mailbox key
    #[error("invalid recipient: {0:?}")]
    InvalidRecipient(String),

    /// Store refused or failed the operation
    #[error("relay unavailable: {0}")]
    Unavailable(String),
}

impl RelayError {
    /// True if retrying the same operation can succeed
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, RelayError::Unavailable(_))
    }
}
