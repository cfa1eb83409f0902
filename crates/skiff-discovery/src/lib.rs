//! # Skiff Discovery
//!
//! Discovery and connection-setup plumbing for Skiff.
//!
//! This crate provides:
//! - The presence directory boundary (who is online right now)
//! - The signaling relay protocol (per-recipient mailboxes of offers, answers
//!   and candidates)
//! - An in-memory shared store implementing both, used by tests and the demo CLI
//!
//! ## Architecture
//!
//! ```text
//!                 ┌───────────────────────────────┐
//!                 │          Shared store          │
//!                 │  peers/<id>    signals/<id>/*  │
//!                 └──────┬─────────────────┬──────┘
//!                        │                 │
//!            presence snapshot      mailbox snapshot
//!                        │                 │
//!                        ▼                 ▼
//!                 ┌─────────────┐   ┌─────────────┐
//!                 │   Device A  │   │   Device B  │
//!                 └─────────────┘   └─────────────┘
//! ```
//!
//! ## Example
//!
//! ```rust,no_run
//! use skiff_discovery::memory::MemoryDirectory;
//! use skiff_discovery::presence::{DeviceType, PresenceDirectory, PresenceRecord};
//!
//! # async fn example() -> Result<(), skiff_discovery::DiscoveryError> {
//! let directory = MemoryDirectory::new();
//! let id = directory.allocate_id();
//! let _lease = directory
//!     .register(&id, PresenceRecord::new("Device-k3j9x", DeviceType::Laptop))
//!     .await?;
//!
//! let snapshot = directory.subscribe().borrow().clone();
//! assert!(snapshot.contains(&id));
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod memory;
pub mod presence;
pub mod relay;

pub use presence::{
    Device, DeviceId, DeviceType, PresenceDirectory, PresenceLease, PresenceRecord,
    PresenceSnapshot,
};
pub use relay::{EntryKey, Mailbox, RelayError, SignalEnvelope, SignalPayload, SignalRelay};

use thiserror::Error;

/// Discovery errors
#[derive(Debug, Error)]
pub enum DiscoveryError {
    /// Device id is empty or otherwise unusable as a store key
    #[error("invalid device id: {0:?}")]
    InvalidDeviceId(String),

    /// The store refused or failed the operation
    #[error("directory unavailable: {0}")]
    Unavailable(String),

    /// Record could not be encoded or decoded
    #[error("presence record serialization failed: {0}")]
    Serialization(String),
}

/// Returns true if `id` can be used as a store key.
///
/// Keys must be non-empty and must not contain path separators, since both the
/// presence directory and the relay nest entries under the id.
#[must_use]
pub fn is_valid_key(id: &str) -> bool {
    !id.is_empty() && !id.contains(['/', '.', '#', '$', '[', ']'])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_keys() {
        assert!(is_valid_key("abc"));
        assert!(is_valid_key("0000018c2f-00000001"));
    }

    #[test]
    fn test_invalid_keys() {
        assert!(!is_valid_key(""));
        assert!(!is_valid_key("peers/abc"));
        assert!(!is_valid_key("a.b"));
        assert!(!is_valid_key("a[0]"));
    }
}
