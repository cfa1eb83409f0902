//! # Signaling Relay
//!
//! Per-recipient mailboxes of connection-setup messages, stored in the same
//! shared store as the presence directory.
//!
//! ## Delivery model
//!
//! - At-least-once: a recipient may observe the same entry in more than one
//!   mailbox snapshot until it deletes it.
//! - Consume-once: the recipient deletes every entry it has processed, whether
//!   applying it succeeded, was a no-op, or the entry was unreadable.
//! - Entry keys are time-ordered, so envelopes from one sender are observed in
//!   the order they were generated. Nothing orders envelopes across senders.
//!
//! ```text
//!   Device A                    signals/B/                    Device B
//!      |                            |                             |
//!      |-- post(offer) ------------>| k1                          |
//!      |-- post(candidate) -------->| k2                          |
//!      |                            |----- snapshot {k1,k2} ----->|
//!      |                            |<---- delete(k1) ------------|
//!      |                            |<---- delete(k2) ------------|
//! ```

pub mod protocol;

pub use protocol::{RelayError, SignalEnvelope, SignalPayload};

use async_trait::async_trait;
use std::collections::BTreeMap;
use tokio::sync::watch;

/// Key of one mailbox entry
pub type EntryKey = String;

/// Pending entries of one mailbox, in key (generation) order.
///
/// Values are kept as raw JSON so that unreadable entries can still be seen
/// and deleted.
pub type Mailbox = BTreeMap<EntryKey, serde_json::Value>;

/// Mailbox-based signaling relay
#[async_trait]
pub trait SignalRelay: Send + Sync {
    /// Append `envelope` to the mailbox of `recipient`.
    ///
    /// # Errors
    ///
    /// Returns error if the recipient id is unusable or the store rejects the
    /// write.
    async fn post(&self, recipient: &str, envelope: &SignalEnvelope) -> Result<EntryKey, RelayError>;

    /// Delete one entry. Deleting an absent entry is not an error.
    ///
    /// # Errors
    ///
    /// Returns error if the store rejects the delete.
    async fn delete(&self, recipient: &str, key: &str) -> Result<(), RelayError>;

    /// Watch the mailbox of `recipient`. The receiver starts with the current
    /// contents.
    fn watch_mailbox(&self, recipient: &str) -> watch::Receiver<Mailbox>;
}
