//! In-memory shared store.
//!
//! [`MemoryDirectory`] implements both [`PresenceDirectory`] and [`SignalRelay`]
//! inside the process, with change notification through `tokio::sync::watch`.
//! Several nodes sharing one `MemoryDirectory` (it is cheap to clone) behave as
//! if they were talking to the same hosted store.

use crate::presence::{DeviceId, PresenceDirectory, PresenceLease, PresenceRecord, PresenceSnapshot};
use crate::relay::{EntryKey, Mailbox, RelayError, SignalEnvelope, SignalRelay};
use crate::{DiscoveryError, is_valid_key};
use async_trait::async_trait;
use dashmap::DashMap;
use rand::RngCore;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::watch;

/// Milliseconds since the Unix epoch
fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Time-ordered key allocation.
///
/// Keys sort lexicographically in allocation order: a fixed-width millisecond
/// prefix followed by a process-wide sequence number.
#[derive(Debug, Default)]
struct KeyAllocator {
    sequence: AtomicU64,
}

impl KeyAllocator {
    fn entry_key(&self) -> EntryKey {
        let seq = self.sequence.fetch_add(1, Ordering::Relaxed);
        format!("{:012x}-{:08x}", now_millis(), seq)
    }

    fn device_id(&self) -> DeviceId {
        let mut suffix = [0u8; 6];
        rand::thread_rng().fill_bytes(&mut suffix);
        let seq = self.sequence.fetch_add(1, Ordering::Relaxed);
        format!("{:012x}{:04x}{}", now_millis(), seq & 0xFFFF, hex::encode(suffix))
    }
}

struct Inner {
    presence: watch::Sender<PresenceSnapshot>,
    mailboxes: DashMap<DeviceId, watch::Sender<Mailbox>>,
    keys: KeyAllocator,
}

impl Inner {
    fn remove_presence(&self, id: &str) -> bool {
        self.presence.send_if_modified(|snapshot| snapshot.remove(id).is_some())
    }

    fn mailbox(&self, recipient: &str) -> watch::Sender<Mailbox> {
        self.mailboxes
            .entry(recipient.to_string())
            .or_insert_with(|| watch::channel(Mailbox::new()).0)
            .clone()
    }
}

/// Presence directory and signaling relay kept in process memory
#[derive(Clone)]
pub struct MemoryDirectory {
    inner: Arc<Inner>,
}

impl MemoryDirectory {
    /// Create an empty store
    #[must_use]
    pub fn new() -> Self {
        let (presence, _) = watch::channel(PresenceSnapshot::new());
        Self {
            inner: Arc::new(Inner {
                presence,
                mailboxes: DashMap::new(),
                keys: KeyAllocator::default(),
            }),
        }
    }

    /// Current presence snapshot
    #[must_use]
    pub fn snapshot(&self) -> PresenceSnapshot {
        self.inner.presence.borrow().clone()
    }

    /// Number of entries waiting in the mailbox of `recipient`
    #[must_use]
    pub fn pending_signals(&self, recipient: &str) -> usize {
        self.inner
            .mailboxes
            .get(recipient)
            .map(|tx| tx.borrow().len())
            .unwrap_or(0)
    }

    /// Append an arbitrary JSON value to a mailbox, bypassing envelope encoding.
    ///
    /// Lets callers reproduce entries written by misbehaving clients.
    pub fn post_raw(
        &self,
        recipient: &str,
        value: serde_json::Value,
    ) -> Result<EntryKey, RelayError> {
        if !is_valid_key(recipient) {
            return Err(RelayError::InvalidRecipient(recipient.to_string()));
        }

        let key = self.inner.keys.entry_key();
        let mailbox = self.inner.mailbox(recipient);
        mailbox.send_modify(|entries| {
            entries.insert(key.clone(), value);
        });
        Ok(key)
    }
}

impl Default for MemoryDirectory {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PresenceDirectory for MemoryDirectory {
    fn allocate_id(&self) -> DeviceId {
        self.inner.keys.device_id()
    }

    async fn register(
        &self,
        id: &str,
        mut record: PresenceRecord,
    ) -> Result<PresenceLease, DiscoveryError> {
        if !is_valid_key(id) {
            return Err(DiscoveryError::InvalidDeviceId(id.to_string()));
        }

        record.timestamp = now_millis();
        self.inner.presence.send_modify(|snapshot| {
            snapshot.insert(id, record);
        });
        tracing::debug!("Registered presence entry {}", id);

        let store: Weak<Inner> = Arc::downgrade(&self.inner);
        let owned_id = id.to_string();
        Ok(PresenceLease::new(id, move || {
            if let Some(inner) = store.upgrade() {
                inner.remove_presence(&owned_id);
            }
        }))
    }

    async fn remove(&self, id: &str) -> Result<(), DiscoveryError> {
        if self.inner.remove_presence(id) {
            tracing::debug!("Removed presence entry {}", id);
        }
        Ok(())
    }

    fn subscribe(&self) -> watch::Receiver<PresenceSnapshot> {
        self.inner.presence.subscribe()
    }
}

#[async_trait]
impl SignalRelay for MemoryDirectory {
    async fn post(&self, recipient: &str, envelope: &SignalEnvelope) -> Result<EntryKey, RelayError> {
        let value = envelope.to_value()?;
        let key = self.post_raw(recipient, value)?;
        tracing::trace!(
            "Posted {} from {} to {} as {}",
            envelope.data.kind(),
            envelope.sender,
            recipient,
            key
        );
        Ok(key)
    }

    async fn delete(&self, recipient: &str, key: &str) -> Result<(), RelayError> {
        if let Some(mailbox) = self.inner.mailboxes.get(recipient) {
            mailbox.send_if_modified(|entries| entries.remove(key).is_some());
        }
        Ok(())
    }

    fn watch_mailbox(&self, recipient: &str) -> watch::Receiver<Mailbox> {
        self.inner.mailbox(recipient).subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::presence::DeviceType;
    use crate::relay::SignalPayload;
    use std::collections::HashSet;

    fn offer(sender: &str, sdp: &str) -> SignalEnvelope {
        SignalEnvelope::new(
            sender,
            SignalPayload::Offer {
                sdp: sdp.to_string(),
            },
        )
    }

    #[test]
    fn test_allocated_ids_are_unique_and_usable() {
        let directory = MemoryDirectory::new();
        let ids: HashSet<_> = (0..256).map(|_| directory.allocate_id()).collect();

        assert_eq!(ids.len(), 256);
        assert!(ids.iter().all(|id| is_valid_key(id)));
    }

    #[test]
    fn test_entry_keys_sort_in_allocation_order() {
        let keys = KeyAllocator::default();
        let allocated: Vec<_> = (0..100).map(|_| keys.entry_key()).collect();

        let mut sorted = allocated.clone();
        sorted.sort();
        assert_eq!(allocated, sorted);
    }

    #[tokio::test]
    async fn test_register_sets_timestamp_and_notifies() {
        let directory = MemoryDirectory::new();
        let mut rx = directory.subscribe();

        let _lease = directory
            .register("abc", PresenceRecord::new("Device-aaaaa", DeviceType::Laptop))
            .await
            .unwrap();

        assert!(rx.has_changed().unwrap());
        let snapshot = rx.borrow_and_update().clone();
        assert!(snapshot.contains("abc"));
        assert!(snapshot.get("abc").unwrap().timestamp > 0);
    }

    #[tokio::test]
    async fn test_register_rejects_bad_id() {
        let directory = MemoryDirectory::new();
        let result = directory
            .register("peers/abc", PresenceRecord::new("x", DeviceType::Phone))
            .await;

        assert!(matches!(result, Err(DiscoveryError::InvalidDeviceId(_))));
    }

    #[tokio::test]
    async fn test_dropping_lease_removes_entry() {
        let directory = MemoryDirectory::new();
        let lease = directory
            .register("abc", PresenceRecord::new("Device-aaaaa", DeviceType::Laptop))
            .await
            .unwrap();
        assert!(directory.snapshot().contains("abc"));

        drop(lease);
        assert!(!directory.snapshot().contains("abc"));
    }

    #[tokio::test]
    async fn test_remove_is_idempotent() {
        let directory = MemoryDirectory::new();
        let _lease = directory
            .register("abc", PresenceRecord::new("Device-aaaaa", DeviceType::Laptop))
            .await
            .unwrap();

        directory.remove("abc").await.unwrap();
        directory.remove("abc").await.unwrap();
        assert!(directory.snapshot().is_empty());
    }

    #[tokio::test]
    async fn test_mailbox_preserves_generation_order() {
        let directory = MemoryDirectory::new();
        for i in 0..5 {
            directory.post("abc", &offer("xyz", &format!("sdp-{i}"))).await.unwrap();
        }

        let mailbox = directory.watch_mailbox("abc").borrow().clone();
        let sdps: Vec<_> = mailbox
            .values()
            .map(|v| SignalEnvelope::from_value(v).unwrap())
            .map(|e| match e.data {
                SignalPayload::Offer { sdp } => sdp,
                other => panic!("unexpected payload {other:?}"),
            })
            .collect();

        assert_eq!(sdps, vec!["sdp-0", "sdp-1", "sdp-2", "sdp-3", "sdp-4"]);
    }

    #[tokio::test]
    async fn test_delete_consumes_entry() {
        let directory = MemoryDirectory::new();
        let mut rx = directory.watch_mailbox("abc");
        let key = directory.post("abc", &offer("xyz", "v=0")).await.unwrap();

        rx.changed().await.unwrap();
        assert_eq!(rx.borrow_and_update().len(), 1);

        directory.delete("abc", &key).await.unwrap();
        rx.changed().await.unwrap();
        assert!(rx.borrow_and_update().is_empty());

        // Second delete of the same key is a no-op
        directory.delete("abc", &key).await.unwrap();
        assert_eq!(directory.pending_signals("abc"), 0);
    }

    #[tokio::test]
    async fn test_post_raw_keeps_unreadable_entries() {
        let directory = MemoryDirectory::new();
        directory.post_raw("abc", serde_json::json!("garbage")).unwrap();

        assert_eq!(directory.pending_signals("abc"), 1);
        assert!(matches!(
            directory.post_raw("", serde_json::json!({})),
            Err(RelayError::InvalidRecipient(_))
        ));
    }
}
