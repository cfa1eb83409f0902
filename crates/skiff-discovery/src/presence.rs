//! Presence directory boundary.
//!
//! The presence directory is a shared, observable key-value store of the devices
//! that are currently online. Skiff only ever does three things with it:
//! register its own entry (with a removal hook that fires on disconnect),
//! remove that entry when leaving, and watch the full entry set.

use crate::DiscoveryError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use tokio::sync::watch;

/// Opaque device identifier assigned by the directory
pub type DeviceId = String;

/// Kind of device, as advertised in the presence record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceType {
    /// Laptop or desktop
    #[default]
    Laptop,
    /// Phone or tablet
    Phone,
}

impl fmt::Display for DeviceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Laptop => write!(f, "laptop"),
            Self::Phone => write!(f, "phone"),
        }
    }
}

impl FromStr for DeviceType {
    type Err = DiscoveryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "laptop" => Ok(Self::Laptop),
            "phone" => Ok(Self::Phone),
            other => Err(DiscoveryError::Serialization(format!(
                "unknown device type: {other}"
            ))),
        }
    }
}

/// A discovered device
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Device {
    /// Directory-assigned identifier
    pub id: DeviceId,
    /// Display name
    pub name: String,
    /// Device kind
    #[serde(rename = "type")]
    pub device_type: DeviceType,
}

/// Record stored under `peers/<id>` in the directory
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresenceRecord {
    /// Display name
    pub name: String,
    /// Device kind
    #[serde(rename = "type")]
    pub device_type: DeviceType,
    /// Server-assigned registration time (milliseconds since the Unix epoch)
    #[serde(default)]
    pub timestamp: u64,
}

impl PresenceRecord {
    /// Create a record; the timestamp is filled in by the directory.
    #[must_use]
    pub fn new(name: impl Into<String>, device_type: DeviceType) -> Self {
        Self {
            name: name.into(),
            device_type,
            timestamp: 0,
        }
    }

    /// Attach the record to its key
    #[must_use]
    pub fn to_device(&self, id: &str) -> Device {
        Device {
            id: id.to_string(),
            name: self.name.clone(),
            device_type: self.device_type,
        }
    }
}

/// Full set of presence records at one point in time
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PresenceSnapshot {
    records: BTreeMap<DeviceId, PresenceRecord>,
}

impl PresenceSnapshot {
    /// Create an empty snapshot
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a record
    pub fn insert(&mut self, id: impl Into<DeviceId>, record: PresenceRecord) {
        self.records.insert(id.into(), record);
    }

    /// Remove a record, returning it if present
    pub fn remove(&mut self, id: &str) -> Option<PresenceRecord> {
        self.records.remove(id)
    }

    /// Look up a record
    #[must_use]
    pub fn get(&self, id: &str) -> Option<&PresenceRecord> {
        self.records.get(id)
    }

    /// Check whether a device is present
    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.records.contains_key(id)
    }

    /// Number of devices online
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// True if nobody is online
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// All devices, ordered by id
    #[must_use]
    pub fn devices(&self) -> Vec<Device> {
        self.records
            .iter()
            .map(|(id, record)| record.to_device(id))
            .collect()
    }

    /// All devices except `local_id`
    #[must_use]
    pub fn devices_except(&self, local_id: &str) -> Vec<Device> {
        self.records
            .iter()
            .filter(|(id, _)| id.as_str() != local_id)
            .map(|(id, record)| record.to_device(id))
            .collect()
    }
}

/// Removal hook registered when a device joins.
///
/// Dropping the lease removes the presence entry, which is how an abrupt exit
/// still clears the device from everybody's list. [`PresenceLease::release`]
/// does the same thing explicitly.
pub struct PresenceLease {
    device_id: DeviceId,
    on_release: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl PresenceLease {
    /// Create a lease that runs `on_release` exactly once
    pub fn new(device_id: impl Into<DeviceId>, on_release: impl FnOnce() + Send + Sync + 'static) -> Self {
        Self {
            device_id: device_id.into(),
            on_release: Some(Box::new(on_release)),
        }
    }

    /// Id of the device this lease keeps registered
    #[must_use]
    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    /// Remove the presence entry now
    pub fn release(mut self) {
        self.run_release();
    }

    fn run_release(&mut self) {
        if let Some(release) = self.on_release.take() {
            tracing::debug!("Releasing presence entry {}", self.device_id);
            release();
        }
    }
}

impl Drop for PresenceLease {
    fn drop(&mut self) {
        self.run_release();
    }
}

impl fmt::Debug for PresenceLease {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PresenceLease")
            .field("device_id", &self.device_id)
            .field("released", &self.on_release.is_none())
            .finish()
    }
}

/// Shared directory of online devices
#[async_trait]
pub trait PresenceDirectory: Send + Sync {
    /// Allocate a fresh, unique device id
    fn allocate_id(&self) -> DeviceId;

    /// Register `record` under `id` and arm the on-disconnect removal hook.
    ///
    /// # Errors
    ///
    /// Returns error if the id is unusable or the store rejects the write.
    async fn register(&self, id: &str, record: PresenceRecord)
    -> Result<PresenceLease, DiscoveryError>;

    /// Remove the entry for `id`. Removing an absent entry is not an error.
    ///
    /// # Errors
    ///
    /// Returns error if the store rejects the delete.
    async fn remove(&self, id: &str) -> Result<(), DiscoveryError>;

    /// Watch the full entry set. The receiver starts with the current snapshot.
    fn subscribe(&self) -> watch::Receiver<PresenceSnapshot>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn sample_snapshot() -> PresenceSnapshot {
        let mut snapshot = PresenceSnapshot::new();
        snapshot.insert("abc", PresenceRecord::new("Device-aaaaa", DeviceType::Laptop));
        snapshot.insert("xyz", PresenceRecord::new("Device-zzzzz", DeviceType::Phone));
        snapshot
    }

    #[test]
    fn test_devices_except_filters_self() {
        let snapshot = sample_snapshot();
        let others = snapshot.devices_except("abc");

        assert_eq!(others.len(), 1);
        assert_eq!(others[0].id, "xyz");
        assert_eq!(others[0].device_type, DeviceType::Phone);
        assert_eq!(snapshot.devices().len(), 2);
    }

    #[test]
    fn test_record_wire_shape() {
        let mut record = PresenceRecord::new("Device-k3j9x", DeviceType::Phone);
        record.timestamp = 1_700_000_000_000;

        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["name"], "Device-k3j9x");
        assert_eq!(json["type"], "phone");
        assert_eq!(json["timestamp"], 1_700_000_000_000u64);
    }

    #[test]
    fn test_record_without_timestamp_parses() {
        let record: PresenceRecord =
            serde_json::from_str(r#"{"name":"Device-1","type":"laptop"}"#).unwrap();
        assert_eq!(record.timestamp, 0);
        assert_eq!(record.device_type, DeviceType::Laptop);
    }

    #[test]
    fn test_device_type_parse() {
        assert_eq!("Phone".parse::<DeviceType>().unwrap(), DeviceType::Phone);
        assert_eq!(DeviceType::Laptop.to_string(), "laptop");
        assert!("toaster".parse::<DeviceType>().is_err());
    }

    #[test]
    fn test_lease_releases_once() {
        let count = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&count);
        let lease = PresenceLease::new("abc", move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        assert_eq!(lease.device_id(), "abc");
        lease.release();
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_lease_releases_on_drop() {
        let count = Arc::new(AtomicUsize::new(0));
        {
            let counter = Arc::clone(&count);
            let _lease = PresenceLease::new("abc", move || {
                counter.fetch_add(1, Ordering::SeqCst);
            });
        }
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
