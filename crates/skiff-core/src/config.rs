//! Node configuration.

use crate::error::NodeError;
use rand::Rng;
use skiff_discovery::{DeviceId, DeviceType, is_valid_key};
use skiff_files::CHUNK_SIZE;
use std::time::Duration;

/// Time a new peer state may spend in `connecting` before it fails
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Time a send waits for the peer to reach `connected`
pub const DEFAULT_SEND_WAIT_TIMEOUT: Duration = Duration::from_secs(10);

const NAME_ALPHABET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";

/// Generate a default device name of the form `Device-xxxxx`
#[must_use]
pub fn generate_device_name() -> String {
    let mut rng = rand::thread_rng();
    let suffix: String = (0..5)
        .map(|_| NAME_ALPHABET[rng.gen_range(0..NAME_ALPHABET.len())] as char)
        .collect();
    format!("Device-{suffix}")
}

/// Node configuration
#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// Fixed device id. When `None` the directory allocates one on join.
    pub device_id: Option<DeviceId>,

    /// Name shown to other devices
    pub device_name: String,

    /// Device type shown to other devices
    pub device_type: DeviceType,

    /// Connect timeout for each new peer state
    pub connect_timeout: Duration,

    /// How long a send waits for the peer to connect
    pub send_wait_timeout: Duration,

    /// Chunk size for outgoing files (at most 64 KiB)
    pub chunk_size: usize,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            device_id: None,
            device_name: generate_device_name(),
            device_type: DeviceType::default(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            send_wait_timeout: DEFAULT_SEND_WAIT_TIMEOUT,
            chunk_size: CHUNK_SIZE,
        }
    }
}

impl NodeConfig {
    /// Validate configuration
    ///
    /// # Errors
    ///
    /// Returns [`NodeError::InvalidConfig`] describing the first problem found.
    pub fn validate(&self) -> Result<(), NodeError> {
        if let Some(id) = &self.device_id {
            if !is_valid_key(id) {
                return Err(NodeError::invalid_config("device id is not a usable key"));
            }
        }

        if self.device_name.trim().is_empty() {
            return Err(NodeError::invalid_config("device name must not be empty"));
        }

        if self.connect_timeout.is_zero() {
            return Err(NodeError::invalid_config("connect timeout must be non-zero"));
        }

        if self.send_wait_timeout.is_zero() {
            return Err(NodeError::invalid_config("send wait timeout must be non-zero"));
        }

        if self.chunk_size == 0 || self.chunk_size > CHUNK_SIZE {
            return Err(NodeError::invalid_config("chunk size must be between 1 and 65536"));
        }

        Ok(())
    }
}
