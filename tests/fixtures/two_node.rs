//! Two-node test fixture for integration testing
//!
//! Provides a reusable setup for two-device scenarios:
//! - Connection establishment through presence and the relay
//! - File transfers in either direction
//! - Fault injection through the shared [`MemoryNetwork`]
//!
//! # Example
//!
//! ```no_run
//! use skiff_integration_tests::TwoNodeFixture;
//!
//! #[tokio::test]
//! async fn test_basic_transfer() {
//!     let mut fixture = TwoNodeFixture::new().await.unwrap();
//!     fixture.wait_connected().await;
//!
//!     // ... send from fixture.first to fixture.second ...
//!
//!     fixture.cleanup().await.unwrap();
//! }
//! ```

use skiff_core::{MemoryNetwork, Node, NodeConfig, NodeError, PeerStatus};
use skiff_discovery::DeviceId;
use skiff_discovery::memory::MemoryDirectory;
use skiff_files::ReceivedFile;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// Upper bound for any single wait in a fixture helper
pub const WAIT_LIMIT: Duration = Duration::from_secs(5);

/// Poll `condition` until it holds or `limit` elapses. Returns whether it held.
pub async fn wait_until<F>(limit: Duration, mut condition: F) -> bool
where
    F: FnMut() -> bool,
{
    tokio::time::timeout(limit, async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .is_ok()
}

/// Node configuration with short timeouts for local testing
#[must_use]
pub fn test_config(id: &str) -> NodeConfig {
    NodeConfig {
        device_id: Some(id.to_string()),
        device_name: format!("Device-{id}"),
        connect_timeout: Duration::from_secs(2),
        send_wait_timeout: Duration::from_secs(2),
        ..NodeConfig::default()
    }
}

/// Two devices sharing one directory and one loopback network
pub struct TwoNodeFixture {
    /// Shared presence directory and relay
    pub directory: MemoryDirectory,
    /// Shared direct-link network
    pub network: MemoryNetwork,
    /// First device (`d1` unless configured otherwise)
    pub first: Node,
    /// Second device (`d2` unless configured otherwise)
    pub second: Node,
    first_inbox: mpsc::UnboundedReceiver<(DeviceId, ReceivedFile)>,
    second_inbox: mpsc::UnboundedReceiver<(DeviceId, ReceivedFile)>,
}

impl TwoNodeFixture {
    /// Join devices `d1` and `d2`
    ///
    /// # Errors
    ///
    /// Returns error if either node fails to join.
    pub async fn new() -> Result<Self, NodeError> {
        Self::new_with_config(test_config("d1"), test_config("d2")).await
    }

    /// Join two devices with custom configurations
    ///
    /// # Errors
    ///
    /// Returns error if either node fails to join.
    pub async fn new_with_config(
        first_config: NodeConfig,
        second_config: NodeConfig,
    ) -> Result<Self, NodeError> {
        let directory = MemoryDirectory::new();
        let network = MemoryNetwork::new();

        let (first, first_inbox) = join(first_config, &directory, &network).await?;
        let (second, second_inbox) = join(second_config, &directory, &network).await?;

        Ok(Self {
            directory,
            network,
            first,
            second,
            first_inbox,
            second_inbox,
        })
    }

    /// Wait until both devices see each other as connected
    ///
    /// # Panics
    ///
    /// Panics if the pair does not connect within [`WAIT_LIMIT`].
    pub async fn wait_connected(&self) {
        let (a, b) = (self.first.id().to_string(), self.second.id().to_string());
        let connected = wait_until(WAIT_LIMIT, || {
            self.first.status(&b) == PeerStatus::Connected
                && self.second.status(&a) == PeerStatus::Connected
        })
        .await;
        assert!(connected, "{a} and {b} never connected");
    }

    /// Next file completed by the first device
    pub async fn received_by_first(&mut self, limit: Duration) -> Option<(DeviceId, ReceivedFile)> {
        tokio::time::timeout(limit, self.first_inbox.recv()).await.ok().flatten()
    }

    /// Next file completed by the second device
    pub async fn received_by_second(&mut self, limit: Duration) -> Option<(DeviceId, ReceivedFile)> {
        tokio::time::timeout(limit, self.second_inbox.recv()).await.ok().flatten()
    }

    /// Both devices leave the network
    ///
    /// # Errors
    ///
    /// Returns error if a presence entry cannot be removed.
    pub async fn cleanup(self) -> Result<(), NodeError> {
        self.first.leave().await?;
        self.second.leave().await?;
        Ok(())
    }
}

/// Join one device whose completed files land in the returned channel
///
/// # Errors
///
/// Returns error if the node fails to join.
pub async fn join(
    config: NodeConfig,
    directory: &MemoryDirectory,
    network: &MemoryNetwork,
) -> Result<(Node, mpsc::UnboundedReceiver<(DeviceId, ReceivedFile)>), NodeError> {
    let (tx, rx) = mpsc::unbounded_channel();
    let node = Node::join(
        config,
        Arc::new(directory.clone()),
        Arc::new(directory.clone()),
        Arc::new(network.clone()),
        move |from, file| {
            let _ = tx.send((from, file));
        },
    )
    .await?;
    Ok((node, rx))
}
