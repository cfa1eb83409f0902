//! Node orchestration.
//!
//! A [`Node`] is one device on the network. Joining allocates (or takes) a
//! device id, registers presence under a lease, and starts two pumps:
//!
//! - **presence pump**: every presence snapshot is reconciled into the
//!   connection manager. A peer that drops to `disconnected` while still
//!   present triggers another pass so the pair reconnects.
//! - **mailbox pump**: every entry in the node's own mailbox is decoded,
//!   applied, and then deleted whatever the outcome.

use crate::config::NodeConfig;
use crate::error::{NodeError, Result, TransferError};
use crate::link::Connector;
use crate::manager::ConnectionManager;
use crate::peer::{PeerConnection, PeerEvent, PeerStatus};
use crate::transfer::{TransferObserver, TransferReport};
use skiff_discovery::{
    Device, DeviceId, Mailbox, PresenceDirectory, PresenceLease, PresenceRecord, PresenceSnapshot,
    SignalEnvelope, SignalRelay,
};
use skiff_files::{OutgoingFile, ReceivedFile};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;

/// One device taking part in file exchange
pub struct Node {
    id: DeviceId,
    config: NodeConfig,
    directory: Arc<dyn PresenceDirectory>,
    manager: ConnectionManager,
    lease: Option<PresenceLease>,
    tasks: Vec<JoinHandle<()>>,
}

impl Node {
    /// Join the network.
    ///
    /// `on_file` receives every completed incoming file together with the
    /// sender's id.
    ///
    /// # Errors
    ///
    /// Returns error if the configuration is invalid or presence cannot be
    /// registered.
    pub async fn join<F>(
        config: NodeConfig,
        directory: Arc<dyn PresenceDirectory>,
        relay: Arc<dyn SignalRelay>,
        connector: Arc<dyn Connector>,
        on_file: F,
    ) -> Result<Self>
    where
        F: Fn(DeviceId, ReceivedFile) + Send + Sync + 'static,
    {
        config.validate()?;
        let id = match &config.device_id {
            Some(id) => id.clone(),
            None => directory.allocate_id(),
        };

        let manager = ConnectionManager::new(
            id.clone(),
            &config,
            connector,
            Arc::clone(&relay),
            Arc::new(on_file),
        );

        // Listen before announcing so early offers are not missed
        let mailbox = relay.watch_mailbox(&id);
        let mailbox_task = tokio::spawn(mailbox_pump(
            manager.clone(),
            Arc::clone(&relay),
            id.clone(),
            mailbox,
        ));

        let lease = match directory
            .register(&id, PresenceRecord::new(config.device_name.clone(), config.device_type))
            .await
        {
            Ok(lease) => lease,
            Err(e) => {
                mailbox_task.abort();
                return Err(e.into());
            }
        };

        let presence_task = tokio::spawn(presence_pump(
            manager.clone(),
            directory.subscribe(),
            manager.subscribe(),
        ));

        tracing::info!(
            "Joined as {} ({}, {})",
            id,
            config.device_name,
            config.device_type
        );

        Ok(Self {
            id,
            config,
            directory,
            manager,
            lease: Some(lease),
            tasks: vec![mailbox_task, presence_task],
        })
    }

    /// Local device id
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Local device name
    #[must_use]
    pub fn name(&self) -> &str {
        &self.config.device_name
    }

    /// Configuration the node was joined with
    #[must_use]
    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    /// Connection manager
    #[must_use]
    pub fn manager(&self) -> &ConnectionManager {
        &self.manager
    }

    /// Other devices currently present
    #[must_use]
    pub fn devices(&self) -> Vec<Device> {
        self.directory.subscribe().borrow().devices_except(&self.id)
    }

    /// Status of `peer_id`, `disconnected` when unknown
    #[must_use]
    pub fn status(&self, peer_id: &str) -> PeerStatus {
        self.manager.status(peer_id)
    }

    /// Status of every tracked peer
    #[must_use]
    pub fn statuses(&self) -> BTreeMap<DeviceId, PeerStatus> {
        self.manager.statuses()
    }

    /// Subscribe to peer status transitions
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<PeerEvent> {
        self.manager.subscribe()
    }

    /// Drop any state for `peer_id` and connect again
    ///
    /// # Errors
    ///
    /// Returns error if the node has left or a link cannot be opened.
    pub fn reconnect(&self, peer_id: &str) -> Result<Arc<PeerConnection>> {
        if self.lease.is_none() {
            return Err(NodeError::invalid_state("node has left"));
        }
        Ok(self.manager.reconnect(peer_id)?)
    }

    /// Send a file to `peer_id`
    ///
    /// # Errors
    ///
    /// Returns the error also reported to `observer`.
    pub async fn send_file(
        &self,
        peer_id: &str,
        file: &OutgoingFile,
        observer: &dyn TransferObserver,
    ) -> std::result::Result<TransferReport, TransferError> {
        self.manager.send_file(peer_id, file, observer).await
    }

    /// Leave the network: stop the pumps, tear down every peer state and
    /// remove the presence entry.
    ///
    /// # Errors
    ///
    /// Returns error if the presence entry cannot be removed.
    pub async fn leave(mut self) -> Result<()> {
        self.stop();
        if let Some(lease) = self.lease.take() {
            lease.release();
        }
        self.directory.remove(&self.id).await?;
        tracing::info!("Left as {}", self.id);
        Ok(())
    }

    fn stop(&mut self) {
        for task in self.tasks.drain(..) {
            task.abort();
        }
        self.manager.shutdown();
    }
}

impl Drop for Node {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Node")
            .field("id", &self.id)
            .field("name", &self.config.device_name)
            .field("joined", &self.lease.is_some())
            .finish()
    }
}

async fn presence_pump(
    manager: ConnectionManager,
    mut presence: watch::Receiver<PresenceSnapshot>,
    mut events: broadcast::Receiver<PeerEvent>,
) {
    loop {
        let present: Vec<DeviceId> = presence
            .borrow_and_update()
            .devices()
            .into_iter()
            .map(|device| device.id)
            .collect();
        manager.reconcile(&present);

        loop {
            tokio::select! {
                changed = presence.changed() => {
                    if changed.is_err() {
                        return;
                    }
                    break;
                }
                event = events.recv() => match event {
                    Ok(PeerEvent::StatusChanged { peer_id, status: PeerStatus::Disconnected, .. })
                        if presence.borrow().contains(&peer_id) =>
                    {
                        tracing::debug!("Peer {} disconnected while present, reconciling", peer_id);
                        break;
                    }
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(_)) => break,
                    Err(broadcast::error::RecvError::Closed) => return,
                },
            }
        }
    }
}

async fn mailbox_pump(
    manager: ConnectionManager,
    relay: Arc<dyn SignalRelay>,
    local_id: DeviceId,
    mut mailbox: watch::Receiver<Mailbox>,
) {
    loop {
        let entries: Vec<_> = mailbox
            .borrow_and_update()
            .iter()
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();

        for (key, value) in entries {
            match SignalEnvelope::from_value(&value) {
                Ok(envelope) => {
                    let disposition = manager.apply_signal(&envelope);
                    tracing::trace!(
                        "{} from {} -> {:?}",
                        envelope.data.kind(),
                        envelope.sender,
                        disposition
                    );
                }
                Err(e) => tracing::warn!("Discarding signal {}: {}", key, e),
            }

            if let Err(e) = relay.delete(&local_id, &key).await {
                tracing::warn!("Failed to delete signal {}: {}", key, e);
            }
        }

        if mailbox.changed().await.is_err() {
            break;
        }
    }
}
