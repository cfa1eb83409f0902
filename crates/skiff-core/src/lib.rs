//! # Skiff Core
//!
//! Connection lifecycle and transfer engine for Skiff.
//!
//! This crate provides:
//! - Deterministic initiator election ([`elect`])
//! - The direct-link boundary ([`Link`], [`Connector`]) and a loopback
//!   implementation ([`MemoryNetwork`])
//! - The per-peer connection lifecycle ([`ConnectionManager`], [`PeerConnection`])
//! - The send side of the transfer engine ([`transfer::send_file`])
//! - Node orchestration ([`Node`]): presence and mailbox pumps, join and leave
//!
//! ## Flow
//!
//! ```text
//! presence change -> reconcile -> elect -> offer/answer/candidate via relay
//!                                            |
//!                                            v
//!                                   direct link connected -> file frames
//! ```
//!
//! ## Example
//!
//! ```no_run
//! use skiff_core::{MemoryNetwork, Node, NodeConfig, TransferCallbacks};
//! use skiff_discovery::memory::MemoryDirectory;
//! use skiff_files::OutgoingFile;
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let directory = MemoryDirectory::new();
//! let network = MemoryNetwork::new();
//!
//! let node = Node::join(
//!     NodeConfig::default(),
//!     Arc::new(directory.clone()),
//!     Arc::new(directory.clone()),
//!     Arc::new(network.clone()),
//!     |from, file| println!("{} sent {} ({} bytes)", from, file.name, file.size),
//! )
//! .await?;
//!
//! let file = OutgoingFile::from_path("notes.txt").await?;
//! let observer = TransferCallbacks::new().on_progress(|p| println!("{p:.0}%"));
//! node.send_file("peer-id", &file, &observer).await?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod election;
pub mod error;
pub mod link;
pub mod manager;
pub mod memory;
pub mod node;
pub mod peer;
pub mod transfer;

pub use config::NodeConfig;
pub use election::{Role, elect};
pub use error::{LinkError, NodeError, TransferError};
pub use link::{Connector, Link, LinkEvent, LinkSpec};
pub use manager::{ConnectionManager, FileHandler, ReconcileReport, SignalDisposition};
pub use memory::{LinkStats, MemoryNetwork};
pub use node::Node;
pub use peer::{PeerConnection, PeerEvent, PeerStatus};
pub use transfer::{NoopObserver, TransferCallbacks, TransferObserver, TransferOptions, TransferReport};
