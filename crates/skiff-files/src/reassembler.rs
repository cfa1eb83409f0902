//! Receiver-side reassembly.

use crate::frame::{FileMetadata, Frame};
use crate::session::IncomingTransfer;

/// A completed incoming file, handed to the application exactly once
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedFile {
    /// File id chosen by the sender
    pub id: String,
    /// Display name
    pub name: String,
    /// Size in bytes (equals `payload.len()`)
    pub size: u64,
    /// MIME type
    pub mime_type: String,
    /// Local receipt time, human readable
    pub received_at: String,
    /// File contents
    pub payload: Vec<u8>,
}

impl ReceivedFile {
    fn new(metadata: FileMetadata, payload: Vec<u8>) -> Self {
        Self {
            id: metadata.file_id,
            name: metadata.file_name,
            size: payload.len() as u64,
            mime_type: metadata.mime_type,
            received_at: chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string(),
            payload,
        }
    }
}

/// Per-connection receive state.
///
/// Holds at most one incomplete session. A new metadata frame abandons the
/// session in progress, and chunks with no open session are dropped.
#[derive(Debug, Default)]
pub struct Reassembler {
    current: Option<IncomingTransfer>,
    completed: u64,
}

impl Reassembler {
    /// Create an idle reassembler
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one frame. Returns the file when this frame completes it.
    pub fn handle(&mut self, frame: Frame) -> Option<ReceivedFile> {
        match frame {
            Frame::Metadata(metadata) => {
                if let Some(stale) = self.current.take() {
                    tracing::warn!(
                        "Abandoning incomplete transfer {} ({}/{} bytes)",
                        stale.metadata().file_id,
                        stale.bytes_received(),
                        stale.metadata().file_size
                    );
                }

                tracing::debug!(
                    "Receiving {} ({} bytes) as {}",
                    metadata.file_name,
                    metadata.file_size,
                    metadata.file_id
                );
                let session = IncomingTransfer::new(metadata);
                if session.is_complete() {
                    return Some(self.finish(session));
                }
                self.current = Some(session);
                None
            }
            Frame::Chunk(bytes) => {
                let Some(session) = self.current.as_mut() else {
                    tracing::warn!("Dropping {} byte chunk with no open transfer", bytes.len());
                    return None;
                };

                if !session.push_chunk(bytes) {
                    return None;
                }

                let session = self.current.take()?;
                if session.bytes_received() > session.metadata().file_size {
                    tracing::warn!(
                        "Transfer {} overran by {} bytes, truncating",
                        session.metadata().file_id,
                        session.bytes_received() - session.metadata().file_size
                    );
                }
                Some(self.finish(session))
            }
        }
    }

    fn finish(&mut self, session: IncomingTransfer) -> ReceivedFile {
        let (metadata, payload) = session.assemble();
        self.completed += 1;
        tracing::info!("Received {} ({} bytes)", metadata.file_name, payload.len());
        ReceivedFile::new(metadata, payload)
    }

    /// Session in progress, if any
    #[must_use]
    pub fn in_progress(&self) -> Option<&IncomingTransfer> {
        self.current.as_ref()
    }

    /// Number of files completed on this connection
    #[must_use]
    pub fn completed_count(&self) -> u64 {
        self.completed
    }

    /// Drop the session in progress, returning its metadata
    pub fn abandon(&mut self) -> Option<FileMetadata> {
        self.current.take().map(IncomingTransfer::into_metadata)
    }
}
