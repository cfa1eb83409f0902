//! Transfer session state for both ends of a transfer.

use crate::chunker::OutgoingFile;
use crate::frame::FileMetadata;
use std::time::{SystemTime, UNIX_EPOCH};

/// Generate a file id unique per send: name, millisecond timestamp and a
/// random suffix
#[must_use]
pub fn generate_file_id(file_name: &str) -> String {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0);
    format!("{}-{}-{:04x}", file_name, millis, rand::random::<u16>())
}

fn percent(done: u64, total: u64) -> f64 {
    if total == 0 {
        return 100.0;
    }
    ((done as f64 / total as f64) * 100.0).min(100.0)
}

/// Sender-side transfer session
#[derive(Debug, Clone)]
pub struct OutgoingTransfer {
    metadata: FileMetadata,
    bytes_sent: u64,
    chunks_sent: u64,
}

impl OutgoingTransfer {
    /// Start a session for `file` with a freshly generated id
    #[must_use]
    pub fn new(file: &OutgoingFile) -> Self {
        Self {
            metadata: FileMetadata {
                file_id: generate_file_id(&file.name),
                file_name: file.name.clone(),
                file_size: file.size,
                mime_type: file.mime_type.clone(),
            },
            bytes_sent: 0,
            chunks_sent: 0,
        }
    }

    /// Metadata announced to the receiver
    #[must_use]
    pub fn metadata(&self) -> &FileMetadata {
        &self.metadata
    }

    /// File id
    #[must_use]
    pub fn file_id(&self) -> &str {
        &self.metadata.file_id
    }

    /// Record a chunk handed to the link and return the new progress
    pub fn record_chunk(&mut self, len: usize) -> f64 {
        self.bytes_sent += len as u64;
        self.chunks_sent += 1;
        self.progress()
    }

    /// Progress in percent, `0.0..=100.0`, never decreasing
    #[must_use]
    pub fn progress(&self) -> f64 {
        percent(self.bytes_sent, self.metadata.file_size)
    }

    /// Bytes sent so far
    #[must_use]
    pub fn bytes_sent(&self) -> u64 {
        self.bytes_sent
    }

    /// Chunks sent so far
    #[must_use]
    pub fn chunks_sent(&self) -> u64 {
        self.chunks_sent
    }

    /// All bytes sent
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.bytes_sent >= self.metadata.file_size
    }
}

/// Receiver-side transfer session
#[derive(Debug)]
pub struct IncomingTransfer {
    metadata: FileMetadata,
    chunks: Vec<Vec<u8>>,
    bytes_received: u64,
}

impl IncomingTransfer {
    /// Open a session from a metadata frame
    #[must_use]
    pub fn new(metadata: FileMetadata) -> Self {
        Self {
            metadata,
            chunks: Vec::new(),
            bytes_received: 0,
        }
    }

    /// Metadata this session was opened with
    #[must_use]
    pub fn metadata(&self) -> &FileMetadata {
        &self.metadata
    }

    /// Append a chunk. Returns true once the advertised size is reached.
    pub fn push_chunk(&mut self, chunk: Vec<u8>) -> bool {
        self.bytes_received += chunk.len() as u64;
        self.chunks.push(chunk);
        self.is_complete()
    }

    /// Bytes received so far
    #[must_use]
    pub fn bytes_received(&self) -> u64 {
        self.bytes_received
    }

    /// Chunks received so far
    #[must_use]
    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    /// Progress in percent
    #[must_use]
    pub fn progress(&self) -> f64 {
        percent(self.bytes_received, self.metadata.file_size)
    }

    /// `bytes_received >= file_size`
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.bytes_received >= self.metadata.file_size
    }

    /// Drop the received chunks and keep only the metadata
    #[must_use]
    pub fn into_metadata(self) -> FileMetadata {
        self.metadata
    }

    /// Consume the session and return at most `file_size` bytes. Any surplus
    /// sent by the peer is discarded.
    #[must_use]
    pub fn assemble(self) -> (FileMetadata, Vec<u8>) {
        let size = usize::try_from(self.metadata.file_size.min(self.bytes_received)).unwrap_or(usize::MAX);
        let mut payload = Vec::with_capacity(size);
        for chunk in self.chunks {
            let room = size - payload.len();
            if room == 0 {
                break;
            }
            payload.extend_from_slice(&chunk[..chunk.len().min(room)]);
        }
        (self.metadata, payload)
    }
}
