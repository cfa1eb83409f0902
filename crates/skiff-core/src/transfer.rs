//! Transfer engine, send side.
//!
//! ## Flow
//!
//! ```text
//! send_file(peer, file, observer)
//!     |
//!     +-- acquire the peer's send gate (one transfer per connection)
//!     +-- wait for `connected` (send wait timeout, marks the peer failed)
//!     +-- metadata text frame
//!     +-- for each chunk: check instance is live, send, on_progress(%)
//!     +-- on_complete | on_error   (exactly one)
//! ```

use crate::error::TransferError;
use crate::peer::PeerConnection;
use skiff_files::{
    CHUNK_SIZE, ChunkReader, FileChunker, Frame, OutgoingFile, OutgoingTransfer, WireMessage,
};
use std::time::Duration;

/// Outcome of a completed send
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferReport {
    /// Id announced in the metadata frame
    pub file_id: String,
    /// File name
    pub file_name: String,
    /// Bytes sent
    pub bytes_sent: u64,
    /// Binary chunks sent
    pub chunks_sent: u64,
}

/// Receives the progress of one send.
///
/// Exactly one of [`on_complete`](Self::on_complete) and
/// [`on_error`](Self::on_error) is called per send.
pub trait TransferObserver: Send + Sync {
    /// Percent sent, non-decreasing, ending at 100 on success
    fn on_progress(&self, _percent: f64) {}

    /// Every byte was handed to the link
    fn on_complete(&self, _report: &TransferReport) {}

    /// Send stopped
    fn on_error(&self, _error: &TransferError) {}
}

/// Observer that ignores everything
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopObserver;

impl TransferObserver for NoopObserver {}

type ProgressFn = Box<dyn Fn(f64) + Send + Sync>;
type CompleteFn = Box<dyn Fn(&TransferReport) + Send + Sync>;
type ErrorFn = Box<dyn Fn(&TransferError) + Send + Sync>;

/// Closure-based observer
#[derive(Default)]
pub struct TransferCallbacks {
    progress: Option<ProgressFn>,
    complete: Option<CompleteFn>,
    error: Option<ErrorFn>,
}

impl TransferCallbacks {
    /// No callbacks set
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the progress callback
    #[must_use]
    pub fn on_progress(mut self, f: impl Fn(f64) + Send + Sync + 'static) -> Self {
        self.progress = Some(Box::new(f));
        self
    }

    /// Set the completion callback
    #[must_use]
    pub fn on_complete(mut self, f: impl Fn(&TransferReport) + Send + Sync + 'static) -> Self {
        self.complete = Some(Box::new(f));
        self
    }

    /// Set the error callback
    #[must_use]
    pub fn on_error(mut self, f: impl Fn(&TransferError) + Send + Sync + 'static) -> Self {
        self.error = Some(Box::new(f));
        self
    }
}

impl TransferObserver for TransferCallbacks {
    fn on_progress(&self, percent: f64) {
        if let Some(f) = &self.progress {
            f(percent);
        }
    }

    fn on_complete(&self, report: &TransferReport) {
        if let Some(f) = &self.complete {
            f(report);
        }
    }

    fn on_error(&self, error: &TransferError) {
        if let Some(f) = &self.error {
            f(error);
        }
    }
}

/// Send parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferOptions {
    /// How long to wait for the peer to connect
    pub send_wait_timeout: Duration,
    /// Chunk size, at most 64 KiB
    pub chunk_size: usize,
}

impl Default for TransferOptions {
    fn default() -> Self {
        Self {
            send_wait_timeout: crate::config::DEFAULT_SEND_WAIT_TIMEOUT,
            chunk_size: CHUNK_SIZE,
        }
    }
}

/// Send `file` over `peer`, reporting through `observer`.
///
/// # Errors
///
/// Returns the same error passed to [`TransferObserver::on_error`].
pub async fn send_file(
    peer: &PeerConnection,
    file: &OutgoingFile,
    observer: &dyn TransferObserver,
    options: &TransferOptions,
) -> Result<TransferReport, TransferError> {
    let result = run(peer, file, observer, options).await;
    match &result {
        Ok(report) => {
            tracing::info!(
                "Sent {} to {} ({} bytes, {} chunks)",
                report.file_name,
                peer.peer_id(),
                report.bytes_sent,
                report.chunks_sent
            );
            observer.on_complete(report);
        }
        Err(error) => {
            tracing::warn!("Sending {} to {} failed: {}", file.name, peer.peer_id(), error);
            observer.on_error(error);
        }
    }
    result
}

async fn run(
    peer: &PeerConnection,
    file: &OutgoingFile,
    observer: &dyn TransferObserver,
    options: &TransferOptions,
) -> Result<TransferReport, TransferError> {
    let _gate = peer.lock_sends().await;

    if let Err(error) = peer.wait_connected(options.send_wait_timeout).await {
        if matches!(error, TransferError::HandshakeTimeout(_)) {
            peer.fail();
        }
        return Err(error);
    }

    let mut session = OutgoingTransfer::new(file);
    let mut reader = ChunkReader::open(file, FileChunker::with_chunk_size(options.chunk_size)).await?;

    peer.send(Frame::Metadata(session.metadata().clone()).encode()?)
        .await?;
    tracing::debug!(
        "Announced {} to {} as {}",
        file.name,
        peer.peer_id(),
        session.file_id()
    );

    if file.size == 0 {
        observer.on_progress(session.progress());
    }

    while let Some(chunk) = reader.next_chunk().await? {
        if peer.status().is_terminal() {
            return Err(TransferError::Aborted);
        }
        let len = chunk.len();
        peer.send(WireMessage::Binary(chunk)).await?;
        observer.on_progress(session.record_chunk(len));
    }

    Ok(TransferReport {
        file_id: session.file_id().to_string(),
        file_name: session.metadata().file_name.clone(),
        bytes_sent: session.bytes_sent(),
        chunks_sent: session.chunks_sent(),
    })
}
