//! # Skiff Files
//!
//! File transfer engine for Skiff.
//!
//! This crate provides:
//! - File chunking with a fixed maximum chunk size (64 KiB)
//! - Peer wire framing: one JSON metadata frame, then raw binary chunks
//! - Sender and receiver transfer sessions with progress tracking
//! - Receiver-side reassembly into a [`ReceivedFile`]
//!
//! ## Wire format
//!
//! ```text
//! Sender                                  Receiver
//!    |-- text   {"type":"metadata",...} ---->|  open session
//!    |-- binary chunk 0 (64 KiB) ----------->|
//!    |-- binary chunk 1 (64 KiB) ----------->|
//!    |-- binary chunk N (<= 64 KiB) -------->|  bytes >= fileSize: emit file
//! ```
//!
//! There is no end-of-stream marker; the receiver completes when the byte
//! count reaches the advertised size.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod chunker;
pub mod error;
pub mod frame;
pub mod reassembler;
pub mod session;

pub use chunker::{ChunkReader, FileChunker, FileSource, OutgoingFile};
pub use error::FilesError;
pub use frame::{FileMetadata, Frame, WireMessage};
pub use reassembler::{Reassembler, ReceivedFile};
pub use session::{IncomingTransfer, OutgoingTransfer};

/// Maximum chunk size (64 KiB)
pub const CHUNK_SIZE: usize = 64 * 1024;

/// MIME type used when nothing better is known
pub const DEFAULT_MIME_TYPE: &str = "application/octet-stream";

/// Guess a MIME type from a file name's extension
#[must_use]
pub fn guess_mime_type(file_name: &str) -> &'static str {
    let extension = match file_name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => ext.to_ascii_lowercase(),
        _ => return DEFAULT_MIME_TYPE,
    };

    match extension.as_str() {
        "txt" | "log" => "text/plain",
        "md" => "text/markdown",
        "csv" => "text/csv",
        "html" | "htm" => "text/html",
        "json" => "application/json",
        "pdf" => "application/pdf",
        "zip" => "application/zip",
        "gz" => "application/gzip",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "svg" => "image/svg+xml",
        "heic" => "image/heic",
        "mp3" => "audio/mpeg",
        "wav" => "audio/wav",
        "mp4" => "video/mp4",
        "mov" => "video/quicktime",
        "webm" => "video/webm",
        _ => DEFAULT_MIME_TYPE,
    }
}
