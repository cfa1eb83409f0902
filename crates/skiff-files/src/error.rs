//! Error types for the file transfer engine.

use thiserror::Error;

/// File transfer errors
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FilesError {
    /// Reading the source file failed
    #[error("I/O error: {0}")]
    Io(String),

    /// Source ended before the advertised size was read
    #[error("source truncated at offset {offset} (expected {expected} bytes)")]
    Truncated {
        /// Offset where the source ran dry
        offset: u64,
        /// Size the transfer advertised
        expected: u64,
    },

    /// File name is empty or cannot be represented
    #[error("invalid file name: {0:?}")]
    InvalidName(String),

    /// Peer sent a frame that is not part of the protocol
    #[error("malformed frame: {0}")]
    MalformedFrame(String),

    /// Frame could not be encoded
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl From<std::io::Error> for FilesError {
    fn from(err: std::io::Error) -> Self {
        FilesError::Io(err.to_string())
    }
}
