//! Peer wire framing.
//!
//! A transfer is one JSON text frame announcing the file followed by raw
//! binary frames carrying its bytes.

use crate::FilesError;
use serde::{Deserialize, Serialize};

/// File announcement sent before any chunk
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileMetadata {
    /// Unique id of this send
    pub file_id: String,
    /// Display name
    pub file_name: String,
    /// Exact size in bytes
    pub file_size: u64,
    /// MIME type
    #[serde(rename = "fileType")]
    pub mime_type: String,
}

/// JSON control frames
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum ControlFrame {
    Metadata(FileMetadata),
}

/// One message on a direct link
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireMessage {
    /// UTF-8 text frame
    Text(String),
    /// Binary frame
    Binary(Vec<u8>),
}

impl WireMessage {
    /// Payload length in bytes
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            WireMessage::Text(text) => text.len(),
            WireMessage::Binary(bytes) => bytes.len(),
        }
    }

    /// True for an empty payload
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// True for binary frames
    #[must_use]
    pub fn is_binary(&self) -> bool {
        matches!(self, WireMessage::Binary(_))
    }
}

/// Decoded transfer frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Start of a file
    Metadata(FileMetadata),
    /// Next slice of the current file
    Chunk(Vec<u8>),
}

impl Frame {
    /// Encode for the wire
    ///
    /// # Errors
    ///
    /// Returns error if the metadata cannot be serialized.
    pub fn encode(&self) -> Result<WireMessage, FilesError> {
        match self {
            Frame::Metadata(metadata) => {
                let text = serde_json::to_string(&ControlFrame::Metadata(metadata.clone()))
                    .map_err(|e| FilesError::Serialization(e.to_string()))?;
                Ok(WireMessage::Text(text))
            }
            Frame::Chunk(bytes) => Ok(WireMessage::Binary(bytes.clone())),
        }
    }

    /// Decode a wire message
    ///
    /// # Errors
    ///
    /// Returns [`FilesError::MalformedFrame`] for text frames that are not a
    /// known control frame.
    pub fn decode(message: WireMessage) -> Result<Self, FilesError> {
        match message {
            WireMessage::Binary(bytes) => Ok(Frame::Chunk(bytes)),
            WireMessage::Text(text) => {
                let control: ControlFrame = serde_json::from_str(&text)
                    .map_err(|e| FilesError::MalformedFrame(e.to_string()))?;
                match control {
                    ControlFrame::Metadata(metadata) => Ok(Frame::Metadata(metadata)),
                }
            }
        }
    }
}
