//! File chunking.

use crate::{CHUNK_SIZE, FilesError, guess_mime_type};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::AsyncReadExt;

/// Chunk a file into fixed-size pieces
#[derive(Debug, Clone, Copy)]
pub struct FileChunker {
    chunk_size: usize,
}

impl FileChunker {
    /// Create a new chunker with the default 64 KiB chunk size
    #[must_use]
    pub fn new() -> Self {
        Self::with_chunk_size(CHUNK_SIZE)
    }

    /// Create a new chunker with custom chunk size, clamped to `1..=CHUNK_SIZE`
    #[must_use]
    pub fn with_chunk_size(size: usize) -> Self {
        Self {
            chunk_size: size.clamp(1, CHUNK_SIZE),
        }
    }

    /// Get chunk size
    #[must_use]
    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Calculate number of chunks for a file
    #[must_use]
    pub fn chunk_count(&self, file_size: u64) -> u64 {
        file_size.div_ceil(self.chunk_size as u64)
    }

    /// Length of chunk `index`, or `None` past the end of the file
    #[must_use]
    pub fn chunk_len(&self, file_size: u64, index: u64) -> Option<usize> {
        let start = index.checked_mul(self.chunk_size as u64)?;
        if start >= file_size {
            return None;
        }
        Some((file_size - start).min(self.chunk_size as u64) as usize)
    }

    /// Lengths of every chunk in offset order
    pub fn chunk_lengths(&self, file_size: u64) -> impl Iterator<Item = usize> + '_ {
        (0..self.chunk_count(file_size)).filter_map(move |i| self.chunk_len(file_size, i))
    }
}

impl Default for FileChunker {
    fn default() -> Self {
        Self::new()
    }
}

/// Where the bytes of an outgoing file come from
#[derive(Debug, Clone)]
pub enum FileSource {
    /// File on local disk
    Path(PathBuf),
    /// Bytes already in memory
    Memory(Arc<[u8]>),
}

/// A file selected for sending
#[derive(Debug, Clone)]
pub struct OutgoingFile {
    /// Display name (no directory components)
    pub name: String,
    /// Size in bytes
    pub size: u64,
    /// MIME type advertised to the receiver
    pub mime_type: String,
    /// Byte source
    pub source: FileSource,
}

impl OutgoingFile {
    /// Describe a file on disk. Size is taken from the file system and the
    /// MIME type is guessed from the extension.
    ///
    /// # Errors
    ///
    /// Returns error if the path has no usable file name or cannot be stat'ed.
    pub async fn from_path(path: impl AsRef<Path>) -> Result<Self, FilesError> {
        let path = path.as_ref();
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .filter(|n| !n.is_empty())
            .ok_or_else(|| FilesError::InvalidName(path.display().to_string()))?
            .to_string();

        let metadata = tokio::fs::metadata(path).await?;
        if !metadata.is_file() {
            return Err(FilesError::Io(format!("{} is not a regular file", path.display())));
        }

        Ok(Self {
            mime_type: guess_mime_type(&name).to_string(),
            name,
            size: metadata.len(),
            source: FileSource::Path(path.to_path_buf()),
        })
    }

    /// Describe an in-memory payload
    #[must_use]
    pub fn from_bytes(
        name: impl Into<String>,
        mime_type: impl Into<String>,
        bytes: impl Into<Arc<[u8]>>,
    ) -> Self {
        let bytes = bytes.into();
        Self {
            name: name.into(),
            size: bytes.len() as u64,
            mime_type: mime_type.into(),
            source: FileSource::Memory(bytes),
        }
    }
}

enum ReaderSource {
    File(tokio::fs::File),
    Memory(Arc<[u8]>),
}

/// Sequential chunk reader over an [`OutgoingFile`]
pub struct ChunkReader {
    source: ReaderSource,
    chunker: FileChunker,
    offset: u64,
    total: u64,
}

impl ChunkReader {
    /// Open a reader positioned at offset 0
    ///
    /// # Errors
    ///
    /// Returns error if the backing file cannot be opened.
    pub async fn open(file: &OutgoingFile, chunker: FileChunker) -> Result<Self, FilesError> {
        let source = match &file.source {
            FileSource::Path(path) => ReaderSource::File(tokio::fs::File::open(path).await?),
            FileSource::Memory(bytes) => ReaderSource::Memory(Arc::clone(bytes)),
        };

        Ok(Self {
            source,
            chunker,
            offset: 0,
            total: file.size,
        })
    }

    /// Read the next chunk, or `None` once `size` bytes have been produced.
    ///
    /// # Errors
    ///
    /// Returns [`FilesError::Truncated`] with the offset of the chunk that
    /// could not be filled if the source ends early, or [`FilesError::Io`] on
    /// a read failure.
    pub async fn next_chunk(&mut self) -> Result<Option<Vec<u8>>, FilesError> {
        if self.offset >= self.total {
            return Ok(None);
        }
        let start = self.offset;
        let want = (self.total - start).min(self.chunker.chunk_size() as u64) as usize;

        let chunk = match &mut self.source {
            ReaderSource::File(file) => {
                let mut buf = vec![0u8; want];
                match file.read_exact(&mut buf).await {
                    Ok(_) => buf,
                    Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                        return Err(FilesError::Truncated {
                            offset: start,
                            expected: self.total,
                        });
                    }
                    Err(e) => return Err(e.into()),
                }
            }
            ReaderSource::Memory(bytes) => {
                let begin = start as usize;
                match bytes.get(begin..begin + want) {
                    Some(slice) => slice.to_vec(),
                    None => {
                        return Err(FilesError::Truncated {
                            offset: bytes.len() as u64,
                            expected: self.total,
                        });
                    }
                }
            }
        };

        self.offset += want as u64;
        Ok(Some(chunk))
    }
}
