use std::path::Path;
use std::sync::Arc;

use serde::Serialize;

use crate::{ByteSource, TransferError};

/// A contiguous half-open byte range `[start, end)` bound to one upload URL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Part {
    /// Position in the file's part list (matches the URL index).
    pub index: usize,
    pub start: u64,
    pub end: u64,
    pub url: String,
}

impl Part {
    /// Number of bytes covered by this part.
    pub fn len(&self) -> u64 {
        self.end.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A file to upload. Immutable once a session starts.
#[derive(Debug, Clone)]
pub struct TargetFile {
    pub name: String,
    pub size: u64,
    pub source: ByteSource,
}

impl TargetFile {
    /// Creates a target backed by an in-memory buffer.
    pub fn from_bytes(name: impl Into<String>, data: impl Into<Arc<[u8]>>) -> Self {
        let data: Arc<[u8]> = data.into();
        Self {
            name: name.into(),
            size: data.len() as u64,
            source: ByteSource::Buffer(data),
        }
    }

    /// Creates a target backed by a local file, named after its last path component.
    pub async fn from_path(path: &Path) -> Result<Self, TransferError> {
        let metadata = tokio::fs::metadata(path).await?;
        if !metadata.is_file() {
            return Err(TransferError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("not a regular file: {}", path.display()),
            )));
        }
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Ok(Self {
            name,
            size: metadata.len(),
            source: ByteSource::File(path.to_path_buf()),
        })
    }

    /// Reads the bytes covered by `part`.
    pub async fn read_part(&self, part: &Part) -> Result<Vec<u8>, TransferError> {
        if part.end > self.size || part.start > part.end {
            return Err(TransferError::RangeOutOfBounds {
                start: part.start,
                end: part.end,
                size: self.size,
            });
        }
        self.source.read_range(part.start, part.end).await
    }
}
