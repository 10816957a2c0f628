use std::io::SeekFrom;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncSeekExt};

use crate::TransferError;

/// Where a file's bytes come from.
#[derive(Debug, Clone)]
pub enum ByteSource {
    /// Shared in-memory buffer.
    Buffer(Arc<[u8]>),
    /// Local file, opened per read.
    File(PathBuf),
}

impl ByteSource {
    /// Reads `[start, end)`.
    ///
    /// Every call opens the file anew so concurrent readers never share a cursor.
    pub async fn read_range(&self, start: u64, end: u64) -> Result<Vec<u8>, TransferError> {
        let len = end.saturating_sub(start);
        match self {
            ByteSource::Buffer(data) => {
                let size = data.len() as u64;
                if end > size || start > end {
                    return Err(TransferError::RangeOutOfBounds { start, end, size });
                }
                Ok(data[start as usize..end as usize].to_vec())
            }
            ByteSource::File(path) => {
                let mut file = tokio::fs::File::open(path).await?;
                if len == 0 {
                    return Ok(Vec::new());
                }
                file.seek(SeekFrom::Start(start)).await?;
                let mut buf = vec![0u8; len as usize];
                file.read_exact(&mut buf).await?;
                Ok(buf)
            }
        }
    }
}
