//! Upload error types.

use std::time::Duration;

use assetpush_transfer::TransferError;

/// Errors produced while orchestrating an upload.
#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    /// The initiate call failed; fatal to the whole session.
    #[error("initiate failed: {0}")]
    Initiation(String),

    /// File size and issued part URLs do not fit together.
    #[error("invalid part plan: {0}")]
    InvalidPartPlan(String),

    #[error("part {index} transfer failed: {reason}")]
    PartTransfer { index: usize, reason: String },

    #[error("complete failed: {0}")]
    Complete(String),

    /// User-initiated cancellation. Never retried.
    #[error("cancelled")]
    Cancelled,

    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("request error: {0}")]
    Request(#[from] reqwest::Error),

    #[error("source read failed: {0}")]
    Source(TransferError),

    #[error("protocol error: {0}")]
    Protocol(#[from] assetpush_protocol::ProtocolError),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl UploadError {
    /// Returns `true` for user-initiated cancellation.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, UploadError::Cancelled)
    }
}

impl From<TransferError> for UploadError {
    fn from(err: TransferError) -> Self {
        match err {
            TransferError::InvalidPartPlan(msg) => UploadError::InvalidPartPlan(msg),
            other => UploadError::Source(other),
        }
    }
}
