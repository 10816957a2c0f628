//! Wire types for the direct binary upload protocol.
//!
//! The protocol has three phases:
//!
//! 1. **Initiate**: `POST {target}.initiateUpload.json` reserves part URLs
//!    and an upload token per file.
//! 2. **Transfer**: `PUT {partUrl}` sends each byte range.
//! 3. **Complete**: `POST {completeURI}` commits the parts as an asset.

pub mod messages;
pub mod urls;

// Re-export primary types for convenience.
pub use messages::{
    CompleteUploadRequest, FormFields, InitiateUploadRequest, InitiateUploadResponse,
    InitiatedFileEntry, VersionDirective,
};
pub use url::Url;
pub use urls::{folder_path, host_root, initiate_url, parse_target, resolve_uri};

/// Suffix appended to the target folder URL for the initiate call.
pub const INITIATE_SUFFIX: &str = ".initiateUpload.json";

/// Errors produced while building or parsing protocol messages.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
