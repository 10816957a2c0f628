use assetpush_protocol::InitiatedFileEntry;
use serde::Serialize;

/// Lifecycle of an upload session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum SessionState {
    Idle,
    Initiating,
    Transferring,
    Completed,
    /// Initiation failed; no file was transferred.
    Failed,
    Cancelled,
}

/// Lifecycle of one file within a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum FileStatus {
    Pending,
    PartsUploading,
    AllPartsOk,
    Completing,
    Done,
    PartFailed,
    CompleteFailed,
    /// The server's part metadata could not be mapped onto the file.
    InvalidPlan,
    FileCancelled,
}

impl FileStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Done
                | Self::PartFailed
                | Self::CompleteFailed
                | Self::InvalidPlan
                | Self::FileCancelled
        )
    }
}

/// Progress event emitted during an upload session.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum UploadEvent {
    /// The first part of a file is about to be sent.
    #[serde(rename_all = "camelCase")]
    FileStart { file_name: String, file_size: u64 },
    /// A part finished. `transferred` counts bytes sent so far and `offset`
    /// is the end of the part just sent.
    #[serde(rename_all = "camelCase")]
    FileProgress {
        file_name: String,
        file_size: u64,
        transferred: u64,
        offset: u64,
        bytes_per_second: f64,
    },
    /// All parts and the complete call succeeded.
    #[serde(rename_all = "camelCase")]
    FileEnd {
        file_name: String,
        file_size: u64,
        elapsed_ms: u64,
    },
    #[serde(rename_all = "camelCase")]
    FileError {
        file_name: String,
        errors: Vec<String>,
    },
    #[serde(rename_all = "camelCase")]
    FileCancelled { file_name: String },
}

impl UploadEvent {
    pub fn file_name(&self) -> &str {
        match self {
            Self::FileStart { file_name, .. }
            | Self::FileProgress { file_name, .. }
            | Self::FileEnd { file_name, .. }
            | Self::FileError { file_name, .. }
            | Self::FileCancelled { file_name } => file_name,
        }
    }
}

/// Server-issued upload metadata for one file.
#[derive(Debug, Clone, PartialEq)]
pub struct InitiatedFile {
    pub file_name: String,
    pub mime_type: String,
    pub upload_token: String,
    pub part_urls: Vec<String>,
    pub min_part_size: u64,
    pub max_part_size: u64,
    /// Per-file complete URI, or the session-level one when absent.
    pub complete_uri: Option<String>,
}

impl InitiatedFile {
    pub fn from_entry(entry: InitiatedFileEntry, session_complete_uri: Option<&str>) -> Self {
        Self {
            complete_uri: entry
                .complete_uri
                .or_else(|| session_complete_uri.map(str::to_string)),
            file_name: entry.file_name,
            mime_type: entry.mime_type,
            upload_token: entry.upload_token,
            part_urls: entry.upload_uris,
            min_part_size: entry.min_part_size,
            max_part_size: entry.max_part_size,
        }
    }
}
