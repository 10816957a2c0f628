use serde::{Deserialize, Serialize};

use crate::ProtocolError;

/// Ordered `name=value` pairs of a form-encoded body.
///
/// Order matters: the server maps repeated `fileName` / `fileSize` values
/// positionally.
pub type FormFields = Vec<(String, String)>;

// ---------------------------------------------------------------------------
// Initiate
// ---------------------------------------------------------------------------

/// Body of the initiate call for one or more files.
#[derive(Debug, Clone, PartialEq)]
pub struct InitiateUploadRequest {
    /// Repository path of the target folder.
    pub path: String,
    /// `(file name, byte size)` in submission order.
    pub files: Vec<(String, u64)>,
}

impl InitiateUploadRequest {
    /// Form fields: `path`, then all `fileName`s, then all `fileSize`s.
    pub fn to_form(&self) -> FormFields {
        let mut form = Vec::with_capacity(1 + self.files.len() * 2);
        form.push(("path".to_string(), self.path.clone()));
        for (name, _) in &self.files {
            form.push(("fileName".to_string(), name.clone()));
        }
        for (_, size) in &self.files {
            form.push(("fileSize".to_string(), size.to_string()));
        }
        form
    }
}

/// Server metadata for one file returned by the initiate call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitiatedFileEntry {
    pub file_name: String,
    #[serde(default)]
    pub mime_type: String,
    pub upload_token: String,
    #[serde(rename = "uploadURIs")]
    pub upload_uris: Vec<String>,
    #[serde(default)]
    pub min_part_size: u64,
    #[serde(default)]
    pub max_part_size: u64,
    #[serde(
        rename = "completeURI",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub complete_uri: Option<String>,
}

/// Response of the initiate call.
///
/// `files` corresponds positionally to [`InitiateUploadRequest::files`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InitiateUploadResponse {
    pub files: Vec<InitiatedFileEntry>,
    #[serde(
        rename = "completeURI",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub complete_uri: Option<String>,
}

impl InitiateUploadResponse {
    /// Parses a raw JSON response body.
    pub fn from_slice(body: &[u8]) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_slice(body)?)
    }
}

// ---------------------------------------------------------------------------
// Complete
// ---------------------------------------------------------------------------

/// How the committed binary relates to an existing asset of the same name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "mode")]
pub enum VersionDirective {
    /// Let the server apply its default behaviour.
    #[default]
    None,
    /// Create a new version of the existing asset.
    CreateVersion {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        label: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        comment: Option<String>,
    },
    /// Replace the existing asset.
    Replace,
}

/// Body of the complete call for a single file.
#[derive(Debug, Clone, PartialEq)]
pub struct CompleteUploadRequest {
    pub file_name: String,
    pub mime_type: String,
    pub upload_token: String,
    pub version: VersionDirective,
}

impl CompleteUploadRequest {
    pub fn to_form(&self) -> FormFields {
        let mut form = vec![
            ("fileName".to_string(), self.file_name.clone()),
            ("mimeType".to_string(), self.mime_type.clone()),
            ("uploadToken".to_string(), self.upload_token.clone()),
        ];
        match &self.version {
            VersionDirective::None => {}
            VersionDirective::CreateVersion { label, comment } => {
                form.push(("createVersion".to_string(), "true".to_string()));
                if let Some(label) = label {
                    form.push(("versionLabel".to_string(), label.clone()));
                }
                if let Some(comment) = comment {
                    form.push(("versionComment".to_string(), comment.clone()));
                }
            }
            VersionDirective::Replace => {
                form.push(("replace".to_string(), "true".to_string()));
            }
        }
        form
    }
}
