//! Upload job configuration.
//!
//! Configuration is stored as TOML, by default at:
//! - Linux: `~/.config/assetpush/upload.toml`
//! - Windows: `%APPDATA%/assetpush/upload.toml`

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use assetpush_protocol::VersionDirective;
use assetpush_upload::{RetryPolicy, UploadOptions};
use base64::Engine;
use serde::{Deserialize, Serialize};

/// One upload job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CliConfig {
    /// Folder URL the files go into, e.g. `http://localhost:4502/content/dam/folder`.
    pub target_url: String,

    /// Local files to upload.
    #[serde(default)]
    pub files: Vec<PathBuf>,

    #[serde(default = "default_true")]
    pub concurrent: bool,

    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,

    #[serde(default = "default_retry_count")]
    pub retry_count: u32,

    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,

    /// Per-request timeout; 0 disables it.
    #[serde(default = "default_timeout_secs")]
    pub request_timeout_secs: u64,

    #[serde(default)]
    pub explicit_content_length: bool,

    /// Basic auth credentials.
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,

    /// Extra headers sent with every request.
    #[serde(default)]
    pub headers: BTreeMap<String, String>,

    #[serde(default)]
    pub version: VersionDirective,
}

fn default_true() -> bool {
    true
}

fn default_max_concurrent() -> usize {
    assetpush_upload::options::DEFAULT_MAX_CONCURRENT
}

fn default_retry_count() -> u32 {
    assetpush_upload::options::DEFAULT_RETRY_COUNT
}

fn default_retry_delay_ms() -> u64 {
    assetpush_upload::options::DEFAULT_RETRY_DELAY.as_millis() as u64
}

fn default_timeout_secs() -> u64 {
    assetpush_upload::options::DEFAULT_REQUEST_TIMEOUT.as_secs()
}

impl CliConfig {
    /// Loads the job file at `path`.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("cannot read {}", path.display()))?;
        Self::parse(&content).with_context(|| format!("invalid config {}", path.display()))
    }

    pub fn parse(content: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Builds the session options.
    pub fn to_options(&self) -> UploadOptions {
        let mut options = UploadOptions::new(self.target_url.clone())
            .with_concurrency(self.concurrent, self.max_concurrent)
            .with_retry(RetryPolicy {
                retry_count: self.retry_count,
                retry_delay: Duration::from_millis(self.retry_delay_ms),
            })
            .with_timeout(
                (self.request_timeout_secs > 0)
                    .then(|| Duration::from_secs(self.request_timeout_secs)),
            )
            .with_version(self.version.clone())
            .with_explicit_content_length(self.explicit_content_length);

        if let Some(user) = &self.username {
            let password = self.password.as_deref().unwrap_or_default();
            let token =
                base64::engine::general_purpose::STANDARD.encode(format!("{user}:{password}"));
            options = options.with_header("Authorization", format!("Basic {token}"));
        }
        for (name, value) in &self.headers {
            options = options.with_header(name.clone(), value.clone());
        }
        options
    }
}

/// Returns the platform-specific default job file path.
pub fn default_config_path() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        let appdata =
            std::env::var("APPDATA").unwrap_or_else(|_| "C:\\Users\\Default\\AppData".into());
        PathBuf::from(appdata).join("assetpush").join("upload.toml")
    }

    #[cfg(not(target_os = "windows"))]
    {
        let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".into());
        PathBuf::from(home)
            .join(".config")
            .join("assetpush")
            .join("upload.toml")
    }
}
