//! Session options.

use std::time::Duration;

use assetpush_protocol::VersionDirective;

use crate::error::UploadError;

pub const DEFAULT_RETRY_COUNT: u32 = 3;
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(5);
pub const DEFAULT_MAX_CONCURRENT: usize = 5;
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Linear-backoff retry policy applied to every network operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub retry_count: u32,
    /// Base delay; retry `k` waits `retry_delay * k`.
    pub retry_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            retry_count: DEFAULT_RETRY_COUNT,
            retry_delay: DEFAULT_RETRY_DELAY,
        }
    }
}

impl RetryPolicy {
    /// No retries at all.
    pub fn none() -> Self {
        Self {
            retry_count: 0,
            retry_delay: Duration::ZERO,
        }
    }

    /// Delay before retry `k` (1-based).
    pub fn delay_for(&self, retry: u32) -> Duration {
        self.retry_delay.saturating_mul(retry)
    }
}

/// Options of one upload session.
#[derive(Debug, Clone)]
pub struct UploadOptions {
    /// Folder URL the files are uploaded into.
    pub target_url: String,
    /// Upload several files at once. Parts of one file are always sequential.
    pub concurrent: bool,
    pub max_concurrent: usize,
    pub retry: RetryPolicy,
    /// Per-operation timeout. `None` waits forever.
    pub request_timeout: Option<Duration>,
    /// Sent with every request (e.g. `Authorization`).
    pub headers: Vec<(String, String)>,
    pub version: VersionDirective,
    /// Set `Content-Length` on part PUTs explicitly.
    pub explicit_content_length: bool,
}

impl UploadOptions {
    pub fn new(target_url: impl Into<String>) -> Self {
        Self {
            target_url: target_url.into(),
            concurrent: true,
            max_concurrent: DEFAULT_MAX_CONCURRENT,
            retry: RetryPolicy::default(),
            request_timeout: Some(DEFAULT_REQUEST_TIMEOUT),
            headers: Vec::new(),
            version: VersionDirective::None,
            explicit_content_length: false,
        }
    }

    pub fn with_concurrency(mut self, concurrent: bool, max_concurrent: usize) -> Self {
        self.concurrent = concurrent;
        self.max_concurrent = max_concurrent;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_version(mut self, version: VersionDirective) -> Self {
        self.version = version;
        self
    }

    pub fn with_explicit_content_length(mut self, on: bool) -> Self {
        self.explicit_content_length = on;
        self
    }

    /// Number of files transferred at once.
    pub fn effective_concurrency(&self) -> usize {
        if self.concurrent { self.max_concurrent } else { 1 }
    }

    pub fn validate(&self) -> Result<(), UploadError> {
        if self.target_url.trim().is_empty() {
            return Err(UploadError::InvalidConfig("target URL is empty".into()));
        }
        assetpush_protocol::parse_target(&self.target_url)
            .map_err(|e| UploadError::InvalidConfig(e.to_string()))?;
        if self.max_concurrent == 0 {
            return Err(UploadError::InvalidConfig(
                "max_concurrent must be at least 1".into(),
            ));
        }
        Ok(())
    }
}
