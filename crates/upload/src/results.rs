//! Per-part, per-file and per-session outcome records.

use std::sync::Mutex;
use std::time::Duration;

use assetpush_transfer::{Part, TargetFile};
use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::types::{FileStatus, SessionState};

/// Outcome of one part PUT.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PartResult {
    pub index: usize,
    pub start: u64,
    pub end: u64,
    pub url: String,
    #[serde(rename = "elapsedMs", with = "duration_ms")]
    pub elapsed: Duration,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub retry_errors: Vec<String>,
}

impl PartResult {
    pub fn new(part: &Part, elapsed: Duration) -> Self {
        Self {
            index: part.index,
            start: part.start,
            end: part.end,
            url: part.url.clone(),
            elapsed,
            error: None,
            retry_errors: Vec::new(),
        }
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    pub fn with_retry_errors(mut self, retry_errors: Vec<String>) -> Self {
        self.retry_errors = retry_errors;
        self
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// Outcome of one file.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileResult {
    pub file_name: String,
    pub file_size: u64,
    pub mime_type: String,
    pub status: FileStatus,
    pub parts: Vec<PartResult>,
    pub errors: Vec<String>,
    /// Retried failures of the complete call.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub retry_errors: Vec<String>,
    /// Wall time of the part loop.
    #[serde(rename = "uploadTimeMs", with = "duration_ms")]
    pub upload_time: Duration,
    #[serde(
        rename = "completeTimeMs",
        with = "duration_ms::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub complete_time: Option<Duration>,
}

impl FileResult {
    pub fn new(file_name: impl Into<String>, file_size: u64) -> Self {
        Self {
            file_name: file_name.into(),
            file_size,
            mime_type: String::new(),
            status: FileStatus::Pending,
            parts: Vec::new(),
            errors: Vec::new(),
            retry_errors: Vec::new(),
            upload_time: Duration::ZERO,
            complete_time: None,
        }
    }

    /// All parts and the complete call succeeded and the file was not cancelled.
    pub fn is_success(&self) -> bool {
        self.status == FileStatus::Done
            && self.errors.is_empty()
            && self.parts.iter().all(PartResult::is_success)
    }

    pub fn cancelled(&self) -> bool {
        self.status == FileStatus::FileCancelled
    }

    pub fn total_part_time(&self) -> Duration {
        self.parts.iter().map(|p| p.elapsed).sum()
    }

    pub fn average_part_time(&self) -> Option<Duration> {
        let n = u32::try_from(self.parts.len()).ok().filter(|n| *n > 0)?;
        Some(self.total_part_time() / n)
    }

    pub fn fastest_part(&self) -> Option<Duration> {
        self.parts.iter().map(|p| p.elapsed).min()
    }

    pub fn slowest_part(&self) -> Option<Duration> {
        self.parts.iter().map(|p| p.elapsed).max()
    }

    /// Part loop plus complete call.
    pub fn total_time(&self) -> Duration {
        self.upload_time + self.complete_time.unwrap_or_default()
    }

    /// Retry errors of every part and of the complete call.
    pub fn all_retry_errors(&self) -> impl Iterator<Item = &String> {
        self.parts
            .iter()
            .flat_map(|p| p.retry_errors.iter())
            .chain(self.retry_errors.iter())
    }
}

/// Summary of a finished upload session.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionResult {
    pub session_id: Uuid,
    pub target_url: String,
    pub started_at: DateTime<Utc>,
    #[serde(rename = "elapsedMs", with = "duration_ms")]
    pub elapsed: Duration,
    pub state: SessionState,
    pub files: Vec<FileResult>,
    /// Errors not tied to one file (the initiate call).
    pub errors: Vec<String>,
    pub retry_errors: Vec<String>,
    pub total_files: usize,
    /// Files that were fully uploaded and committed.
    pub finished_files: usize,
    pub failed_files: usize,
    pub cancelled_files: usize,
    /// Bytes of the finished files.
    pub total_size: u64,
    pub average_file_size: u64,
    #[serde(rename = "averageFileUploadTimeMs", with = "duration_ms")]
    pub average_file_upload_time: Duration,
    #[serde(rename = "averageCompleteTimeMs", with = "duration_ms")]
    pub average_complete_time: Duration,
    #[serde(
        rename = "ninetyPercentileTotalMs",
        with = "duration_ms::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub ninety_percentile_total: Option<Duration>,
}

impl SessionResult {
    pub fn is_success(&self) -> bool {
        self.errors.is_empty() && self.files.iter().all(FileResult::is_success)
    }

    pub fn has_failures(&self) -> bool {
        self.failed_files > 0 || (!self.errors.is_empty() && self.state == SessionState::Failed)
    }
}

/// `round(n * 0.9) - 1` into the ascending totals.
pub fn ninety_percentile(mut totals: Vec<Duration>) -> Option<Duration> {
    if totals.is_empty() {
        return None;
    }
    totals.sort_unstable();
    let rank = ((totals.len() as f64) * 0.9).round() as usize;
    let index = rank.saturating_sub(1).min(totals.len() - 1);
    Some(totals[index])
}

struct AggregatorInner {
    files: Vec<FileResult>,
    errors: Vec<String>,
    retry_errors: Vec<String>,
}

/// Collects outcomes from concurrent file tasks.
///
/// Files are addressed by their position in the session's input list.
pub struct ResultAggregator {
    inner: Mutex<AggregatorInner>,
}

impl ResultAggregator {
    pub fn new(targets: &[TargetFile]) -> Self {
        Self {
            inner: Mutex::new(AggregatorInner {
                files: targets
                    .iter()
                    .map(|t| FileResult::new(t.name.clone(), t.size))
                    .collect(),
                errors: Vec::new(),
                retry_errors: Vec::new(),
            }),
        }
    }

    fn with_file(&self, idx: usize, f: impl FnOnce(&mut FileResult)) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(file) = inner.files.get_mut(idx) {
            f(file);
        }
    }

    pub fn set_mime_type(&self, idx: usize, mime_type: &str) {
        self.with_file(idx, |f| f.mime_type = mime_type.to_string());
    }

    pub fn set_status(&self, idx: usize, status: FileStatus) {
        self.with_file(idx, |f| f.status = status);
    }

    pub fn status(&self, idx: usize) -> Option<FileStatus> {
        self.inner.lock().unwrap().files.get(idx).map(|f| f.status)
    }

    pub fn record_part(&self, idx: usize, part: PartResult) {
        self.with_file(idx, |f| f.parts.push(part));
    }

    pub fn record_file_error(&self, idx: usize, error: impl Into<String>) {
        let error = error.into();
        self.with_file(idx, |f| f.errors.push(error));
    }

    pub fn add_retry_errors(&self, idx: usize, errors: Vec<String>) {
        self.with_file(idx, |f| f.retry_errors.extend(errors));
    }

    pub fn set_upload_time(&self, idx: usize, elapsed: Duration) {
        self.with_file(idx, |f| f.upload_time = elapsed);
    }

    pub fn set_complete_time(&self, idx: usize, elapsed: Duration) {
        self.with_file(idx, |f| f.complete_time = Some(elapsed));
    }

    pub fn record_session_error(&self, error: impl Into<String>) {
        self.inner.lock().unwrap().errors.push(error.into());
    }

    pub fn add_session_retry_errors(&self, errors: Vec<String>) {
        self.inner.lock().unwrap().retry_errors.extend(errors);
    }

    /// Snapshot of one file's result.
    pub fn file(&self, idx: usize) -> Option<FileResult> {
        self.inner.lock().unwrap().files.get(idx).cloned()
    }

    /// Errors recorded so far for one file.
    pub fn file_errors(&self, idx: usize) -> Vec<String> {
        self.file(idx).map(|f| f.errors).unwrap_or_default()
    }

    /// Builds the session summary from everything recorded.
    pub fn finish(
        &self,
        session_id: Uuid,
        target_url: &str,
        started_at: DateTime<Utc>,
        elapsed: Duration,
        state: SessionState,
    ) -> SessionResult {
        let inner = self.inner.lock().unwrap();
        let files = inner.files.clone();

        let finished: Vec<&FileResult> = files.iter().filter(|f| f.is_success()).collect();
        let n = finished.len();
        let total_size: u64 = finished.iter().map(|f| f.file_size).sum();
        let upload_sum: Duration = finished.iter().map(|f| f.upload_time).sum();
        let complete_sum: Duration = finished
            .iter()
            .map(|f| f.complete_time.unwrap_or_default())
            .sum();
        let divisor = u32::try_from(n).unwrap_or(u32::MAX).max(1);

        let mut retry_errors = inner.retry_errors.clone();
        for file in &files {
            retry_errors.extend(file.all_retry_errors().cloned());
        }

        SessionResult {
            session_id,
            target_url: target_url.to_string(),
            started_at,
            elapsed,
            state,
            total_files: files.len(),
            finished_files: n,
            failed_files: files
                .iter()
                .filter(|f| !f.is_success() && !f.cancelled())
                .count(),
            cancelled_files: files.iter().filter(|f| f.cancelled()).count(),
            total_size,
            average_file_size: total_size / (n.max(1) as u64),
            average_file_upload_time: upload_sum / divisor,
            average_complete_time: complete_sum / divisor,
            ninety_percentile_total: ninety_percentile(
                finished.iter().map(|f| f.total_time()).collect(),
            ),
            errors: inner.errors.clone(),
            retry_errors,
            files,
        }
    }
}

/// Serializes durations as whole milliseconds.
mod duration_ms {
    use std::time::Duration;

    use serde::Serializer;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub mod option {
        use std::time::Duration;

        use serde::Serializer;

        pub fn serialize<S: Serializer>(d: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
            match d {
                Some(d) => s.serialize_some(&(d.as_millis() as u64)),
                None => s.serialize_none(),
            }
        }
    }
}
