//! Upload session: initiate, per-file sequential part transfer, complete.
//!
//! Files run as tasks on an [`UploadScheduler`]; each task drives one
//! file's state machine to a terminal [`FileStatus`]. Every network
//! operation is retried per [`RetryPolicy`](crate::RetryPolicy) and
//! registered with the [`CancellationRegistry`] while in flight.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use assetpush_protocol::{
    CompleteUploadRequest, InitiateUploadRequest, InitiateUploadResponse, Url, folder_path,
    initiate_url, parse_target, resolve_uri,
};
use assetpush_transfer::{Part, TargetFile, ThroughputMeter, plan_parts};
use chrono::Utc;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::cancel::{CancelHandle, CancellationRegistry, OpTag, TokenScope};
use crate::error::UploadError;
use crate::http::ReqwestTransport;
use crate::options::UploadOptions;
use crate::results::{PartResult, ResultAggregator, SessionResult};
use crate::retry::Attempted;
use crate::scheduler::UploadScheduler;
use crate::transport::{HttpRequest, HttpTransport};
use crate::types::{FileStatus, InitiatedFile, SessionState, UploadEvent};

/// Runs one upload session against an [`HttpTransport`].
///
/// A coordinator is single-use: the second call to [`upload`](Self::upload)
/// is rejected.
pub struct TransferCoordinator {
    transport: Arc<dyn HttpTransport>,
    options: UploadOptions,
    registry: Arc<CancellationRegistry>,
    events_tx: mpsc::UnboundedSender<UploadEvent>,
    events_rx: Option<mpsc::UnboundedReceiver<UploadEvent>>,
    state: Mutex<SessionState>,
    started: AtomicBool,
}

impl TransferCoordinator {
    pub fn new(transport: Arc<dyn HttpTransport>, options: UploadOptions) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            transport,
            options,
            registry: Arc::new(CancellationRegistry::new()),
            events_tx,
            events_rx: Some(events_rx),
            state: Mutex::new(SessionState::Idle),
            started: AtomicBool::new(false),
        }
    }

    /// Creates a coordinator over a default [`ReqwestTransport`].
    pub fn with_reqwest(options: UploadOptions) -> Result<Self, UploadError> {
        Ok(Self::new(Arc::new(ReqwestTransport::new()?), options))
    }

    /// Takes the event receiver. Can only be called once.
    pub fn take_events(&mut self) -> Option<mpsc::UnboundedReceiver<UploadEvent>> {
        self.events_rx.take()
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle::new(Arc::clone(&self.registry))
    }

    pub fn state(&self) -> SessionState {
        *self.state.lock().unwrap()
    }

    pub fn options(&self) -> &UploadOptions {
        &self.options
    }

    fn set_state(&self, state: SessionState) {
        *self.state.lock().unwrap() = state;
    }

    /// Uploads `files` into the target folder.
    ///
    /// Returns `Err` only for invalid input or a failed initiate call.
    /// File-level failures and cancellation are reported in the summary.
    pub async fn upload(&self, files: Vec<TargetFile>) -> Result<SessionResult, UploadError> {
        if self.started.swap(true, Ordering::AcqRel) {
            return Err(UploadError::InvalidConfig(
                "upload session already started".into(),
            ));
        }
        self.options.validate()?;
        validate_files(&files)?;

        let session_id = Uuid::new_v4();
        let started_at = Utc::now();
        let clock = Instant::now();
        let target_url = self.options.target_url.clone();
        let target = parse_target(&target_url)?;
        info!(
            session = %session_id,
            files = files.len(),
            target = %target_url,
            concurrency = self.options.effective_concurrency(),
            "starting upload session"
        );

        let ctx = Arc::new(SessionContext {
            transport: Arc::clone(&self.transport),
            options: self.options.clone(),
            registry: Arc::clone(&self.registry),
            results: ResultAggregator::new(&files),
            events: self.events_tx.clone(),
            target,
        });

        // 1. Initiate
        self.set_state(SessionState::Initiating);
        let attempted = ctx.initiate(&files).await;
        ctx.results.add_session_retry_errors(attempted.retry_errors);

        let response = match attempted.result {
            Ok(response) => response,
            Err(UploadError::Cancelled) => {
                info!(session = %session_id, "session cancelled during initiate");
                for (index, file) in files.iter().enumerate() {
                    ctx.mark_cancelled(index, &file.name);
                }
                self.set_state(SessionState::Cancelled);
                return Ok(ctx.results.finish(
                    session_id,
                    &target_url,
                    started_at,
                    clock.elapsed(),
                    SessionState::Cancelled,
                ));
            }
            Err(e) => return Err(self.fail_session(&ctx, e.to_string())),
        };

        if response.files.len() != files.len() {
            return Err(self.fail_session(
                &ctx,
                format!(
                    "server returned {} file entries for {} files",
                    response.files.len(),
                    files.len()
                ),
            ));
        }

        // 2. Transfer and complete, one task per file.
        let names: Vec<String> = files.iter().map(|f| f.name.clone()).collect();
        let session_complete_uri = response.complete_uri.as_deref();
        let jobs: Vec<FileJob> = files
            .into_iter()
            .zip(response.files.iter().cloned())
            .enumerate()
            .map(|(index, (target, entry))| {
                let initiated = InitiatedFile::from_entry(entry, session_complete_uri);
                ctx.results.set_mime_type(index, &initiated.mime_type);
                FileJob {
                    index,
                    target,
                    initiated,
                }
            })
            .collect();

        self.set_state(SessionState::Transferring);
        let scheduler = UploadScheduler::new(self.options.effective_concurrency());
        let worker_ctx = Arc::clone(&ctx);
        let outcomes = scheduler
            .run_batch(jobs, move |job: FileJob| {
                let ctx = Arc::clone(&worker_ctx);
                async move { Ok::<FileStatus, UploadError>(ctx.upload_file(job).await) }
            })
            .await;

        for (index, outcome) in outcomes.into_iter().enumerate() {
            let Err(e) = outcome else { continue };
            ctx.results.record_file_error(index, format!("file {e}"));
            let settled = ctx.results.status(index).is_some_and(FileStatus::is_terminal);
            if !settled {
                ctx.mark_failed(index, &names[index], FileStatus::PartFailed);
            }
        }

        let state = if self.registry.is_session_cancelled() {
            SessionState::Cancelled
        } else {
            SessionState::Completed
        };
        self.set_state(state);

        let summary = ctx
            .results
            .finish(session_id, &target_url, started_at, clock.elapsed(), state);
        info!(
            session = %session_id,
            state = ?state,
            finished = summary.finished_files,
            failed = summary.failed_files,
            cancelled = summary.cancelled_files,
            elapsed_ms = summary.elapsed.as_millis() as u64,
            "upload session finished"
        );
        Ok(summary)
    }

    fn fail_session(&self, ctx: &SessionContext, reason: String) -> UploadError {
        let err = UploadError::Initiation(reason);
        error!(error = %err, "upload session failed");
        ctx.results.record_session_error(err.to_string());
        self.set_state(SessionState::Failed);
        err
    }
}

fn validate_files(files: &[TargetFile]) -> Result<(), UploadError> {
    if files.is_empty() {
        return Err(UploadError::InvalidConfig("no files to upload".into()));
    }
    let mut seen = HashSet::new();
    for file in files {
        if file.name.is_empty() {
            return Err(UploadError::InvalidConfig("file name is empty".into()));
        }
        if !seen.insert(file.name.as_str()) {
            return Err(UploadError::InvalidConfig(format!(
                "duplicate file name: {}",
                file.name
            )));
        }
    }
    Ok(())
}

struct FileJob {
    index: usize,
    target: TargetFile,
    initiated: InitiatedFile,
}

/// State shared by every file task of one session.
struct SessionContext {
    transport: Arc<dyn HttpTransport>,
    options: UploadOptions,
    registry: Arc<CancellationRegistry>,
    results: ResultAggregator,
    events: mpsc::UnboundedSender<UploadEvent>,
    target: Url,
}

impl SessionContext {
    fn emit(&self, event: UploadEvent) {
        let _ = self.events.send(event);
    }

    fn request(&self, request: HttpRequest) -> HttpRequest {
        request.with_headers(&self.options.headers)
    }

    async fn initiate(&self, files: &[TargetFile]) -> Attempted<InitiateUploadResponse> {
        let guard = self.registry.guard(TokenScope::Session, OpTag::Initiate);
        let form = InitiateUploadRequest {
            path: folder_path(&self.target).to_string(),
            files: files.iter().map(|f| (f.name.clone(), f.size)).collect(),
        }
        .to_form();
        let request = self.request(HttpRequest::post_form(
            initiate_url(&self.target).to_string(),
            form,
        ));

        debug!(url = %request.url, files = files.len(), "initiating upload");
        self.options
            .retry
            .run(guard.token(), self.options.request_timeout, "initiate", || {
                let request = request.clone();
                async move {
                    let resp = self.transport.send(request).await?.error_for_status()?;
                    Ok::<_, UploadError>(InitiateUploadResponse::from_slice(&resp.body)?)
                }
            })
            .await
    }

    async fn upload_file(&self, job: FileJob) -> FileStatus {
        let FileJob {
            index,
            target,
            initiated,
        } = job;
        let name = target.name.as_str();

        if self.registry.is_cancelled(name) {
            return self.mark_cancelled(index, name);
        }

        let parts = match plan_parts(
            target.size,
            initiated.min_part_size,
            initiated.max_part_size,
            &initiated.part_urls,
        ) {
            Ok(parts) => parts,
            Err(e) => {
                let err = UploadError::from(e);
                error!(file = %name, error = %err, "cannot plan parts");
                self.results.record_file_error(index, err.to_string());
                return self.mark_failed(index, name, FileStatus::InvalidPlan);
            }
        };

        self.results.set_status(index, FileStatus::PartsUploading);
        self.emit(UploadEvent::FileStart {
            file_name: name.to_string(),
            file_size: target.size,
        });
        info!(file = %name, size = target.size, parts = parts.len(), "uploading file");

        let meter = ThroughputMeter::default();
        let clock = Instant::now();
        let mut transferred = 0u64;

        for part in &parts {
            if self.registry.is_cancelled(name) {
                self.results.set_upload_time(index, clock.elapsed());
                return self.mark_cancelled(index, name);
            }
            // Clamped surplus part; a zero-byte file still sends part 0.
            if part.is_empty() && part.index > 0 {
                debug!(file = %name, part = part.index, "skipping empty trailing part");
                continue;
            }

            let part_clock = Instant::now();
            let outcome = self.put_part(&target, part).await;
            let record =
                PartResult::new(part, part_clock.elapsed()).with_retry_errors(outcome.retry_errors);

            match outcome.result {
                Ok(()) => {
                    self.results.record_part(index, record);
                    transferred += part.len();
                    meter.record(part.len());
                    debug!(
                        file = %name,
                        part = part.index,
                        bytes = part.len(),
                        attempts = outcome.attempts,
                        "part uploaded"
                    );
                    self.emit(UploadEvent::FileProgress {
                        file_name: name.to_string(),
                        file_size: target.size,
                        transferred,
                        offset: part.end,
                        bytes_per_second: meter.bytes_per_second(),
                    });
                }
                Err(UploadError::Cancelled) => {
                    self.results
                        .record_part(index, record.with_error(UploadError::Cancelled.to_string()));
                    self.results.set_upload_time(index, clock.elapsed());
                    return self.mark_cancelled(index, name);
                }
                Err(e) => {
                    self.results.record_part(index, record.with_error(e.to_string()));
                    self.results.set_upload_time(index, clock.elapsed());
                    let err = UploadError::PartTransfer {
                        index: part.index,
                        reason: e.to_string(),
                    };
                    error!(file = %name, error = %err, "part upload failed");
                    self.results.record_file_error(index, err.to_string());
                    return self.mark_failed(index, name, FileStatus::PartFailed);
                }
            }
        }

        self.results.set_upload_time(index, clock.elapsed());
        self.results.set_status(index, FileStatus::AllPartsOk);
        if self.registry.is_cancelled(name) {
            return self.mark_cancelled(index, name);
        }

        self.results.set_status(index, FileStatus::Completing);
        let complete_clock = Instant::now();
        let outcome = self.complete(&initiated).await;
        self.results.set_complete_time(index, complete_clock.elapsed());
        self.results.add_retry_errors(index, outcome.retry_errors);

        match outcome.result {
            Ok(()) => {
                self.results.set_status(index, FileStatus::Done);
                info!(
                    file = %name,
                    elapsed_ms = clock.elapsed().as_millis() as u64,
                    "file uploaded"
                );
                self.emit(UploadEvent::FileEnd {
                    file_name: name.to_string(),
                    file_size: target.size,
                    elapsed_ms: clock.elapsed().as_millis() as u64,
                });
                FileStatus::Done
            }
            Err(UploadError::Cancelled) => self.mark_cancelled(index, name),
            Err(e) => {
                let err = if matches!(e, UploadError::Complete(_)) {
                    e
                } else {
                    UploadError::Complete(e.to_string())
                };
                error!(file = %name, error = %err, "complete failed");
                self.results.record_file_error(index, err.to_string());
                self.mark_failed(index, name, FileStatus::CompleteFailed)
            }
        }
    }

    async fn put_part(&self, target: &TargetFile, part: &Part) -> Attempted<()> {
        let guard = self.registry.guard(
            TokenScope::File(target.name.clone()),
            OpTag::Part(part.index),
        );
        let data = match target.read_part(part).await {
            Ok(data) => data,
            Err(e) => {
                return Attempted {
                    result: Err(e.into()),
                    retry_errors: Vec::new(),
                    attempts: 0,
                };
            }
        };

        let mut request = self.request(HttpRequest::put_bytes(part.url.clone(), data));
        if self.options.explicit_content_length {
            request = request.with_header("Content-Length", part.len().to_string());
        }

        self.options
            .retry
            .run(guard.token(), self.options.request_timeout, "put", || {
                let request = request.clone();
                async move {
                    self.transport.send(request).await?.error_for_status()?;
                    Ok::<(), UploadError>(())
                }
            })
            .await
    }

    async fn complete(&self, initiated: &InitiatedFile) -> Attempted<()> {
        let url = match initiated.complete_uri.as_deref() {
            Some(uri) => resolve_uri(&self.target, uri).map_err(UploadError::from),
            None => Err(UploadError::Complete("server issued no complete URI".into())),
        };
        let url = match url {
            Ok(url) => url,
            Err(e) => {
                return Attempted {
                    result: Err(e),
                    retry_errors: Vec::new(),
                    attempts: 0,
                };
            }
        };
        let guard = self.registry.guard(
            TokenScope::File(initiated.file_name.clone()),
            OpTag::Complete,
        );
        let form = CompleteUploadRequest {
            file_name: initiated.file_name.clone(),
            mime_type: initiated.mime_type.clone(),
            upload_token: initiated.upload_token.clone(),
            version: self.options.version.clone(),
        }
        .to_form();
        let request = self.request(HttpRequest::post_form(url.to_string(), form));

        debug!(file = %initiated.file_name, url = %request.url, "completing upload");
        self.options
            .retry
            .run(guard.token(), self.options.request_timeout, "complete", || {
                let request = request.clone();
                async move {
                    self.transport.send(request).await?.error_for_status()?;
                    Ok::<(), UploadError>(())
                }
            })
            .await
    }

    fn mark_cancelled(&self, index: usize, name: &str) -> FileStatus {
        info!(file = %name, "file cancelled");
        self.results.set_status(index, FileStatus::FileCancelled);
        self.emit(UploadEvent::FileCancelled {
            file_name: name.to_string(),
        });
        FileStatus::FileCancelled
    }

    fn mark_failed(&self, index: usize, name: &str, status: FileStatus) -> FileStatus {
        self.results.set_status(index, status);
        self.emit(UploadEvent::FileError {
            file_name: name.to_string(),
            errors: self.results.file_errors(index),
        });
        status
    }
}
