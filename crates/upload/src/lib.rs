//! Chunked upload orchestration.
//!
//! This crate implements the **business logic** of a direct binary upload
//! session. It has no opinion on argument parsing or logging sinks; the
//! HTTP layer sits behind [`HttpTransport`], with [`ReqwestTransport`] as
//! the production implementation.
//!
//! # Pipeline
//!
//! 1. **Initiate**: one call reserves part URLs for every file
//! 2. **Transfer**: each file's parts are PUT in ascending order
//! 3. **Complete**: the parts are committed as a stored asset
//!
//! Files run concurrently up to a ceiling, each operation is retried with
//! linear backoff, and any file or the whole session can be cancelled.

pub mod cancel;
pub mod coordinator;
pub mod error;
pub mod http;
pub mod options;
pub mod results;
pub mod retry;
pub mod scheduler;
pub mod transport;
pub mod types;

// Re-export primary types for convenience.
pub use cancel::{CancelHandle, CancellationRegistry, OpTag, TokenGuard, TokenScope};
pub use coordinator::TransferCoordinator;
pub use error::UploadError;
pub use http::ReqwestTransport;
pub use options::{RetryPolicy, UploadOptions};
pub use results::{FileResult, PartResult, ResultAggregator, SessionResult, ninety_percentile};
pub use retry::Attempted;
pub use scheduler::{Batch, SchedulerEvent, TaskError, UploadScheduler};
pub use transport::{HttpRequest, HttpResponse, HttpTransport, Method, RequestBody, TransportFuture};
pub use types::{FileStatus, InitiatedFile, SessionState, UploadEvent};
