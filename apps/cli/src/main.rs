//! assetpush entry point.
//!
//! Usage: `assetpush [CONFIG]`. Without an argument the job file is read
//! from the default config path.

mod config;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use assetpush_transfer::TargetFile;
use assetpush_upload::{ReqwestTransport, TransferCoordinator, UploadEvent};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::config::CliConfig;

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    // Initialize structured logging.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), "starting assetpush");

    let path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(config::default_config_path);
    let config = CliConfig::load(&path)?;
    info!(path = %path.display(), files = config.files.len(), "configuration loaded");

    let mut targets = Vec::with_capacity(config.files.len());
    for file in &config.files {
        let target = TargetFile::from_path(file)
            .await
            .with_context(|| format!("cannot upload {}", file.display()))?;
        targets.push(target);
    }

    let transport = Arc::new(ReqwestTransport::new()?);
    let mut coordinator = TransferCoordinator::new(transport, config.to_options());

    let logger = coordinator.take_events().map(|mut rx| {
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                log_event(&event);
            }
        })
    });

    let cancel = coordinator.cancel_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, cancelling upload");
            cancel.cancel_all();
        }
    });

    let summary = coordinator.upload(targets).await?;

    // Closes the event channel so the logger drains and exits.
    drop(coordinator);
    if let Some(logger) = logger {
        let _ = logger.await;
    }

    println!("{}", serde_json::to_string_pretty(&summary)?);

    if summary.has_failures() {
        error!(failed = summary.failed_files, "upload finished with failures");
        Ok(ExitCode::FAILURE)
    } else {
        Ok(ExitCode::SUCCESS)
    }
}

fn log_event(event: &UploadEvent) {
    match event {
        UploadEvent::FileStart {
            file_name,
            file_size,
        } => info!(file = %file_name, size = file_size, "upload started"),
        UploadEvent::FileProgress {
            file_name,
            file_size,
            transferred,
            bytes_per_second,
            ..
        } => info!(
            file = %file_name,
            percent = %format!("{:.1}", percent(*transferred, *file_size)),
            rate = %format_rate(*bytes_per_second),
            "upload progress"
        ),
        UploadEvent::FileEnd {
            file_name,
            elapsed_ms,
            ..
        } => info!(file = %file_name, elapsed_ms, "upload finished"),
        UploadEvent::FileError { file_name, errors } => {
            error!(file = %file_name, errors = ?errors, "upload failed")
        }
        UploadEvent::FileCancelled { file_name } => warn!(file = %file_name, "upload cancelled"),
    }
}

fn percent(transferred: u64, total: u64) -> f64 {
    if total == 0 {
        100.0
    } else {
        transferred as f64 * 100.0 / total as f64
    }
}

fn format_rate(bytes_per_second: f64) -> String {
    const UNITS: [&str; 4] = ["B/s", "KiB/s", "MiB/s", "GiB/s"];
    let mut value = bytes_per_second;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{value:.1} {}", UNITS[unit])
}
