//! Chunked transfer primitives: part planning, byte-range sources and
//! throughput tracking.

mod parts;
mod progress;
mod source;
mod types;

pub use parts::{part_size, plan_parts};
pub use progress::ThroughputMeter;
pub use source::ByteSource;
pub use types::{Part, TargetFile};

/// Errors produced by the transfer crate.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid part plan: {0}")]
    InvalidPartPlan(String),

    #[error("range {start}..{end} out of bounds for {size} bytes")]
    RangeOutOfBounds { start: u64, end: u64, size: u64 },
}
