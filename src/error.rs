//! Error types for framepipe.

use crate::format::PixelFormat;
use thiserror::Error;

/// Result type alias using framepipe's Error.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for filter-chain operations.
///
/// Construction errors (`StageNotFound`, `StageOpenFailed`) abort chain
/// construction; the partially built chain is torn down before the error is
/// returned. Per-frame errors (`NoColorspace`, `ResolutionMismatch`,
/// `AllocationExhausted`, `UnsupportedAllocation`) abort the current frame
/// only and the chain may be reconfigured and retried.
#[derive(Error, Debug)]
pub enum Error {
    /// No stage with this name exists in the registry.
    #[error("no such video filter: {name}")]
    StageNotFound {
        /// The unresolved stage name.
        name: String,
    },

    /// A stage constructor or its argument parsing rejected the request.
    #[error("cannot open video filter {name}: {reason}")]
    StageOpenFailed {
        /// Name of the stage that failed to open.
        name: String,
        /// What the constructor or open hook reported.
        reason: String,
    },

    /// No stage in the remaining chain accepts a format, even with a
    /// conversion adapter inserted.
    #[error("cannot find matching colorspace for {format}")]
    NoColorspace {
        /// The format the chain was asked to carry.
        format: PixelFormat,
    },

    /// A constant-format stage was asked to reconfigure mid-stream.
    #[error(
        "resolution does not match in {stage}: configured {configured_width}x{configured_height}, \
         requested {requested_width}x{requested_height}"
    )]
    ResolutionMismatch {
        /// Name of the constant-format stage.
        stage: String,
        /// Width recorded at first configuration.
        configured_width: u32,
        /// Height recorded at first configuration.
        configured_height: u32,
        /// Width of the rejected request.
        requested_width: u32,
        /// Height of the rejected request.
        requested_height: u32,
    },

    /// The numbered buffer pool has no free slot left.
    #[error("ran out of numbered images; the filter before {stage} is broken")]
    AllocationExhausted {
        /// Stage whose pool was exhausted.
        stage: String,
    },

    /// The requested dimensions or format cannot be allocated.
    #[error("unsupported allocation: {reason}")]
    UnsupportedAllocation {
        /// Why the allocation is impossible.
        reason: String,
    },

    /// A consumer released a buffer more times than it was acquired.
    ///
    /// Callers clamp the count to zero, log this, and continue; it indicates
    /// a bug in a stage but must not stop playback.
    #[error("bad image usage count in {context} (released below zero)")]
    RefCountUnderflow {
        /// Where the extra release happened.
        context: String,
    },

    /// A chain specification string failed to parse.
    #[error("invalid chain spec: {0}")]
    InvalidSpec(String),

    /// The display sink reported a failure.
    #[error("sink error: {reason}")]
    Sink {
        /// What the sink reported.
        reason: String,
    },
}
