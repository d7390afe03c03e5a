//! Structured diagnostics for the codec.
//!
//! Only two of the four diagnostic kinds in the specification are modeled
//! as `Result::Err` — `NoSignal` and `LowConfidence` are normal `Ok` values
//! carried on the relevant outcome types (see [`crate::locker::LockOutcome`]
//! and [`crate::correlator::OffsetReport::mean_confidence`]).

use thiserror::Error;

/// Errors returned by fallible entry points of the codec.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Caller-supplied buffers are inconsistent with the operation requested:
    /// sample counts not aligned to expected phase boundaries, frame
    /// dimensions that don't match `FormatParameters`, or an empty buffer
    /// passed where a non-empty one is required.
    #[error("malformed input: {0}")]
    MalformedInput(String),

    /// An internal arithmetic invariant was violated — checksum
    /// recomputation disagreeing with itself, a bit index out of range, or
    /// negative phase-length arithmetic. These indicate a bug in this
    /// crate, not a caller mistake.
    #[error("internal invariant violated: {0}")]
    InternalInvariantViolation(String),
}

pub type CoreResult<T> = Result<T, CoreError>;
