use std::io;

use thiserror::Error;

/// Errors surfaced by the benchmark engine and its front ends.
///
/// A cooperative stop is not an error; see [`crate::driver::RunOutcome`].
#[derive(Debug, Error)]
pub enum BenchError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("a benchmark run is already active")]
    Busy,

    #[error("benchmark run failed: {0}")]
    RuntimeFault(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Faults raised inside one kernel pass.
///
/// The driver converts these into [`BenchError::RuntimeFault`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum KernelFault {
    #[error("array index {index} out of range")]
    IndexOutOfRange { index: i64 },

    #[error("integer overflow in {0}")]
    Overflow(&'static str),

    #[error("division by zero in {0}")]
    DivisionByZero(&'static str),

    #[error("no global record is linked")]
    MissingRecord,

    #[error("local enumeration read before assignment in proc2")]
    UnassignedEnum,

    #[error("string comparison in func2 cannot make progress")]
    StalledComparison,
}

pub type Result<T> = std::result::Result<T, BenchError>;
