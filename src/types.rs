//! Error types shared across the tuner.

use thiserror::Error;

/// Crate-level error.
#[derive(Debug, Error)]
pub enum TuneError {
    #[error("invalid dimension {index}: {reason}")]
    InvalidDimension { index: usize, reason: String },
    #[error("invalid bucket: {0}")]
    InvalidBucket(String),
    #[error("shape {shape:?} does not match program {program}: {reason}")]
    ShapeMismatch {
        program: String,
        shape: Vec<i64>,
        reason: String,
    },
    #[error("unknown schedule config policy: {0}")]
    UnknownPolicy(String),
    #[error("invalid search space: {0}")]
    InvalidSearchSpace(String),
    #[error("no viable configuration found after {evaluated} evaluations")]
    NoViableConfig { evaluated: usize },
    #[error("invalid config: {0}")]
    InvalidConfig(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

pub type TuneResult<T> = Result<T, TuneError>;

/// Failure reported by a compile-and-measure oracle for one sampled shape.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum MeasureError {
    #[error("compilation failed: {0}")]
    CompileFailed(String),
    #[error("out of resource: {resource} needs {needed}, limit {limit}")]
    OutOfResource {
        resource: &'static str,
        needed: usize,
        limit: usize,
    },
    #[error("execution failed: {0}")]
    ExecutionFailed(String),
}
