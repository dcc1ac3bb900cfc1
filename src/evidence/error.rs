//! Run and span store errors.

use thiserror::Error;

use crate::domain::Sid;

/// Errors from the run registry, span store and ledger.
///
/// All of these are immediate failures; nothing here is retried.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Run already exists: {0}")]
    DuplicateRun(String),

    #[error("No run found for run_id={0}")]
    RunNotFound(String),

    #[error("No active run. Call start_run first (or pass run_id)")]
    NoActiveRun,

    #[error("Invalid run_id {0:?} (use letters, digits, '-' or '_')")]
    InvalidRunId(String),

    #[error("Unknown span id: {0}")]
    SpanNotFound(String),

    #[error("Line range {start}..={end} is out of range: {reason}")]
    OutOfRange {
        start: usize,
        end: usize,
        reason: String,
    },

    #[error("File read not allowed: {path}: {reason}")]
    PathDenied { path: String, reason: String },

    #[error("No lines of {parent} matched pattern {pattern:?}")]
    NoMatch { parent: Sid, pattern: String },

    #[error("Span text is empty")]
    EmptySpan,

    #[error("Invalid pattern {pattern:?}: {reason}")]
    InvalidPattern { pattern: String, reason: String },

    #[error("Corrupt ledger for run {run_id}: {reason}")]
    CorruptLedger { run_id: String, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
