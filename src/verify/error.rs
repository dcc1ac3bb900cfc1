use thiserror::Error;

use crate::evidence::StoreError;

/// Request-level verification failures.
///
/// Oracle failures for single claims are not errors here; they become
/// `error` verdicts in the report unless every claim failed.
#[derive(Debug, Error)]
pub enum VerifyError {
    #[error("No spans provided (cannot verify citations)")]
    NoEvidence,

    #[error("Unknown span cited: {0}")]
    UnknownSpan(String),

    #[error("Answer has {count} claims, more than max_claims={max}")]
    TooManyClaims { count: usize, max: usize },

    #[error("Invalid target {0}: must be within [0, 1]")]
    InvalidTarget(f64),

    #[error("Invalid step {idx}: {reason}")]
    InvalidStep { idx: usize, reason: String },

    #[error("All {count} claims failed to score (last error: {last_error})")]
    AllClaimsFailed { count: usize, last_error: String },

    #[error("Verification cancelled")]
    Cancelled,

    #[error(transparent)]
    Store(#[from] StoreError),
}
