//! Domain types for spanproof.
//!
//! This module contains the core data structures:
//! - Span: Immutable evidence with a sequential id
//! - Run: Problem statement + deliverable anchor
//! - Verification: Claims, verdicts, reports

pub mod run;
pub mod span;
pub mod verification;

// Re-export commonly used types
pub use run::{generate_run_id, Run, RunStatus};
pub use span::{compute_digest, preview, ParseSidError, Sid, Span, SpanMeta, SpanSummary};
pub use verification::{
    Claim, EvidenceText, ReportSummary, StepResult, UnresolvedCitation, VerificationReport, Verdict,
};
