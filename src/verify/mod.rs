//! Claim verification against evidence.
//!
//! - `orchestrator`: the [`Verifier`] engine and its request types
//! - `context`: which spans the oracle sees and how they are rendered
//! - `cancel`: cancellation tokens for in-flight requests

pub mod cancel;
pub mod context;
pub mod error;
pub mod orchestrator;

pub use cancel::{cancel_pair, CancelHandle, CancelToken};
pub use context::{render_context, select_context, span_kind, ContextMode, SpanKind};
pub use error::VerifyError;
pub use orchestrator::{
    AuditRequest, ClaimOverflow, DetectRequest, TraceStep, Verifier, VerifierSettings,
    VerifyOptions, DEFAULT_MAX_CONCURRENCY, DEFAULT_ORACLE_TIMEOUT, DEFAULT_TARGET,
};

pub use crate::domain::EvidenceText;
