//! spanproof - Evidence ledger and citation-grounded claim verification
//!
//! Evidence is recorded as immutable, sequentially numbered spans (`S0`,
//! `S1`, ...) inside a run. Answers that cite those spans are split into
//! claims, and every claim is scored against its evidence by an external
//! scoring oracle.
//!
//! # Modules
//!
//! - `domain`: Data structures (Span, Run, Claim, VerificationReport)
//! - `evidence`: The per-run span store, search index and distillation
//! - `core`: Ledger persistence, the run registry and the session
//! - `claims`: Claim splitting and citation parsing
//! - `verify`: The verifier engine, context selection and cancellation
//! - `adapters`: Scoring oracle interface and the command oracle
//! - `config`: Layered configuration
//! - `cli`: Command-line interface
//!
//! # Usage
//!
//! ```bash
//! run=$(spanproof start "What is the capital?" "Answer with citations")
//! spanproof add --run "$run" "Paris is the capital of France."
//! spanproof verify --run "$run" --oracle ./score.sh "Paris is the capital [S2]."
//! ```

pub mod adapters;
pub mod claims;
pub mod cli;
pub mod config;
pub mod core;
pub mod domain;
pub mod evidence;
pub mod verify;

// Re-export main types at crate root for convenience
pub use adapters::{CommandOracle, OracleError, OracleScore, ScoreRequest, ScoringOracle};
pub use core::{JsonlLedger, MemoryLedger, RunLedger, RunRegistry, Session};
pub use domain::{
    Claim, EvidenceText, Run, RunStatus, Sid, Span, StepResult, Verdict, VerificationReport,
};
pub use evidence::{SpanStore, StoreError};
pub use verify::{AuditRequest, DetectRequest, TraceStep, Verifier, VerifyError, VerifyOptions};
