//! Core run management.
//!
//! This module contains:
//! - Ledger: durable run and span persistence (JSONL or in-memory)
//! - Registry: resident runs and the session's active-run pointer

pub mod ledger;
pub mod registry;

// Re-export commonly used types
pub use ledger::{validate_run_id, validate_spans, JsonlLedger, LoadedRun, MemoryLedger, RunLedger};
pub use registry::{RunRegistry, Session};
