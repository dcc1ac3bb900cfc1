//! Evidence ledger: spans, search and derivation.
//!
//! # Design Principles
//!
//! - **Append-only**: spans are never edited or deleted; sids strictly increase.
//! - **Hash verification**: each span carries a sha256 digest of its text, checked on load.
//! - **Provenance**: distilled spans record the span they were derived from.
//!
//! # Example
//!
//! ```ignore
//! use spanproof::evidence::{DistillOptions, SpanStore};
//!
//! let span = store.add_span("p95 latency is 120ms", Some("bench".into()), None)?;
//! let hits = store.search_spans("latency", None);
//! let errors = store.distill_regex(span.sid, "error", DistillOptions::default())?;
//! ```

pub mod distill;
pub mod error;
pub mod files;
pub mod index;
pub mod store;

pub use distill::{matching_lines, DistillOptions, LineMatcher, RegexMatcher};
pub use error::StoreError;
pub use files::{default_denylist, FsPolicy, LocalFsPolicy, PathDecision};
pub use index::{tokenize, SpanIndex};
pub use store::{SearchHit, SpanStore, DEFAULT_LIST_LIMIT, DEFAULT_SEARCH_LIMIT};
