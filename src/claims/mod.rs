//! Turning answers into claims.
//!
//! - `splitter`: sentence/line claim boundaries
//! - `citations`: `[S2]`-style markers, attached to claims and resolved to sids

pub mod citations;
pub mod splitter;

pub use citations::{resolve_marker, BracketCitations, CitationParser, CitedUnit, ParsedAnswer};
pub use splitter::{ClaimSplitter, Claims, SplitMode};
