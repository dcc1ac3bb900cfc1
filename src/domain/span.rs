//! Evidence spans.
//!
//! A span is an immutable unit of evidence text. Spans are identified by a
//! [`Sid`] that is assigned sequentially within a run and never reused.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Free-form span metadata
pub type SpanMeta = BTreeMap<String, serde_json::Value>;

/// Stable span identifier, rendered as `S0`, `S1`, ...
///
/// Ordering is numeric, so `S9 < S10`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Sid(u64);

impl Sid {
    /// Sid of the problem statement anchor
    pub const PROBLEM: Sid = Sid(0);

    /// Sid of the deliverable anchor
    pub const DELIVERABLE: Sid = Sid(1);

    pub fn new(n: u64) -> Self {
        Self(n)
    }

    /// Sequence number of this sid
    pub fn index(self) -> u64 {
        self.0
    }

    /// The sid allocated right after this one
    pub fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for Sid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "S{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Invalid span id: {0:?} (expected S<number>)")]
pub struct ParseSidError(pub String);

impl FromStr for Sid {
    type Err = ParseSidError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        trimmed
            .strip_prefix('S')
            .filter(|digits| !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()))
            .and_then(|digits| digits.parse::<u64>().ok())
            .map(Sid)
            .ok_or_else(|| ParseSidError(s.to_string()))
    }
}

impl TryFrom<String> for Sid {
    type Error = ParseSidError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Sid> for String {
    fn from(sid: Sid) -> Self {
        sid.to_string()
    }
}

/// A unit of evidence
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Span {
    /// Identifier, unique within the run
    pub sid: Sid,

    /// Run this span belongs to
    pub run_id: String,

    /// Evidence text (immutable)
    pub text: String,

    /// Free-form origin label ("manual", "file", "distill", ...)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,

    /// Caller metadata
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub meta: SpanMeta,

    /// When the span was appended
    pub created_at: DateTime<Utc>,

    /// Parent span for derived (distilled) spans
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_sid: Option<Sid>,

    /// SHA256 of the text ("sha256:<hex>")
    pub digest: String,
}

impl Span {
    pub fn new(
        run_id: impl Into<String>,
        sid: Sid,
        text: String,
        source: Option<String>,
        meta: SpanMeta,
        parent_sid: Option<Sid>,
    ) -> Self {
        let digest = compute_digest(text.as_bytes());
        Self {
            sid,
            run_id: run_id.into(),
            text,
            source,
            meta,
            created_at: Utc::now(),
            parent_sid,
            digest,
        }
    }

    /// Whether the stored digest still matches the text
    pub fn verify_digest(&self) -> bool {
        compute_digest(self.text.as_bytes()) == self.digest
    }

    /// Metadata-only view of this span
    pub fn summary(&self) -> SpanSummary {
        SpanSummary {
            sid: self.sid,
            source: self.source.clone(),
            chars: self.text.chars().count(),
            created_at: self.created_at,
            preview: preview(&self.text, 160),
            parent_sid: self.parent_sid,
        }
    }
}

/// Span listing entry (no full text)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpanSummary {
    pub sid: Sid,
    pub source: Option<String>,
    pub chars: usize,
    pub created_at: DateTime<Utc>,
    pub preview: String,
    pub parent_sid: Option<Sid>,
}

/// Compute the SHA256 digest of bytes as "sha256:<hex>"
pub fn compute_digest(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("sha256:{}", hex::encode(hasher.finalize()))
}

/// Single-line preview of at most `max_chars` characters
pub fn preview(text: &str, max_chars: usize) -> String {
    text.trim()
        .replace('\n', " ")
        .chars()
        .take(max_chars)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sid_display_and_parse() {
        assert_eq!(Sid::new(12).to_string(), "S12");
        assert_eq!("S12".parse::<Sid>().unwrap(), Sid::new(12));
        assert_eq!(" S3 ".parse::<Sid>().unwrap(), Sid::new(3));
        assert!("12".parse::<Sid>().is_err());
        assert!("S".parse::<Sid>().is_err());
        assert!("S1a".parse::<Sid>().is_err());
    }

    #[test]
    fn test_sid_orders_numerically() {
        let mut sids: Vec<Sid> = ["S10", "S2", "S9"].iter().map(|s| s.parse().unwrap()).collect();
        sids.sort();
        assert_eq!(sids, vec![Sid::new(2), Sid::new(9), Sid::new(10)]);
    }

    #[test]
    fn test_sid_serializes_as_string() {
        let json = serde_json::to_string(&Sid::new(4)).unwrap();
        assert_eq!(json, "\"S4\"");
        let parsed: Sid = serde_json::from_str("\"S4\"").unwrap();
        assert_eq!(parsed, Sid::new(4));
        assert!(serde_json::from_str::<Sid>("\"X4\"").is_err());
    }

    #[test]
    fn test_span_digest() {
        let span = Span::new("r1", Sid::new(2), "evidence".to_string(), None, SpanMeta::new(), None);
        assert!(span.digest.starts_with("sha256:"));
        assert_eq!(span.digest.len(), 7 + 64);
        assert!(span.verify_digest());

        let mut tampered = span.clone();
        tampered.text.push('!');
        assert!(!tampered.verify_digest());
    }

    #[test]
    fn test_summary_preview() {
        let span = Span::new(
            "r1",
            Sid::new(0),
            "line one\nline two".to_string(),
            Some("manual".to_string()),
            SpanMeta::new(),
            None,
        );
        let summary = span.summary();
        assert_eq!(summary.preview, "line one line two");
        assert_eq!(summary.chars, 17);
    }
}
