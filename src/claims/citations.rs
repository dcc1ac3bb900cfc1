//! Citation markers.
//!
//! Answers cite evidence inline with bracketed markers: `[S2]`, `[S1][S4]`,
//! or a bare number `[3]`. The syntax lives behind [`CitationParser`] so a
//! different marker style can be swapped in without touching the verifier.

use std::collections::BTreeSet;

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::domain::{Sid, UnresolvedCitation};

/// One claim-sized unit of an answer with its resolved citations
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CitedUnit {
    /// Unit text as written, markers included
    pub text: String,

    /// Resolved sids, deduplicated, in order of first appearance
    pub cites: Vec<Sid>,
}

/// Result of parsing an answer
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParsedAnswer {
    pub units: Vec<CitedUnit>,
    pub unresolved: Vec<UnresolvedCitation>,
}

/// Citation syntax
pub trait CitationParser: Send + Sync {
    /// Split an answer into naive sentence units
    fn units(&self, text: &str) -> Vec<String>;

    /// Marker identifiers in `unit`, as written, in order
    fn markers(&self, unit: &str) -> Vec<String>;

    /// Byte length of the run of markers (and surrounding whitespace) that
    /// opens `unit`; 0 when it does not start with a marker
    fn leading_marker_len(&self, unit: &str) -> usize;

    /// `unit` with every marker removed
    fn strip_markers(&self, unit: &str) -> String;

    /// Whether `unit` consists of markers and punctuation only
    fn is_marker_only(&self, unit: &str) -> bool {
        !self.markers(unit).is_empty()
            && self
                .strip_markers(unit)
                .chars()
                .all(|c| c.is_whitespace() || is_separator(c))
    }

    /// Attach markers to their claims and resolve them against `known`.
    ///
    /// Markers opening a unit belong to the previous one, and a unit made
    /// only of markers is merged into the previous unit.
    fn parse(&self, units: Vec<String>, known: &BTreeSet<Sid>) -> ParsedAnswer {
        let mut merged: Vec<String> = Vec::new();

        for unit in units {
            let mut unit = unit.trim().to_string();
            if unit.is_empty() {
                continue;
            }

            if let Some(previous) = merged.last_mut() {
                if self.is_marker_only(&unit) {
                    previous.push(' ');
                    previous.push_str(&unit);
                    continue;
                }

                let prefix_len = self.leading_marker_len(&unit);
                if prefix_len > 0 {
                    let prefix = unit[..prefix_len].trim();
                    previous.push(' ');
                    previous.push_str(prefix);
                    unit = unit[prefix_len..].trim().to_string();
                }
            }

            merged.push(unit);
        }

        let mut answer = ParsedAnswer::default();
        for (claim_idx, text) in merged.into_iter().enumerate() {
            let mut cites = Vec::new();
            for marker in self.markers(&text) {
                match resolve_marker(&marker, known) {
                    Some(sid) if !cites.contains(&sid) => cites.push(sid),
                    Some(_) => {}
                    None => answer.unresolved.push(UnresolvedCitation { claim_idx, marker }),
                }
            }
            answer.units.push(CitedUnit { text, cites });
        }
        answer
    }
}

fn is_separator(c: char) -> bool {
    matches!(c, ',' | ';' | ':' | '.' | '-' | '–' | '—' | '!' | '?')
}

/// Exact sid, or bare number `n` mapped to `S{n}`
pub fn resolve_marker(marker: &str, known: &BTreeSet<Sid>) -> Option<Sid> {
    let sid = match marker.parse::<Sid>() {
        Ok(sid) => sid,
        Err(_) if !marker.is_empty() && marker.bytes().all(|b| b.is_ascii_digit()) => {
            Sid::new(marker.parse().ok()?)
        }
        Err(_) => return None,
    };
    known.contains(&sid).then_some(sid)
}

lazy_static! {
    static ref MARKER: Regex = Regex::new(r"\[([A-Za-z]\w*|\d+)\]").expect("valid marker regex");

    static ref LEADING_MARKERS: Regex =
        Regex::new(r"^\s*(?:\[(?:[A-Za-z]\w*|\d+)\]\s*)+").expect("valid marker prefix regex");

    static ref SENTENCE_BREAK: Regex = Regex::new(r"[.!?]\s+").expect("valid sentence regex");
}

/// Default `[id]` marker syntax
#[derive(Debug, Clone, Copy, Default)]
pub struct BracketCitations;

impl CitationParser for BracketCitations {
    fn units(&self, text: &str) -> Vec<String> {
        let mut units = Vec::new();
        let mut start = 0;
        for m in SENTENCE_BREAK.find_iter(text) {
            // Keep the punctuation with its sentence
            let end = m.start() + 1;
            units.push(text[start..end].trim().to_string());
            start = m.end();
        }
        units.push(text[start..].trim().to_string());
        units.retain(|u| !u.is_empty());
        units
    }

    fn markers(&self, unit: &str) -> Vec<String> {
        MARKER
            .captures_iter(unit)
            .filter_map(|caps| caps.get(1).map(|m| m.as_str().to_string()))
            .collect()
    }

    fn leading_marker_len(&self, unit: &str) -> usize {
        LEADING_MARKERS
            .find(unit)
            .map(|m| m.end())
            .unwrap_or(0)
    }

    fn strip_markers(&self, unit: &str) -> String {
        MARKER.replace_all(unit, "").into_owned()
    }
}
