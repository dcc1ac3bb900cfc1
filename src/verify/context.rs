//! Oracle context selection and rendering.

use std::fmt;
use std::str::FromStr;

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::domain::{EvidenceText, Sid};

/// Which spans the oracle sees for a claim
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContextMode {
    /// Only the claim's cited spans (possibly none)
    Cited,

    /// Every span, regardless of citations
    #[default]
    All,

    /// Cited spans when the claim has any, otherwise every span
    Auto,
}

impl fmt::Display for ContextMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ContextMode::Cited => "cited",
            ContextMode::All => "all",
            ContextMode::Auto => "auto",
        };
        f.write_str(name)
    }
}

impl FromStr for ContextMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "cited" | "cite" | "cites" | "citations" => Ok(ContextMode::Cited),
            "all" | "full" => Ok(ContextMode::All),
            "auto" => Ok(ContextMode::Auto),
            other => Err(format!("unknown context mode: {}", other)),
        }
    }
}

/// Spans to show for one claim, in evidence order
pub fn select_context<'a>(
    spans: &'a [EvidenceText],
    cites: &[Sid],
    mode: ContextMode,
) -> Vec<&'a EvidenceText> {
    let cited_only = match mode {
        ContextMode::Cited => true,
        ContextMode::All => false,
        ContextMode::Auto => !cites.is_empty(),
    };

    spans
        .iter()
        .filter(|span| !cited_only || cites.contains(&span.sid))
        .collect()
}

/// What a span's text does, for masking
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpanKind {
    Assertion,
    Question,
    Instruction,
    Empty,
}

impl SpanKind {
    fn label(self) -> &'static str {
        match self {
            SpanKind::Assertion => "ASSERTION",
            SpanKind::Question => "QUESTION",
            SpanKind::Instruction => "INSTRUCTION",
            SpanKind::Empty => "EMPTY",
        }
    }
}

lazy_static! {
    static ref WHITESPACE: Regex = Regex::new(r"\s+").expect("valid whitespace regex");
    static ref WH_QUESTION: Regex =
        Regex::new(r"(?i)^(who|what|which|when|where|why|how)\b").expect("valid question regex");
    static ref AUX_QUESTION: Regex = Regex::new(
        r"(?i)^(is|are|was|were|do|does|did|can|could|should|would|will|may|might|have|has|had)\b"
    )
    .expect("valid auxiliary regex");
}

const QUESTION_PREFIXES: &[&str] = &["question:", "q:", "prompt:", "task:"];

const INSTRUCTION_PREFIXES: &[&str] = &[
    "reply with", "respond with", "choose", "select", "options:", "answers:", "a)", "b)", "c)",
    "d)", "(a)", "(b)", "(c)", "(d)",
];

/// Classify span text; only assertions can support a claim
pub fn span_kind(text: &str) -> SpanKind {
    let text = WHITESPACE.replace_all(text.trim(), " ");
    if text.is_empty() {
        return SpanKind::Empty;
    }

    let lower = text.to_lowercase();
    if QUESTION_PREFIXES.iter().any(|p| lower.starts_with(p)) {
        return SpanKind::Question;
    }
    if INSTRUCTION_PREFIXES.iter().any(|p| lower.starts_with(p)) {
        return SpanKind::Instruction;
    }
    if text.ends_with('?') || WH_QUESTION.is_match(&text) {
        return SpanKind::Question;
    }
    if AUX_QUESTION.is_match(&text) && (text.contains('?') || text.matches(' ').count() < 12) {
        return SpanKind::Question;
    }

    SpanKind::Assertion
}

/// One `[sid] text` line per span
pub fn render_context(spans: &[&EvidenceText], mask_non_assertions: bool) -> String {
    spans
        .iter()
        .map(|span| {
            let kind = if mask_non_assertions {
                span_kind(&span.text)
            } else {
                SpanKind::Assertion
            };
            match kind {
                SpanKind::Assertion => format!("[{}] {}", span.sid, span.text),
                other => format!("[{}] [NON-EVIDENCE:{}]", span.sid, other.label()),
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}
