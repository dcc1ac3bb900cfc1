//! Claims, per-claim verdicts and the aggregated verification report.

use serde::{Deserialize, Serialize};

use super::span::Sid;
use crate::adapters::ScoreRequest;

/// An atomic assertion to be checked against evidence
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Claim {
    /// Position of the claim (caller-declared for traces)
    pub idx: usize,

    /// Claim text
    pub text: String,

    /// Resolved citations, in order of first appearance
    #[serde(default)]
    pub cites: Vec<Sid>,

    /// Per-claim target override
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<f64>,
}

impl Claim {
    pub fn new(idx: usize, text: impl Into<String>, cites: Vec<Sid>) -> Self {
        Self {
            idx,
            text: text.into(),
            cites,
            target: None,
        }
    }

    pub fn has_citation(&self) -> bool {
        !self.cites.is_empty()
    }
}

/// Evidence handed to the verifier: a span id and its text
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvidenceText {
    pub sid: Sid,
    pub text: String,
}

impl EvidenceText {
    pub fn new(sid: Sid, text: impl Into<String>) -> Self {
        Self {
            sid,
            text: text.into(),
        }
    }
}

/// Outcome for a single claim
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    /// Score reached the target
    Supported,

    /// Score fell short of the target
    Unsupported,

    /// Citations were required and the claim had none; oracle not called
    FlaggedNoCitation,

    /// The scoring oracle failed or timed out for this claim
    Error,
}

impl Verdict {
    pub fn is_supported(self) -> bool {
        self == Verdict::Supported
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Verdict::Supported => "supported",
            Verdict::Unsupported => "unsupported",
            Verdict::FlaggedNoCitation => "flagged_no_citation",
            Verdict::Error => "error",
        }
    }
}

/// Verification result for one claim
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepResult {
    pub idx: usize,
    pub claim: String,
    pub cites: Vec<Sid>,

    /// Support score in [0, 1] (0 for gated or errored claims)
    pub score: f64,

    pub verdict: Verdict,

    /// Effective target the score was compared against
    pub target: f64,

    pub has_citation: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rationale: Option<String>,

    /// Oracle failure message (verdict `error` only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Exact payload sent to the oracle (diagnostics only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<ScoreRequest>,
}

/// A citation marker that did not match any known span
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnresolvedCitation {
    /// Claim the marker was attached to
    pub claim_idx: usize,

    /// Marker identifier as written (without brackets)
    pub marker: String,
}

/// Verdict counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportSummary {
    pub claims_scored: usize,
    pub supported: usize,
    pub unsupported: usize,
    pub flagged_no_citation: usize,
    pub errors: usize,
}

/// Aggregated report for a verification request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationReport {
    /// Per-claim results in input order
    pub steps: Vec<StepResult>,

    /// True only if there is at least one claim and every claim is supported
    pub passed: bool,

    /// idx of every claim that is not supported
    pub flagged: Vec<usize>,

    /// Some claims errored or were dropped by `max_claims`
    pub partial: bool,

    /// Markers that resolved to no span
    #[serde(default)]
    pub unresolved: Vec<UnresolvedCitation>,

    /// Claims dropped by `max_claims` truncation
    #[serde(default)]
    pub truncated: usize,

    pub summary: ReportSummary,
}

impl VerificationReport {
    /// Aggregate ordered step results
    pub fn from_steps(
        steps: Vec<StepResult>,
        unresolved: Vec<UnresolvedCitation>,
        truncated: usize,
    ) -> Self {
        let mut summary = ReportSummary {
            claims_scored: steps.len(),
            ..Default::default()
        };
        for step in &steps {
            match step.verdict {
                Verdict::Supported => summary.supported += 1,
                Verdict::Unsupported => summary.unsupported += 1,
                Verdict::FlaggedNoCitation => summary.flagged_no_citation += 1,
                Verdict::Error => summary.errors += 1,
            }
        }

        let flagged = steps
            .iter()
            .filter(|s| !s.verdict.is_supported())
            .map(|s| s.idx)
            .collect::<Vec<_>>();

        Self {
            passed: !steps.is_empty() && flagged.is_empty(),
            partial: summary.errors > 0 || truncated > 0,
            flagged,
            steps,
            unresolved,
            truncated,
            summary,
        }
    }
}
