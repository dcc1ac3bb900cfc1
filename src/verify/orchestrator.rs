//! Verification engine.
//!
//! Both entry points reduce to a list of [`Claim`]s and share one per-claim
//! procedure: pick the context, apply the citation gate, score once, compare
//! against the effective target. Oracle calls run on the blocking pool under
//! a semaphore and are joined back in claim order.

use std::collections::BTreeSet;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tracing::{debug, info, instrument, warn};

use super::cancel::CancelToken;
use super::context::{render_context, select_context, ContextMode};
use super::error::VerifyError;
use crate::adapters::{OracleError, OracleScore, ScoreRequest, ScoringOracle};
use crate::claims::{BracketCitations, CitationParser, ClaimSplitter};
use crate::core::Session;
use crate::domain::{
    Claim, EvidenceText, Sid, StepResult, UnresolvedCitation, VerificationReport, Verdict,
};

/// Default support target
pub const DEFAULT_TARGET: f64 = 0.95;

/// Default bound on in-flight oracle calls
pub const DEFAULT_MAX_CONCURRENCY: usize = 8;

/// Default per-call oracle timeout
pub const DEFAULT_ORACLE_TIMEOUT: Duration = Duration::from_secs(30);

/// What happens when an answer has more claims than `max_claims`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClaimOverflow {
    /// Keep the first `max_claims`, report the rest as truncated
    #[default]
    Truncate,

    /// Fail the request with `TooManyClaims`
    Fail,
}

impl FromStr for ClaimOverflow {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "truncate" => Ok(ClaimOverflow::Truncate),
            "fail" | "error" => Ok(ClaimOverflow::Fail),
            other => Err(format!("unknown claim overflow policy: {}", other)),
        }
    }
}

/// Engine-wide settings
#[derive(Debug, Clone, PartialEq)]
pub struct VerifierSettings {
    pub max_concurrency: usize,
    pub oracle_timeout: Duration,
    pub overflow: ClaimOverflow,

    /// Floor applied to every effective target
    pub min_target: f64,
}

impl Default for VerifierSettings {
    fn default() -> Self {
        Self {
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            oracle_timeout: DEFAULT_ORACLE_TIMEOUT,
            overflow: ClaimOverflow::default(),
            min_target: 0.0,
        }
    }
}

/// Per-request options shared by both entry points
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VerifyOptions {
    /// Model hint passed through to the oracle
    pub verifier_model: Option<String>,

    pub default_target: f64,

    /// Flag claims without a resolved citation instead of scoring them
    pub require_citations: bool,

    pub context_mode: ContextMode,

    /// Attach the exact oracle payload to each step
    pub include_prompts: bool,

    /// Replace questions and instructions in the context with placeholders
    pub mask_non_assertions: bool,
}

impl Default for VerifyOptions {
    fn default() -> Self {
        Self {
            verifier_model: None,
            default_target: DEFAULT_TARGET,
            require_citations: false,
            context_mode: ContextMode::default(),
            include_prompts: false,
            mask_non_assertions: false,
        }
    }
}

/// Free-text answer to check
#[derive(Debug, Clone)]
pub struct DetectRequest {
    pub answer: String,
    pub spans: Vec<EvidenceText>,
    pub options: VerifyOptions,
    pub max_claims: Option<usize>,

    /// Use the claim splitter (otherwise the parser's own sentence units)
    pub claim_split: bool,
}

impl DetectRequest {
    pub fn new(answer: impl Into<String>, spans: Vec<EvidenceText>) -> Self {
        Self {
            answer: answer.into(),
            spans,
            options: VerifyOptions::default(),
            max_claims: None,
            claim_split: true,
        }
    }
}

/// A caller-declared claim
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceStep {
    pub idx: usize,
    pub claim: String,

    #[serde(default)]
    pub cites: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<f64>,
}

impl TraceStep {
    pub fn new(idx: usize, claim: impl Into<String>, cites: &[&str]) -> Self {
        Self {
            idx,
            claim: claim.into(),
            cites: cites.iter().map(|c| c.to_string()).collect(),
            target: None,
        }
    }
}

/// Explicit claim trace to check
#[derive(Debug, Clone)]
pub struct AuditRequest {
    pub steps: Vec<TraceStep>,
    pub spans: Vec<EvidenceText>,
    pub options: VerifyOptions,
}

fn check_target(target: f64) -> Result<f64, VerifyError> {
    if target.is_finite() && (0.0..=1.0).contains(&target) {
        Ok(target)
    } else {
        Err(VerifyError::InvalidTarget(target))
    }
}

/// Claim verifier
pub struct Verifier {
    oracle: Arc<dyn ScoringOracle>,
    parser: Arc<dyn CitationParser>,
    splitter: ClaimSplitter,
    settings: VerifierSettings,
}

impl Verifier {
    pub fn new(oracle: Arc<dyn ScoringOracle>) -> Self {
        Self {
            oracle,
            parser: Arc::new(BracketCitations),
            splitter: ClaimSplitter::default(),
            settings: VerifierSettings::default(),
        }
    }

    pub fn with_parser(mut self, parser: Arc<dyn CitationParser>) -> Self {
        self.parser = parser;
        self
    }

    pub fn with_splitter(mut self, splitter: ClaimSplitter) -> Self {
        self.splitter = splitter;
        self
    }

    pub fn with_settings(mut self, settings: VerifierSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn settings(&self) -> &VerifierSettings {
        &self.settings
    }

    fn effective_target(&self, target: Option<f64>, options: &VerifyOptions) -> Result<f64, VerifyError> {
        let target = check_target(target.unwrap_or(options.default_target))?;
        Ok(target.max(self.settings.min_target))
    }

    /// Split, parse and verify a free-text answer
    #[instrument(skip_all, fields(oracle = self.oracle.name()))]
    pub async fn detect_hallucination(
        &self,
        request: DetectRequest,
    ) -> Result<VerificationReport, VerifyError> {
        if request.spans.is_empty() {
            return Err(VerifyError::NoEvidence);
        }
        check_target(request.options.default_target)?;
        let known: BTreeSet<Sid> = request.spans.iter().map(|span| span.sid).collect();

        let units: Vec<String> = if request.claim_split {
            self.splitter
                .split(&request.answer)
                .map(str::to_string)
                .collect()
        } else {
            self.parser.units(&request.answer)
        };
        let mut parsed = self.parser.parse(units, &known);

        let mut truncated = 0;
        if let Some(max) = request.max_claims.map(|m| m.max(1)) {
            let count = parsed.units.len();
            if count > max {
                match self.settings.overflow {
                    ClaimOverflow::Fail => return Err(VerifyError::TooManyClaims { count, max }),
                    ClaimOverflow::Truncate => {
                        warn!(count, max, "Answer exceeds max_claims, truncating");
                        truncated = count - max;
                        parsed.units.truncate(max);
                        parsed.unresolved.retain(|u| u.claim_idx < max);
                    }
                }
            }
        }

        let claims = parsed
            .units
            .into_iter()
            .enumerate()
            .map(|(idx, unit)| Claim::new(idx, unit.text, unit.cites))
            .collect();

        self.verify_claims(claims, &request.spans, &request.options, parsed.unresolved, truncated)
            .await
    }

    /// Verify an explicit trace of claims
    #[instrument(skip_all, fields(oracle = self.oracle.name(), steps = request.steps.len()))]
    pub async fn audit_trace_budget(
        &self,
        request: AuditRequest,
    ) -> Result<VerificationReport, VerifyError> {
        check_target(request.options.default_target)?;
        let known: BTreeSet<Sid> = request.spans.iter().map(|span| span.sid).collect();

        let mut claims = Vec::with_capacity(request.steps.len());
        for step in request.steps {
            let text = step.claim.trim();
            if text.is_empty() {
                return Err(VerifyError::InvalidStep {
                    idx: step.idx,
                    reason: "claim is empty".to_string(),
                });
            }

            let mut cites = Vec::new();
            for cite in &step.cites {
                let sid = cite
                    .parse::<Sid>()
                    .ok()
                    .filter(|sid| known.contains(sid))
                    .ok_or_else(|| VerifyError::UnknownSpan(cite.trim().to_string()))?;
                if !cites.contains(&sid) {
                    cites.push(sid);
                }
            }

            let mut claim = Claim::new(step.idx, text, cites);
            claim.target = step.target;
            claims.push(claim);
        }

        self.verify_claims(claims, &request.spans, &request.options, Vec::new(), 0)
            .await
    }

    /// `detect_hallucination` that gives up when `cancel` fires
    pub async fn detect_hallucination_cancellable(
        &self,
        request: DetectRequest,
        cancel: CancelToken,
    ) -> Result<VerificationReport, VerifyError> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                warn!("Verification cancelled");
                Err(VerifyError::Cancelled)
            }
            report = self.detect_hallucination(request) => report,
        }
    }

    /// `audit_trace_budget` that gives up when `cancel` fires
    pub async fn audit_trace_budget_cancellable(
        &self,
        request: AuditRequest,
        cancel: CancelToken,
    ) -> Result<VerificationReport, VerifyError> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                warn!("Verification cancelled");
                Err(VerifyError::Cancelled)
            }
            report = self.audit_trace_budget(request) => report,
        }
    }

    /// Check an answer against every span of a run
    pub async fn detect_in_run(
        &self,
        session: &Session,
        run_id: Option<&str>,
        answer: &str,
        options: VerifyOptions,
        max_claims: Option<usize>,
    ) -> Result<VerificationReport, VerifyError> {
        let mut request = DetectRequest::new(answer, session.evidence(run_id)?);
        request.options = options;
        request.max_claims = max_claims;
        self.detect_hallucination(request).await
    }

    async fn verify_claims(
        &self,
        claims: Vec<Claim>,
        spans: &[EvidenceText],
        options: &VerifyOptions,
        unresolved: Vec<UnresolvedCitation>,
        truncated: usize,
    ) -> Result<VerificationReport, VerifyError> {
        // Every target is checked before the first oracle call
        let targets = claims
            .iter()
            .map(|claim| self.effective_target(claim.target, options))
            .collect::<Result<Vec<_>, _>>()?;

        info!(claims = claims.len(), spans = spans.len(), "Verifying claims");

        let semaphore = Arc::new(Semaphore::new(self.settings.max_concurrency.max(1)));
        let pending = claims.into_iter().zip(targets).map(|(claim, target)| {
            let semaphore = Arc::clone(&semaphore);
            async move { self.verify_one(claim, target, spans, options, semaphore).await }
        });
        let steps = join_all(pending).await;

        if !steps.is_empty() && steps.iter().all(|step| step.verdict == Verdict::Error) {
            let last_error = steps
                .last()
                .and_then(|step| step.error.clone())
                .unwrap_or_default();
            return Err(VerifyError::AllClaimsFailed {
                count: steps.len(),
                last_error,
            });
        }

        let report = VerificationReport::from_steps(steps, unresolved, truncated);
        info!(
            passed = report.passed,
            flagged = report.flagged.len(),
            partial = report.partial,
            "Verification complete"
        );
        Ok(report)
    }

    async fn verify_one(
        &self,
        claim: Claim,
        target: f64,
        spans: &[EvidenceText],
        options: &VerifyOptions,
        semaphore: Arc<Semaphore>,
    ) -> StepResult {
        let has_citation = claim.has_citation();
        let mut step = StepResult {
            idx: claim.idx,
            claim: claim.text.clone(),
            cites: claim.cites.clone(),
            score: 0.0,
            verdict: Verdict::FlaggedNoCitation,
            target,
            has_citation,
            rationale: None,
            error: None,
            payload: None,
        };

        if options.require_citations && !has_citation {
            debug!(idx = claim.idx, "Claim has no citation, oracle skipped");
            return step;
        }

        let selected = select_context(spans, &claim.cites, options.context_mode);
        let request = ScoreRequest {
            claim: claim.text,
            context: render_context(&selected, options.mask_non_assertions),
            target,
            model: options.verifier_model.clone(),
        };
        if options.include_prompts {
            step.payload = Some(request.clone());
        }

        match self.score(request, semaphore).await {
            Ok(score) => {
                step.verdict = if score.score >= target {
                    Verdict::Supported
                } else {
                    Verdict::Unsupported
                };
                step.score = score.score;
                step.rationale = score.rationale;
            }
            Err(e) => {
                warn!(idx = step.idx, error = %e, "Oracle failed for claim");
                step.verdict = Verdict::Error;
                step.error = Some(e.to_string());
            }
        }

        step
    }

    async fn score(
        &self,
        request: ScoreRequest,
        semaphore: Arc<Semaphore>,
    ) -> Result<OracleScore, OracleError> {
        let permit = semaphore
            .acquire_owned()
            .await
            .map_err(|e| OracleError::Failed(e.to_string()))?;

        let oracle = Arc::clone(&self.oracle);
        let timeout = self.settings.oracle_timeout;
        // The permit lives as long as the blocking call, even an abandoned one
        let call = tokio::task::spawn_blocking(move || {
            let _permit = permit;
            oracle.score(&request, timeout)
        });

        // A call that outlives the deadline is abandoned, not joined
        match tokio::time::timeout(timeout, call).await {
            Ok(Ok(result)) => result.and_then(OracleScore::validate),
            Ok(Err(join_error)) => Err(OracleError::Failed(format!(
                "oracle task failed: {}",
                join_error
            ))),
            Err(_) => Err(OracleError::Timeout(timeout)),
        }
    }
}
