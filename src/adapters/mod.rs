//! Scoring oracle interface.
//!
//! The oracle is the external capability that returns a continuous support
//! score for a claim given context. It is synchronous at this boundary; the
//! verifier decides how calls are fanned out.

pub mod command;

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use command::CommandOracle;

/// Payload sent to the oracle for one claim
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreRequest {
    /// Claim text as written
    pub claim: String,

    /// Rendered evidence context (may be empty)
    pub context: String,

    /// Target the score will be compared against
    pub target: f64,

    /// Verifier model hint, interpreted by the oracle
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

/// Oracle answer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OracleScore {
    /// Support score in [0, 1]
    pub score: f64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rationale: Option<String>,
}

impl OracleScore {
    pub fn new(score: f64) -> Self {
        Self {
            score,
            rationale: None,
        }
    }

    pub fn with_rationale(mut self, rationale: impl Into<String>) -> Self {
        self.rationale = Some(rationale.into());
        self
    }

    /// Reject scores outside [0, 1] (including NaN)
    pub fn validate(self) -> Result<Self, OracleError> {
        if self.score.is_finite() && (0.0..=1.0).contains(&self.score) {
            Ok(self)
        } else {
            Err(OracleError::InvalidScore(self.score))
        }
    }
}

/// Oracle failures (scoped to a single claim)
#[derive(Debug, Clone, Error)]
pub enum OracleError {
    #[error("Oracle timed out after {0:?}")]
    Timeout(Duration),

    #[error("Oracle call failed: {0}")]
    Failed(String),

    #[error("Oracle returned a score outside [0, 1]: {0}")]
    InvalidScore(f64),

    #[error("Failed to start oracle: {0}")]
    Spawn(String),
}

/// External scoring capability
pub trait ScoringOracle: Send + Sync {
    /// Human-readable oracle name
    fn name(&self) -> &str;

    /// Score one claim against its context.
    ///
    /// Implementations should give up once `timeout` has elapsed; the
    /// verifier enforces the same bound on its side.
    fn score(&self, request: &ScoreRequest, timeout: Duration) -> Result<OracleScore, OracleError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_score_validation() {
        assert!(OracleScore::new(0.0).validate().is_ok());
        assert!(OracleScore::new(1.0).validate().is_ok());
        assert!(matches!(
            OracleScore::new(1.5).validate(),
            Err(OracleError::InvalidScore(_))
        ));
        assert!(OracleScore::new(f64::NAN).validate().is_err());
    }

    #[test]
    fn test_request_serialization_skips_missing_model() {
        let request = ScoreRequest {
            claim: "A".to_string(),
            context: String::new(),
            target: 0.9,
            model: None,
        };
        let json = serde_json::to_string(&request).unwrap();
        assert!(!json.contains("model"));
    }
}
