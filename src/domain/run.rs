//! Run state.
//!
//! A Run is a bounded unit of work anchored by a problem statement (S0) and
//! an immutable deliverable description (S1).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::span::Sid;

/// A grounding run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Run {
    /// Unique identifier for this run
    pub id: String,

    /// Span holding the problem statement
    pub problem_sid: Sid,

    /// Span holding the deliverable (fixed at creation)
    pub deliverable_sid: Sid,

    /// Current state of the run
    pub status: RunStatus,

    /// When the run started
    pub created_at: DateTime<Utc>,
}

impl Run {
    /// Create a new active run with the standard anchor sids
    pub fn new(id: String) -> Self {
        Self {
            id,
            problem_sid: Sid::PROBLEM,
            deliverable_sid: Sid::DELIVERABLE,
            status: RunStatus::Active,
            created_at: Utc::now(),
        }
    }

    /// Check if the run is the active one
    pub fn is_active(&self) -> bool {
        self.status == RunStatus::Active
    }
}

/// State of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// The run is the session's current run
    #[default]
    Active,

    /// Superseded by another run (still readable, never deleted)
    Archived,
}

/// Generate a fresh run id (16 hex chars)
pub fn generate_run_id() -> String {
    let mut id = uuid::Uuid::new_v4().simple().to_string();
    id.truncate(16);
    id
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_creation() {
        let run = Run::new("abc".to_string());

        assert_eq!(run.id, "abc");
        assert_eq!(run.problem_sid, Sid::new(0));
        assert_eq!(run.deliverable_sid, Sid::new(1));
        assert!(run.is_active());
    }

    #[test]
    fn test_run_status_serialization() {
        let json = serde_json::to_string(&RunStatus::Archived).unwrap();
        assert_eq!(json, "\"archived\"");
    }

    #[test]
    fn test_generated_ids_are_unique() {
        let a = generate_run_id();
        let b = generate_run_id();
        assert_eq!(a.len(), 16);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(a, b);
    }
}
