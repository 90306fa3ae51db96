//! Core types for Foundry
//!
//! Shared primitive types:
//! - Job status and its transition table
//! - Timestamps
//! - Agent tags for generated artifacts

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Timestamp type alias
pub type Timestamp = DateTime<Utc>;

/// Job execution status
///
/// ```text
/// QUEUED -> PLANNING -> CODING <-> TESTING -> SUCCESS | FAILED
///    \__________\__________\_________\______-> CANCELLED
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Queued,
    Planning,
    Coding,
    Testing,
    Success,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Queued => "QUEUED",
            JobStatus::Planning => "PLANNING",
            JobStatus::Coding => "CODING",
            JobStatus::Testing => "TESTING",
            JobStatus::Success => "SUCCESS",
            JobStatus::Failed => "FAILED",
            JobStatus::Cancelled => "CANCELLED",
        }
    }

    pub fn from_status(value: &str) -> Option<Self> {
        match value {
            "QUEUED" => Some(JobStatus::Queued),
            "PLANNING" => Some(JobStatus::Planning),
            "CODING" => Some(JobStatus::Coding),
            "TESTING" => Some(JobStatus::Testing),
            "SUCCESS" => Some(JobStatus::Success),
            "FAILED" => Some(JobStatus::Failed),
            "CANCELLED" => Some(JobStatus::Cancelled),
            _ => None,
        }
    }

    /// Whether the state machine allows moving from `self` to `next`.
    ///
    /// Staying in the same non-terminal state is allowed so a resumed job can
    /// re-enter the state it was persisted in. `Queued -> Coding` covers a
    /// resumed job whose contract was already locked before a restart.
    pub fn can_transition_to(self, next: JobStatus) -> bool {
        use JobStatus::*;
        if self.is_terminal() {
            return false;
        }
        if self == next {
            return true;
        }
        match (self, next) {
            (_, Cancelled) | (_, Failed) => true,
            (Queued, Planning) | (Queued, Coding) => true,
            (Planning, Coding) => true,
            (Coding, Testing) => true,
            (Testing, Coding) | (Testing, Success) => true,
            _ => false,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Success | JobStatus::Failed | JobStatus::Cancelled
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which agent produced an artifact
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GeneratedBy {
    Architect,
    Coder,
    Coach,
    /// Build scaffolding added by the orchestrator itself
    System,
}

impl GeneratedBy {
    pub fn as_str(self) -> &'static str {
        match self {
            GeneratedBy::Architect => "architect",
            GeneratedBy::Coder => "coder",
            GeneratedBy::Coach => "coach",
            GeneratedBy::System => "system",
        }
    }

    pub fn from_tag(value: &str) -> Option<Self> {
        match value {
            "architect" => Some(GeneratedBy::Architect),
            "coder" => Some(GeneratedBy::Coder),
            "coach" => Some(GeneratedBy::Coach),
            "system" => Some(GeneratedBy::System),
            _ => None,
        }
    }
}
