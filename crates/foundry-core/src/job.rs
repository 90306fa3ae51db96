//! Job record and locked contract
//!
//! A [`Job`] is owned by the orchestrator. Every mutation goes through the
//! methods here so that status changes are checked against
//! [`JobStatus::can_transition_to`] and the contract can only be locked once.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::error::{JobError, Result};
use crate::log_entry::LogEntry;
use crate::types::{JobStatus, Timestamp};
use crate::validation::SandboxInfo;

/// Default bounded retry budget
pub const DEFAULT_MAX_ROUNDS: u32 = 3;

/// API schema + data schema produced by the architect
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Contract {
    pub api_schema: String,
    pub data_schema: String,
    pub locked_at: Timestamp,
}

/// One end-to-end code-generation request and its round history
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub id: Uuid,
    pub requirement: String,
    pub status: JobStatus,
    pub current_round: u32,
    pub max_rounds: u32,
    pub contract: Option<Contract>,
    pub sandbox_id: Option<String>,
    pub sandbox_url: Option<String>,
    pub sandbox_provider: Option<String>,
    pub logs: Vec<LogEntry>,
    pub metadata: BTreeMap<String, serde_json::Value>,
    pub last_error: Option<String>,
    /// Persisted cancellation flag, checked between rounds
    pub cancel_requested: bool,
    pub created_at: Timestamp,
    pub started_at: Option<Timestamp>,
    pub completed_at: Option<Timestamp>,
}

impl Job {
    /// Create a new queued job
    ///
    /// # Errors
    ///
    /// Returns [`JobError::EmptyRequirement`] when the requirement is blank.
    pub fn new(requirement: impl Into<String>, max_rounds: u32) -> Result<Self> {
        let requirement = requirement.into();
        if requirement.trim().is_empty() {
            return Err(JobError::EmptyRequirement.into());
        }

        Ok(Self {
            id: Uuid::new_v4(),
            requirement,
            status: JobStatus::Queued,
            current_round: 0,
            max_rounds: max_rounds.max(1),
            contract: None,
            sandbox_id: None,
            sandbox_url: None,
            sandbox_provider: None,
            logs: Vec::new(),
            metadata: BTreeMap::new(),
            last_error: None,
            cancel_requested: false,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        })
    }

    /// Move to `next`, enforcing the state machine
    pub fn transition_to(&mut self, next: JobStatus) -> Result<()> {
        if !self.status.can_transition_to(next) {
            return Err(JobError::InvalidTransition {
                from: self.status,
                to: next,
            }
            .into());
        }

        if self.status == JobStatus::Queued && next != JobStatus::Queued && self.started_at.is_none()
        {
            self.started_at = Some(Utc::now());
        }
        if next.is_terminal() {
            self.completed_at = Some(Utc::now());
        }
        self.status = next;
        Ok(())
    }

    /// Lock the contract. A contract is immutable for the job's lifetime.
    pub fn lock_contract(
        &mut self,
        api_schema: impl Into<String>,
        data_schema: impl Into<String>,
    ) -> Result<()> {
        if self.contract.is_some() {
            return Err(JobError::ContractLocked(self.id).into());
        }
        self.contract = Some(Contract {
            api_schema: api_schema.into(),
            data_schema: data_schema.into(),
            locked_at: Utc::now(),
        });
        Ok(())
    }

    pub fn is_contract_locked(&self) -> bool {
        self.contract.is_some()
    }

    pub fn data_schema(&self) -> &str {
        self.contract
            .as_ref()
            .map(|c| c.data_schema.as_str())
            .unwrap_or("")
    }

    pub fn attach_sandbox(&mut self, info: &SandboxInfo) {
        self.sandbox_id = Some(info.sandbox_id.clone());
        self.sandbox_url = Some(info.url.clone());
        self.sandbox_provider = Some(info.provider.clone());
    }

    pub fn clear_sandbox(&mut self) {
        self.sandbox_id = None;
        self.sandbox_url = None;
        self.sandbox_provider = None;
    }

    pub fn push_log(&mut self, entry: LogEntry) {
        if !entry.is_heartbeat() {
            self.logs.push(entry);
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Whether the last round of the budget has been reached
    pub fn is_last_round(&self, round: u32) -> bool {
        round + 1 >= self.max_rounds
    }
}
