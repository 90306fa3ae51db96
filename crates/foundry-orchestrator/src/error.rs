//! Orchestrator errors

use foundry_core::{FoundryError, JobError};
use foundry_sandbox::SandboxError;
use thiserror::Error;
use uuid::Uuid;

pub type Result<T> = std::result::Result<T, OrchestratorError>;

#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error(transparent)]
    Core(#[from] FoundryError),

    #[error(transparent)]
    Sandbox(#[from] SandboxError),

    /// Agent call failed or returned an unsuccessful result
    #[error("{agent} agent failed: {reason}")]
    Agent { agent: String, reason: String },

    #[error("No coder registered for target type '{0}'")]
    CoderNotRegistered(String),

    #[error("Job {0} is already running")]
    AlreadyRunning(Uuid),

    #[error("Job {0} was cancelled")]
    Cancelled(Uuid),

    #[error("Blocked by policy: {0}")]
    Blocked(String),
}

impl OrchestratorError {
    pub fn agent(agent: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Agent {
            agent: agent.into(),
            reason: reason.into(),
        }
    }
}

impl From<reqwest::Error> for OrchestratorError {
    fn from(e: reqwest::Error) -> Self {
        Self::agent("remote", e.to_string())
    }
}

impl From<JobError> for OrchestratorError {
    fn from(e: JobError) -> Self {
        Self::Core(e.into())
    }
}

impl From<serde_json::Error> for OrchestratorError {
    fn from(e: serde_json::Error) -> Self {
        Self::Core(e.into())
    }
}
