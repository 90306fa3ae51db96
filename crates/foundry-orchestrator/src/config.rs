use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::agents::BACKEND_TARGET;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Round budget when a submission does not name one
    pub default_max_rounds: u32,
    /// Upper bound accepted from submissions
    pub max_rounds_limit: u32,
    /// Coder target used for generation
    pub coder_target: String,
    pub heartbeat_interval_secs: u64,
    /// Entries kept per job for replay
    pub log_history_capacity: usize,
    /// Kill the job's sandbox once it reaches a terminal state
    pub release_sandbox_on_finish: bool,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            default_max_rounds: foundry_core::DEFAULT_MAX_ROUNDS,
            max_rounds_limit: 10,
            coder_target: BACKEND_TARGET.to_string(),
            heartbeat_interval_secs: 15,
            log_history_capacity: 2000,
            release_sandbox_on_finish: true,
        }
    }
}

impl OrchestratorConfig {
    pub fn with_max_rounds(mut self, rounds: u32) -> Self {
        self.default_max_rounds = rounds;
        self
    }

    pub fn with_coder_target(mut self, target: impl Into<String>) -> Self {
        self.coder_target = target.into();
        self
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs.max(1))
    }

    /// Requested budget clamped to `1..=max_rounds_limit`
    pub fn rounds_for(&self, requested: Option<u32>) -> u32 {
        requested
            .unwrap_or(self.default_max_rounds)
            .clamp(1, self.max_rounds_limit.max(1))
    }
}
