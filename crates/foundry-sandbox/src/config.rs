//! Sandbox settings

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Which transport backs the sandbox service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// Remote sandbox API over HTTP
    Http,
    /// Temp directories on this host, for development
    Local,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxConfig {
    pub transport: TransportKind,
    /// Sandbox API base URL
    pub base_url: String,
    /// Template requested at creation
    pub template: String,
    /// Project root inside the sandbox
    pub work_dir: String,
    pub build_command: String,
    /// Build file scaffolded when no artifact provides one
    pub build_file: String,
    pub compile_timeout_secs: u64,
    /// Total build attempts when the environment fails (first try included)
    pub env_retry_attempts: u32,
    /// Pause between killing a broken sandbox and recreating it. 0 disables.
    pub env_retry_delay_ms: u64,
    /// Trust a `Return code: N` line in build output over the reported exit
    /// code. Compatibility shim for one provider; see `diagnostics::return_code_marker`.
    pub honor_return_code_marker: bool,
    pub request_timeout_secs: u64,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            transport: TransportKind::Http,
            base_url: "http://localhost:3001".to_string(),
            template: "maven-jdk17".to_string(),
            work_dir: "/home/user/app".to_string(),
            build_command: "mvn compile -e -B --no-transfer-progress".to_string(),
            build_file: "pom.xml".to_string(),
            compile_timeout_secs: 300,
            env_retry_attempts: 3,
            env_retry_delay_ms: 2000,
            honor_return_code_marker: true,
            request_timeout_secs: 360,
        }
    }
}

impl SandboxConfig {
    /// Local transport with no retry delay
    pub fn local() -> Self {
        Self {
            transport: TransportKind::Local,
            env_retry_delay_ms: 0,
            ..Self::default()
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_build_command(mut self, command: impl Into<String>) -> Self {
        self.build_command = command.into();
        self
    }

    pub fn with_retry(mut self, attempts: u32, delay_ms: u64) -> Self {
        self.env_retry_attempts = attempts;
        self.env_retry_delay_ms = delay_ms;
        self
    }

    pub fn with_return_code_marker(mut self, honor: bool) -> Self {
        self.honor_return_code_marker = honor;
        self
    }

    pub fn compile_timeout(&self) -> Duration {
        Duration::from_secs(self.compile_timeout_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.env_retry_delay_ms)
    }

    /// At least one attempt
    pub fn max_attempts(&self) -> u32 {
        self.env_retry_attempts.max(1)
    }
}
