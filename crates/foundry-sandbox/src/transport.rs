//! Sandbox transport abstraction and wire shapes

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::Result;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateSandboxRequest {
    pub template: String,
    /// Seconds
    pub timeout: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatedSandbox {
    pub sandbox_id: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub provider: String,
}

/// File to write, relative to the project root
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SandboxFile {
    pub path: String,
    pub content: String,
}

/// Raw result of a command.
///
/// Providers disagree on field names: some only send `output` or `message`
/// when stdout/stderr are empty.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ExecuteResponse {
    #[serde(alias = "exit_code")]
    pub exit_code: Option<i32>,
    pub stdout: Option<String>,
    pub stderr: Option<String>,
    pub output: Option<String>,
    pub message: Option<String>,
}

impl ExecuteResponse {
    pub fn completed(exit_code: i32, stdout: impl Into<String>, stderr: impl Into<String>) -> Self {
        Self {
            exit_code: Some(exit_code),
            stdout: Some(stdout.into()),
            stderr: Some(stderr.into()),
            ..Self::default()
        }
    }

    /// `(stdout, stderr)` with the `output` / `message` fallback applied
    pub fn streams(&self) -> (String, String) {
        let stdout = self.stdout.clone().unwrap_or_default();
        let stderr = self.stderr.clone().unwrap_or_default();
        if stdout.trim().is_empty() && stderr.trim().is_empty() {
            let fallback = self
                .output
                .clone()
                .filter(|o| !o.trim().is_empty())
                .or_else(|| self.message.clone())
                .unwrap_or_default();
            return (fallback, stderr);
        }
        (stdout, stderr)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SandboxStatus {
    pub active: bool,
    pub healthy: bool,
    /// Sandbox the provider currently considers active
    pub sandbox_id: Option<String>,
}

impl SandboxStatus {
    /// Active, healthy and not reporting a different sandbox
    pub fn is_alive_for(&self, sandbox_id: &str) -> bool {
        self.active
            && self.healthy
            && self
                .sandbox_id
                .as_deref()
                .map_or(true, |active| active == sandbox_id)
    }
}

/// Remote (or local) execution environment
#[async_trait]
pub trait SandboxTransport: Send + Sync {
    /// Provider label recorded on the job
    fn provider(&self) -> &str;

    async fn create(&self, request: &CreateSandboxRequest) -> Result<CreatedSandbox>;

    async fn write_files(&self, sandbox_id: &str, files: &[SandboxFile]) -> Result<()>;

    async fn execute(
        &self,
        sandbox_id: &str,
        command: &str,
        timeout: Duration,
    ) -> Result<ExecuteResponse>;

    async fn status(&self, sandbox_id: &str) -> Result<SandboxStatus>;

    async fn kill(&self, sandbox_id: &str) -> Result<()>;
}
