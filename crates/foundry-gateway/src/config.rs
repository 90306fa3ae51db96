//! Gateway configuration

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use foundry_core::HookConfig;
use foundry_orchestrator::OrchestratorConfig;
use foundry_sandbox::SandboxConfig;

use crate::{GatewayError, DEFAULT_HOST, DEFAULT_PORT};

/// Environment variables that override file settings
pub const ENV_SANDBOX_URL: &str = "FOUNDRY_SANDBOX_URL";
pub const ENV_AGENT_URL: &str = "FOUNDRY_AGENT_URL";
pub const ENV_AGENT_API_KEY: &str = "FOUNDRY_AGENT_API_KEY";
pub const ENV_DATABASE: &str = "FOUNDRY_DATABASE";

/// Main gateway configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Server host
    pub host: String,

    /// Server port
    pub port: u16,

    /// SQLite database file. In-memory when unset.
    pub database_path: Option<PathBuf>,

    /// Base URL of the agent service hosting architect, coder and coach
    pub agent_base_url: String,

    pub agent_api_key: Option<String>,

    /// Per-request timeout for agent calls
    pub agent_timeout_secs: u64,

    pub sandbox: SandboxConfig,

    pub orchestrator: OrchestratorConfig,

    pub hooks: HookConfig,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            database_path: None,
            agent_base_url: "http://localhost:8090".to_string(),
            agent_api_key: None,
            agent_timeout_secs: 600,
            sandbox: SandboxConfig::default(),
            orchestrator: OrchestratorConfig::default(),
            hooks: HookConfig::default(),
        }
    }
}

impl GatewayConfig {
    /// Create a new configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_database(mut self, path: impl Into<PathBuf>) -> Self {
        self.database_path = Some(path.into());
        self
    }

    pub fn with_agent_base_url(mut self, url: impl Into<String>) -> Self {
        self.agent_base_url = url.into();
        self
    }

    pub fn with_sandbox(mut self, sandbox: SandboxConfig) -> Self {
        self.sandbox = sandbox;
        self
    }

    pub fn agent_timeout(&self) -> Duration {
        Duration::from_secs(self.agent_timeout_secs.max(1))
    }

    /// Get the socket address
    pub fn socket_addr(&self) -> crate::Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .map_err(|e| GatewayError::InvalidConfig(format!("bad listen address: {e}")))
    }

    /// Load configuration from a `.toml` or `.json` file
    pub fn from_file(path: impl AsRef<Path>) -> crate::Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        match path.extension().and_then(|e| e.to_str()) {
            Some("json") => Ok(serde_json::from_str(&content)?),
            Some("toml") | None => Ok(toml::from_str(&content)?),
            Some(other) => Err(GatewayError::InvalidConfig(format!(
                "unsupported config format '.{other}'"
            ))),
        }
    }

    /// Save configuration to a JSON file
    pub fn to_file(&self, path: impl AsRef<Path>) -> crate::Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Apply `FOUNDRY_*` overrides from the process environment
    pub fn apply_env(self) -> Self {
        self.apply_env_from(|key| std::env::var(key).ok())
    }

    pub fn apply_env_from<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        if let Some(url) = get(ENV_SANDBOX_URL) {
            self.sandbox.base_url = url;
        }
        if let Some(url) = get(ENV_AGENT_URL) {
            self.agent_base_url = url;
        }
        if let Some(key) = get(ENV_AGENT_API_KEY) {
            self.agent_api_key = Some(key);
        }
        if let Some(path) = get(ENV_DATABASE) {
            self.database_path = Some(PathBuf::from(path));
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use foundry_sandbox::TransportKind;

    #[test]
    fn test_default_config() {
        let config = GatewayConfig::default();
        assert_eq!(config.port, DEFAULT_PORT);
        assert_eq!(config.host, DEFAULT_HOST);
        assert_eq!(config.sandbox.template, "maven-jdk17");
        assert_eq!(config.orchestrator.default_max_rounds, 3);
        assert!(config.socket_addr().is_ok());
    }

    #[test]
    fn test_partial_toml() {
        let config: GatewayConfig = toml::from_str(
            r#"
            port = 9000
            database_path = "/var/lib/foundry/foundry.db"

            [sandbox]
            transport = "local"
            env_retry_delay_ms = 0

            [orchestrator]
            default_max_rounds = 5
            "#,
        )
        .unwrap();

        assert_eq!(config.port, 9000);
        assert_eq!(config.host, DEFAULT_HOST);
        assert_eq!(config.sandbox.transport, TransportKind::Local);
        assert_eq!(config.sandbox.env_retry_delay_ms, 0);
        assert_eq!(config.sandbox.env_retry_attempts, 3);
        assert_eq!(config.orchestrator.default_max_rounds, 5);
        assert_eq!(config.orchestrator.coder_target, "backend");
        assert!(config.hooks.denylist);
    }

    #[test]
    fn test_env_overrides() {
        let config = GatewayConfig::default().apply_env_from(|key| match key {
            ENV_SANDBOX_URL => Some("http://sandbox:3001".to_string()),
            ENV_AGENT_API_KEY => Some("  ".to_string()),
            _ => None,
        });
        assert_eq!(config.sandbox.base_url, "http://sandbox:3001");
        assert_eq!(config.agent_api_key, None);
        assert_eq!(config.agent_base_url, "http://localhost:8090");
    }

    #[test]
    fn test_file_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gateway.json");
        let config = GatewayConfig::new().with_port(8181).with_database("/tmp/f.db");
        config.to_file(&path).unwrap();

        let loaded = GatewayConfig::from_file(&path).unwrap();
        assert_eq!(loaded, config);

        let bad = dir.path().join("gateway.yaml");
        std::fs::write(&bad, "port: 1").unwrap();
        assert!(matches!(
            GatewayConfig::from_file(&bad),
            Err(GatewayError::InvalidConfig(_))
        ));
    }
}
