//! Operator-facing job log entries

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::types::Timestamp;

/// Who emitted a log line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogRole {
    /// The orchestrator driving the rounds
    Player,
    Architect,
    Coach,
    /// Sandbox and build execution
    Executor,
    System,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Warn,
    Error,
    Success,
    Heartbeat,
}

/// One entry of a job's ordered log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEntry {
    pub timestamp: Timestamp,
    pub role: LogRole,
    pub level: LogLevel,
    pub message: String,
}

impl LogEntry {
    pub fn new(role: LogRole, level: LogLevel, message: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            role,
            level,
            message: message.into(),
        }
    }

    pub fn info(role: LogRole, message: impl Into<String>) -> Self {
        Self::new(role, LogLevel::Info, message)
    }

    pub fn warn(role: LogRole, message: impl Into<String>) -> Self {
        Self::new(role, LogLevel::Warn, message)
    }

    pub fn error(role: LogRole, message: impl Into<String>) -> Self {
        Self::new(role, LogLevel::Error, message)
    }

    pub fn success(role: LogRole, message: impl Into<String>) -> Self {
        Self::new(role, LogLevel::Success, message)
    }

    /// Keep-alive marker for idle subscribers. Never persisted.
    pub fn heartbeat() -> Self {
        Self::new(LogRole::System, LogLevel::Heartbeat, "heartbeat")
    }

    pub fn is_heartbeat(&self) -> bool {
        self.level == LogLevel::Heartbeat
    }
}
