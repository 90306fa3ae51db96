//! Sandbox errors

use foundry_core::FoundryError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, SandboxError>;

#[derive(Error, Debug)]
pub enum SandboxError {
    /// The request never produced a response
    #[error("Sandbox transport error: {0}")]
    Transport(String),

    /// Non-2xx response from the sandbox API
    #[error("Sandbox API error ({status}): {body}")]
    Status { status: u16, body: String },

    #[error("Failed to decode sandbox response: {0}")]
    Decode(String),

    #[error("Sandbox command timed out after {0}s")]
    Timeout(u64),

    #[error("Unknown sandbox: {0}")]
    UnknownSandbox(String),

    #[error("Invalid sandbox path: {0}")]
    InvalidPath(String),

    #[error("Blocked by policy: {0}")]
    Blocked(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Core(#[from] FoundryError),
}

impl From<reqwest::Error> for SandboxError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            SandboxError::Decode(e.to_string())
        } else if let Some(status) = e.status() {
            SandboxError::Status {
                status: status.as_u16(),
                body: e.to_string(),
            }
        } else {
            SandboxError::Transport(e.to_string())
        }
    }
}

impl From<serde_json::Error> for SandboxError {
    fn from(e: serde_json::Error) -> Self {
        SandboxError::Decode(e.to_string())
    }
}
