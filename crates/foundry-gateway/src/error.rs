//! Error types for the Gateway

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use foundry_core::{FoundryError, JobError};
use foundry_orchestrator::OrchestratorError;
use foundry_sandbox::SandboxError;
use serde_json::json;
use thiserror::Error;

/// Gateway error type
#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error(transparent)]
    Orchestrator(#[from] OrchestratorError),

    #[error(transparent)]
    Sandbox(#[from] SandboxError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl GatewayError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            GatewayError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            GatewayError::Orchestrator(e) => orchestrator_status(e),
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

fn orchestrator_status(error: &OrchestratorError) -> StatusCode {
    match error {
        OrchestratorError::Core(core) => match core.root() {
            FoundryError::Job(JobError::NotFound(_)) => StatusCode::NOT_FOUND,
            FoundryError::Job(JobError::EmptyRequirement) => StatusCode::BAD_REQUEST,
            FoundryError::Job(
                JobError::InvalidTransition { .. }
                | JobError::AlreadyTerminal(_)
                | JobError::ContractLocked(_),
            ) => StatusCode::CONFLICT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        },
        OrchestratorError::AlreadyRunning(_) => StatusCode::CONFLICT,
        OrchestratorError::Blocked(_) => StatusCode::FORBIDDEN,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!("Request failed: {}", self);
        }
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

impl From<serde_json::Error> for GatewayError {
    fn from(e: serde_json::Error) -> Self {
        GatewayError::Serialization(e.to_string())
    }
}

impl From<toml::de::Error> for GatewayError {
    fn from(e: toml::de::Error) -> Self {
        GatewayError::InvalidConfig(e.to_string())
    }
}

impl From<FoundryError> for GatewayError {
    fn from(e: FoundryError) -> Self {
        GatewayError::Orchestrator(e.into())
    }
}

/// Result type for Gateway operations
pub type Result<T> = std::result::Result<T, GatewayError>;
