//! Error types for Foundry Core
//!
//! This module defines the error taxonomy shared by every Foundry crate.
//! We use `thiserror` for ergonomic error definitions with automatic Display/Error implementations.

use thiserror::Error;
use uuid::Uuid;

use crate::types::JobStatus;

/// Result type alias for Foundry operations
pub type Result<T> = std::result::Result<T, FoundryError>;

/// Main error type for Foundry operations
#[derive(Error, Debug)]
pub enum FoundryError {
    /// Job lifecycle errors
    #[error("Job error: {0}")]
    Job(#[from] JobError),

    /// Task graph errors
    #[error("Task graph error: {0}")]
    Graph(#[from] GraphError),

    /// Persistence errors
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error with context
    #[error("{context}: {source}")]
    WithContext {
        context: String,
        source: Box<FoundryError>,
    },
}

/// Errors related to the job state machine
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum JobError {
    #[error("Job not found: {0}")]
    NotFound(Uuid),

    #[error("Requirement must not be empty")]
    EmptyRequirement,

    #[error("Invalid job status transition from {from} to {to}")]
    InvalidTransition { from: JobStatus, to: JobStatus },

    #[error("Contract already locked for job {0}")]
    ContractLocked(Uuid),

    #[error("Job {0} is already terminal")]
    AlreadyTerminal(Uuid),
}

/// Errors raised while building or ordering the task dependency graph
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GraphError {
    /// The listed tasks take part in at least one dependency cycle
    #[error("Cycle detected in task graph: {0:?}")]
    CycleDetected(Vec<String>),

    #[error("Task not found in graph: {0}")]
    NodeNotFound(String),
}

/// Errors raised by the persistence layer
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Corrupt row in {table}: {reason}")]
    Corrupt { table: &'static str, reason: String },
}

impl FoundryError {
    /// Add context to an error
    pub fn context(self, context: impl Into<String>) -> Self {
        Self::WithContext {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// Returns the innermost error, skipping context wrappers
    pub fn root(&self) -> &FoundryError {
        match self {
            Self::WithContext { source, .. } => source.root(),
            other => other,
        }
    }
}

impl From<rusqlite::Error> for FoundryError {
    fn from(e: rusqlite::Error) -> Self {
        FoundryError::Store(StoreError::Sqlite(e))
    }
}

/// Extension trait for adding context to Results
pub trait ResultExt<T> {
    /// Add context to a Result
    fn context(self, context: impl Into<String>) -> Result<T>;

    /// Add lazy context to a Result
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;
}

impl<T> ResultExt<T> for Result<T> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.context(context))
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| e.context(f()))
    }
}
