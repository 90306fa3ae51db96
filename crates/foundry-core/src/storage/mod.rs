//! Persistent Storage Layer
//!
//! Keyed upsert / select-by-id / select-by-job access to jobs, artifacts,
//! validation results and session memory.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       SqliteStore                           │
//! ├─────────────────────────────────────────────────────────────┤
//! │  jobs  │  artifacts  │  validation_results  │ session_memory│
//! │ (JSON) │ (seq order) │     (seq order)      │    (JSON)     │
//! └─────────────────────────────────────────────────────────────┘
//!         ↓ WAL mode: concurrent reads, serialized writes
//! ```
//!
//! [`InMemoryStore`] implements the same traits for tests and ephemeral
//! deployments.
//!
//! # Example
//!
//! ```no_run
//! use foundry_core::storage::{JobStore, SqliteStore};
//! use foundry_core::Job;
//!
//! # fn example() -> foundry_core::Result<()> {
//! let store = SqliteStore::open(".foundry/foundry.db")?;
//! let job = Job::new("todo app with users", 3)?;
//! store.save_job(&job)?;
//! assert!(store.get_job(job.id)?.is_some());
//! # Ok(())
//! # }
//! ```

pub mod memory;
pub mod sqlite;

pub use memory::InMemoryStore;
pub use sqlite::SqliteStore;

use uuid::Uuid;

use crate::artifact::{latest_per_path, Artifact};
use crate::error::Result;
use crate::job::Job;
use crate::memory::SessionMemory;
use crate::validation::ValidationResult;

/// Job, artifact and validation persistence.
///
/// Writes for one job come from a single orchestrator task, so
/// implementations only need per-call atomicity.
pub trait JobStore: Send + Sync {
    /// Insert or replace a job by id.
    ///
    /// `cancel_requested` is sticky: once stored as `true`, a later save of
    /// a stale copy cannot clear it.
    fn save_job(&self, job: &Job) -> Result<()>;

    /// Set only the cancellation flag of an unfinished job, leaving every
    /// other field as last written. Returns `false` when the job is missing
    /// or already terminal.
    fn request_cancel(&self, id: Uuid) -> Result<bool>;

    fn get_job(&self, id: Uuid) -> Result<Option<Job>>;

    /// All jobs, newest first
    fn list_jobs(&self) -> Result<Vec<Job>>;

    /// Jobs not in a terminal status, oldest first
    fn list_unfinished(&self) -> Result<Vec<Job>>;

    /// Insert or replace an artifact by id. A replaced artifact keeps its
    /// original write position.
    fn save_artifact(&self, artifact: &Artifact) -> Result<()>;

    fn get_artifact(&self, id: Uuid) -> Result<Option<Artifact>>;

    /// Every artifact of a job in write order
    fn artifacts_for_job(&self, job_id: Uuid) -> Result<Vec<Artifact>>;

    /// Latest (highest round) artifact per file path
    fn latest_artifacts(&self, job_id: Uuid) -> Result<Vec<Artifact>> {
        Ok(latest_per_path(&self.artifacts_for_job(job_id)?))
    }

    fn save_validation(&self, result: &ValidationResult) -> Result<()>;

    /// Every validation attempt of a job in write order
    fn validations_for_job(&self, job_id: Uuid) -> Result<Vec<ValidationResult>>;

    fn latest_validation(&self, job_id: Uuid) -> Result<Option<ValidationResult>> {
        Ok(self.validations_for_job(job_id)?.pop())
    }
}

/// Durable [`SessionMemory`] documents, one per job
pub trait SessionMemoryStore: Send + Sync {
    fn load_memory(&self, job_id: Uuid) -> Result<Option<SessionMemory>>;

    fn save_memory(&self, memory: &SessionMemory) -> Result<()>;

    fn delete_memory(&self, job_id: Uuid) -> Result<()>;
}
