//! Foundry Core - domain model for the multi-agent code generation pipeline
//!
//! Foundry turns a natural-language requirement into a compiling backend
//! project by looping architect, coder and coach agents against a real build.
//! This crate holds everything that does not need a network or a runtime.
//!
//! # Architecture
//!
//! 1. **Jobs** (`job`, `types`): job record, locked contract, status state machine
//! 2. **Dependency Analyzer** (`dependency`): data schema -> ordered generation tasks
//! 3. **Diagnostics** (`diagnostics`): compiler output parsing and environment failure detection
//! 4. **Hook Pipeline** (`hooks`): allow/block gate around tool and model calls
//! 5. **Session Memory** (`memory`): planning documents, import index, repair history
//! 6. **Storage** (`storage`): SQLite WAL and in-memory persistence
//!
//! # Quick Start
//!
//! ```
//! use foundry_core::dependency::{render_task_plan, DependencyAnalyzer};
//!
//! let schema = "
//!     CREATE TABLE users (id BIGINT PRIMARY KEY);
//!     CREATE TABLE orders (id BIGINT PRIMARY KEY, user_id BIGINT REFERENCES users(id));
//! ";
//!
//! let tasks = DependencyAnalyzer::new().plan(schema).unwrap();
//! assert_eq!(tasks.len(), 8);
//! assert_eq!(tasks[0].class_name, "UsersEntity");
//! println!("{}", render_task_plan(0, &tasks));
//! ```

#![deny(unsafe_code)]
#![warn(rust_2018_idioms, clippy::all)]

pub mod artifact;
pub mod dependency;
pub mod diagnostics;
pub mod error;
pub mod hooks;
pub mod job;
pub mod log_entry;
pub mod memory;
pub mod storage;
pub mod types;
pub mod validation;

pub use artifact::Artifact;
pub use error::{FoundryError, GraphError, JobError, Result, ResultExt, StoreError};
pub use hooks::{HookConfig, HookContext, HookDecision, HookEvent, HookHandler, HookPipeline, HookResult};
pub use job::{Contract, Job, DEFAULT_MAX_ROUNDS};
pub use log_entry::{LogEntry, LogLevel, LogRole};
pub use memory::{PlanningFileType, SessionMemory, SessionMemoryService};
pub use storage::{InMemoryStore, JobStore, SessionMemoryStore, SqliteStore};
pub use types::{GeneratedBy, JobStatus, Timestamp};
pub use validation::{CompileError, ErrorType, SandboxInfo, Severity, ValidationDraft, ValidationResult};

/// Version of Foundry Core
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Name of the library
pub const NAME: &str = env!("CARGO_PKG_NAME");
