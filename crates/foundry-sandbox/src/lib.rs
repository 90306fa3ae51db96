//! Foundry Sandbox - remote build environments for generated code
//!
//! Provisions (or reuses) a sandbox per job, writes the generated files,
//! runs the build and decides whether a failure belongs to the code or to
//! the environment. Environment failures reset the sandbox and retry;
//! they are never reported as compile diagnostics.
//!
//! Transports:
//! - [`HttpSandboxTransport`]: the remote sandbox API
//! - [`LocalSandboxTransport`]: temp directories on the host, for development

pub mod compile;
pub mod config;
pub mod error;
pub mod http;
pub mod local;
pub mod scaffold;
pub mod service;
pub mod transport;

pub use compile::CompileResult;
pub use config::{SandboxConfig, TransportKind};
pub use error::{Result, SandboxError};
pub use http::HttpSandboxTransport;
pub use local::{LocalSandbox, LocalSandboxTransport};
pub use service::{LogSink, SandboxService, ValidationOutcome};
pub use transport::{
    CreateSandboxRequest, CreatedSandbox, ExecuteResponse, SandboxFile, SandboxStatus,
    SandboxTransport,
};
