//! Foundry Gateway - HTTP front door for the job orchestrator
//!
//! ```text
//!   client ──POST /api/jobs──────────────> Orchestrator::submit_job
//!          ──GET  /api/jobs/:id──────────> job record
//!          ──GET  /api/jobs/:id/artifacts> latest artifact per path
//!          ──POST /api/jobs/:id/cancel───> Orchestrator::cancel_job
//!          ──GET  /api/jobs/:id/logs─────> SSE: history, live entries, heartbeats
//! ```
//!
//! [`Gateway::from_config`] wires SQLite storage, the sandbox service, the
//! hook pipeline and the remote agents from a [`GatewayConfig`].

pub mod config;
pub mod error;
pub mod gateway;

pub use config::GatewayConfig;
pub use error::{GatewayError, Result};
pub use gateway::{Gateway, GatewayState, SubmitJobRequest, SubmitJobResponse};

/// Gateway version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default HTTP port
pub const DEFAULT_PORT: u16 = 18789;

/// Default host
pub const DEFAULT_HOST: &str = "127.0.0.1";
