//! Foundry Orchestrator - runs jobs through architect, coder and coach rounds
//!
//! A job starts with a one-time contract design by the architect. Each round
//! then generates (or repairs) code, validates it through the phase
//! validator and either finishes or hands code errors to the coach for the
//! next round. Environment failures are retried by the sandbox layer and
//! never reach the coach.
//!
//! # Layout
//!
//! - [`agents`]: agent traits, payloads and the coder registry
//! - [`remote`]: HTTP implementations of the agents
//! - [`validator`]: validation backends and the phase verdict
//! - [`log_hub`]: per-job log history with live fan-out
//! - [`orchestrator`]: the job state machine

#![deny(unsafe_code)]
#![warn(rust_2018_idioms, clippy::all)]

pub mod agents;
pub mod config;
pub mod error;
pub mod log_hub;
pub mod orchestrator;
pub mod remote;
pub mod validator;

pub use agents::{
    AgentContext, ArchitectAgent, CoachAgent, CoachOutput, CoderAgent, CoderOutput, CoderRegistry,
    ContractDesign, GeneratedFile, BACKEND_TARGET,
};
pub use config::OrchestratorConfig;
pub use error::{OrchestratorError, Result};
pub use log_hub::{LogHub, LogSubscription};
pub use orchestrator::{Orchestrator, OrchestratorBuilder};
pub use remote::{AgentServiceClient, RemoteArchitect, RemoteCoach, RemoteCoder};
pub use validator::{PhaseReport, PhaseValidator, ValidationBackend};
