//! HTTP surface for Foundry jobs
//!
//! Submission, inspection and cancellation are plain JSON endpoints. Job
//! logs are served as server-sent events: the full history first, then live
//! entries, with heartbeat events while the job is idle.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{
        sse::{Event, Sse},
        IntoResponse,
    },
    routing::{get, post},
    Json, Router,
};
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use foundry_core::{HookPipeline, JobStore, LogEntry, SessionMemoryStore, SqliteStore};
use foundry_orchestrator::{
    AgentServiceClient, Orchestrator, PhaseValidator, RemoteArchitect, RemoteCoach, RemoteCoder,
};
use foundry_sandbox::SandboxService;

use crate::config::GatewayConfig;
use crate::{GatewayError, Result};

/// Gateway state shared across handlers
#[derive(Clone)]
pub struct GatewayState {
    pub config: GatewayConfig,
    pub orchestrator: Orchestrator,
    pub shutdown_tx: broadcast::Sender<()>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitJobRequest {
    pub requirement: String,
    pub max_rounds: Option<u32>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitJobResponse {
    pub job_id: Uuid,
}

/// Main Gateway
pub struct Gateway {
    state: Arc<GatewayState>,
}

impl Gateway {
    /// Serve an already wired orchestrator
    pub fn new(config: GatewayConfig, orchestrator: Orchestrator) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            state: Arc::new(GatewayState {
                config,
                orchestrator,
                shutdown_tx,
            }),
        }
    }

    /// Wire storage, sandbox, hooks and remote agents from configuration
    pub fn from_config(config: GatewayConfig) -> Result<Self> {
        let store = Arc::new(match &config.database_path {
            Some(path) => SqliteStore::open(path)?,
            None => SqliteStore::open_in_memory()?,
        });
        let jobs: Arc<dyn JobStore> = store.clone();
        let memory: Arc<dyn SessionMemoryStore> = store;

        let hooks = HookPipeline::from_config(&config.hooks);
        let sandbox = SandboxService::from_config(config.sandbox.clone())?.with_hooks(hooks.clone());

        let client = AgentServiceClient::new(config.agent_base_url.clone(), config.agent_timeout())?
            .with_api_key(config.agent_api_key.clone());
        let orchestrator = Orchestrator::builder(
            jobs,
            memory,
            Arc::new(RemoteArchitect::new(client.clone())),
            Arc::new(RemoteCoach::new(client.clone())),
            PhaseValidator::new(Arc::new(sandbox)),
        )
        .with_coder(Arc::new(RemoteCoder::new(
            client,
            config.orchestrator.coder_target.clone(),
        )))
        .with_hooks(hooks)
        .with_config(config.orchestrator.clone())
        .build();

        Ok(Self::new(config, orchestrator))
    }

    /// Get gateway state
    pub fn state(&self) -> Arc<GatewayState> {
        self.state.clone()
    }

    pub fn orchestrator(&self) -> &Orchestrator {
        &self.state.orchestrator
    }

    /// Build the Axum router
    pub fn build_router(&self) -> Router {
        Router::new()
            .route("/health", get(Self::handle_health))
            .route("/api/jobs", post(Self::handle_submit))
            .route("/api/jobs/:id", get(Self::handle_get_job))
            .route("/api/jobs/:id/artifacts", get(Self::handle_artifacts))
            .route("/api/jobs/:id/cancel", post(Self::handle_cancel))
            .route("/api/jobs/:id/logs", get(Self::handle_logs))
            .layer(CorsLayer::permissive())
            .layer(TraceLayer::new_for_http())
            .with_state(self.state.clone())
    }

    /// Start the gateway server. Returns after [`Self::shutdown`].
    pub async fn start(&self) -> Result<()> {
        let addr = self.state.config.socket_addr()?;
        let router = self.build_router();

        tracing::info!("Foundry gateway listening on {}", addr);

        let listener = tokio::net::TcpListener::bind(addr).await?;
        let mut shutdown_rx = self.state.shutdown_tx.subscribe();

        axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.recv().await;
            })
            .await
            .map_err(|e| GatewayError::Internal(e.to_string()))?;

        Ok(())
    }

    /// Shutdown the gateway
    pub fn shutdown(&self) {
        let _ = self.state.shutdown_tx.send(());
        tracing::info!("Gateway shutdown initiated");
    }

    async fn handle_health(State(state): State<Arc<GatewayState>>) -> impl IntoResponse {
        Json(serde_json::json!({
            "status": "healthy",
            "version": crate::VERSION,
            "coderTarget": state.orchestrator.config().coder_target,
        }))
    }

    async fn handle_submit(
        State(state): State<Arc<GatewayState>>,
        Json(request): Json<SubmitJobRequest>,
    ) -> Result<impl IntoResponse> {
        if request.requirement.trim().is_empty() {
            return Err(GatewayError::InvalidRequest(
                "requirement must not be empty".to_string(),
            ));
        }
        let job_id = state
            .orchestrator
            .submit_job(&request.requirement, request.max_rounds)?;
        Ok((StatusCode::ACCEPTED, Json(SubmitJobResponse { job_id })))
    }

    async fn handle_get_job(
        State(state): State<Arc<GatewayState>>,
        Path(id): Path<String>,
    ) -> Result<impl IntoResponse> {
        let job = state.orchestrator.get_job(parse_job_id(&id)?)?;
        Ok(Json(job))
    }

    async fn handle_artifacts(
        State(state): State<Arc<GatewayState>>,
        Path(id): Path<String>,
    ) -> Result<impl IntoResponse> {
        let artifacts = state.orchestrator.get_artifacts(parse_job_id(&id)?)?;
        Ok(Json(artifacts))
    }

    async fn handle_cancel(
        State(state): State<Arc<GatewayState>>,
        Path(id): Path<String>,
    ) -> Result<impl IntoResponse> {
        let job = state.orchestrator.cancel_job(parse_job_id(&id)?).await?;
        Ok(Json(job))
    }

    async fn handle_logs(
        State(state): State<Arc<GatewayState>>,
        Path(id): Path<String>,
    ) -> Result<Sse<impl Stream<Item = std::result::Result<Event, axum::Error>>>> {
        let entries = state.orchestrator.log_stream(parse_job_id(&id)?)?;
        Ok(Sse::new(entries.map(log_event)))
    }
}

fn parse_job_id(raw: &str) -> Result<Uuid> {
    Uuid::parse_str(raw).map_err(|_| GatewayError::InvalidRequest(format!("invalid job id '{raw}'")))
}

/// Heartbeats become `heartbeat` events, everything else a `log` event
fn log_event(entry: LogEntry) -> std::result::Result<Event, axum::Error> {
    if entry.is_heartbeat() {
        return Ok(Event::default()
            .event("heartbeat")
            .data(entry.timestamp.to_rfc3339()));
    }
    Event::default().event("log").json_data(&entry)
}
