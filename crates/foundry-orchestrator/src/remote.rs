//! HTTP agents
//!
//! Model calls live in a separate agent service. These clients post the job,
//! round context and (for the coach) failing files and diagnostics as JSON
//! and read back the structured agent results.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::time::Duration;

use foundry_core::{Artifact, CompileError, Job, SessionMemory};

use crate::agents::{
    AgentContext, ArchitectAgent, CoachAgent, CoachOutput, CoderAgent, CoderOutput, ContractDesign,
};
use crate::error::{OrchestratorError, Result};

/// Shared HTTP client for the agent service
#[derive(Debug, Clone)]
pub struct AgentServiceClient {
    base_url: String,
    api_key: Option<String>,
    headers: HashMap<String, String>,
    http_client: reqwest::Client,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct JobSummary<'a> {
    job_id: String,
    requirement: &'a str,
    round: u32,
    max_rounds: u32,
    api_contract: Option<&'a str>,
    data_schema: Option<&'a str>,
}

impl<'a> JobSummary<'a> {
    fn of(job: &'a Job, round: u32) -> Self {
        Self {
            job_id: job.id.to_string(),
            requirement: &job.requirement,
            round,
            max_rounds: job.max_rounds,
            api_contract: job.contract.as_ref().map(|c| c.api_schema.as_str()),
            data_schema: job.contract.as_ref().map(|c| c.data_schema.as_str()),
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct AgentRequest<'a> {
    job: JobSummary<'a>,
    context: &'a AgentContext,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CoachRequest<'a> {
    job: JobSummary<'a>,
    context: &'a AgentContext,
    failing_files: Vec<FailingFile<'a>>,
    diagnostics: &'a [CompileError],
    repair_history: String,
    known_symbols: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct FailingFile<'a> {
    path: &'a str,
    content: &'a str,
    compiler_error: Option<&'a str>,
}

impl AgentServiceClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| OrchestratorError::agent("remote", e.to_string()))?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: None,
            headers: HashMap::new(),
            http_client,
        })
    }

    pub fn with_api_key(mut self, api_key: Option<String>) -> Self {
        self.api_key = api_key.filter(|k| !k.is_empty());
        self
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    async fn call<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        agent: &str,
        path: &str,
        body: &B,
    ) -> Result<T> {
        let mut builder = self
            .http_client
            .post(self.endpoint(path))
            .header("Content-Type", "application/json");

        if let Some(api_key) = &self.api_key {
            builder = builder.header("Authorization", format!("Bearer {}", api_key));
        }
        for (key, value) in &self.headers {
            builder = builder.header(key, value);
        }

        let response = builder
            .json(body)
            .send()
            .await
            .map_err(|e| OrchestratorError::agent(agent, format!("request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(OrchestratorError::agent(
                agent,
                format!("agent service error ({}): {}", status, error_text),
            ));
        }

        response
            .json()
            .await
            .map_err(|e| OrchestratorError::agent(agent, format!("invalid response: {e}")))
    }
}

pub struct RemoteArchitect {
    client: AgentServiceClient,
}

impl RemoteArchitect {
    pub fn new(client: AgentServiceClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ArchitectAgent for RemoteArchitect {
    async fn design(&self, job: &Job, ctx: &AgentContext) -> Result<ContractDesign> {
        let request = AgentRequest {
            job: JobSummary::of(job, ctx.round),
            context: ctx,
        };
        self.client.call("architect", "agents/architect", &request).await
    }
}

pub struct RemoteCoder {
    client: AgentServiceClient,
    target_type: String,
}

impl RemoteCoder {
    pub fn new(client: AgentServiceClient, target_type: impl Into<String>) -> Self {
        Self {
            client,
            target_type: target_type.into(),
        }
    }
}

#[async_trait]
impl CoderAgent for RemoteCoder {
    fn target_type(&self) -> &str {
        &self.target_type
    }

    async fn generate(&self, job: &Job, round: u32, ctx: &AgentContext) -> Result<CoderOutput> {
        let request = AgentRequest {
            job: JobSummary::of(job, round),
            context: ctx,
        };
        let path = format!("agents/coder/{}", self.target_type);
        self.client.call("coder", &path, &request).await
    }
}

pub struct RemoteCoach {
    client: AgentServiceClient,
}

impl RemoteCoach {
    pub fn new(client: AgentServiceClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl CoachAgent for RemoteCoach {
    async fn fix(
        &self,
        job: &Job,
        failing: &[Artifact],
        diagnostics: &[CompileError],
        ctx: &AgentContext,
        memory: &SessionMemory,
    ) -> Result<CoachOutput> {
        let request = CoachRequest {
            job: JobSummary::of(job, ctx.round),
            context: ctx,
            failing_files: failing
                .iter()
                .map(|a| FailingFile {
                    path: &a.file_path,
                    content: &a.content,
                    compiler_error: a.compiler_error.as_deref(),
                })
                .collect(),
            diagnostics,
            repair_history: memory.repair.build_coach_context(),
            known_symbols: memory.compact_context(),
        };
        self.client.call("coach", "agents/coach", &request).await
    }
}
