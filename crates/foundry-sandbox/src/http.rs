//! HTTP sandbox API client

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

use crate::error::{Result, SandboxError};
use crate::transport::{
    CreateSandboxRequest, CreatedSandbox, ExecuteResponse, SandboxFile, SandboxStatus,
    SandboxTransport,
};

const CREATE_PATH: &str = "/api/create-ai-sandbox-v2";
const WRITE_FILES_PATH: &str = "/api/sandbox/write-files";
const EXECUTE_PATH: &str = "/api/sandbox/execute";
const STATUS_PATH: &str = "/api/sandbox-status";
const KILL_PATH: &str = "/api/sandbox/kill";

/// Client for the remote sandbox service.
///
/// File paths are rebased onto `work_dir` before they are sent.
#[derive(Debug, Clone)]
pub struct HttpSandboxTransport {
    provider: String,
    base_url: String,
    work_dir: String,
    headers: HashMap<String, String>,
    http_client: reqwest::Client,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct WriteFilesRequest<'a> {
    sandbox_id: &'a str,
    files: Vec<SandboxFile>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ExecuteRequest<'a> {
    sandbox_id: &'a str,
    command: &'a str,
    timeout: u64,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct KillRequest<'a> {
    sandbox_id: &'a str,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
struct StatusResponse {
    active: bool,
    healthy: bool,
    sandbox_data: Option<StatusSandboxData>,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
struct StatusSandboxData {
    sandbox_id: Option<String>,
}

impl HttpSandboxTransport {
    pub fn new(
        base_url: impl Into<String>,
        work_dir: impl Into<String>,
        request_timeout: Duration,
    ) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| SandboxError::Transport(e.to_string()))?;

        Ok(Self {
            provider: "remote".to_string(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            work_dir: work_dir.into().trim_end_matches('/').to_string(),
            headers: HashMap::new(),
            http_client,
        })
    }

    pub fn with_provider(mut self, provider: impl Into<String>) -> Self {
        self.provider = provider.into();
        self
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn remote_path(&self, relative: &str) -> String {
        format!("{}/{}", self.work_dir, relative.trim_start_matches('/'))
    }

    fn with_headers(&self, mut builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        for (key, value) in &self.headers {
            builder = builder.header(key, value);
        }
        builder
    }

    async fn post<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T> {
        let builder = self
            .http_client
            .post(self.endpoint(path))
            .header("Content-Type", "application/json")
            .json(body);
        let response = self.with_headers(builder).send().await?;
        Self::decode(response).await
    }

    async fn decode<T: DeserializeOwned>(response: reqwest::Response) -> Result<T> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SandboxError::Status {
                status: status.as_u16(),
                body,
            });
        }
        // Some endpoints answer with an empty body
        let text = response.text().await?;
        let text = if text.trim().is_empty() { "{}" } else { text.as_str() };
        Ok(serde_json::from_str(text)?)
    }
}

#[async_trait]
impl SandboxTransport for HttpSandboxTransport {
    fn provider(&self) -> &str {
        &self.provider
    }

    async fn create(&self, request: &CreateSandboxRequest) -> Result<CreatedSandbox> {
        let mut created: CreatedSandbox = self.post(CREATE_PATH, request).await?;
        if created.sandbox_id.trim().is_empty() {
            return Err(SandboxError::Decode(
                "create response carried no sandboxId".to_string(),
            ));
        }
        if created.provider.is_empty() {
            created.provider = self.provider.clone();
        }
        Ok(created)
    }

    async fn write_files(&self, sandbox_id: &str, files: &[SandboxFile]) -> Result<()> {
        let request = WriteFilesRequest {
            sandbox_id,
            files: files
                .iter()
                .map(|f| SandboxFile {
                    path: self.remote_path(&f.path),
                    content: f.content.clone(),
                })
                .collect(),
        };
        let _: serde_json::Value = self.post(WRITE_FILES_PATH, &request).await?;
        Ok(())
    }

    async fn execute(
        &self,
        sandbox_id: &str,
        command: &str,
        timeout: Duration,
    ) -> Result<ExecuteResponse> {
        let request = ExecuteRequest {
            sandbox_id,
            command,
            timeout: timeout.as_secs(),
        };
        self.post(EXECUTE_PATH, &request).await
    }

    async fn status(&self, _sandbox_id: &str) -> Result<SandboxStatus> {
        let builder = self.http_client.get(self.endpoint(STATUS_PATH));
        let response = self.with_headers(builder).send().await?;
        let status: StatusResponse = Self::decode(response).await?;
        Ok(SandboxStatus {
            active: status.active,
            healthy: status.healthy,
            sandbox_id: status.sandbox_data.and_then(|d| d.sandbox_id),
        })
    }

    async fn kill(&self, sandbox_id: &str) -> Result<()> {
        let _: serde_json::Value = self.post(KILL_PATH, &KillRequest { sandbox_id }).await?;
        Ok(())
    }
}
