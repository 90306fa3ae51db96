//! Host-local sandboxes backed by temp directories
//!
//! Meant for development and tests. Commands run through `sh -c` with the
//! sandbox root as working directory; there is no isolation beyond that.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::process::Command;
use uuid::Uuid;

use crate::error::{Result, SandboxError};
use crate::transport::{
    CreateSandboxRequest, CreatedSandbox, ExecuteResponse, SandboxFile, SandboxStatus,
    SandboxTransport,
};

/// One temp directory. Removed on drop.
pub struct LocalSandbox {
    temp_dir: TempDir,
}

impl LocalSandbox {
    pub fn new() -> Result<Self> {
        let temp_dir = tempfile::Builder::new()
            .prefix("foundry-sandbox-")
            .tempdir()?;
        Ok(Self { temp_dir })
    }

    pub fn root(&self) -> &Path {
        self.temp_dir.path()
    }

    /// Write files under the root, creating parents. Rejects paths that
    /// would escape it.
    pub fn prepare(&self, files: &[SandboxFile]) -> Result<()> {
        for file in files {
            let full_path = self.resolve(&file.path)?;
            if let Some(parent) = full_path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(full_path, &file.content)?;
        }
        Ok(())
    }

    fn resolve(&self, relative: &str) -> Result<PathBuf> {
        let path = Path::new(relative.trim_start_matches('/'));
        let escapes = path
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
        if escapes || relative.trim().is_empty() {
            return Err(SandboxError::InvalidPath(relative.to_string()));
        }
        Ok(self.root().join(path))
    }

    pub async fn run(&self, command: &str, timeout: Duration) -> Result<ExecuteResponse> {
        let child = Command::new("sh")
            .arg("-c")
            .arg(command)
            .current_dir(self.root())
            .kill_on_drop(true)
            .output();

        let output = tokio::time::timeout(timeout, child)
            .await
            .map_err(|_| SandboxError::Timeout(timeout.as_secs()))??;

        Ok(ExecuteResponse::completed(
            output.status.code().unwrap_or(-1),
            String::from_utf8_lossy(&output.stdout),
            String::from_utf8_lossy(&output.stderr),
        ))
    }
}

/// [`SandboxTransport`] over [`LocalSandbox`]es
#[derive(Default)]
pub struct LocalSandboxTransport {
    sandboxes: Mutex<HashMap<String, Arc<LocalSandbox>>>,
}

impl LocalSandboxTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.sandboxes.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sandboxes.lock().is_empty()
    }

    fn get(&self, sandbox_id: &str) -> Result<Arc<LocalSandbox>> {
        self.sandboxes
            .lock()
            .get(sandbox_id)
            .cloned()
            .ok_or_else(|| SandboxError::UnknownSandbox(sandbox_id.to_string()))
    }
}

#[async_trait]
impl SandboxTransport for LocalSandboxTransport {
    fn provider(&self) -> &str {
        "local"
    }

    async fn create(&self, _request: &CreateSandboxRequest) -> Result<CreatedSandbox> {
        let sandbox = LocalSandbox::new()?;
        let sandbox_id = format!("local-{}", Uuid::new_v4().simple());
        let url = format!("file://{}", sandbox.root().display());
        self.sandboxes
            .lock()
            .insert(sandbox_id.clone(), Arc::new(sandbox));

        Ok(CreatedSandbox {
            sandbox_id,
            url,
            provider: self.provider().to_string(),
        })
    }

    async fn write_files(&self, sandbox_id: &str, files: &[SandboxFile]) -> Result<()> {
        self.get(sandbox_id)?.prepare(files)
    }

    async fn execute(
        &self,
        sandbox_id: &str,
        command: &str,
        timeout: Duration,
    ) -> Result<ExecuteResponse> {
        let sandbox = self.get(sandbox_id)?;
        sandbox.run(command, timeout).await
    }

    async fn status(&self, sandbox_id: &str) -> Result<SandboxStatus> {
        let alive = self
            .sandboxes
            .lock()
            .get(sandbox_id)
            .map_or(false, |s| s.root().is_dir());
        Ok(SandboxStatus {
            active: alive,
            healthy: alive,
            sandbox_id: alive.then(|| sandbox_id.to_string()),
        })
    }

    async fn kill(&self, sandbox_id: &str) -> Result<()> {
        self.sandboxes.lock().remove(sandbox_id);
        Ok(())
    }
}
