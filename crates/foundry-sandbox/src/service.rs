//! Sandbox Service: environment lifecycle, file sync, build and classification

use chrono::Utc;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use foundry_core::diagnostics::{failure_snippet, EnvironmentFault};
use foundry_core::hooks::{HookOutcome, SANDBOX_EXECUTE_TOOL};
use foundry_core::{
    Artifact, ErrorType, GeneratedBy, HookContext, HookPipeline, Job, LogEntry, LogRole,
    SandboxInfo, ValidationResult,
};

use crate::compile::CompileResult;
use crate::config::{SandboxConfig, TransportKind};
use crate::error::Result;
use crate::http::HttpSandboxTransport;
use crate::local::LocalSandboxTransport;
use crate::scaffold::ensure_build_file;
use crate::transport::{CreateSandboxRequest, SandboxFile, SandboxTransport};

/// Receives operator-facing progress entries
pub type LogSink = dyn Fn(LogEntry) + Send + Sync;

/// Everything one `validate` call produced
#[derive(Debug, Clone)]
pub struct ValidationOutcome {
    /// One per attempt, in order. Only the last one gates the round.
    pub results: Vec<ValidationResult>,
    /// Artifacts as synced (scaffolded build file included) with error flags applied
    pub artifacts: Vec<Artifact>,
    /// Sandbox in use after the call, if any survived
    pub sandbox: Option<SandboxInfo>,
}

impl ValidationOutcome {
    pub fn last(&self) -> Option<&ValidationResult> {
        self.results.last()
    }

    pub fn passed(&self) -> bool {
        self.last().map_or(false, |r| r.passed)
    }

    /// Artifacts that did not come from the caller
    pub fn scaffolded(&self) -> impl Iterator<Item = &Artifact> {
        self.artifacts
            .iter()
            .filter(|a| a.generated_by == GeneratedBy::System)
    }
}

pub struct SandboxService {
    transport: Arc<dyn SandboxTransport>,
    config: SandboxConfig,
    hooks: HookPipeline,
}

impl SandboxService {
    pub fn new(transport: Arc<dyn SandboxTransport>, config: SandboxConfig) -> Self {
        Self {
            transport,
            config,
            hooks: HookPipeline::new(),
        }
    }

    /// Build the transport named by the config
    pub fn from_config(config: SandboxConfig) -> Result<Self> {
        let transport: Arc<dyn SandboxTransport> = match config.transport {
            TransportKind::Http => Arc::new(HttpSandboxTransport::new(
                &config.base_url,
                &config.work_dir,
                config.request_timeout(),
            )?),
            TransportKind::Local => Arc::new(LocalSandboxTransport::new()),
        };
        Ok(Self::new(transport, config))
    }

    pub fn with_hooks(mut self, hooks: HookPipeline) -> Self {
        self.hooks = hooks;
        self
    }

    pub fn config(&self) -> &SandboxConfig {
        &self.config
    }

    pub fn provider(&self) -> &str {
        self.transport.provider()
    }

    pub async fn create_sandbox(&self, job: &Job) -> Result<SandboxInfo> {
        let request = CreateSandboxRequest {
            template: self.config.template.clone(),
            timeout: self.config.compile_timeout_secs,
        };
        let created = self.transport.create(&request).await?;
        let provider = if created.provider.is_empty() {
            self.transport.provider().to_string()
        } else {
            created.provider
        };

        info!(job_id = %job.id, sandbox_id = %created.sandbox_id, %provider, "Sandbox created");
        Ok(SandboxInfo {
            sandbox_id: created.sandbox_id,
            url: created.url,
            provider,
            created_at: Utc::now(),
        })
    }

    /// Write every artifact into the sandbox project root
    pub async fn sync_files(&self, sandbox_id: &str, artifacts: &[Artifact]) -> Result<usize> {
        let files: Vec<SandboxFile> = artifacts
            .iter()
            .map(|a| SandboxFile {
                path: a.file_path.clone(),
                content: a.content.clone(),
            })
            .collect();
        self.transport.write_files(sandbox_id, &files).await?;
        debug!(sandbox_id, files = files.len(), "Files synced");
        Ok(files.len())
    }

    /// Run the build command. Never fails: transport problems come back as
    /// environment errors, policy refusals as `ErrorType::Unknown`.
    pub async fn run_build(&self, sandbox_id: &str, job_id: Uuid) -> CompileResult {
        let command = self.config.build_command.as_str();
        let ctx = HookContext::tool(SANDBOX_EXECUTE_TOOL, command)
            .with_job(job_id)
            .with_metadata("sandbox_id", sandbox_id);

        let decision = self.hooks.before_tool(&ctx);
        if decision.is_blocked() {
            warn!(%job_id, sandbox_id, "Build command blocked: {}", decision.describe());
            return CompileResult::blocked(decision.describe());
        }

        let started = Instant::now();
        let result = match self
            .transport
            .execute(sandbox_id, command, self.config.compile_timeout())
            .await
        {
            Ok(response) => CompileResult::interpret(
                &response,
                self.config.honor_return_code_marker,
                &self.config.build_file,
            ),
            Err(e) => CompileResult::environment(EnvironmentFault::Transport(e.to_string())),
        };

        let outcome = if result.success {
            HookOutcome::ok(format!("exit code {}", result.exit_code))
        } else {
            HookOutcome::failed(
                result
                    .message
                    .clone()
                    .unwrap_or_else(|| format!("exit code {}", result.exit_code)),
            )
        };
        self.hooks.after_tool(&ctx, &outcome);

        debug!(
            %job_id,
            sandbox_id,
            exit_code = result.exit_code,
            error_type = ?result.error_type,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Build finished"
        );
        result
    }

    /// Errors are logged and swallowed
    pub async fn destroy_sandbox(&self, sandbox_id: &str) {
        match self.transport.kill(sandbox_id).await {
            Ok(()) => info!(sandbox_id, "Sandbox destroyed"),
            Err(e) => warn!(sandbox_id, "Failed to destroy sandbox: {}", e),
        }
    }

    pub async fn is_sandbox_alive(&self, sandbox_id: &str) -> bool {
        match self.transport.status(sandbox_id).await {
            Ok(status) => status.is_alive_for(sandbox_id),
            Err(e) => {
                debug!(sandbox_id, "Sandbox status check failed: {}", e);
                false
            }
        }
    }

    /// Compile the artifacts for the job's current round.
    ///
    /// Reuses the job's sandbox while it is alive. On an environment error
    /// the sandbox is killed, the configured delay elapses and the whole
    /// create/sync/build sequence runs again, up to `env_retry_attempts`
    /// attempts in total.
    pub async fn validate(
        &self,
        job: &Job,
        artifacts: &[Artifact],
        log: &LogSink,
    ) -> ValidationOutcome {
        let mut artifacts = ensure_build_file(job, artifacts, &self.config.build_file);
        let mut sandbox = job.sandbox_id.as_ref().map(|id| SandboxInfo {
            sandbox_id: id.clone(),
            url: job.sandbox_url.clone().unwrap_or_default(),
            provider: job
                .sandbox_provider
                .clone()
                .unwrap_or_else(|| self.provider().to_string()),
            created_at: Utc::now(),
        });

        let max_attempts = self.config.max_attempts();
        let mut results = Vec::with_capacity(1);
        let mut last = None;

        for attempt in 1..=max_attempts {
            let result = self.attempt(job, &mut sandbox, &artifacts, log).await;
            results.push(
                result
                    .to_draft()
                    .finish(job.id, job.current_round, attempt),
            );

            if !result.is_environment_error() || attempt == max_attempts {
                last = Some(result);
                break;
            }

            let reason = result.message.as_deref().unwrap_or("sandbox failure");
            warn!(job_id = %job.id, round = job.current_round, attempt, "Environment error: {}", reason);
            log(LogEntry::warn(
                LogRole::Executor,
                format!(
                    "Environment error ({reason}); resetting sandbox and retrying ({}/{max_attempts})",
                    attempt + 1
                ),
            ));

            if let Some(info) = sandbox.take() {
                self.destroy_sandbox(&info.sandbox_id).await;
            }
            let delay = self.config.retry_delay();
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
        }

        if let Some(result) = &last {
            self.report(job, result, log);
            Self::update_artifact_errors(&mut artifacts, result, &self.config.build_file);
        }

        ValidationOutcome {
            results,
            artifacts,
            sandbox,
        }
    }

    async fn attempt(
        &self,
        job: &Job,
        sandbox: &mut Option<SandboxInfo>,
        artifacts: &[Artifact],
        log: &LogSink,
    ) -> CompileResult {
        let reusable = match sandbox.as_ref() {
            Some(info) => self.is_sandbox_alive(&info.sandbox_id).await,
            None => false,
        };

        if !reusable {
            match self.create_sandbox(job).await {
                Ok(info) => {
                    log(LogEntry::info(
                        LogRole::Executor,
                        format!("Sandbox ready: {} ({})", info.sandbox_id, info.provider),
                    ));
                    *sandbox = Some(info);
                }
                Err(e) => {
                    *sandbox = None;
                    return CompileResult::environment(EnvironmentFault::Transport(format!(
                        "create failed: {e}"
                    )));
                }
            }
        }

        let Some(info) = sandbox.as_ref() else {
            return CompileResult::environment(EnvironmentFault::NoActiveSandbox);
        };

        match self.sync_files(&info.sandbox_id, artifacts).await {
            Ok(count) => log(LogEntry::info(
                LogRole::Executor,
                format!("Synced {count} file(s), running `{}`", self.config.build_command),
            )),
            Err(e) => {
                return CompileResult::environment(EnvironmentFault::Transport(format!(
                    "file sync failed: {e}"
                )))
            }
        }

        self.run_build(&info.sandbox_id, job.id).await
    }

    fn report(&self, job: &Job, result: &CompileResult, log: &LogSink) {
        if result.success {
            info!(job_id = %job.id, round = job.current_round, "Build passed");
            log(LogEntry::success(LogRole::Executor, "Build passed"));
            return;
        }

        match result.error_type {
            ErrorType::EnvironmentError => {
                let reason = result.message.as_deref().unwrap_or("sandbox failure");
                warn!(job_id = %job.id, round = job.current_round, "Environment error persisted: {}", reason);
                log(LogEntry::warn(
                    LogRole::Executor,
                    format!("Environment error (not a code problem): {reason}"),
                ));
            }
            ErrorType::Unknown => {
                let reason = result.message.as_deref().unwrap_or("unknown cause");
                log(LogEntry::error(LogRole::Executor, format!("Build not run: {reason}")));
            }
            _ => {
                info!(
                    job_id = %job.id,
                    round = job.current_round,
                    errors = result.error_count(),
                    "Build failed with compile errors"
                );
                let mut message = format!(
                    "Build failed: {} compile error(s), exit code {}",
                    result.error_count(),
                    result.exit_code
                );
                let snippet = failure_snippet(&result.output());
                if !snippet.is_empty() {
                    message.push('\n');
                    message.push_str(&snippet);
                }
                log(LogEntry::error(LogRole::Executor, message));
            }
        }
    }

    /// Flag artifacts named by the diagnostics and clear the rest.
    ///
    /// A code failure that names no known artifact is pinned on the build
    /// file so the coach still has something to fix.
    pub fn update_artifact_errors(
        artifacts: &mut [Artifact],
        result: &CompileResult,
        build_file: &str,
    ) -> usize {
        let mut flagged = 0;
        for artifact in artifacts.iter_mut() {
            match artifact.render_errors(&result.errors) {
                Some(rendered) if !result.success => {
                    artifact.mark_error(rendered);
                    flagged += 1;
                }
                _ => artifact.clear_error(),
            }
        }

        if flagged == 0 && result.error_type == ErrorType::CodeError {
            if let Some(build) = artifacts.iter_mut().find(|a| a.file_name() == build_file) {
                let summary = result
                    .message
                    .clone()
                    .unwrap_or_else(|| failure_snippet(&result.output()));
                build.mark_error(summary);
                flagged = 1;
            }
        }
        flagged
    }
}

#[cfg(test)]
mod tests;
