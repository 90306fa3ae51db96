//! Orchestrator - job state machine and the repair loop
//!
//! ```text
//! submit_job ──> QUEUED ──> PLANNING ──> CODING ──> TESTING ──> SUCCESS
//!                             │            ^            │
//!                        architect         │  coach fix │  (code errors only,
//!                     (fatal on failure)   └────────────┘   round < max - 1)
//!
//!                 any non-terminal state ──> CANCELLED | FAILED
//! ```
//!
//! One job runs on one tokio task; rounds inside a job are strictly
//! sequential. Every status change is persisted before the next step, so a
//! restarted process can resume unfinished jobs from the store.

use dashmap::DashMap;
use futures::Stream;
use parking_lot::Mutex;
use std::future::Future;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use foundry_core::dependency::{render_task_plan, DependencyAnalyzer, TaskNode};
use foundry_core::hooks::HookOutcome;
use foundry_core::memory::repair::{error_signature, RepairAttempt};
use foundry_core::{
    Artifact, CompileError, ErrorType, GeneratedBy, HookContext, HookPipeline, Job, JobError,
    JobStatus, JobStore, LogEntry, LogRole, PlanningFileType, SessionMemoryService,
    SessionMemoryStore, Severity, ValidationResult,
};

use crate::agents::{AgentContext, ArchitectAgent, CoachAgent, CoderAgent, CoderRegistry, GeneratedFile};
use crate::config::OrchestratorConfig;
use crate::error::{OrchestratorError, Result};
use crate::log_hub::{LogHub, LogSubscription};
use crate::validator::{PhaseReport, PhaseValidator};

/// Pseudo file name used for diagnostics about a failed generation step
pub const GENERATION_DIAGNOSTIC_FILE: &str = "<generation>";

/// Why a round did not pass
enum RoundFailure {
    /// The coder produced nothing usable
    Generation(String),
    Validation(PhaseReport),
}

impl RoundFailure {
    fn summary(&self) -> String {
        match self {
            RoundFailure::Generation(reason) => format!("code generation failed: {reason}"),
            RoundFailure::Validation(report) => report.record.summary(),
        }
    }

    fn diagnostics(&self) -> Vec<CompileError> {
        match self {
            RoundFailure::Generation(reason) => vec![CompileError::new(
                GENERATION_DIAGNOSTIC_FILE,
                0,
                0,
                reason.clone(),
                Severity::Error,
            )],
            RoundFailure::Validation(report) => report.diagnostics.clone(),
        }
    }

    /// Environment and policy failures cannot be fixed by editing code
    fn coach_can_fix(&self) -> bool {
        match self {
            RoundFailure::Generation(_) => true,
            RoundFailure::Validation(report) => report.error_type() == ErrorType::CodeError,
        }
    }
}

/// Collaborators for an [`Orchestrator`]
pub struct OrchestratorBuilder {
    store: Arc<dyn JobStore>,
    memory_store: Arc<dyn SessionMemoryStore>,
    architect: Arc<dyn ArchitectAgent>,
    coach: Arc<dyn CoachAgent>,
    validator: PhaseValidator,
    coders: CoderRegistry,
    hooks: HookPipeline,
    config: OrchestratorConfig,
}

impl OrchestratorBuilder {
    pub fn with_coder(mut self, coder: Arc<dyn CoderAgent>) -> Self {
        self.coders.register(coder);
        self
    }

    pub fn with_coders(mut self, coders: CoderRegistry) -> Self {
        self.coders = coders;
        self
    }

    pub fn with_hooks(mut self, hooks: HookPipeline) -> Self {
        self.hooks = hooks;
        self
    }

    pub fn with_config(mut self, config: OrchestratorConfig) -> Self {
        self.config = config;
        self
    }

    pub fn build(self) -> Orchestrator {
        Orchestrator {
            inner: Arc::new(Inner {
                store: self.store,
                memory: SessionMemoryService::new(self.memory_store),
                architect: self.architect,
                coach: self.coach,
                validator: self.validator,
                coders: self.coders,
                hooks: self.hooks,
                logs: LogHub::new(self.config.log_history_capacity),
                config: self.config,
                analyzer: DependencyAnalyzer::new(),
                running: DashMap::new(),
            }),
        }
    }
}

struct Inner {
    store: Arc<dyn JobStore>,
    memory: SessionMemoryService,
    architect: Arc<dyn ArchitectAgent>,
    coach: Arc<dyn CoachAgent>,
    validator: PhaseValidator,
    coders: CoderRegistry,
    hooks: HookPipeline,
    logs: LogHub,
    config: OrchestratorConfig,
    analyzer: DependencyAnalyzer,
    /// Cancellation handles of jobs running in this process
    running: DashMap<Uuid, CancellationToken>,
}

/// Drives jobs from submission to a terminal state. Cheap to clone.
#[derive(Clone)]
pub struct Orchestrator {
    inner: Arc<Inner>,
}

impl Orchestrator {
    pub fn builder(
        store: Arc<dyn JobStore>,
        memory_store: Arc<dyn SessionMemoryStore>,
        architect: Arc<dyn ArchitectAgent>,
        coach: Arc<dyn CoachAgent>,
        validator: PhaseValidator,
    ) -> OrchestratorBuilder {
        OrchestratorBuilder {
            store,
            memory_store,
            architect,
            coach,
            validator,
            coders: CoderRegistry::new(),
            hooks: HookPipeline::new(),
            config: OrchestratorConfig::default(),
        }
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.inner.config
    }

    pub fn hooks(&self) -> &HookPipeline {
        &self.inner.hooks
    }

    pub fn memory(&self) -> &SessionMemoryService {
        &self.inner.memory
    }

    pub fn is_running(&self, job_id: Uuid) -> bool {
        self.inner.running.contains_key(&job_id)
    }

    /// Persist a QUEUED job and start it in the background
    pub fn submit_job(&self, requirement: &str, max_rounds: Option<u32>) -> Result<Uuid> {
        let job = self.create_job(requirement, max_rounds)?;
        self.spawn(job.id);
        Ok(job.id)
    }

    /// Persist a QUEUED job without starting it; see [`Self::run_job`]
    pub fn create_job(&self, requirement: &str, max_rounds: Option<u32>) -> Result<Job> {
        let mut job = Job::new(requirement, self.inner.config.rounds_for(max_rounds))?;
        self.inner.store.save_job(&job)?;
        let queued = format!("Job queued with a budget of {} round(s)", job.max_rounds);
        self.emit(&mut job, LogEntry::info(LogRole::System, queued));
        self.inner.store.save_job(&job)?;
        info!(job_id = %job.id, max_rounds = job.max_rounds, "Job submitted");
        Ok(job)
    }

    fn spawn(&self, job_id: Uuid) {
        let token = CancellationToken::new();
        self.inner.running.insert(job_id, token.clone());

        let this = self.clone();
        tokio::spawn(async move {
            if let Err(e) = this.execute(job_id, token).await {
                error!(%job_id, "Job run aborted: {}", e);
            }
            this.inner.running.remove(&job_id);
        });
    }

    /// Run a job to completion on the current task
    pub async fn run_job(&self, job_id: Uuid) -> Result<Job> {
        let token = CancellationToken::new();
        match self.inner.running.entry(job_id) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                return Err(OrchestratorError::AlreadyRunning(job_id))
            }
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(token.clone());
            }
        }
        let result = self.execute(job_id, token).await;
        self.inner.running.remove(&job_id);
        result
    }

    pub fn get_job(&self, job_id: Uuid) -> Result<Job> {
        self.load(job_id)
    }

    pub fn list_jobs(&self) -> Result<Vec<Job>> {
        Ok(self.inner.store.list_jobs()?)
    }

    /// Latest artifact per file path
    pub fn get_artifacts(&self, job_id: Uuid) -> Result<Vec<Artifact>> {
        self.load(job_id)?;
        Ok(self.inner.store.latest_artifacts(job_id)?)
    }

    /// Every artifact ever written for the job, in write order
    pub fn artifact_history(&self, job_id: Uuid) -> Result<Vec<Artifact>> {
        self.load(job_id)?;
        Ok(self.inner.store.artifacts_for_job(job_id)?)
    }

    pub fn get_artifact(&self, artifact_id: Uuid) -> Result<Option<Artifact>> {
        Ok(self.inner.store.get_artifact(artifact_id)?)
    }

    pub fn validations(&self, job_id: Uuid) -> Result<Vec<ValidationResult>> {
        self.load(job_id)?;
        Ok(self.inner.store.validations_for_job(job_id)?)
    }

    /// Full history first, then live entries
    pub fn subscribe_to_logs(&self, job_id: Uuid) -> Result<LogSubscription> {
        let job = self.load(job_id)?;
        if job.is_terminal() {
            return Ok(LogSubscription::finished(job.logs));
        }
        let subscription = self.inner.logs.subscribe(job_id, move || job.logs);

        // The job may have finished and been evicted while we subscribed
        let job = self.load(job_id)?;
        if job.is_terminal() {
            self.inner.logs.remove(job_id);
            return Ok(LogSubscription::finished(job.logs));
        }
        Ok(subscription)
    }

    /// [`Self::subscribe_to_logs`] as a stream with heartbeats
    pub fn log_stream(&self, job_id: Uuid) -> Result<impl Stream<Item = LogEntry> + Send + 'static> {
        let subscription = self.subscribe_to_logs(job_id)?;
        Ok(subscription.into_stream(self.inner.config.heartbeat_interval()))
    }

    /// Request cancellation.
    ///
    /// A job without a live runner is cancelled on the spot. A running job
    /// only gets its persisted flag set and its token fired; the runner owns
    /// the record and writes the terminal state itself, between steps or
    /// while awaiting agents or the sandbox. Terminal jobs are returned
    /// unchanged.
    pub async fn cancel_job(&self, job_id: Uuid) -> Result<Job> {
        let mut job = self.load(job_id)?;
        if job.is_terminal() {
            debug!(%job_id, status = %job.status, "Cancel ignored for finished job");
            return Ok(job);
        }

        let token = self.inner.running.get(&job_id).map(|t| t.value().clone());
        match token {
            Some(token) => {
                let recorded = self.inner.store.request_cancel(job_id)?;
                token.cancel();
                if recorded {
                    info!(%job_id, "Cancellation requested");
                } else {
                    debug!(%job_id, "Job finished before the cancellation landed");
                }
                self.load(job_id)
            }
            None => {
                job.cancel_requested = true;
                self.finish(job, JobStatus::Cancelled, "Job cancelled".to_string())
                    .await
            }
        }
    }

    /// Restart every unfinished job found in the store. Jobs with a pending
    /// cancellation are closed instead.
    pub async fn resume_incomplete(&self) -> Result<usize> {
        let mut resumed = 0;
        for job in self.inner.store.list_unfinished()? {
            if self.is_running(job.id) {
                continue;
            }
            if job.cancel_requested {
                self.finish(job, JobStatus::Cancelled, "Job cancelled".to_string())
                    .await?;
                continue;
            }
            info!(job_id = %job.id, status = %job.status, round = job.current_round, "Resuming job");
            self.spawn(job.id);
            resumed += 1;
        }
        Ok(resumed)
    }

    async fn execute(&self, job_id: Uuid, token: CancellationToken) -> Result<Job> {
        match self.drive(job_id, &token).await {
            Ok(job) => Ok(job),
            Err(e) => {
                error!(%job_id, "Job failed with internal error: {}", e);
                let job = self.load(job_id)?;
                if job.is_terminal() {
                    return Ok(job);
                }
                if token.is_cancelled() {
                    return self
                        .finish(job, JobStatus::Cancelled, "Job cancelled".to_string())
                        .await;
                }
                self.finish(job, JobStatus::Failed, format!("Internal error: {e}"))
                    .await
            }
        }
    }

    async fn drive(&self, job_id: Uuid, token: &CancellationToken) -> Result<Job> {
        let mut job = self.load(job_id)?;
        if job.is_terminal() {
            return Ok(job);
        }
        {
            let history = job.logs.clone();
            self.inner.logs.open_with(job_id, move || history);
        }
        if job.cancel_requested || token.is_cancelled() {
            return self.cancelled(job).await;
        }

        let target = self.inner.config.coder_target.clone();
        let coder = match self.inner.coders.get(&target) {
            Ok(coder) => coder,
            Err(e) => return self.finish(job, JobStatus::Failed, e.to_string()).await,
        };
        self.inner.memory.get_or_create(job.id)?;

        if !job.is_contract_locked() {
            self.transition(&mut job, JobStatus::Planning)?;
            self.emit(
                &mut job,
                LogEntry::info(LogRole::Architect, "Designing API contract and data schema"),
            );

            match self.design_contract(&job, token).await {
                Ok((api, schema)) => {
                    job.lock_contract(api, schema)?;
                    self.emit(
                        &mut job,
                        LogEntry::success(LogRole::Architect, "Contract locked"),
                    );
                    self.inner.store.save_job(&job)?;
                }
                Err(OrchestratorError::Cancelled(_)) => return self.cancelled(job).await,
                Err(e) => {
                    warn!(job_id = %job.id, "Contract design failed: {}", e);
                    return self
                        .finish(job, JobStatus::Failed, format!("Contract design failed: {e}"))
                        .await;
                }
            }
        }

        let mut tasks: Vec<TaskNode> = Vec::new();
        let first_round = job.current_round;

        for round in first_round..job.max_rounds {
            if self.cancel_pending(&mut job, token)? {
                return self.cancelled(job).await;
            }

            job.current_round = round;
            self.transition(&mut job, JobStatus::Coding)?;
            let started = format!("Round {}/{} started", round + 1, job.max_rounds);
            self.emit(&mut job, LogEntry::info(LogRole::Player, started));

            match self.refresh_plan(&job, round) {
                Ok(fresh) => tasks = fresh,
                Err(e) if tasks.is_empty() && round == first_round => {
                    return self
                        .finish(job, JobStatus::Failed, format!("Task planning failed: {e}"))
                        .await;
                }
                Err(e) => {
                    warn!(job_id = %job.id, round, "Keeping previous task plan: {}", e);
                }
            }

            let ctx = self.agent_context(&job, round, &tasks)?;
            let mut current = self.inner.store.latest_artifacts(job.id)?;

            let mut generation_failure = None;
            if round == 0 || current.is_empty() {
                match self.generate(&mut job, coder.as_ref(), round, &ctx, token).await {
                    Ok(_) => current = self.inner.store.latest_artifacts(job.id)?,
                    Err(OrchestratorError::Cancelled(_)) => return self.cancelled(job).await,
                    Err(e) => generation_failure = Some(e.to_string()),
                }
            }

            let failure = match generation_failure {
                Some(reason) => {
                    self.emit(
                        &mut job,
                        LogEntry::error(LogRole::Player, format!("Code generation failed: {reason}")),
                    );
                    RoundFailure::Generation(reason)
                }
                None => {
                    self.transition(&mut job, JobStatus::Testing)?;
                    let Some(report) = self.validate(&mut job, &current, token).await? else {
                        return self.cancelled(job).await;
                    };
                    if report.passed {
                        return self
                            .finish(
                                job,
                                JobStatus::Success,
                                format!("Build passed in round {}", round + 1),
                            )
                            .await;
                    }
                    RoundFailure::Validation(report)
                }
            };

            let summary = failure.summary();
            job.last_error = Some(summary.clone());
            self.record_failure(&mut job, round, &current, &failure)?;
            self.inner.store.save_job(&job)?;

            if job.is_last_round(round) {
                break;
            }

            if !failure.coach_can_fix() {
                self.emit(
                    &mut job,
                    LogEntry::warn(
                        LogRole::Player,
                        format!("Not a code problem ({summary}); next round re-validates without the coach"),
                    ),
                );
                continue;
            }

            if self.cancel_pending(&mut job, token)? {
                return self.cancelled(job).await;
            }

            let failing = match &failure {
                RoundFailure::Validation(report) => report.failing_artifacts(),
                RoundFailure::Generation(_) => current.clone(),
            };
            match self
                .repair(&mut job, round, &failing, &failure.diagnostics(), &ctx, token)
                .await
            {
                Ok(()) => {}
                Err(OrchestratorError::Cancelled(_)) => return self.cancelled(job).await,
                Err(e) => {
                    warn!(job_id = %job.id, round, "Coach failed: {}", e);
                    self.emit(
                        &mut job,
                        LogEntry::warn(LogRole::Coach, format!("Coach failed: {e}")),
                    );
                }
            }
            self.inner.store.save_job(&job)?;
        }

        let reason = job
            .last_error
            .clone()
            .unwrap_or_else(|| "no successful build".to_string());
        let rounds = job.max_rounds;
        self.finish(
            job,
            JobStatus::Failed,
            format!("Round budget exhausted after {rounds} round(s): {reason}"),
        )
        .await
    }

    async fn design_contract(&self, job: &Job, token: &CancellationToken) -> Result<(String, String)> {
        let ctx = AgentContext {
            max_rounds: job.max_rounds,
            ..AgentContext::default()
        };
        let architect = self.inner.architect.clone();
        let design = self
            .call_agent(job, architect.name(), &job.requirement, token, architect.design(job, &ctx))
            .await?;

        if !design.success {
            return Err(OrchestratorError::agent(
                "architect",
                design.error.unwrap_or_else(|| "no contract returned".to_string()),
            ));
        }
        if design.api_contract.trim().is_empty() && design.data_schema.trim().is_empty() {
            return Err(OrchestratorError::agent("architect", "empty contract"));
        }
        Ok((design.api_contract, design.data_schema))
    }

    /// Dependency-ordered tasks for the locked schema, appended to the task plan
    fn refresh_plan(&self, job: &Job, round: u32) -> Result<Vec<TaskNode>> {
        let tasks = self.inner.analyzer.plan(job.data_schema())?;
        self.inner.memory.append_content(
            job.id,
            PlanningFileType::TaskPlan,
            &render_task_plan(round, &tasks),
            "dependency-analyzer",
        )?;
        debug!(job_id = %job.id, round, tasks = tasks.len(), "Task plan refreshed");
        Ok(tasks)
    }

    fn agent_context(&self, job: &Job, round: u32, tasks: &[TaskNode]) -> Result<AgentContext> {
        let memory = self.inner.memory.get_or_create(job.id)?;
        let mut ctx = AgentContext {
            round,
            max_rounds: job.max_rounds,
            tasks: tasks.to_vec(),
            task_plan: memory.content(PlanningFileType::TaskPlan).to_string(),
            known_symbols: memory.compact_context(),
            ..AgentContext::default()
        };
        ctx.metadata
            .insert("coderTarget".to_string(), self.inner.config.coder_target.clone());
        Ok(ctx)
    }

    async fn generate(
        &self,
        job: &mut Job,
        coder: &dyn CoderAgent,
        round: u32,
        ctx: &AgentContext,
        token: &CancellationToken,
    ) -> Result<usize> {
        self.emit(
            job,
            LogEntry::info(
                LogRole::Player,
                format!("Generating {} task(s) with the {} coder", ctx.tasks.len(), coder.target_type()),
            ),
        );

        let snapshot = job.clone();
        let output = self
            .call_agent(
                &snapshot,
                "coder",
                &snapshot.requirement,
                token,
                coder.generate(&snapshot, round, ctx),
            )
            .await?;

        if !output.success {
            return Err(OrchestratorError::agent(
                "coder",
                output.error.unwrap_or_else(|| "coder reported failure".to_string()),
            ));
        }
        if output.files.is_empty() {
            return Err(OrchestratorError::agent("coder", "no files generated"));
        }

        let count = self.persist_files(job, output.files, round, GeneratedBy::Coder, "coder")?;
        self.emit(
            job,
            LogEntry::success(LogRole::Player, format!("Generated {count} file(s)")),
        );
        Ok(count)
    }

    /// Run the phase validator; `None` when cancelled mid-flight
    async fn validate(
        &self,
        job: &mut Job,
        artifacts: &[Artifact],
        token: &CancellationToken,
    ) -> Result<Option<PhaseReport>> {
        let buffered = Arc::new(Mutex::new(Vec::new()));
        let sink = {
            let inner = self.inner.clone();
            let buffered = buffered.clone();
            let job_id = job.id;
            move |entry: LogEntry| {
                inner.logs.publish(job_id, entry.clone());
                buffered.lock().push(entry);
            }
        };

        let snapshot = job.clone();
        let report = tokio::select! {
            report = self.inner.validator.validate_all(&snapshot, artifacts, &sink) => report,
            _ = token.cancelled() => return Ok(None),
        };
        job.logs.append(&mut buffered.lock());

        for attempt in &report.attempts {
            self.inner.store.save_validation(attempt)?;
        }
        for artifact in &report.artifacts {
            self.inner.store.save_artifact(artifact)?;
        }
        match &report.sandbox {
            Some(info) => job.attach_sandbox(info),
            None => job.clear_sandbox(),
        }
        job.metadata.insert(
            "lastValidation".to_string(),
            serde_json::to_value(&report.extra)?,
        );
        self.inner.store.save_job(job)?;
        Ok(Some(report))
    }

    fn record_failure(
        &self,
        job: &mut Job,
        round: u32,
        current: &[Artifact],
        failure: &RoundFailure,
    ) -> Result<()> {
        let diagnostics = failure.diagnostics();
        let files = match failure {
            RoundFailure::Validation(report) => report
                .artifacts
                .iter()
                .filter(|a| a.has_errors)
                .map(|a| a.file_path.clone())
                .collect(),
            RoundFailure::Generation(_) => current.iter().map(|a| a.file_path.clone()).collect(),
        };
        let attempt = RepairAttempt::new(round, files, false, failure.summary()).for_errors(&diagnostics);
        self.inner.memory.add_repair_attempt(job.id, attempt)?;

        // Environment noise says nothing about the code
        let code_failure = failure.coach_can_fix();
        if code_failure {
            let signature = error_signature(&diagnostics);
            let stalled = self
                .inner
                .memory
                .record_error_signature(job.id, signature.as_deref())?;
            if stalled {
                self.emit(
                    job,
                    LogEntry::warn(
                        LogRole::Coach,
                        "The same errors keep coming back; repairs are not converging",
                    ),
                );
            }
        }
        Ok(())
    }

    async fn repair(
        &self,
        job: &mut Job,
        round: u32,
        failing: &[Artifact],
        diagnostics: &[CompileError],
        ctx: &AgentContext,
        token: &CancellationToken,
    ) -> Result<()> {
        self.emit(
            job,
            LogEntry::info(
                LogRole::Coach,
                format!(
                    "Repairing {} file(s) against {} diagnostic(s)",
                    failing.len(),
                    diagnostics.len()
                ),
            ),
        );

        let memory = self.inner.memory.get_or_create(job.id)?;
        let snapshot = job.clone();
        let coach = self.inner.coach.clone();
        let input = diagnostics
            .iter()
            .map(CompileError::to_string)
            .collect::<Vec<_>>()
            .join("\n");
        let output = self
            .call_agent(
                &snapshot,
                coach.name(),
                &input,
                token,
                coach.fix(&snapshot, failing, diagnostics, ctx, &memory),
            )
            .await?;

        if !output.success {
            return Err(OrchestratorError::agent(
                "coach",
                output.error.unwrap_or_else(|| "coach reported failure".to_string()),
            ));
        }

        let next_round = round + 1;
        let paths: Vec<String> = output.fixed_files.iter().map(|f| f.path.clone()).collect();
        let count = self.persist_files(job, output.fixed_files, next_round, GeneratedBy::Coach, "coach")?;

        let summary = if output.summary.trim().is_empty() {
            format!("Fixed {count} file(s)")
        } else {
            output.summary
        };
        self.inner.memory.append_content(
            job.id,
            PlanningFileType::Notes,
            &format!("Round {} coach: {}", round + 1, summary),
            "coach",
        )?;
        self.inner
            .memory
            .add_repair_attempt(job.id, RepairAttempt::new(next_round, paths, true, summary.clone()))?;

        self.emit(
            job,
            LogEntry::success(LogRole::Coach, format!("Applied {count} fix(es): {summary}")),
        );
        Ok(())
    }

    fn persist_files(
        &self,
        job: &Job,
        files: Vec<GeneratedFile>,
        round: u32,
        generated_by: GeneratedBy,
        author: &str,
    ) -> Result<usize> {
        let artifacts: Vec<Artifact> = files
            .into_iter()
            .filter(|f| !f.path.trim().is_empty())
            .map(|f| f.into_artifact(job, round, generated_by))
            .collect();
        for artifact in &artifacts {
            self.inner.store.save_artifact(artifact)?;
        }
        self.inner.memory.index_sources(
            job.id,
            artifacts
                .iter()
                .map(|a| (a.file_path.as_str(), a.content.as_str())),
            author,
        )?;
        Ok(artifacts.len())
    }

    /// Gate an agent call through the hook pipeline and the job's cancellation
    async fn call_agent<T, F>(
        &self,
        job: &Job,
        agent: &str,
        input: &str,
        token: &CancellationToken,
        call: F,
    ) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        let ctx = HookContext::model(agent, input)
            .with_job(job.id)
            .with_metadata("round", job.current_round.to_string());

        let decision = self.inner.hooks.before_model(&ctx);
        if decision.is_blocked() {
            return Err(OrchestratorError::Blocked(decision.describe()));
        }

        let result = tokio::select! {
            result = call => result,
            _ = token.cancelled() => Err(OrchestratorError::Cancelled(job.id)),
        };

        let outcome = match &result {
            Ok(_) => HookOutcome::ok(format!("{agent} completed")),
            Err(e) => HookOutcome::failed(e.to_string()),
        };
        self.inner.hooks.after_model(&ctx, &outcome);
        result
    }

    fn transition(&self, job: &mut Job, next: JobStatus) -> Result<()> {
        let previous = job.status;
        job.transition_to(next)?;
        self.inner.store.save_job(job)?;
        if previous != next {
            debug!(job_id = %job.id, from = %previous, to = %next, "Job status changed");
        }
        Ok(())
    }

    async fn cancelled(&self, job: Job) -> Result<Job> {
        self.finish(job, JobStatus::Cancelled, "Job cancelled".to_string())
            .await
    }

    /// Enter a terminal state, release the sandbox and close the log stream
    async fn finish(&self, mut job: Job, status: JobStatus, message: String) -> Result<Job> {
        if let Err(e) = job.transition_to(status) {
            warn!(job_id = %job.id, "Cannot finish job: {}", e);
            return Ok(job);
        }

        let entry = match status {
            JobStatus::Success => LogEntry::success(LogRole::Player, message),
            JobStatus::Cancelled => {
                job.cancel_requested = true;
                LogEntry::warn(LogRole::System, message)
            }
            _ => {
                job.last_error = Some(message.clone());
                LogEntry::error(LogRole::Player, message)
            }
        };
        self.emit(&mut job, entry);

        if self.inner.config.release_sandbox_on_finish && job.sandbox_id.is_some() {
            self.inner.validator.release(&job).await;
            job.clear_sandbox();
        }

        self.inner.store.save_job(&job)?;
        // Late subscribers replay from the stored job
        self.inner.logs.close(job.id);
        self.inner.logs.remove(job.id);
        info!(job_id = %job.id, status = %job.status, rounds = job.current_round + 1, "Job finished");
        Ok(job)
    }

    fn emit(&self, job: &mut Job, entry: LogEntry) {
        job.push_log(entry.clone());
        self.inner.logs.publish(job.id, entry);
    }

    /// Token fired here, or a cancellation recorded in the store, possibly
    /// by another process
    fn cancel_pending(&self, job: &mut Job, token: &CancellationToken) -> Result<bool> {
        if !job.cancel_requested {
            job.cancel_requested = self
                .inner
                .store
                .get_job(job.id)?
                .is_some_and(|stored| stored.cancel_requested);
        }
        Ok(job.cancel_requested || token.is_cancelled())
    }

    fn load(&self, job_id: Uuid) -> Result<Job> {
        self.inner
            .store
            .get_job(job_id)?
            .ok_or_else(|| JobError::NotFound(job_id).into())
    }
}

#[cfg(test)]
mod tests;
