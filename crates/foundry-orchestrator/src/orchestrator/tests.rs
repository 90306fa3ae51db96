use super::*;
use async_trait::async_trait;
use chrono::Utc;
use futures::StreamExt;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use foundry_core::{HookHandler, HookResult, InMemoryStore, SandboxInfo, SessionMemory, ValidationDraft};
use foundry_sandbox::{LogSink, ValidationOutcome};

use crate::agents::{CoachOutput, CoderOutput, ContractDesign};
use crate::validator::ValidationBackend;

const SCHEMA: &str = "CREATE TABLE users (id BIGINT PRIMARY KEY, name VARCHAR(64));";
const ENTITY_PATH: &str = "src/main/java/com/foundry/generated/entity/UsersEntity.java";

struct MockArchitect {
    calls: AtomicUsize,
    schema: &'static str,
    fail: bool,
}

#[async_trait]
impl ArchitectAgent for MockArchitect {
    async fn design(&self, _job: &Job, _ctx: &AgentContext) -> Result<ContractDesign> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Ok(ContractDesign::failed("model unavailable"));
        }
        Ok(ContractDesign::ok("openapi: 3.0.0\npaths: {}", self.schema))
    }
}

struct MockCoder {
    calls: AtomicUsize,
    fail: bool,
}

#[async_trait]
impl CoderAgent for MockCoder {
    fn target_type(&self) -> &str {
        "backend"
    }

    async fn generate(&self, job: &Job, _round: u32, ctx: &AgentContext) -> Result<CoderOutput> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Ok(CoderOutput::failed("token limit exceeded"));
        }
        assert_eq!(ctx.tasks.is_empty(), job.data_schema().trim().is_empty());
        Ok(CoderOutput::ok(vec![GeneratedFile::new(
            ENTITY_PATH,
            "package com.foundry.generated.entity;\n\npublic class UsersEntity {\n    private Long id\n}\n",
        )]))
    }
}

struct MockCoach {
    calls: AtomicUsize,
    diagnostics_seen: Mutex<Vec<usize>>,
}

#[async_trait]
impl CoachAgent for MockCoach {
    async fn fix(
        &self,
        _job: &Job,
        failing: &[Artifact],
        diagnostics: &[CompileError],
        _ctx: &AgentContext,
        memory: &SessionMemory,
    ) -> Result<CoachOutput> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        self.diagnostics_seen.lock().push(diagnostics.len());
        assert!(memory.repair.attempt_count() >= 1);
        let path = failing
            .first()
            .map(|a| a.file_path.clone())
            .unwrap_or_else(|| ENTITY_PATH.to_string());
        Ok(CoachOutput::ok(
            vec![GeneratedFile::new(
                path,
                format!(
                    "package com.foundry.generated.entity;\n\npublic class UsersEntity {{\n    private Long id; // fix {n}\n}}\n"
                ),
            )],
            format!("added missing semicolon ({n})"),
        ))
    }
}

/// Hands out scripted drafts in order, repeating the last one
struct ScriptedBackend {
    script: Mutex<VecDeque<ValidationDraft>>,
    last: Mutex<ValidationDraft>,
    calls: AtomicUsize,
    released: AtomicUsize,
    delay: Option<Duration>,
}

#[async_trait]
impl ValidationBackend for ScriptedBackend {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn validate(&self, job: &Job, artifacts: &[Artifact], log: &LogSink) -> ValidationOutcome {
        self.calls.fetch_add(1, Ordering::SeqCst);
        log(LogEntry::info(LogRole::Executor, "Compiling"));
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let draft = match self.script.lock().pop_front() {
            Some(draft) => {
                *self.last.lock() = draft.clone();
                draft
            }
            None => self.last.lock().clone(),
        };

        let mut artifacts = artifacts.to_vec();
        for artifact in &mut artifacts {
            match artifact.render_errors(&draft.errors) {
                Some(message) => artifact.mark_error(message),
                None => artifact.clear_error(),
            }
        }

        ValidationOutcome {
            results: vec![draft.finish(job.id, job.current_round, 1)],
            artifacts,
            sandbox: Some(SandboxInfo {
                sandbox_id: "sbx-1".to_string(),
                url: "http://sandbox.local".to_string(),
                provider: "scripted".to_string(),
                created_at: Utc::now(),
            }),
        }
    }

    async fn release(&self, _job: &Job) {
        self.released.fetch_add(1, Ordering::SeqCst);
    }
}

fn passed() -> ValidationDraft {
    ValidationDraft {
        passed: true,
        error_type: Some(ErrorType::None),
        ..ValidationDraft::default()
    }
}

fn code_error() -> ValidationDraft {
    ValidationDraft {
        exit_code: 1,
        errors: vec![CompileError::new(
            format!("/home/user/app/{ENTITY_PATH}"),
            4,
            20,
            "';' expected",
            Severity::Error,
        )],
        error_type: Some(ErrorType::CodeError),
        ..ValidationDraft::default()
    }
}

fn env_error() -> ValidationDraft {
    ValidationDraft {
        exit_code: -1,
        error_type: Some(ErrorType::EnvironmentError),
        message: Some("Sandbox not found".to_string()),
        ..ValidationDraft::default()
    }
}

struct Harness {
    orchestrator: Orchestrator,
    store: Arc<InMemoryStore>,
    architect: Arc<MockArchitect>,
    coder: Arc<MockCoder>,
    coach: Arc<MockCoach>,
    backend: Arc<ScriptedBackend>,
}

struct Setup {
    script: Vec<ValidationDraft>,
    schema: &'static str,
    architect_fails: bool,
    coder_fails: bool,
    delay: Option<Duration>,
    hooks: HookPipeline,
    log_capacity: usize,
}

impl Default for Setup {
    fn default() -> Self {
        Self {
            script: vec![passed()],
            schema: SCHEMA,
            architect_fails: false,
            coder_fails: false,
            delay: None,
            hooks: HookPipeline::new(),
            log_capacity: 2000,
        }
    }
}

fn harness(setup: Setup) -> Harness {
    let store = Arc::new(InMemoryStore::new());
    let architect = Arc::new(MockArchitect {
        calls: AtomicUsize::new(0),
        schema: setup.schema,
        fail: setup.architect_fails,
    });
    let coder = Arc::new(MockCoder {
        calls: AtomicUsize::new(0),
        fail: setup.coder_fails,
    });
    let coach = Arc::new(MockCoach {
        calls: AtomicUsize::new(0),
        diagnostics_seen: Mutex::new(Vec::new()),
    });
    let backend = Arc::new(ScriptedBackend {
        script: Mutex::new(setup.script.into()),
        last: Mutex::new(passed()),
        calls: AtomicUsize::new(0),
        released: AtomicUsize::new(0),
        delay: setup.delay,
    });

    let orchestrator = Orchestrator::builder(
        store.clone(),
        store.clone(),
        architect.clone(),
        coach.clone(),
        PhaseValidator::new(backend.clone()),
    )
    .with_coder(coder.clone())
    .with_hooks(setup.hooks)
    .with_config(OrchestratorConfig {
        heartbeat_interval_secs: 60,
        log_history_capacity: setup.log_capacity,
        ..OrchestratorConfig::default()
    })
    .build();

    Harness {
        orchestrator,
        store,
        architect,
        coder,
        coach,
        backend,
    }
}

async fn wait_until<F: Fn() -> bool>(condition: F) {
    for _ in 0..500 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached in time");
}

#[tokio::test]
async fn test_success_after_two_repairs() {
    let h = harness(Setup {
        script: vec![code_error(), code_error(), passed()],
        ..Setup::default()
    });
    let job = h.orchestrator.create_job("user directory service", Some(3)).unwrap();

    let job = h.orchestrator.run_job(job.id).await.unwrap();

    assert_eq!(job.status, JobStatus::Success);
    assert_eq!(job.current_round, 2);
    assert!(job.is_contract_locked());
    assert_eq!(h.architect.calls.load(Ordering::SeqCst), 1);
    assert_eq!(h.coder.calls.load(Ordering::SeqCst), 1);
    assert_eq!(h.coach.calls.load(Ordering::SeqCst), 2);
    assert_eq!(*h.coach.diagnostics_seen.lock(), vec![1, 1]);
    assert_eq!(h.backend.calls.load(Ordering::SeqCst), 3);

    // Sandbox released and detached on finish
    assert_eq!(h.backend.released.load(Ordering::SeqCst), 1);
    assert!(job.sandbox_id.is_none());
    assert!(!h.orchestrator.is_running(job.id));

    let stored = h.orchestrator.get_job(job.id).unwrap();
    assert_eq!(stored.status, JobStatus::Success);
    assert_eq!(h.orchestrator.validations(job.id).unwrap().len(), 3);
}

#[tokio::test]
async fn test_round_budget_exhausted() {
    let h = harness(Setup {
        script: vec![code_error()],
        ..Setup::default()
    });
    let job = h.orchestrator.create_job("user directory service", Some(3)).unwrap();

    let job = h.orchestrator.run_job(job.id).await.unwrap();

    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.current_round, 2);
    // No repair after the last round
    assert_eq!(h.coach.calls.load(Ordering::SeqCst), 2);
    assert_eq!(h.backend.calls.load(Ordering::SeqCst), 3);
    assert!(job.last_error.unwrap().contains("Round budget exhausted"));
}

#[tokio::test]
async fn test_environment_errors_never_reach_coach() {
    let h = harness(Setup {
        script: vec![env_error()],
        ..Setup::default()
    });
    let job = h.orchestrator.create_job("user directory service", Some(3)).unwrap();

    let job = h.orchestrator.run_job(job.id).await.unwrap();

    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(h.coach.calls.load(Ordering::SeqCst), 0);
    assert_eq!(h.coder.calls.load(Ordering::SeqCst), 1);
    assert_eq!(h.backend.calls.load(Ordering::SeqCst), 3);

    let validations = h.orchestrator.validations(job.id).unwrap();
    assert!(validations.iter().all(|v| v.is_environment_error()));
}

#[tokio::test]
async fn test_environment_error_then_pass_without_coach() {
    let h = harness(Setup {
        script: vec![env_error(), passed()],
        ..Setup::default()
    });
    let job = h.orchestrator.create_job("user directory service", None).unwrap();

    let job = h.orchestrator.run_job(job.id).await.unwrap();

    assert_eq!(job.status, JobStatus::Success);
    assert_eq!(job.current_round, 1);
    assert_eq!(h.coach.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_architect_failure_is_fatal() {
    let h = harness(Setup {
        architect_fails: true,
        ..Setup::default()
    });
    let job = h.orchestrator.create_job("user directory service", None).unwrap();

    let job = h.orchestrator.run_job(job.id).await.unwrap();

    assert_eq!(job.status, JobStatus::Failed);
    assert!(!job.is_contract_locked());
    assert!(job.last_error.unwrap().contains("Contract design failed"));
    assert_eq!(h.coder.calls.load(Ordering::SeqCst), 0);
    assert_eq!(h.backend.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_schema_cycle_is_fatal() {
    let h = harness(Setup {
        schema: "CREATE TABLE a (id INT, b_id INT REFERENCES b(id));\n\
                 CREATE TABLE b (id INT, a_id INT REFERENCES a(id));",
        ..Setup::default()
    });
    let job = h.orchestrator.create_job("two tables", None).unwrap();

    let job = h.orchestrator.run_job(job.id).await.unwrap();

    assert_eq!(job.status, JobStatus::Failed);
    assert!(job.last_error.unwrap().contains("Task planning failed"));
    assert_eq!(h.coder.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_generation_failure_goes_to_coach() {
    let h = harness(Setup {
        coder_fails: true,
        ..Setup::default()
    });
    let job = h.orchestrator.create_job("user directory service", None).unwrap();

    let job = h.orchestrator.run_job(job.id).await.unwrap();

    // Round 1 fails in generation, the coach supplies the file, round 2 passes
    assert_eq!(job.status, JobStatus::Success);
    assert_eq!(h.coder.calls.load(Ordering::SeqCst), 1);
    assert_eq!(h.coach.calls.load(Ordering::SeqCst), 1);
    assert_eq!(h.backend.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_artifacts_are_retained_across_rounds() {
    let h = harness(Setup {
        script: vec![code_error(), passed()],
        ..Setup::default()
    });
    let job = h.orchestrator.create_job("user directory service", None).unwrap();
    let job = h.orchestrator.run_job(job.id).await.unwrap();
    assert_eq!(job.status, JobStatus::Success);

    let history = h.orchestrator.artifact_history(job.id).unwrap();
    assert_eq!(history.len(), 2);
    let original = history
        .iter()
        .find(|a| a.generated_by == GeneratedBy::Coder)
        .unwrap();
    assert!(original.has_errors);
    assert!(h.orchestrator.get_artifact(original.id).unwrap().is_some());

    let latest = h.orchestrator.get_artifacts(job.id).unwrap();
    assert_eq!(latest.len(), 1);
    assert_eq!(latest[0].generated_by, GeneratedBy::Coach);
    assert_eq!(latest[0].round, 1);
    assert!(!latest[0].has_errors);

    let memory = h.orchestrator.memory().get(job.id).unwrap().unwrap();
    assert!(memory.content(PlanningFileType::TaskPlan).contains("UsersEntity"));
    assert!(memory.content(PlanningFileType::Notes).contains("added missing semicolon"));
    assert!(memory.compact_context().contains("UsersEntity"));
}

#[tokio::test]
async fn test_log_replay_is_ordered_and_closed() {
    let h = harness(Setup::default());
    let job = h.orchestrator.create_job("user directory service", None).unwrap();
    let job = h.orchestrator.run_job(job.id).await.unwrap();

    let subscription = h.orchestrator.subscribe_to_logs(job.id).unwrap();
    assert!(subscription.is_closed());
    let messages: Vec<String> = subscription.history.iter().map(|e| e.message.clone()).collect();
    assert!(messages[0].starts_with("Job queued"));
    assert_eq!(messages.last().unwrap(), "Build passed in round 1");
    assert!(messages.iter().any(|m| m == "Compiling"));
    assert!(messages.iter().any(|m| m == "Contract locked"));

    let streamed: Vec<LogEntry> = h.orchestrator.log_stream(job.id).unwrap().collect().await;
    assert_eq!(streamed.len(), messages.len());
    assert!(streamed.iter().all(|e| !e.is_heartbeat()));

    // Persisted history matches what subscribers replay
    let stored = h.store.get_job(job.id).unwrap().unwrap();
    assert_eq!(stored.logs.len(), messages.len());
}

#[tokio::test]
async fn test_cancel_running_job() {
    let h = harness(Setup {
        delay: Some(Duration::from_secs(30)),
        ..Setup::default()
    });
    let job_id = h.orchestrator.submit_job("user directory service", None).unwrap();

    let backend = h.backend.clone();
    wait_until(|| backend.calls.load(Ordering::SeqCst) == 1).await;
    assert!(h.orchestrator.is_running(job_id));

    let requested = h.orchestrator.cancel_job(job_id).await.unwrap();
    assert!(requested.cancel_requested);

    let orchestrator = h.orchestrator.clone();
    wait_until(|| {
        orchestrator
            .get_job(job_id)
            .map(|j| j.status == JobStatus::Cancelled)
            .unwrap_or(false)
    })
    .await;
    wait_until(|| !orchestrator.is_running(job_id)).await;
    assert_eq!(h.coach.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_cancel_queued_and_terminal_jobs() {
    let h = harness(Setup::default());
    let job = h.orchestrator.create_job("user directory service", None).unwrap();

    let cancelled = h.orchestrator.cancel_job(job.id).await.unwrap();
    assert_eq!(cancelled.status, JobStatus::Cancelled);

    // Second cancel is a no-op and running a finished job does nothing
    let again = h.orchestrator.cancel_job(job.id).await.unwrap();
    assert_eq!(again.status, JobStatus::Cancelled);
    let ran = h.orchestrator.run_job(job.id).await.unwrap();
    assert_eq!(ran.status, JobStatus::Cancelled);
    assert_eq!(h.architect.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_unknown_job() {
    let h = harness(Setup::default());
    let missing = Uuid::new_v4();
    assert!(h.orchestrator.get_job(missing).is_err());
    assert!(h.orchestrator.cancel_job(missing).await.is_err());
    assert!(h.orchestrator.subscribe_to_logs(missing).is_err());
}

#[tokio::test]
async fn test_resume_incomplete_jobs() {
    let h = harness(Setup::default());
    let job = h.orchestrator.create_job("user directory service", None).unwrap();

    let resumed = h.orchestrator.resume_incomplete().await.unwrap();
    assert_eq!(resumed, 1);

    let orchestrator = h.orchestrator.clone();
    wait_until(|| {
        orchestrator
            .get_job(job.id)
            .map(|j| j.status == JobStatus::Success)
            .unwrap_or(false)
    })
    .await;
}

struct BlockArchitect;

impl HookHandler for BlockArchitect {
    fn name(&self) -> &str {
        "block-architect"
    }

    fn before_model(&self, ctx: &HookContext) -> HookResult {
        if ctx.name == "architect" {
            HookResult::block("architect disabled")
        } else {
            HookResult::allow()
        }
    }
}

#[tokio::test]
async fn test_blocked_model_call_fails_job() {
    let h = harness(Setup {
        hooks: HookPipeline::new().with_handler(Arc::new(BlockArchitect)),
        ..Setup::default()
    });
    let job = h.orchestrator.create_job("user directory service", None).unwrap();

    let job = h.orchestrator.run_job(job.id).await.unwrap();

    assert_eq!(job.status, JobStatus::Failed);
    assert!(job.last_error.unwrap().contains("architect disabled"));
    assert_eq!(h.architect.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_restart_resumes_from_sqlite() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("foundry.db");

    let build = |store: Arc<foundry_core::SqliteStore>, backend: Arc<ScriptedBackend>| {
        Orchestrator::builder(
            store.clone(),
            store,
            Arc::new(MockArchitect {
                calls: AtomicUsize::new(0),
                schema: SCHEMA,
                fail: false,
            }),
            Arc::new(MockCoach {
                calls: AtomicUsize::new(0),
                diagnostics_seen: Mutex::new(Vec::new()),
            }),
            PhaseValidator::new(backend),
        )
        .with_coder(Arc::new(MockCoder {
            calls: AtomicUsize::new(0),
            fail: false,
        }))
        .build()
    };
    let backend = || {
        Arc::new(ScriptedBackend {
            script: Mutex::new(VecDeque::new()),
            last: Mutex::new(passed()),
            calls: AtomicUsize::new(0),
            released: AtomicUsize::new(0),
            delay: None,
        })
    };

    let job_id = {
        let store = Arc::new(foundry_core::SqliteStore::open(&path).unwrap());
        let first = build(store, backend());
        first.create_job("user directory service", None).unwrap().id
    };

    let store = Arc::new(foundry_core::SqliteStore::open(&path).unwrap());
    let second = build(store, backend());
    assert_eq!(second.get_job(job_id).unwrap().status, JobStatus::Queued);
    assert_eq!(second.resume_incomplete().await.unwrap(), 1);

    wait_until(|| {
        second
            .get_job(job_id)
            .map(|j| j.status == JobStatus::Success)
            .unwrap_or(false)
    })
    .await;
    let job = second.get_job(job_id).unwrap();
    assert!(job.logs.iter().any(|e| e.message.starts_with("Job queued")));
}

#[tokio::test]
async fn test_blank_schema_still_generates() {
    let h = harness(Setup {
        schema: "   ",
        ..Setup::default()
    });
    let job = h.orchestrator.create_job("static landing page api", None).unwrap();

    let job = h.orchestrator.run_job(job.id).await.unwrap();

    assert_eq!(job.status, JobStatus::Success);
    assert_eq!(h.coder.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_finished_jobs_leave_the_log_hub() {
    let h = harness(Setup {
        script: vec![code_error(), passed()],
        log_capacity: 3,
        ..Setup::default()
    });
    let job = h.orchestrator.create_job("user directory service", None).unwrap();
    let job = h.orchestrator.run_job(job.id).await.unwrap();
    assert_eq!(job.status, JobStatus::Success);
    assert!(job.logs.len() > 3);

    assert!(!h.orchestrator.inner.logs.is_tracked(job.id));
    assert!(h.orchestrator.inner.logs.is_empty());

    // Replay comes from the stored job, unbounded, and does not re-track it
    let subscription = h.orchestrator.subscribe_to_logs(job.id).unwrap();
    assert!(subscription.is_closed());
    assert_eq!(subscription.history.len(), job.logs.len());
    assert!(subscription.history[0].message.starts_with("Job queued"));
    assert!(h.orchestrator.inner.logs.is_empty());
}

/// Records a cancellation directly in the store, as another process would
struct CancellingCoder {
    store: Arc<InMemoryStore>,
}

#[async_trait]
impl CoderAgent for CancellingCoder {
    fn target_type(&self) -> &str {
        "backend"
    }

    async fn generate(&self, job: &Job, _round: u32, _ctx: &AgentContext) -> Result<CoderOutput> {
        assert!(self.store.request_cancel(job.id).unwrap());
        Ok(CoderOutput::ok(vec![GeneratedFile::new(
            ENTITY_PATH,
            "package com.foundry.generated.entity;\n\npublic class UsersEntity {}\n",
        )]))
    }
}

#[tokio::test]
async fn test_stored_cancellation_stops_the_runner() {
    let h = harness(Setup {
        script: vec![code_error()],
        ..Setup::default()
    });
    let orchestrator = Orchestrator::builder(
        h.store.clone(),
        h.store.clone(),
        h.architect.clone(),
        h.coach.clone(),
        PhaseValidator::new(h.backend.clone()),
    )
    .with_coder(Arc::new(CancellingCoder {
        store: h.store.clone(),
    }))
    .build();
    let job = orchestrator.create_job("user directory service", Some(3)).unwrap();

    let job = orchestrator.run_job(job.id).await.unwrap();

    assert_eq!(job.status, JobStatus::Cancelled);
    assert!(job.cancel_requested);
    assert_eq!(h.backend.calls.load(Ordering::SeqCst), 1);
    assert_eq!(h.coach.calls.load(Ordering::SeqCst), 0);
    let stored = h.store.get_job(job.id).unwrap().unwrap();
    assert_eq!(stored.status, JobStatus::Cancelled);
}

/// Lets the runner finish the job right after the next read
struct FinishOnRead {
    inner: InMemoryStore,
    armed: std::sync::atomic::AtomicBool,
}

impl JobStore for FinishOnRead {
    fn save_job(&self, job: &Job) -> foundry_core::Result<()> {
        self.inner.save_job(job)
    }

    fn request_cancel(&self, id: Uuid) -> foundry_core::Result<bool> {
        self.inner.request_cancel(id)
    }

    fn get_job(&self, id: Uuid) -> foundry_core::Result<Option<Job>> {
        let job = self.inner.get_job(id)?;
        if self.armed.swap(false, Ordering::SeqCst) {
            if let Some(mut done) = job.clone() {
                done.transition_to(JobStatus::Success)?;
                self.inner.save_job(&done)?;
            }
        }
        Ok(job)
    }

    fn list_jobs(&self) -> foundry_core::Result<Vec<Job>> {
        self.inner.list_jobs()
    }

    fn list_unfinished(&self) -> foundry_core::Result<Vec<Job>> {
        self.inner.list_unfinished()
    }

    fn save_artifact(&self, artifact: &Artifact) -> foundry_core::Result<()> {
        self.inner.save_artifact(artifact)
    }

    fn get_artifact(&self, id: Uuid) -> foundry_core::Result<Option<Artifact>> {
        self.inner.get_artifact(id)
    }

    fn artifacts_for_job(&self, job_id: Uuid) -> foundry_core::Result<Vec<Artifact>> {
        self.inner.artifacts_for_job(job_id)
    }

    fn save_validation(&self, result: &ValidationResult) -> foundry_core::Result<()> {
        self.inner.save_validation(result)
    }

    fn validations_for_job(&self, job_id: Uuid) -> foundry_core::Result<Vec<ValidationResult>> {
        self.inner.validations_for_job(job_id)
    }
}

#[tokio::test]
async fn test_cancel_never_overwrites_a_finished_run() {
    let h = harness(Setup::default());
    let store = Arc::new(FinishOnRead {
        inner: InMemoryStore::new(),
        armed: std::sync::atomic::AtomicBool::new(false),
    });
    let orchestrator = Orchestrator::builder(
        store.clone(),
        h.store.clone(),
        h.architect.clone(),
        h.coach.clone(),
        PhaseValidator::new(h.backend.clone()),
    )
    .with_coder(h.coder.clone())
    .build();

    let mut job = orchestrator.create_job("user directory service", None).unwrap();
    job.transition_to(JobStatus::Coding).unwrap();
    job.transition_to(JobStatus::Testing).unwrap();
    store.save_job(&job).unwrap();

    // A runner is registered and completes between cancel's read and write
    let token = CancellationToken::new();
    orchestrator.inner.running.insert(job.id, token.clone());
    store.armed.store(true, Ordering::SeqCst);

    let returned = orchestrator.cancel_job(job.id).await.unwrap();

    assert!(token.is_cancelled());
    assert_eq!(returned.status, JobStatus::Success);
    let stored = store.get_job(job.id).unwrap().unwrap();
    assert_eq!(stored.status, JobStatus::Success);
    assert!(!stored.cancel_requested);
}
