use super::*;
use crate::error::SandboxError;
use crate::transport::{CreatedSandbox, ExecuteResponse, SandboxStatus};
use async_trait::async_trait;
use foundry_core::hooks::CommandDenylistHandler;
use foundry_core::GeneratedBy;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

const USER_SERVICE: &str = "src/main/java/com/acme/UserService.java";

/// Plays back execute responses in order; answers success once exhausted
#[derive(Default)]
struct ScriptedTransport {
    responses: Mutex<VecDeque<crate::error::Result<ExecuteResponse>>>,
    alive: AtomicBool,
    fail_create: AtomicBool,
    creates: AtomicUsize,
    executes: AtomicUsize,
    kills: AtomicUsize,
    written: Mutex<Vec<Vec<SandboxFile>>>,
}

impl ScriptedTransport {
    fn new(responses: Vec<crate::error::Result<ExecuteResponse>>) -> Arc<Self> {
        Arc::new(Self {
            responses: Mutex::new(responses.into()),
            ..Self::default()
        })
    }

    fn alive(self: Arc<Self>) -> Arc<Self> {
        self.alive.store(true, Ordering::SeqCst);
        self
    }

    fn count(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SandboxTransport for ScriptedTransport {
    fn provider(&self) -> &str {
        "scripted"
    }

    async fn create(&self, _request: &CreateSandboxRequest) -> crate::error::Result<CreatedSandbox> {
        let n = self.creates.fetch_add(1, Ordering::SeqCst) + 1;
        if self.fail_create.load(Ordering::SeqCst) {
            return Err(SandboxError::Status {
                status: 503,
                body: "no capacity".into(),
            });
        }
        self.alive.store(true, Ordering::SeqCst);
        Ok(CreatedSandbox {
            sandbox_id: format!("sb-{n}"),
            url: format!("https://sb-{n}.sandbox.test"),
            provider: String::new(),
        })
    }

    async fn write_files(&self, _sandbox_id: &str, files: &[SandboxFile]) -> crate::error::Result<()> {
        self.written.lock().push(files.to_vec());
        Ok(())
    }

    async fn execute(
        &self,
        _sandbox_id: &str,
        _command: &str,
        _timeout: Duration,
    ) -> crate::error::Result<ExecuteResponse> {
        self.executes.fetch_add(1, Ordering::SeqCst);
        self.responses
            .lock()
            .pop_front()
            .unwrap_or_else(|| Ok(ExecuteResponse::completed(0, "[INFO] BUILD SUCCESS", "")))
    }

    async fn status(&self, sandbox_id: &str) -> crate::error::Result<SandboxStatus> {
        let alive = self.alive.load(Ordering::SeqCst);
        Ok(SandboxStatus {
            active: alive,
            healthy: alive,
            sandbox_id: Some(sandbox_id.to_string()),
        })
    }

    async fn kill(&self, _sandbox_id: &str) -> crate::error::Result<()> {
        self.kills.fetch_add(1, Ordering::SeqCst);
        self.alive.store(false, Ordering::SeqCst);
        Ok(())
    }
}

fn service(transport: Arc<ScriptedTransport>) -> SandboxService {
    SandboxService::new(transport, SandboxConfig::default().with_retry(3, 0))
}

fn job_with_sandbox(sandbox_id: Option<&str>) -> Job {
    let mut job = Job::new("user management api", 3).unwrap();
    if let Some(id) = sandbox_id {
        job.sandbox_id = Some(id.to_string());
        job.sandbox_url = Some("https://existing.sandbox.test".to_string());
    }
    job
}

fn artifacts(job: &Job) -> Vec<Artifact> {
    vec![
        Artifact::new(job.id, "src/main/java/com/acme/User.java", "class User {}", 0, GeneratedBy::Coder),
        Artifact::new(job.id, USER_SERVICE, "class UserService {}", 0, GeneratedBy::Coder),
    ]
}

fn command_failed() -> crate::error::Result<ExecuteResponse> {
    Ok(ExecuteResponse {
        exit_code: Some(1),
        message: Some("Command failed".into()),
        ..ExecuteResponse::default()
    })
}

fn compile_error() -> crate::error::Result<ExecuteResponse> {
    Ok(ExecuteResponse::completed(
        1,
        format!("[ERROR] /home/user/app/{USER_SERVICE}:[22,17] cannot find symbol\n[INFO] BUILD FAILURE"),
        "",
    ))
}

fn collect_logs() -> (Arc<Mutex<Vec<LogEntry>>>, impl Fn(LogEntry) + Send + Sync) {
    let logs = Arc::new(Mutex::new(Vec::new()));
    let sink = {
        let logs = logs.clone();
        move |entry: LogEntry| logs.lock().push(entry)
    };
    (logs, sink)
}

#[tokio::test]
async fn test_reuses_live_sandbox_and_scaffolds_build_file() {
    let transport = ScriptedTransport::new(vec![]).alive();
    let service = service(transport.clone());
    let job = job_with_sandbox(Some("sb-existing"));
    let (_, sink) = collect_logs();

    let outcome = service.validate(&job, &artifacts(&job), &sink).await;

    assert!(outcome.passed());
    assert_eq!(outcome.results.len(), 1);
    assert_eq!(outcome.results[0].attempt, 1);
    assert_eq!(ScriptedTransport::count(&transport.creates), 0);
    assert_eq!(outcome.sandbox.as_ref().unwrap().sandbox_id, "sb-existing");

    let written = transport.written.lock();
    assert_eq!(written.len(), 1);
    assert!(written[0].iter().any(|f| f.path == "pom.xml"));
    assert_eq!(outcome.scaffolded().count(), 1);
}

#[tokio::test]
async fn test_creates_sandbox_when_job_has_none() {
    let transport = ScriptedTransport::new(vec![]);
    let service = service(transport.clone());
    let job = job_with_sandbox(None);
    let (logs, sink) = collect_logs();

    let outcome = service.validate(&job, &artifacts(&job), &sink).await;

    assert!(outcome.passed());
    assert_eq!(ScriptedTransport::count(&transport.creates), 1);
    let info = outcome.sandbox.unwrap();
    assert_eq!(info.sandbox_id, "sb-1");
    assert_eq!(info.provider, "scripted");
    assert!(logs.lock().iter().any(|e| e.message.contains("Sandbox ready")));
}

#[tokio::test]
async fn test_environment_error_resets_and_retries() {
    let transport = ScriptedTransport::new(vec![command_failed(), command_failed()]);
    let service = service(transport.clone());
    let job = job_with_sandbox(None);
    let (logs, sink) = collect_logs();

    let outcome = service.validate(&job, &artifacts(&job), &sink).await;

    assert!(outcome.passed());
    assert_eq!(outcome.results.len(), 3);
    assert!(outcome.results[0].is_environment_error());
    assert!(outcome.results[1].is_environment_error());
    assert_eq!(outcome.results[2].attempt, 3);
    assert_eq!(ScriptedTransport::count(&transport.creates), 3);
    assert_eq!(ScriptedTransport::count(&transport.kills), 2);
    assert_eq!(outcome.sandbox.unwrap().sandbox_id, "sb-3");

    let retries = logs
        .lock()
        .iter()
        .filter(|e| e.message.contains("resetting sandbox"))
        .count();
    assert_eq!(retries, 2);
}

#[tokio::test]
async fn test_environment_error_exhausts_attempts_without_diagnostics() {
    let transport = ScriptedTransport::new(vec![command_failed(), command_failed(), command_failed()]);
    let service = service(transport.clone());
    let job = job_with_sandbox(None);
    let (_, sink) = collect_logs();

    let outcome = service.validate(&job, &artifacts(&job), &sink).await;

    assert!(!outcome.passed());
    assert_eq!(outcome.results.len(), 3);
    let last = outcome.last().unwrap();
    assert!(last.is_environment_error());
    assert!(last.errors.is_empty());
    assert!(outcome.artifacts.iter().all(|a| !a.has_errors));
    assert_eq!(ScriptedTransport::count(&transport.executes), 3);
    // the last attempt's sandbox is kept for the job
    assert_eq!(ScriptedTransport::count(&transport.kills), 2);
}

#[tokio::test]
async fn test_transport_failures_count_as_environment() {
    let transport = ScriptedTransport::new(vec![Err(SandboxError::Transport(
        "connection reset".into(),
    ))]);
    let service = service(transport.clone());
    let job = job_with_sandbox(None);
    let (_, sink) = collect_logs();

    let outcome = service.validate(&job, &artifacts(&job), &sink).await;

    assert!(outcome.passed());
    assert_eq!(outcome.results.len(), 2);
    assert!(outcome.results[0]
        .message
        .as_deref()
        .unwrap()
        .contains("connection reset"));
}

#[tokio::test]
async fn test_create_failure_is_environment() {
    let transport = ScriptedTransport::new(vec![]);
    transport.fail_create.store(true, Ordering::SeqCst);
    let service = SandboxService::new(transport.clone(), SandboxConfig::default().with_retry(2, 0));
    let job = job_with_sandbox(None);
    let (_, sink) = collect_logs();

    let outcome = service.validate(&job, &artifacts(&job), &sink).await;

    assert!(!outcome.passed());
    assert_eq!(outcome.results.len(), 2);
    assert!(outcome.sandbox.is_none());
    assert_eq!(ScriptedTransport::count(&transport.executes), 0);
}

#[tokio::test]
async fn test_code_error_is_not_retried_and_flags_artifacts() {
    let transport = ScriptedTransport::new(vec![compile_error()]).alive();
    let service = service(transport.clone());
    let job = job_with_sandbox(Some("sb-existing"));
    let (_, sink) = collect_logs();

    let outcome = service.validate(&job, &artifacts(&job), &sink).await;

    assert!(!outcome.passed());
    assert_eq!(outcome.results.len(), 1);
    assert!(outcome.results[0].is_code_error());
    assert_eq!(outcome.results[0].error_count, 1);
    assert_eq!(ScriptedTransport::count(&transport.kills), 0);

    let flagged: Vec<&Artifact> = outcome.artifacts.iter().filter(|a| a.has_errors).collect();
    assert_eq!(flagged.len(), 1);
    assert_eq!(flagged[0].file_path, USER_SERVICE);
    assert!(flagged[0]
        .compiler_error
        .as_deref()
        .unwrap()
        .contains("cannot find symbol"));
}

#[tokio::test]
async fn test_unattributed_failure_flags_build_file() {
    let transport =
        ScriptedTransport::new(vec![Ok(ExecuteResponse::completed(2, "unexpected plugin state", ""))])
            .alive();
    let service = service(transport.clone());
    let job = job_with_sandbox(Some("sb-existing"));
    let (_, sink) = collect_logs();

    let outcome = service.validate(&job, &artifacts(&job), &sink).await;

    let flagged: Vec<&Artifact> = outcome.artifacts.iter().filter(|a| a.has_errors).collect();
    assert_eq!(flagged.len(), 1);
    assert_eq!(flagged[0].file_path, "pom.xml");
}

#[tokio::test]
async fn test_blocked_build_never_executes() {
    let transport = ScriptedTransport::new(vec![]).alive();
    let hooks = HookPipeline::new().with_handler(Arc::new(CommandDenylistHandler::new()));
    let service = SandboxService::new(
        transport.clone(),
        SandboxConfig::default()
            .with_retry(3, 0)
            .with_build_command("rm -rf / && mvn compile"),
    )
    .with_hooks(hooks);
    let job = job_with_sandbox(Some("sb-existing"));
    let (_, sink) = collect_logs();

    let outcome = service.validate(&job, &artifacts(&job), &sink).await;

    assert!(!outcome.passed());
    assert_eq!(outcome.results.len(), 1);
    assert_eq!(outcome.results[0].error_type, ErrorType::Unknown);
    assert_eq!(ScriptedTransport::count(&transport.executes), 0);
}

#[tokio::test]
async fn test_run_build_applies_return_code_marker() {
    let transport =
        ScriptedTransport::new(vec![Ok(ExecuteResponse::completed(0, "Return code: 1", ""))]).alive();
    let service = service(transport);

    let result = service.run_build("sb-1", Uuid::new_v4()).await;

    assert!(!result.success);
    assert_eq!(result.exit_code, 1);
    assert!(result.is_environment_error());
}

#[tokio::test]
async fn test_is_sandbox_alive_and_destroy() {
    let transport = ScriptedTransport::new(vec![]).alive();
    let service = service(transport.clone());

    assert!(service.is_sandbox_alive("sb-1").await);
    service.destroy_sandbox("sb-1").await;
    assert!(!service.is_sandbox_alive("sb-1").await);
    assert_eq!(ScriptedTransport::count(&transport.kills), 1);
}

#[tokio::test]
async fn test_local_transport_end_to_end() {
    let service = SandboxService::from_config(
        SandboxConfig::local()
            .with_build_command("test -f pom.xml && test -f src/main/java/com/acme/User.java"),
    )
    .unwrap();
    let job = job_with_sandbox(None);
    let (_, sink) = collect_logs();

    let outcome = service.validate(&job, &artifacts(&job), &sink).await;

    assert!(outcome.passed(), "{:?}", outcome.last());
    assert_eq!(outcome.sandbox.unwrap().provider, "local");
}
