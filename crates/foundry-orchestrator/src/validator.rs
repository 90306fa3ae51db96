//! Phase Validator
//!
//! Normalizes whatever a validation backend produced into one pass/fail
//! decision, so the orchestrator never looks at sandbox-specific shapes.

use async_trait::async_trait;
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;

use foundry_core::{
    Artifact, CompileError, ErrorType, Job, SandboxInfo, ValidationDraft, ValidationResult,
};
use foundry_sandbox::{LogSink, SandboxService, ValidationOutcome};

/// Anything that can check a round's artifacts
#[async_trait]
pub trait ValidationBackend: Send + Sync {
    fn name(&self) -> &str;

    async fn validate(&self, job: &Job, artifacts: &[Artifact], log: &LogSink) -> ValidationOutcome;

    /// Release resources held for a finished job
    async fn release(&self, _job: &Job) {}
}

#[async_trait]
impl ValidationBackend for SandboxService {
    fn name(&self) -> &str {
        "sandbox"
    }

    async fn validate(&self, job: &Job, artifacts: &[Artifact], log: &LogSink) -> ValidationOutcome {
        SandboxService::validate(self, job, artifacts, log).await
    }

    async fn release(&self, job: &Job) {
        if let Some(sandbox_id) = job.sandbox_id.as_deref() {
            self.destroy_sandbox(sandbox_id).await;
        }
    }
}

/// One round's validation verdict
#[derive(Debug, Clone)]
pub struct PhaseReport {
    pub passed: bool,
    /// The attempt that gates the round
    pub record: ValidationResult,
    /// Every attempt, `record` last
    pub attempts: Vec<ValidationResult>,
    /// Diagnostics of the gating attempt
    pub diagnostics: Vec<CompileError>,
    pub artifacts: Vec<Artifact>,
    pub sandbox: Option<SandboxInfo>,
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl PhaseReport {
    pub fn error_type(&self) -> ErrorType {
        self.record.error_type
    }

    /// Failing artifacts for the coach. Falls back to everything that was
    /// validated when no artifact was flagged.
    pub fn failing_artifacts(&self) -> Vec<Artifact> {
        let flagged: Vec<Artifact> = self.artifacts.iter().filter(|a| a.has_errors).cloned().collect();
        if flagged.is_empty() {
            self.artifacts.clone()
        } else {
            flagged
        }
    }
}

#[derive(Clone)]
pub struct PhaseValidator {
    backend: Arc<dyn ValidationBackend>,
}

impl PhaseValidator {
    pub fn new(backend: Arc<dyn ValidationBackend>) -> Self {
        Self { backend }
    }

    pub fn backend_name(&self) -> &str {
        self.backend.name()
    }

    pub async fn validate_all(
        &self,
        job: &Job,
        artifacts: &[Artifact],
        log: &LogSink,
    ) -> PhaseReport {
        let outcome = self.backend.validate(job, artifacts, log).await;
        let ValidationOutcome {
            mut results,
            artifacts,
            sandbox,
        } = outcome;

        if results.is_empty() {
            // A backend that reports nothing cannot pass a round
            results.push(
                ValidationDraft {
                    passed: false,
                    exit_code: -1,
                    error_type: Some(ErrorType::Unknown),
                    message: Some(format!("{} produced no validation result", self.backend.name())),
                    ..ValidationDraft::default()
                }
                .finish(job.id, job.current_round, 1),
            );
        }

        let record = results[results.len() - 1].clone();
        let environment_retries = results.iter().filter(|r| r.is_environment_error()).count();

        let mut extra = BTreeMap::new();
        extra.insert("backend".to_string(), json!(self.backend.name()));
        extra.insert("attempts".to_string(), json!(results.len()));
        extra.insert("environmentFailures".to_string(), json!(environment_retries));

        PhaseReport {
            passed: record.passed,
            diagnostics: record.errors.clone(),
            record,
            attempts: results,
            artifacts,
            sandbox,
            extra,
        }
    }

    pub async fn release(&self, job: &Job) {
        self.backend.release(job).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use foundry_core::{GeneratedBy, Severity};

    struct FixedBackend(Vec<ValidationDraft>);

    #[async_trait]
    impl ValidationBackend for FixedBackend {
        fn name(&self) -> &str {
            "fixed"
        }

        async fn validate(&self, job: &Job, artifacts: &[Artifact], _log: &LogSink) -> ValidationOutcome {
            ValidationOutcome {
                results: self
                    .0
                    .iter()
                    .cloned()
                    .enumerate()
                    .map(|(i, d)| d.finish(job.id, job.current_round, i as u32 + 1))
                    .collect(),
                artifacts: artifacts.to_vec(),
                sandbox: None,
            }
        }
    }

    fn noop(_: foundry_core::LogEntry) {}

    #[tokio::test]
    async fn test_last_attempt_gates() {
        let env = ValidationDraft {
            error_type: Some(ErrorType::EnvironmentError),
            message: Some("no active sandbox".into()),
            ..ValidationDraft::default()
        };
        let pass = ValidationDraft {
            passed: true,
            ..ValidationDraft::default()
        };
        let validator = PhaseValidator::new(Arc::new(FixedBackend(vec![env, pass])));
        let job = Job::new("blog", 3).unwrap();

        let report = validator.validate_all(&job, &[], &noop).await;
        assert!(report.passed);
        assert_eq!(report.attempts.len(), 2);
        assert_eq!(report.record.attempt, 2);
        assert_eq!(report.extra["environmentFailures"], json!(1));
    }

    #[tokio::test]
    async fn test_empty_backend_fails() {
        let validator = PhaseValidator::new(Arc::new(FixedBackend(vec![])));
        let job = Job::new("blog", 3).unwrap();

        let report = validator.validate_all(&job, &[], &noop).await;
        assert!(!report.passed);
        assert_eq!(report.error_type(), ErrorType::Unknown);
    }

    #[tokio::test]
    async fn test_failing_artifacts_fallback() {
        let job = Job::new("blog", 3).unwrap();
        let mut broken = Artifact::new(job.id, "B.java", "class B", 0, GeneratedBy::Coder);
        let ok = Artifact::new(job.id, "A.java", "class A {}", 0, GeneratedBy::Coder);
        let code_error = ValidationDraft {
            exit_code: 1,
            errors: vec![CompileError::new("B.java", 1, 8, "'{' expected", Severity::Error)],
            error_type: Some(ErrorType::CodeError),
            ..ValidationDraft::default()
        };
        let validator = PhaseValidator::new(Arc::new(FixedBackend(vec![code_error])));

        let report = validator.validate_all(&job, &[ok.clone(), broken.clone()], &noop).await;
        assert_eq!(report.diagnostics.len(), 1);
        assert_eq!(report.failing_artifacts().len(), 2);

        broken.mark_error("'{' expected");
        let report = validator.validate_all(&job, &[ok, broken], &noop).await;
        let failing = report.failing_artifacts();
        assert_eq!(failing.len(), 1);
        assert_eq!(failing[0].file_path, "B.java");
    }
}
