//! Build validation records

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::types::Timestamp;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
}

impl Severity {
    /// Anything other than an explicit `warning` is treated as an error
    pub fn parse(value: Option<&str>) -> Self {
        match value.map(str::trim) {
            Some(v) if v.eq_ignore_ascii_case("warning") => Severity::Warning,
            _ => Severity::Error,
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Error => f.write_str("error"),
            Severity::Warning => f.write_str("warning"),
        }
    }
}

/// One parsed compiler diagnostic
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CompileError {
    pub file: String,
    pub line: u32,
    /// 0 when the diagnostic format carries no column
    pub column: u32,
    pub message: String,
    pub severity: Severity,
}

impl CompileError {
    pub fn new(
        file: impl Into<String>,
        line: u32,
        column: u32,
        message: impl Into<String>,
        severity: Severity,
    ) -> Self {
        Self {
            file: file.into(),
            line,
            column,
            message: message.into(),
            severity,
        }
    }

    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }
}

impl fmt::Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}: {}: {}",
            self.file, self.line, self.column, self.severity, self.message
        )
    }
}

/// Classification of a failed build
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorType {
    None,
    /// The build ran and reported diagnostics against the generated code
    CodeError,
    /// The execution infrastructure failed; never routed to the coach
    EnvironmentError,
    Unknown,
}

/// One build attempt's outcome. Immutable once created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationResult {
    pub id: Uuid,
    pub job_id: Uuid,
    pub round: u32,
    /// 1-based attempt number within the round
    pub attempt: u32,
    pub passed: bool,
    pub exit_code: i32,
    pub error_count: usize,
    pub warning_count: usize,
    pub stdout: String,
    pub stderr: String,
    pub errors: Vec<CompileError>,
    pub error_type: ErrorType,
    /// Environment failure reason or policy message, when there is one
    pub message: Option<String>,
    pub created_at: Timestamp,
}

impl ValidationResult {
    pub fn is_environment_error(&self) -> bool {
        self.error_type == ErrorType::EnvironmentError
    }

    pub fn is_code_error(&self) -> bool {
        self.error_type == ErrorType::CodeError
    }

    /// Short human readable summary for logs and failure reasons
    pub fn summary(&self) -> String {
        match self.error_type {
            ErrorType::None => "build passed".to_string(),
            ErrorType::CodeError => format!(
                "{} compile error(s), {} warning(s), exit code {}",
                self.error_count, self.warning_count, self.exit_code
            ),
            ErrorType::EnvironmentError => format!(
                "environment error: {}",
                self.message.as_deref().unwrap_or("sandbox failure")
            ),
            ErrorType::Unknown => format!(
                "build failed: {}",
                self.message.as_deref().unwrap_or("unknown cause")
            ),
        }
    }
}

/// Builder input for a [`ValidationResult`]
#[derive(Debug, Clone, Default)]
pub struct ValidationDraft {
    pub passed: bool,
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub errors: Vec<CompileError>,
    pub error_type: Option<ErrorType>,
    pub message: Option<String>,
}

impl ValidationDraft {
    pub fn finish(self, job_id: Uuid, round: u32, attempt: u32) -> ValidationResult {
        let error_count = self.errors.iter().filter(|e| e.is_error()).count();
        let warning_count = self.errors.len() - error_count;
        let error_type = self.error_type.unwrap_or(if self.passed {
            ErrorType::None
        } else {
            ErrorType::Unknown
        });
        ValidationResult {
            id: Uuid::new_v4(),
            job_id,
            round,
            attempt,
            passed: self.passed,
            exit_code: self.exit_code,
            error_count,
            warning_count,
            stdout: self.stdout,
            stderr: self.stderr,
            errors: self.errors,
            error_type,
            message: self.message,
            created_at: Utc::now(),
        }
    }
}

/// External environment handle
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SandboxInfo {
    pub sandbox_id: String,
    pub url: String,
    pub provider: String,
    pub created_at: Timestamp,
}
