//! Build result classification

use foundry_core::diagnostics::{
    combine_output, count_by_severity, detect_environment_error, failure_snippet,
    mentions_build_failure, parse_compile_errors, return_code_marker, EnvironmentFault,
};
use foundry_core::{CompileError, ErrorType, Severity, ValidationDraft};

use crate::transport::ExecuteResponse;

/// Exit code used when no process result exists
pub const NO_EXIT_CODE: i32 = -1;

/// One build run, classified
#[derive(Debug, Clone, PartialEq)]
pub struct CompileResult {
    pub success: bool,
    /// Effective exit code after the return-code shim
    pub exit_code: i32,
    /// What the transport said, if anything
    pub reported_exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub errors: Vec<CompileError>,
    pub error_type: ErrorType,
    pub message: Option<String>,
}

impl CompileResult {
    /// Classify an execute response.
    ///
    /// Success requires an effective exit code of 0 and no error-severity
    /// diagnostics. Failures with diagnostics are code errors; failures
    /// without them go through environment detection, and whatever is left
    /// is blamed on the build file.
    pub fn interpret(response: &ExecuteResponse, honor_marker: bool, build_file: &str) -> Self {
        let (stdout, stderr) = response.streams();
        let combined = combine_output(&stdout, &stderr);
        let reported = response.exit_code;
        let mut exit_code = reported.unwrap_or(NO_EXIT_CODE);
        let mut mismatch = None;

        let marker = if honor_marker {
            return_code_marker(&combined)
        } else {
            None
        };
        match marker {
            Some(code) if code != 0 && code != exit_code => {
                if exit_code == 0 {
                    mismatch = Some(EnvironmentFault::ExitCodeMismatch {
                        reported: exit_code,
                        marker: code,
                    });
                }
                exit_code = code;
            }
            _ if exit_code == 0 && mentions_build_failure(&combined) => exit_code = 1,
            _ => {}
        }

        let errors = parse_compile_errors(&combined);
        let (error_count, _) = count_by_severity(&errors);

        let mut result = Self {
            success: false,
            exit_code,
            reported_exit_code: reported,
            stdout,
            stderr,
            errors,
            error_type: ErrorType::CodeError,
            message: None,
        };

        if exit_code == 0 && error_count == 0 {
            result.success = true;
            result.error_type = ErrorType::None;
            return result;
        }

        if error_count > 0 {
            if result.exit_code == 0 {
                result.exit_code = 1;
            }
            return result;
        }

        if let Some(fault) = mismatch.or_else(|| detect_environment_error(&combined)) {
            result.error_type = ErrorType::EnvironmentError;
            result.message = Some(fault.to_string());
            return result;
        }

        // Failed, no diagnostics, nothing environmental: point the coach at the build file
        let snippet = failure_snippet(&combined);
        let first_line = snippet.lines().next().unwrap_or("build failed");
        let message = format!("build failed without compiler diagnostics: {first_line}");
        result
            .errors
            .push(CompileError::new(build_file, 0, 0, message.clone(), Severity::Error));
        result.message = Some(message);
        result
    }

    /// Environment failure with no process result
    pub fn environment(fault: EnvironmentFault) -> Self {
        Self {
            success: false,
            exit_code: NO_EXIT_CODE,
            reported_exit_code: None,
            stdout: String::new(),
            stderr: String::new(),
            errors: Vec::new(),
            error_type: ErrorType::EnvironmentError,
            message: Some(fault.to_string()),
        }
    }

    /// Build command refused by the hook pipeline; nothing was executed
    pub fn blocked(reason: impl Into<String>) -> Self {
        Self {
            success: false,
            exit_code: NO_EXIT_CODE,
            reported_exit_code: None,
            stdout: String::new(),
            stderr: String::new(),
            errors: Vec::new(),
            error_type: ErrorType::Unknown,
            message: Some(format!("blocked by policy: {}", reason.into())),
        }
    }

    pub fn is_environment_error(&self) -> bool {
        self.error_type == ErrorType::EnvironmentError
    }

    pub fn error_count(&self) -> usize {
        count_by_severity(&self.errors).0
    }

    pub fn output(&self) -> String {
        combine_output(&self.stdout, &self.stderr)
    }

    pub fn to_draft(&self) -> ValidationDraft {
        ValidationDraft {
            passed: self.success,
            exit_code: self.exit_code,
            stdout: self.stdout.clone(),
            stderr: self.stderr.clone(),
            errors: self.errors.clone(),
            error_type: Some(self.error_type),
            message: self.message.clone(),
        }
    }
}
