//! Build output interpretation
//!
//! Pure functions over captured stdout/stderr:
//! - compiler diagnostics in the structured `[ERROR] path:[line,col] message`
//!   form and the plain `path:line: message` form
//! - environment failure detection
//! - the `Return code: N` marker
//! - a bounded failure snippet for operator logs

use lazy_static::lazy_static;
use regex::Regex;
use std::collections::HashSet;
use std::fmt;

use crate::validation::{CompileError, Severity};

/// Lines kept in a failure snippet
pub const SNIPPET_MAX_LINES: usize = 80;
/// Tail used when no `[ERROR]` line exists
pub const SNIPPET_TAIL_LINES: usize = 60;
/// Per-line cap in a failure snippet
pub const SNIPPET_MAX_LINE_CHARS: usize = 420;

lazy_static! {
    static ref STRUCTURED: Regex = Regex::new(
        r"(?m)^\s*\[(ERROR|WARNING)\]\s+(.+?\.java):\[(\d+),(\d+)\]\s*(?:(error|warning):)?\s*(.+?)\s*$"
    )
    .expect("structured diagnostic pattern");
    static ref PLAIN: Regex = Regex::new(
        r"(?m)^\s*(?:\[(?:ERROR|WARNING)\]\s+)?(.+?\.java):(\d+):\s*(?:(error|warning):)?\s*(.+?)\s*$"
    )
    .expect("plain diagnostic pattern");
    static ref RETURN_CODE: Regex =
        Regex::new(r"(?m)^Return\s+code:\s*(\d+)\s*$").expect("return code pattern");
}

/// Parse `[ERROR] /app/src/A.java:[12,8] cannot find symbol`
pub fn parse_structured(output: &str) -> Vec<CompileError> {
    STRUCTURED
        .captures_iter(output)
        .filter_map(|caps| {
            let level = caps.get(1)?.as_str();
            let file = caps.get(2)?.as_str().trim();
            let line = caps.get(3)?.as_str().parse().ok()?;
            let column = caps.get(4)?.as_str().parse().ok()?;
            let message = caps.get(6)?.as_str();
            let severity = match caps.get(5) {
                Some(explicit) => Severity::parse(Some(explicit.as_str())),
                None => Severity::parse(Some(level)),
            };
            Some(CompileError::new(file, line, column, message, severity))
        })
        .collect()
}

/// Parse `/app/src/A.java:12: error: cannot find symbol`. Column is always 0.
pub fn parse_plain(output: &str) -> Vec<CompileError> {
    PLAIN
        .captures_iter(output)
        .filter_map(|caps| {
            let file = caps.get(1)?.as_str().trim();
            let line = caps.get(2)?.as_str().parse().ok()?;
            let severity = Severity::parse(caps.get(3).map(|m| m.as_str()));
            let message = caps.get(4)?.as_str();
            Some(CompileError::new(file, line, 0, message, severity))
        })
        .collect()
}

/// Both grammars merged, deduplicated on (file, line, column, message),
/// structured diagnostics first.
pub fn parse_compile_errors(output: &str) -> Vec<CompileError> {
    let mut seen = HashSet::new();
    parse_structured(output)
        .into_iter()
        .chain(parse_plain(output))
        .filter(|e| seen.insert((e.file.clone(), e.line, e.column, e.message.clone())))
        .collect()
}

/// `(errors, warnings)`
pub fn count_by_severity(errors: &[CompileError]) -> (usize, usize) {
    let err = errors.iter().filter(|e| e.is_error()).count();
    (err, errors.len() - err)
}

/// Exit status embedded in output as `Return code: N`.
///
/// Fragile: one sandbox provider writes the real exit status into stdout
/// while reporting 0 in the response body. This is a compatibility shim for
/// that provider, not a protocol guarantee.
pub fn return_code_marker(output: &str) -> Option<i32> {
    RETURN_CODE
        .captures_iter(output)
        .filter_map(|caps| caps.get(1)?.as_str().parse().ok())
        .last()
}

/// Maven's textual failure markers
pub fn mentions_build_failure(output: &str) -> bool {
    output.to_ascii_lowercase().contains("build failure") || output.contains("Failed to execute goal")
}

/// Why a failed build is blamed on the environment rather than the code
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnvironmentFault {
    /// Executor reported a bare "command failed"
    CommandFailed,
    NoActiveSandbox,
    SandboxMismatch,
    ToolchainMissing,
    DependencyResolution,
    NetworkTimeout,
    SandboxTimeout,
    RepositoryAccess,
    /// Build failed without any compiler diagnostic
    BuildFailureWithoutDiagnostics,
    /// Nothing captured at all
    EmptyOutput,
    /// Transport reported one exit code, the output embeds another
    ExitCodeMismatch { reported: i32, marker: i32 },
    /// Transport call itself failed
    Transport(String),
}

impl fmt::Display for EnvironmentFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CommandFailed => f.write_str("sandbox command failed without build output"),
            Self::NoActiveSandbox => f.write_str("no active sandbox"),
            Self::SandboxMismatch => f.write_str("active sandbox does not match the job"),
            Self::ToolchainMissing => f.write_str("build tool not installed in sandbox"),
            Self::DependencyResolution => {
                f.write_str("dependency download failed (network or repository unavailable)")
            }
            Self::NetworkTimeout => f.write_str("network timeout"),
            Self::SandboxTimeout => f.write_str("sandbox execution timed out"),
            Self::RepositoryAccess => f.write_str("artifact repository access failed"),
            Self::BuildFailureWithoutDiagnostics => {
                f.write_str("build failed without compiler diagnostics")
            }
            Self::EmptyOutput => f.write_str("build failed with no captured output"),
            Self::ExitCodeMismatch { reported, marker } => write!(
                f,
                "sandbox reported exit code {reported} but output says return code {marker}"
            ),
            Self::Transport(reason) => write!(f, "sandbox transport failure: {reason}"),
        }
    }
}

/// Classify a failed build's output. `None` means the failure should be
/// treated as a code problem.
pub fn detect_environment_error(output: &str) -> Option<EnvironmentFault> {
    let normalized = output.trim().to_ascii_lowercase();
    if normalized.is_empty() {
        return Some(EnvironmentFault::EmptyOutput);
    }

    let any = |needles: &[&str]| needles.iter().any(|n| normalized.contains(n));

    if normalized.starts_with("command failed") {
        return Some(EnvironmentFault::CommandFailed);
    }
    if normalized.contains("no active sandbox") {
        return Some(EnvironmentFault::NoActiveSandbox);
    }
    if normalized.contains("sandbox id mismatch") {
        return Some(EnvironmentFault::SandboxMismatch);
    }
    if any(&[
        "mvn: not found",
        "mvn: command not found",
        "'mvn' is not recognized",
        "command not found",
    ]) {
        return Some(EnvironmentFault::ToolchainMissing);
    }
    if any(&[
        "could not resolve dependencies",
        "could not transfer artifact",
        "failed to read artifact descriptor",
        "cannot access central",
        "could not find artifact",
    ]) {
        return Some(EnvironmentFault::DependencyResolution);
    }
    if any(&[
        "connection timed out",
        "read timed out",
        "connect timed out",
        "sockettimeoutexception",
    ]) {
        return Some(EnvironmentFault::NetworkTimeout);
    }
    if normalized.contains("sandbox") && normalized.contains("timeout") {
        return Some(EnvironmentFault::SandboxTimeout);
    }
    if any(&["not authorized", "access denied", "transfer failed"]) {
        return Some(EnvironmentFault::RepositoryAccess);
    }
    if normalized.contains("build failure")
        && !normalized.contains(".java:")
        && !normalized.contains("error:")
    {
        return Some(EnvironmentFault::BuildFailureWithoutDiagnostics);
    }
    None
}

/// Operator-sized excerpt of a failed build.
///
/// Keeps `[ERROR]` / `BUILD FAILURE` / `Failed to execute goal` lines, or the
/// last non-empty lines when there are none.
pub fn failure_snippet(output: &str) -> String {
    let lines: Vec<&str> = output
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect();

    let mut picked: Vec<&str> = lines
        .iter()
        .copied()
        .filter(|l| {
            l.starts_with("[ERROR]")
                || l.contains("BUILD FAILURE")
                || l.contains("Failed to execute goal")
        })
        .take(SNIPPET_MAX_LINES)
        .collect();

    if picked.is_empty() {
        let start = lines.len().saturating_sub(SNIPPET_TAIL_LINES);
        picked = lines[start..].to_vec();
    }

    picked
        .into_iter()
        .map(|l| truncate_chars(l, SNIPPET_MAX_LINE_CHARS))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Truncate on a char boundary, marking the cut with `...`
pub fn truncate_chars(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}

/// Join stdout and stderr the way the build tool would have interleaved them
pub fn combine_output(stdout: &str, stderr: &str) -> String {
    match (stdout.trim().is_empty(), stderr.trim().is_empty()) {
        (true, true) => String::new(),
        (false, true) => stdout.to_string(),
        (true, false) => stderr.to_string(),
        (false, false) => format!("{stdout}\n{stderr}"),
    }
}
