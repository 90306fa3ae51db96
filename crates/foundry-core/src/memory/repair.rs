//! Repair history kept across coach rounds

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use crate::diagnostics::truncate_chars;
use crate::types::Timestamp;
use crate::validation::CompileError;

/// Attempts kept in the history
pub const MAX_HISTORY: usize = 10;
/// Consecutive identical failures before termination is advised
pub const MAX_SAME_ERROR_TOLERANCE: u32 = 2;
/// Failed attempts (with no success) before termination is advised
const MAX_FRUITLESS_ATTEMPTS: usize = 3;

lazy_static! {
    static ref LINE_COL: Regex = Regex::new(r"\[\d+,\d+\]").expect("line/col pattern");
    static ref LINE_ONLY: Regex = Regex::new(r":\d+:").expect("line pattern");
    static ref CATEGORIES: Vec<(ErrorCategory, Regex)> = vec![
        (ErrorCategory::SymbolNotFound, Regex::new(r"(?i)cannot find symbol").expect("symbol")),
        (ErrorCategory::IncompatibleTypes, Regex::new(r"(?i)incompatible types").expect("types")),
        (ErrorCategory::PackageMissing, Regex::new(r"(?i)package\s+\S+\s+does not exist").expect("package")),
        (ErrorCategory::MethodNotApplicable, Regex::new(r"(?i)method\s+\w+.*cannot be applied").expect("method")),
        (ErrorCategory::UnreportedException, Regex::new(r"(?i)unreported exception").expect("exception")),
        (ErrorCategory::MissingReturn, Regex::new(r"(?i)missing return statement").expect("return")),
        (ErrorCategory::Syntax, Regex::new(r"(?i)(';'|'\)'|'\{'|'\}')\s*expected").expect("syntax")),
        (ErrorCategory::IllegalStart, Regex::new(r"(?i)illegal start of (expression|type)").expect("illegal")),
    ];
}

/// Coarse kind of compile failure, used to group the coach warnings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    SymbolNotFound,
    IncompatibleTypes,
    PackageMissing,
    MethodNotApplicable,
    UnreportedException,
    MissingReturn,
    Syntax,
    IllegalStart,
    Other,
}

impl ErrorCategory {
    pub fn classify(message: &str) -> Self {
        CATEGORIES
            .iter()
            .find(|(_, re)| re.is_match(message))
            .map(|(category, _)| *category)
            .unwrap_or(ErrorCategory::Other)
    }

    /// Category of the first error-severity diagnostic
    pub fn of(errors: &[CompileError]) -> Option<Self> {
        errors
            .iter()
            .find(|e| e.is_error())
            .or_else(|| errors.first())
            .map(|e| Self::classify(&e.message))
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            ErrorCategory::SymbolNotFound => "symbol not found",
            ErrorCategory::IncompatibleTypes => "incompatible types",
            ErrorCategory::PackageMissing => "package does not exist",
            ErrorCategory::MethodNotApplicable => "method arguments do not match",
            ErrorCategory::UnreportedException => "unreported exception",
            ErrorCategory::MissingReturn => "missing return statement",
            ErrorCategory::Syntax => "syntax error",
            ErrorCategory::IllegalStart => "illegal start of expression",
            ErrorCategory::Other => "other compile error",
        };
        f.write_str(text)
    }
}

/// Stable fingerprint of a set of diagnostics.
///
/// File paths are reduced to their basename and line/column numbers are
/// dropped, so the same mistake on a shifted line yields the same signature.
pub fn error_signature(errors: &[CompileError]) -> Option<String> {
    let mut parts: Vec<String> = errors
        .iter()
        .map(|e| {
            let file = e.file.rsplit('/').next().unwrap_or(&e.file);
            let message = e.message.to_lowercase();
            let message = LINE_COL.replace_all(&message, "");
            let message = LINE_ONLY.replace_all(&message, ":");
            format!("{}:{}", file, message.trim())
        })
        .collect();
    if parts.is_empty() {
        return None;
    }
    parts.sort();

    let digest = blake3::hash(parts.join("|").as_bytes());
    Some(digest.to_hex().as_str()[..16].to_string())
}

/// One coach (or coder) attempt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepairAttempt {
    pub round: u32,
    pub timestamp: Timestamp,
    pub files: Vec<String>,
    pub success: bool,
    pub error_signature: Option<String>,
    pub category: Option<ErrorCategory>,
    pub summary: String,
}

impl RepairAttempt {
    pub fn new(round: u32, files: Vec<String>, success: bool, summary: impl Into<String>) -> Self {
        Self {
            round,
            timestamp: chrono::Utc::now(),
            files,
            success,
            error_signature: None,
            category: None,
            summary: summary.into(),
        }
    }

    /// Attach the fingerprint and category of the diagnostics being repaired
    pub fn for_errors(mut self, errors: &[CompileError]) -> Self {
        self.error_signature = error_signature(errors);
        self.category = ErrorCategory::of(errors);
        self
    }
}

/// Repair bookkeeping stored inside session memory
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RepairState {
    pub history: Vec<RepairAttempt>,
    pub signature_counts: BTreeMap<String, u32>,
    pub repaired_files: BTreeSet<String>,
    pub last_signature: Option<String>,
    pub consecutive_same: u32,
}

impl RepairState {
    pub fn add_attempt(&mut self, attempt: RepairAttempt) {
        self.repaired_files.extend(attempt.files.iter().cloned());
        self.history.push(attempt);
        if self.history.len() > MAX_HISTORY {
            let overflow = self.history.len() - MAX_HISTORY;
            self.history.drain(..overflow);
        }
    }

    /// Track a failure fingerprint. Returns `true` once the same signature
    /// has been seen [`MAX_SAME_ERROR_TOLERANCE`] times in a row.
    pub fn record_error_signature(&mut self, signature: Option<&str>) -> bool {
        let Some(signature) = signature.filter(|s| !s.trim().is_empty()) else {
            self.last_signature = None;
            self.consecutive_same = 0;
            return false;
        };

        *self.signature_counts.entry(signature.to_string()).or_insert(0) += 1;
        if self.last_signature.as_deref() == Some(signature) {
            self.consecutive_same += 1;
        } else {
            self.last_signature = Some(signature.to_string());
            self.consecutive_same = 1;
        }
        self.consecutive_same >= MAX_SAME_ERROR_TOLERANCE
    }

    /// Would `signature` push the consecutive counter to the tolerance
    pub fn is_same_error_repeated(&self, signature: &str) -> bool {
        self.last_signature.as_deref() == Some(signature)
            && self.consecutive_same + 1 >= MAX_SAME_ERROR_TOLERANCE
    }

    /// Advisory only: the round budget is never shortened by this.
    pub fn should_terminate(&self) -> bool {
        if self.consecutive_same >= MAX_SAME_ERROR_TOLERANCE {
            return true;
        }
        self.history.len() >= MAX_FRUITLESS_ATTEMPTS && self.success_count() == 0
    }

    pub fn recent(&self, n: usize) -> &[RepairAttempt] {
        let start = self.history.len().saturating_sub(n);
        &self.history[start..]
    }

    pub fn attempt_count(&self) -> usize {
        self.history.len()
    }

    pub fn success_count(&self) -> usize {
        self.history.iter().filter(|a| a.success).count()
    }

    pub fn has_repaired_file(&self, path: &str) -> bool {
        self.repaired_files.contains(path)
    }

    /// Markdown section handed to the coach
    pub fn build_coach_context(&self) -> String {
        if self.history.is_empty() {
            return "(first repair, no history)\n".to_string();
        }

        let mut out = String::from("### Repair history\n");
        for attempt in &self.history {
            out.push_str(&format!(
                "- round {}: {} -> {} ({})\n",
                attempt.round + 1,
                if attempt.files.is_empty() {
                    "no files".to_string()
                } else {
                    attempt.files.join(", ")
                },
                if attempt.success { "fixed" } else { "failed" },
                attempt.category.unwrap_or(ErrorCategory::Other),
            ));
            if !attempt.success && !attempt.summary.trim().is_empty() {
                out.push_str(&format!("  summary: {}\n", truncate_chars(&attempt.summary, 100)));
            }
        }

        let mut failed: BTreeMap<ErrorCategory, Vec<&RepairAttempt>> = BTreeMap::new();
        for attempt in self.history.iter().filter(|a| !a.success) {
            failed
                .entry(attempt.category.unwrap_or(ErrorCategory::Other))
                .or_default()
                .push(attempt);
        }
        if !failed.is_empty() {
            out.push_str("\n### Already tried\nThese fixes did not work, do not repeat them:\n");
            for (category, attempts) in &failed {
                out.push_str(&format!("- **{}** ({} times)\n", category, attempts.len()));
                for attempt in attempts {
                    out.push_str(&format!(
                        "  - round {} failed: {}\n",
                        attempt.round + 1,
                        attempt.error_signature.as_deref().unwrap_or("no signature")
                    ));
                }
            }
        }

        if self.consecutive_same >= MAX_SAME_ERROR_TOLERANCE {
            out.push_str(&format!(
                "\n### Warning\nThe same error has repeated {} times in a row. Try a different strategy:\n\
                 - check method signatures against the interfaces they implement\n\
                 - check return types match\n\
                 - check for references to classes that were never generated\n",
                self.consecutive_same
            ));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validation::Severity;

    fn err(file: &str, line: u32, message: &str) -> CompileError {
        CompileError::new(file, line, 3, message, Severity::Error)
    }

    #[test]
    fn test_signature_ignores_lines_and_dirs() {
        let a = error_signature(&[err("/app/src/A.java", 10, "cannot find symbol")]);
        let b = error_signature(&[err("/other/A.java", 42, "Cannot find symbol")]);
        let c = error_signature(&[err("/app/src/B.java", 10, "cannot find symbol")]);
        assert!(a.is_some());
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(error_signature(&[]), None);
    }

    #[test]
    fn test_consecutive_same_error() {
        let mut state = RepairState::default();
        assert!(!state.record_error_signature(Some("abc")));
        assert!(state.is_same_error_repeated("abc"));
        assert!(state.record_error_signature(Some("abc")));
        assert!(state.should_terminate());
        assert_eq!(state.signature_counts["abc"], 2);

        assert!(!state.record_error_signature(Some("def")));
        assert_eq!(state.consecutive_same, 1);
        assert!(!state.record_error_signature(None));
        assert_eq!(state.consecutive_same, 0);
        assert!(state.last_signature.is_none());
    }

    #[test]
    fn test_history_is_bounded() {
        let mut state = RepairState::default();
        for round in 0..15 {
            state.add_attempt(RepairAttempt::new(round, vec![format!("F{round}.java")], false, "x"));
        }
        assert_eq!(state.attempt_count(), MAX_HISTORY);
        assert_eq!(state.history[0].round, 5);
        assert!(state.has_repaired_file("F0.java"));
        assert_eq!(state.recent(2).len(), 2);
        assert_eq!(state.recent(50).len(), MAX_HISTORY);
    }

    #[test]
    fn test_fruitless_attempts_advise_termination() {
        let mut state = RepairState::default();
        for round in 0..2 {
            state.add_attempt(RepairAttempt::new(round, vec![], false, ""));
        }
        assert!(!state.should_terminate());
        state.add_attempt(RepairAttempt::new(2, vec![], true, ""));
        assert!(!state.should_terminate());

        let mut failing = RepairState::default();
        for round in 0..3 {
            failing.add_attempt(RepairAttempt::new(round, vec![], false, ""));
        }
        assert!(failing.should_terminate());
    }

    #[test]
    fn test_coach_context() {
        let mut state = RepairState::default();
        assert!(state.build_coach_context().contains("first repair"));

        let errors = vec![err("A.java", 1, "cannot find symbol")];
        let attempt = RepairAttempt::new(0, vec!["A.java".into()], false, "added import")
            .for_errors(&errors);
        assert_eq!(attempt.category, Some(ErrorCategory::SymbolNotFound));
        state.add_attempt(attempt);
        state.record_error_signature(error_signature(&errors).as_deref());
        state.record_error_signature(error_signature(&errors).as_deref());

        let context = state.build_coach_context();
        assert!(context.contains("round 1: A.java -> failed (symbol not found)"));
        assert!(context.contains("summary: added import"));
        assert!(context.contains("**symbol not found** (1 times)"));
        assert!(context.contains("repeated 2 times"));
    }

    #[test]
    fn test_classify() {
        assert_eq!(
            ErrorCategory::classify("package com.x does not exist"),
            ErrorCategory::PackageMissing
        );
        assert_eq!(ErrorCategory::classify("';' expected"), ErrorCategory::Syntax);
        assert_eq!(ErrorCategory::classify("weird"), ErrorCategory::Other);
    }
}
