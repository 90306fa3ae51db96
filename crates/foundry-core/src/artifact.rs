//! Generated artifacts
//!
//! Artifacts are versioned by round. A coach fix for round N+1 is stored as a
//! new row and supersedes, but never deletes, the round-N artifact for the
//! same path.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

use crate::types::{GeneratedBy, Timestamp};
use crate::validation::CompileError;

/// One generated file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Artifact {
    pub id: Uuid,
    pub job_id: Uuid,
    pub file_path: String,
    pub content: String,
    pub round: u32,
    pub generated_by: GeneratedBy,
    pub has_errors: bool,
    pub compiler_error: Option<String>,
    pub created_at: Timestamp,
}

impl Artifact {
    pub fn new(
        job_id: Uuid,
        file_path: impl Into<String>,
        content: impl Into<String>,
        round: u32,
        generated_by: GeneratedBy,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            job_id,
            file_path: normalize_path(&file_path.into()),
            content: content.into(),
            round,
            generated_by,
            has_errors: false,
            compiler_error: None,
            created_at: Utc::now(),
        }
    }

    /// Last path segment, e.g. `User.java`
    pub fn file_name(&self) -> &str {
        self.file_path
            .rsplit('/')
            .next()
            .unwrap_or(self.file_path.as_str())
    }

    pub fn mark_error(&mut self, message: impl Into<String>) {
        self.has_errors = true;
        self.compiler_error = Some(message.into());
    }

    pub fn clear_error(&mut self) {
        self.has_errors = false;
        self.compiler_error = None;
    }

    /// Whether a diagnostic reported against `diag_file` belongs to this artifact.
    ///
    /// Build tools report absolute paths inside the sandbox working directory,
    /// so a suffix match on the relative artifact path is tried first.
    pub fn matches_diagnostic_file(&self, diag_file: &str) -> bool {
        let diag = normalize_path(diag_file);
        if diag.is_empty() {
            return false;
        }
        if diag == self.file_path || diag.ends_with(&format!("/{}", self.file_path)) {
            return true;
        }
        diag.rsplit('/').next() == Some(self.file_name())
    }

    /// Collects the diagnostics that belong to this artifact, one per line
    pub fn render_errors(&self, errors: &[CompileError]) -> Option<String> {
        let lines: Vec<String> = errors
            .iter()
            .filter(|e| self.matches_diagnostic_file(&e.file))
            .map(CompileError::to_string)
            .collect();
        if lines.is_empty() {
            None
        } else {
            Some(lines.join("\n"))
        }
    }
}

fn normalize_path(path: &str) -> String {
    path.trim()
        .replace('\\', "/")
        .trim_start_matches("./")
        .to_string()
}

/// Latest artifact per file path: highest round wins, later writes win ties.
///
/// The input order is treated as write order. Output is sorted by path.
pub fn latest_per_path(artifacts: &[Artifact]) -> Vec<Artifact> {
    let mut latest: HashMap<&str, &Artifact> = HashMap::new();
    for artifact in artifacts {
        match latest.get(artifact.file_path.as_str()) {
            Some(existing) if existing.round > artifact.round => {}
            _ => {
                latest.insert(artifact.file_path.as_str(), artifact);
            }
        }
    }
    let mut out: Vec<Artifact> = latest.into_values().cloned().collect();
    out.sort_by(|a, b| a.file_path.cmp(&b.file_path));
    out
}

/// Replace entries of `current` with `fixes` by path, appending new paths.
pub fn merge_fixes(current: &[Artifact], fixes: &[Artifact]) -> Vec<Artifact> {
    let mut merged: Vec<Artifact> = current.to_vec();
    for fix in fixes {
        match merged.iter_mut().find(|a| a.file_path == fix.file_path) {
            Some(slot) => *slot = fix.clone(),
            None => merged.push(fix.clone()),
        }
    }
    merged
}
