//! Agent boundary
//!
//! The orchestrator drives three kinds of agents. Each is an opaque async
//! call returning a structured result:
//!
//! - [`ArchitectAgent`]: requirement -> API contract + data schema (once per job)
//! - [`CoderAgent`]: contract + task plan -> source files (selected by target type)
//! - [`CoachAgent`]: failing files + diagnostics -> fixed files

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use foundry_core::dependency::TaskNode;
use foundry_core::{Artifact, CompileError, GeneratedBy, Job, SessionMemory};

use crate::error::{OrchestratorError, Result};

/// Coder target used when a job does not ask for another one
pub const BACKEND_TARGET: &str = "backend";

/// Per-round context handed to every agent
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentContext {
    pub round: u32,
    pub max_rounds: u32,
    /// Dependency-ordered generation tasks for the locked data schema
    pub tasks: Vec<TaskNode>,
    /// Accumulated task plan document
    pub task_plan: String,
    /// Import index and class signatures from earlier rounds
    pub known_symbols: String,
    pub metadata: BTreeMap<String, String>,
}

/// A file produced by an agent, before it becomes an [`Artifact`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneratedFile {
    pub path: String,
    pub content: String,
}

impl GeneratedFile {
    pub fn new(path: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            content: content.into(),
        }
    }

    pub fn into_artifact(self, job: &Job, round: u32, generated_by: GeneratedBy) -> Artifact {
        Artifact::new(job.id, self.path, self.content, round, generated_by)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ContractDesign {
    pub api_contract: String,
    pub data_schema: String,
    pub success: bool,
    pub error: Option<String>,
}

impl ContractDesign {
    pub fn ok(api_contract: impl Into<String>, data_schema: impl Into<String>) -> Self {
        Self {
            api_contract: api_contract.into(),
            data_schema: data_schema.into(),
            success: true,
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CoderOutput {
    pub files: Vec<GeneratedFile>,
    pub success: bool,
    pub error: Option<String>,
}

impl CoderOutput {
    pub fn ok(files: Vec<GeneratedFile>) -> Self {
        Self {
            files,
            success: true,
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CoachOutput {
    pub fixed_files: Vec<GeneratedFile>,
    pub success: bool,
    pub summary: String,
    pub error: Option<String>,
}

impl CoachOutput {
    pub fn ok(fixed_files: Vec<GeneratedFile>, summary: impl Into<String>) -> Self {
        Self {
            fixed_files,
            success: true,
            summary: summary.into(),
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            ..Self::default()
        }
    }
}

#[async_trait]
pub trait ArchitectAgent: Send + Sync {
    fn name(&self) -> &str {
        "architect"
    }

    async fn design(&self, job: &Job, ctx: &AgentContext) -> Result<ContractDesign>;
}

#[async_trait]
pub trait CoderAgent: Send + Sync {
    /// Registry key, e.g. `backend`
    fn target_type(&self) -> &str;

    async fn generate(&self, job: &Job, round: u32, ctx: &AgentContext) -> Result<CoderOutput>;
}

#[async_trait]
pub trait CoachAgent: Send + Sync {
    fn name(&self) -> &str {
        "coach"
    }

    async fn fix(
        &self,
        job: &Job,
        failing: &[Artifact],
        diagnostics: &[CompileError],
        ctx: &AgentContext,
        memory: &SessionMemory,
    ) -> Result<CoachOutput>;
}

/// Coders keyed by target type
#[derive(Clone, Default)]
pub struct CoderRegistry {
    coders: HashMap<String, Arc<dyn CoderAgent>>,
}

impl CoderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, coder: Arc<dyn CoderAgent>) -> Self {
        self.register(coder);
        self
    }

    /// Register a coder, replacing any previous one for the same target
    pub fn register(&mut self, coder: Arc<dyn CoderAgent>) -> Option<Arc<dyn CoderAgent>> {
        self.coders.insert(coder.target_type().to_string(), coder)
    }

    pub fn get(&self, target_type: &str) -> Result<Arc<dyn CoderAgent>> {
        self.coders
            .get(target_type)
            .cloned()
            .ok_or_else(|| OrchestratorError::CoderNotRegistered(target_type.to_string()))
    }

    pub fn targets(&self) -> Vec<&str> {
        let mut targets: Vec<&str> = self.coders.keys().map(String::as_str).collect();
        targets.sort_unstable();
        targets
    }

    pub fn len(&self) -> usize {
        self.coders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.coders.is_empty()
    }
}

impl std::fmt::Debug for CoderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoderRegistry")
            .field("targets", &self.targets())
            .finish()
    }
}
