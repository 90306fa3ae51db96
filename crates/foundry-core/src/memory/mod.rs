//! Session Memory
//!
//! Durable per-job scratch space that survives rounds and restarts:
//! planning documents, an import index, class signatures and the repair
//! history the coach reads before each fix.

pub mod repair;
pub mod symbols;

pub use repair::{error_signature, ErrorCategory, RepairAttempt, RepairState};
pub use symbols::{declared_type, task_type_for, DeclaredType};

use chrono::Utc;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

use crate::error::Result;
use crate::storage::SessionMemoryStore;
use crate::types::Timestamp;

/// Planning document kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanningFileType {
    TaskPlan,
    Notes,
    Context,
}

impl PlanningFileType {
    pub const ALL: [PlanningFileType; 3] = [
        PlanningFileType::TaskPlan,
        PlanningFileType::Notes,
        PlanningFileType::Context,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            PlanningFileType::TaskPlan => "task_plan",
            PlanningFileType::Notes => "notes",
            PlanningFileType::Context => "context",
        }
    }
}

impl fmt::Display for PlanningFileType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanningFile {
    pub content: String,
    /// Bumped on every append
    pub version: u32,
    pub last_updated_by: Option<String>,
    pub updated_at: Option<Timestamp>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassSignature {
    pub task_type: String,
    pub signature: String,
    pub added_by: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionMemory {
    pub job_id: Uuid,
    #[serde(default)]
    pub files: BTreeMap<PlanningFileType, PlanningFile>,
    /// Fully qualified import -> task type that declares it
    #[serde(default)]
    pub import_index: BTreeMap<String, String>,
    /// Class name -> signature
    #[serde(default)]
    pub class_signatures: BTreeMap<String, ClassSignature>,
    #[serde(default)]
    pub repair: RepairState,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl SessionMemory {
    pub fn new(job_id: Uuid) -> Self {
        let now = Utc::now();
        Self {
            job_id,
            files: BTreeMap::new(),
            import_index: BTreeMap::new(),
            class_signatures: BTreeMap::new(),
            repair: RepairState::default(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn content(&self, file_type: PlanningFileType) -> &str {
        self.files
            .get(&file_type)
            .map(|f| f.content.as_str())
            .unwrap_or("")
    }

    pub fn version(&self, file_type: PlanningFileType) -> u32 {
        self.files.get(&file_type).map(|f| f.version).unwrap_or(0)
    }

    /// Append to a planning document, separated from earlier content by a newline
    pub fn append(&mut self, file_type: PlanningFileType, text: &str, author: &str) {
        let file = self.files.entry(file_type).or_default();
        if file.content.is_empty() {
            file.content = text.to_string();
        } else {
            file.content.push('\n');
            file.content.push_str(text);
        }
        file.version += 1;
        file.last_updated_by = Some(author.to_string());
        file.updated_at = Some(Utc::now());
        self.touch();
    }

    /// Record imports declared by `task_type`. Returns how many were new.
    pub fn update_imports<I, S>(&mut self, task_type: &str, imports: I) -> usize
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut added = 0;
        for import in imports {
            let import = import.as_ref().trim().trim_start_matches("import ").trim_end_matches(';');
            if import.is_empty() {
                continue;
            }
            let previous = self
                .import_index
                .insert(import.to_string(), task_type.to_string());
            if previous.is_none() {
                added += 1;
            }
        }
        self.touch();
        added
    }

    /// Register or replace a class signature
    pub fn add_class_signature(
        &mut self,
        task_type: &str,
        class_name: &str,
        signature: &str,
        author: &str,
    ) {
        self.class_signatures.insert(
            class_name.to_string(),
            ClassSignature {
                task_type: task_type.to_string(),
                signature: signature.to_string(),
                added_by: author.to_string(),
            },
        );
        self.touch();
    }

    /// Import block and signatures grouped by task type, for agent prompts
    pub fn compact_context(&self) -> String {
        let mut out = String::new();

        let mut by_type: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
        for (import, task_type) in &self.import_index {
            by_type.entry(task_type.as_str()).or_default().push(import.as_str());
        }
        if !by_type.is_empty() {
            out.push_str("## Import index\n");
            for (task_type, imports) in by_type {
                out.push_str(&format!("### {task_type}\n```java\n"));
                for import in imports {
                    out.push_str(&format!("import {import};\n"));
                }
                out.push_str("```\n");
            }
        }

        if !self.class_signatures.is_empty() {
            out.push_str("## Class signatures\n");
            for (class_name, sig) in &self.class_signatures {
                out.push_str(&format!(
                    "#### {} ({})\n```java\n{}\n```\n",
                    class_name, sig.task_type, sig.signature
                ));
            }
        }
        out
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

/// Load-modify-save access to [`SessionMemory`] records
pub struct SessionMemoryService {
    store: Arc<dyn SessionMemoryStore>,
    write_lock: Mutex<()>,
}

impl SessionMemoryService {
    pub fn new(store: Arc<dyn SessionMemoryStore>) -> Self {
        Self {
            store,
            write_lock: Mutex::new(()),
        }
    }

    /// Existing memory for `job_id`, or a freshly persisted empty one
    pub fn get_or_create(&self, job_id: Uuid) -> Result<SessionMemory> {
        let _guard = self.write_lock.lock();
        self.load_or_create(job_id)
    }

    pub fn get(&self, job_id: Uuid) -> Result<Option<SessionMemory>> {
        self.store.load_memory(job_id)
    }

    pub fn append_content(
        &self,
        job_id: Uuid,
        file_type: PlanningFileType,
        text: &str,
        author: &str,
    ) -> Result<SessionMemory> {
        self.update(job_id, |memory| memory.append(file_type, text, author))
    }

    pub fn update_import_index(
        &self,
        job_id: Uuid,
        task_type: &str,
        imports: &[String],
        author: &str,
    ) -> Result<SessionMemory> {
        self.update(job_id, |memory| {
            let added = memory.update_imports(task_type, imports);
            tracing::debug!(
                job_id = %job_id,
                task_type,
                added,
                author,
                "Import index updated"
            );
        })
    }

    pub fn add_class_signature(
        &self,
        job_id: Uuid,
        task_type: &str,
        class_name: &str,
        signature: &str,
        author: &str,
    ) -> Result<SessionMemory> {
        self.update(job_id, |memory| {
            memory.add_class_signature(task_type, class_name, signature, author)
        })
    }

    /// Scrape declarations out of generated sources and index them
    pub fn index_sources<'a, I>(&self, job_id: Uuid, sources: I, author: &str) -> Result<usize>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let declared: Vec<(String, DeclaredType)> = sources
            .into_iter()
            .filter(|(path, _)| path.ends_with(".java"))
            .filter_map(|(path, content)| {
                declared_type(content).map(|d| (task_type_for(path, &d.name), d))
            })
            .collect();
        if declared.is_empty() {
            return Ok(0);
        }

        self.update(job_id, |memory| {
            for (task_type, decl) in &declared {
                memory.update_imports(task_type, [decl.qualified_name()]);
                memory.add_class_signature(task_type, &decl.name, &decl.signature, author);
            }
        })?;
        Ok(declared.len())
    }

    pub fn add_repair_attempt(&self, job_id: Uuid, attempt: RepairAttempt) -> Result<SessionMemory> {
        self.update(job_id, |memory| memory.repair.add_attempt(attempt))
    }

    /// Record a failure fingerprint. Returns the advisory termination flag.
    pub fn record_error_signature(&self, job_id: Uuid, signature: Option<&str>) -> Result<bool> {
        let mut repeated = false;
        let memory = self.update(job_id, |memory| {
            repeated = memory.repair.record_error_signature(signature);
        })?;
        Ok(repeated || memory.repair.should_terminate())
    }

    pub fn delete(&self, job_id: Uuid) -> Result<()> {
        let _guard = self.write_lock.lock();
        self.store.delete_memory(job_id)
    }

    fn update<F>(&self, job_id: Uuid, mutate: F) -> Result<SessionMemory>
    where
        F: FnOnce(&mut SessionMemory),
    {
        let _guard = self.write_lock.lock();
        let mut memory = self.load_or_create(job_id)?;
        mutate(&mut memory);
        self.store.save_memory(&memory)?;
        Ok(memory)
    }

    fn load_or_create(&self, job_id: Uuid) -> Result<SessionMemory> {
        if let Some(memory) = self.store.load_memory(job_id)? {
            return Ok(memory);
        }
        let memory = SessionMemory::new(job_id);
        self.store.save_memory(&memory)?;
        tracing::debug!(job_id = %job_id, "Session memory created");
        Ok(memory)
    }
}
