//! Process-local store

use parking_lot::RwLock;
use std::collections::HashMap;
use uuid::Uuid;

use super::{JobStore, SessionMemoryStore};
use crate::artifact::Artifact;
use crate::error::Result;
use crate::job::Job;
use crate::memory::SessionMemory;
use crate::validation::ValidationResult;

/// Non-durable [`JobStore`] + [`SessionMemoryStore`]. Lost on restart.
#[derive(Default)]
pub struct InMemoryStore {
    jobs: RwLock<HashMap<Uuid, Job>>,
    artifacts: RwLock<Vec<Artifact>>,
    validations: RwLock<Vec<ValidationResult>>,
    memories: RwLock<HashMap<Uuid, SessionMemory>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl JobStore for InMemoryStore {
    fn save_job(&self, job: &Job) -> Result<()> {
        let mut jobs = self.jobs.write();
        let mut stored = job.clone();
        if jobs.get(&job.id).is_some_and(|j| j.cancel_requested) {
            stored.cancel_requested = true;
        }
        jobs.insert(job.id, stored);
        Ok(())
    }

    fn request_cancel(&self, id: Uuid) -> Result<bool> {
        match self.jobs.write().get_mut(&id) {
            Some(job) if !job.is_terminal() => {
                job.cancel_requested = true;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    fn get_job(&self, id: Uuid) -> Result<Option<Job>> {
        Ok(self.jobs.read().get(&id).cloned())
    }

    fn list_jobs(&self) -> Result<Vec<Job>> {
        let mut jobs: Vec<Job> = self.jobs.read().values().cloned().collect();
        jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(a.id.cmp(&b.id)));
        Ok(jobs)
    }

    fn list_unfinished(&self) -> Result<Vec<Job>> {
        let mut jobs: Vec<Job> = self
            .jobs
            .read()
            .values()
            .filter(|j| !j.is_terminal())
            .cloned()
            .collect();
        jobs.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(jobs)
    }

    fn save_artifact(&self, artifact: &Artifact) -> Result<()> {
        let mut artifacts = self.artifacts.write();
        match artifacts.iter_mut().find(|a| a.id == artifact.id) {
            Some(slot) => *slot = artifact.clone(),
            None => artifacts.push(artifact.clone()),
        }
        Ok(())
    }

    fn get_artifact(&self, id: Uuid) -> Result<Option<Artifact>> {
        Ok(self.artifacts.read().iter().find(|a| a.id == id).cloned())
    }

    fn artifacts_for_job(&self, job_id: Uuid) -> Result<Vec<Artifact>> {
        Ok(self
            .artifacts
            .read()
            .iter()
            .filter(|a| a.job_id == job_id)
            .cloned()
            .collect())
    }

    fn save_validation(&self, result: &ValidationResult) -> Result<()> {
        let mut validations = self.validations.write();
        if !validations.iter().any(|v| v.id == result.id) {
            validations.push(result.clone());
        }
        Ok(())
    }

    fn validations_for_job(&self, job_id: Uuid) -> Result<Vec<ValidationResult>> {
        Ok(self
            .validations
            .read()
            .iter()
            .filter(|v| v.job_id == job_id)
            .cloned()
            .collect())
    }
}

impl SessionMemoryStore for InMemoryStore {
    fn load_memory(&self, job_id: Uuid) -> Result<Option<SessionMemory>> {
        Ok(self.memories.read().get(&job_id).cloned())
    }

    fn save_memory(&self, memory: &SessionMemory) -> Result<()> {
        self.memories.write().insert(memory.job_id, memory.clone());
        Ok(())
    }

    fn delete_memory(&self, job_id: Uuid) -> Result<()> {
        self.memories.write().remove(&job_id);
        Ok(())
    }
}
