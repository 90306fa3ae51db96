//! SqliteStore: SQLite WAL persistence
//!
//! - WAL mode: concurrent readers, serialized writers
//! - Every record is stored as a JSON payload next to the columns it is
//!   queried by
//! - `seq` columns keep write order for artifacts and validation attempts

use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use serde::de::DeserializeOwned;
use std::path::Path;
use uuid::Uuid;

use super::{JobStore, SessionMemoryStore};
use crate::artifact::Artifact;
use crate::error::{FoundryError, Result, ResultExt, StoreError};
use crate::job::Job;
use crate::memory::SessionMemory;
use crate::types::JobStatus;
use crate::validation::ValidationResult;

pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (or create) the database at `path` in WAL mode
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .map_err(FoundryError::from)
                .with_context(|| format!("Creating database directory '{}'", parent.display()))?;
        }

        let conn = Connection::open(path)
            .map_err(FoundryError::from)
            .with_context(|| format!("Opening SQLite '{}'", path.display()))?;

        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA foreign_keys = ON;
             PRAGMA busy_timeout = 5000;",
        )
        .map_err(FoundryError::from)
        .context("Configuring SQLite PRAGMAs")?;

        Self::with_connection(conn)
    }

    /// Private in-memory database
    pub fn open_in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.migrate()?;
        Ok(store)
    }

    /// Idempotent DDL
    fn migrate(&self) -> Result<()> {
        self.conn
            .lock()
            .execute_batch(
                "
            CREATE TABLE IF NOT EXISTS jobs (
                id            TEXT PRIMARY KEY,
                status        TEXT NOT NULL,
                current_round INTEGER NOT NULL,
                payload_json  TEXT NOT NULL,
                created_at_ms INTEGER NOT NULL,
                updated_at_ms INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_jobs_status
                ON jobs(status, created_at_ms);

            CREATE TABLE IF NOT EXISTS artifacts (
                seq           INTEGER PRIMARY KEY AUTOINCREMENT,
                id            TEXT NOT NULL UNIQUE,
                job_id        TEXT NOT NULL,
                file_path     TEXT NOT NULL,
                round         INTEGER NOT NULL,
                has_errors    INTEGER NOT NULL DEFAULT 0,
                payload_json  TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_artifacts_job
                ON artifacts(job_id, seq);

            CREATE TABLE IF NOT EXISTS validation_results (
                seq           INTEGER PRIMARY KEY AUTOINCREMENT,
                id            TEXT NOT NULL UNIQUE,
                job_id        TEXT NOT NULL,
                round         INTEGER NOT NULL,
                attempt       INTEGER NOT NULL,
                passed        INTEGER NOT NULL,
                payload_json  TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_validation_job
                ON validation_results(job_id, seq);

            CREATE TABLE IF NOT EXISTS session_memory (
                job_id        TEXT PRIMARY KEY,
                payload_json  TEXT NOT NULL,
                updated_at_ms INTEGER NOT NULL
            );
            ",
            )
            .map_err(FoundryError::from)
            .context("Migrating SQLite schema")
    }

    fn query_payloads<T: DeserializeOwned>(
        &self,
        table: &'static str,
        sql: &str,
        param: &str,
    ) -> Result<Vec<T>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt.query_map([param], |row| row.get::<_, String>(0))?;

        let mut out = Vec::new();
        for payload in rows {
            out.push(decode(table, &payload?)?);
        }
        Ok(out)
    }

    fn query_payload<T: DeserializeOwned>(
        &self,
        table: &'static str,
        sql: &str,
        param: &str,
    ) -> Result<Option<T>> {
        let payload: Option<String> = self
            .conn
            .lock()
            .query_row(sql, [param], |row| row.get(0))
            .optional()?;
        payload.map(|p| decode(table, &p)).transpose()
    }
}

fn decode<T: DeserializeOwned>(table: &'static str, payload: &str) -> Result<T> {
    serde_json::from_str(payload).map_err(|e| {
        StoreError::Corrupt {
            table,
            reason: e.to_string(),
        }
        .into()
    })
}

impl JobStore for SqliteStore {
    fn save_job(&self, job: &Job) -> Result<()> {
        let conn = self.conn.lock();
        let already_cancelled = conn
            .query_row(
                "SELECT json_extract(payload_json, '$.cancelRequested') FROM jobs WHERE id = ?1",
                [job.id.to_string()],
                |row| row.get::<_, Option<bool>>(0),
            )
            .optional()?
            .flatten()
            .unwrap_or(false);

        let payload_json = if already_cancelled && !job.cancel_requested {
            let mut sticky = job.clone();
            sticky.cancel_requested = true;
            serde_json::to_string(&sticky)?
        } else {
            serde_json::to_string(job)?
        };
        let now_ms = chrono::Utc::now().timestamp_millis();
        conn.execute(
            "INSERT INTO jobs (id, status, current_round, payload_json, created_at_ms, updated_at_ms)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(id) DO UPDATE SET
                status = excluded.status,
                current_round = excluded.current_round,
                payload_json = excluded.payload_json,
                updated_at_ms = excluded.updated_at_ms",
            params![
                job.id.to_string(),
                job.status.as_str(),
                job.current_round,
                payload_json,
                job.created_at.timestamp_millis(),
                now_ms
            ],
        )
        .map_err(FoundryError::from)
        .with_context(|| format!("Saving job {}", job.id))?;
        Ok(())
    }

    fn request_cancel(&self, id: Uuid) -> Result<bool> {
        let conn = self.conn.lock();
        let payload: Option<String> = conn
            .query_row(
                "SELECT payload_json FROM jobs WHERE id = ?1",
                [id.to_string()],
                |row| row.get(0),
            )
            .optional()?;
        let Some(payload) = payload else {
            return Ok(false);
        };

        let mut job: Job = decode("jobs", &payload)?;
        if job.is_terminal() {
            return Ok(false);
        }
        job.cancel_requested = true;
        conn.execute(
            "UPDATE jobs SET payload_json = ?2, updated_at_ms = ?3 WHERE id = ?1",
            params![
                id.to_string(),
                serde_json::to_string(&job)?,
                chrono::Utc::now().timestamp_millis()
            ],
        )
        .map_err(FoundryError::from)
        .with_context(|| format!("Requesting cancellation of job {id}"))?;
        Ok(true)
    }

    fn get_job(&self, id: Uuid) -> Result<Option<Job>> {
        self.query_payload(
            "jobs",
            "SELECT payload_json FROM jobs WHERE id = ?1",
            &id.to_string(),
        )
    }

    fn list_jobs(&self) -> Result<Vec<Job>> {
        let conn = self.conn.lock();
        let mut stmt =
            conn.prepare("SELECT payload_json FROM jobs ORDER BY created_at_ms DESC, id")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        let mut out = Vec::new();
        for payload in rows {
            out.push(decode("jobs", &payload?)?);
        }
        Ok(out)
    }

    fn list_unfinished(&self) -> Result<Vec<Job>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT payload_json FROM jobs
             WHERE status NOT IN (?1, ?2, ?3)
             ORDER BY created_at_ms ASC, id",
        )?;
        let rows = stmt.query_map(
            params![
                JobStatus::Success.as_str(),
                JobStatus::Failed.as_str(),
                JobStatus::Cancelled.as_str()
            ],
            |row| row.get::<_, String>(0),
        )?;
        let mut out = Vec::new();
        for payload in rows {
            out.push(decode("jobs", &payload?)?);
        }
        Ok(out)
    }

    fn save_artifact(&self, artifact: &Artifact) -> Result<()> {
        let payload_json = serde_json::to_string(artifact)?;
        self.conn
            .lock()
            .execute(
                "INSERT INTO artifacts (id, job_id, file_path, round, has_errors, payload_json)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT(id) DO UPDATE SET
                    has_errors = excluded.has_errors,
                    payload_json = excluded.payload_json",
                params![
                    artifact.id.to_string(),
                    artifact.job_id.to_string(),
                    artifact.file_path,
                    artifact.round,
                    artifact.has_errors,
                    payload_json
                ],
            )
            .map_err(FoundryError::from)
            .with_context(|| format!("Saving artifact {}", artifact.file_path))?;
        Ok(())
    }

    fn get_artifact(&self, id: Uuid) -> Result<Option<Artifact>> {
        self.query_payload(
            "artifacts",
            "SELECT payload_json FROM artifacts WHERE id = ?1",
            &id.to_string(),
        )
    }

    fn artifacts_for_job(&self, job_id: Uuid) -> Result<Vec<Artifact>> {
        self.query_payloads(
            "artifacts",
            "SELECT payload_json FROM artifacts WHERE job_id = ?1 ORDER BY seq",
            &job_id.to_string(),
        )
    }

    fn save_validation(&self, result: &ValidationResult) -> Result<()> {
        let payload_json = serde_json::to_string(result)?;
        self.conn
            .lock()
            .execute(
                "INSERT INTO validation_results (id, job_id, round, attempt, passed, payload_json)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT(id) DO NOTHING",
                params![
                    result.id.to_string(),
                    result.job_id.to_string(),
                    result.round,
                    result.attempt,
                    result.passed,
                    payload_json
                ],
            )
            .map_err(FoundryError::from)
            .context("Saving validation result")?;
        Ok(())
    }

    fn validations_for_job(&self, job_id: Uuid) -> Result<Vec<ValidationResult>> {
        self.query_payloads(
            "validation_results",
            "SELECT payload_json FROM validation_results WHERE job_id = ?1 ORDER BY seq",
            &job_id.to_string(),
        )
    }
}

impl SessionMemoryStore for SqliteStore {
    fn load_memory(&self, job_id: Uuid) -> Result<Option<SessionMemory>> {
        self.query_payload(
            "session_memory",
            "SELECT payload_json FROM session_memory WHERE job_id = ?1",
            &job_id.to_string(),
        )
    }

    fn save_memory(&self, memory: &SessionMemory) -> Result<()> {
        let payload_json = serde_json::to_string(memory)?;
        self.conn.lock().execute(
            "INSERT INTO session_memory (job_id, payload_json, updated_at_ms)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(job_id) DO UPDATE SET
                payload_json = excluded.payload_json,
                updated_at_ms = excluded.updated_at_ms",
            params![
                memory.job_id.to_string(),
                payload_json,
                memory.updated_at.timestamp_millis()
            ],
        )?;
        Ok(())
    }

    fn delete_memory(&self, job_id: Uuid) -> Result<()> {
        self.conn.lock().execute(
            "DELETE FROM session_memory WHERE job_id = ?1",
            [job_id.to_string()],
        )?;
        Ok(())
    }
}
