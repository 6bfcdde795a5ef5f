//! SQLite-backed job lifecycle storage.
//!
//! Transitions are guarded inside the SQL statements themselves, so a late
//! writer can never move a record backwards.

use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use thiserror::Error;
use tracing::{debug, warn};

use tracelift_core::{Job, JobProgress, JobStatus, RegistrationResult};

use crate::{from_ms, now_ms};

/// Errors from job store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("Lock error")]
    Lock,
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Corrupt job record {job_id}: {reason}")]
    Corrupt { job_id: String, reason: String },
}

/// SQLite-backed job storage with TTL expiry.
pub struct JobStore {
    conn: Mutex<Connection>,
    ttl: Duration,
}

struct JobRow {
    job_id: String,
    status: String,
    created_at: i64,
    started_at: Option<i64>,
    completed_at: Option<i64>,
    progress: Option<String>,
    result: Option<String>,
    error: Option<String>,
}

impl JobStore {
    pub fn new(path: impl AsRef<Path>, ttl: Duration) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        conn.busy_timeout(Duration::from_secs(5))?;
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |_| Ok(()))?;
        Self::with_connection(conn, ttl)
    }

    /// Creates an in-memory job store (for testing).
    pub fn in_memory(ttl: Duration) -> Result<Self, StoreError> {
        Self::with_connection(Connection::open_in_memory()?, ttl)
    }

    fn with_connection(conn: Connection, ttl: Duration) -> Result<Self, StoreError> {
        let store = Self {
            conn: Mutex::new(conn),
            ttl,
        };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<(), StoreError> {
        let conn = self.conn.lock().map_err(|_| StoreError::Lock)?;

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS jobs (
                job_id TEXT PRIMARY KEY,
                status TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                started_at INTEGER,
                completed_at INTEGER,
                progress TEXT,
                result TEXT,
                error TEXT,
                expires_at INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_jobs_expires ON jobs(expires_at);
            "#,
        )?;

        Ok(())
    }

    fn expires_at(&self, from_ms: i64) -> i64 {
        from_ms.saturating_add(self.ttl.as_millis() as i64)
    }

    /// Records a freshly accepted job. Never overwrites an existing record,
    /// so a worker that got there first keeps its state.
    pub fn create_pending(&self, job_id: &str) -> Result<bool, StoreError> {
        let conn = self.conn.lock().map_err(|_| StoreError::Lock)?;
        let now = now_ms();

        let inserted = conn.execute(
            r#"INSERT OR IGNORE INTO jobs (job_id, status, created_at, expires_at)
               VALUES (?1, ?2, ?3, ?4)"#,
            params![job_id, JobStatus::Pending.as_str(), now, self.expires_at(now)],
        )?;

        if inserted == 0 {
            debug!(job_id, "Pending record skipped; job already known");
        }
        Ok(inserted == 1)
    }

    /// Moves a job to `processing`, refreshing its progress on retries.
    pub fn mark_processing(&self, job_id: &str, progress: &JobProgress) -> Result<bool, StoreError> {
        let conn = self.conn.lock().map_err(|_| StoreError::Lock)?;
        let now = now_ms();

        let changed = conn.execute(
            r#"INSERT INTO jobs (job_id, status, created_at, started_at, progress, expires_at)
               VALUES (?1, ?2, ?3, ?3, ?4, ?5)
               ON CONFLICT(job_id) DO UPDATE SET
                   status = excluded.status,
                   started_at = COALESCE(jobs.started_at, excluded.started_at),
                   progress = excluded.progress
               WHERE jobs.status IN ('pending', 'processing')"#,
            params![
                job_id,
                JobStatus::Processing.as_str(),
                now,
                serde_json::to_string(progress)?,
                self.expires_at(now),
            ],
        )?;

        Ok(applied(job_id, JobStatus::Processing, changed))
    }

    /// Terminal success. Only a `processing` job can complete.
    pub fn mark_completed(
        &self,
        job_id: &str,
        result: &RegistrationResult,
    ) -> Result<bool, StoreError> {
        let conn = self.conn.lock().map_err(|_| StoreError::Lock)?;
        let now = now_ms();

        let changed = conn.execute(
            r#"UPDATE jobs SET status = ?2, completed_at = ?3, result = ?4, error = NULL
               WHERE job_id = ?1 AND status = 'processing'"#,
            params![
                job_id,
                JobStatus::Completed.as_str(),
                now,
                serde_json::to_string(result)?,
            ],
        )?;

        Ok(applied(job_id, JobStatus::Completed, changed))
    }

    /// Terminal failure from `pending` or `processing`.
    pub fn mark_failed(&self, job_id: &str, error: &str) -> Result<bool, StoreError> {
        let conn = self.conn.lock().map_err(|_| StoreError::Lock)?;
        let now = now_ms();

        let changed = conn.execute(
            r#"INSERT INTO jobs (job_id, status, created_at, completed_at, error, expires_at)
               VALUES (?1, ?2, ?3, ?3, ?4, ?5)
               ON CONFLICT(job_id) DO UPDATE SET
                   status = excluded.status,
                   completed_at = excluded.completed_at,
                   error = excluded.error
               WHERE jobs.status IN ('pending', 'processing')"#,
            params![
                job_id,
                JobStatus::Failed.as_str(),
                now,
                error,
                self.expires_at(now),
            ],
        )?;

        Ok(applied(job_id, JobStatus::Failed, changed))
    }

    /// Looks up a job. Expired records are treated as unknown.
    pub fn get(&self, job_id: &str) -> Result<Option<Job>, StoreError> {
        let conn = self.conn.lock().map_err(|_| StoreError::Lock)?;

        let row = conn
            .query_row(
                r#"SELECT job_id, status, created_at, started_at, completed_at,
                          progress, result, error
                   FROM jobs WHERE job_id = ?1 AND expires_at > ?2"#,
                params![job_id, now_ms()],
                |row| {
                    Ok(JobRow {
                        job_id: row.get(0)?,
                        status: row.get(1)?,
                        created_at: row.get(2)?,
                        started_at: row.get(3)?,
                        completed_at: row.get(4)?,
                        progress: row.get(5)?,
                        result: row.get(6)?,
                        error: row.get(7)?,
                    })
                },
            )
            .optional()?;

        row.map(JobRow::into_job).transpose()
    }

    /// Deletes every record whose TTL ran out before `now`.
    pub fn purge_expired(&self, now: DateTime<Utc>) -> Result<usize, StoreError> {
        let conn = self.conn.lock().map_err(|_| StoreError::Lock)?;
        let removed = conn.execute(
            "DELETE FROM jobs WHERE expires_at <= ?1",
            params![now.timestamp_millis()],
        )?;
        Ok(removed)
    }

    /// Cheap liveness probe for health checks.
    pub fn ping(&self) -> Result<(), StoreError> {
        let conn = self.conn.lock().map_err(|_| StoreError::Lock)?;
        conn.query_row("SELECT 1", [], |_| Ok(()))?;
        Ok(())
    }
}

fn applied(job_id: &str, to: JobStatus, changed: usize) -> bool {
    if changed == 0 {
        warn!(job_id, to = to.as_str(), "Refused non-monotonic job transition");
    }
    changed > 0
}

impl JobRow {
    fn into_job(self) -> Result<Job, StoreError> {
        let corrupt = |reason: String| StoreError::Corrupt {
            job_id: self.job_id.clone(),
            reason,
        };
        let time = |ms: i64| from_ms(ms).ok_or_else(|| corrupt(format!("bad timestamp {}", ms)));

        let status = JobStatus::parse(&self.status)
            .ok_or_else(|| corrupt(format!("unknown status {:?}", self.status)))?;
        let created_at = time(self.created_at)?;
        let started_at = self.started_at.map(time).transpose()?;
        let completed_at = self.completed_at.map(time).transpose()?;
        let progress = self
            .progress
            .as_deref()
            .map(serde_json::from_str::<JobProgress>)
            .transpose()?;
        let result = self
            .result
            .as_deref()
            .map(serde_json::from_str::<RegistrationResult>)
            .transpose()?;

        Ok(Job {
            job_id: self.job_id,
            status,
            created_at,
            started_at,
            completed_at,
            progress,
            result,
            error: self.error,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracelift_core::ObjectCounts;

    const DAY: Duration = Duration::from_secs(86_400);

    fn progress(attempt: u32) -> JobProgress {
        JobProgress {
            attempt,
            max_attempts: 4,
            traces_total: 2,
            last_error: None,
        }
    }

    fn result() -> RegistrationResult {
        RegistrationResult::success("trace-1", 2, ObjectCounts::default(), 5)
    }

    #[test]
    fn test_happy_path() {
        let store = JobStore::in_memory(DAY).unwrap();
        assert!(store.create_pending("job-1").unwrap());
        assert_eq!(store.get("job-1").unwrap().unwrap().status, JobStatus::Pending);

        assert!(store.mark_processing("job-1", &progress(1)).unwrap());
        let job = store.get("job-1").unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Processing);
        assert!(job.started_at.is_some());
        assert_eq!(job.progress, Some(progress(1)));

        assert!(store.mark_completed("job-1", &result()).unwrap());
        let job = store.get("job-1").unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.result.unwrap().trace_id, "trace-1");
        assert!(job.completed_at.is_some());
    }

    #[test]
    fn test_late_pending_write_cannot_regress() {
        let store = JobStore::in_memory(DAY).unwrap();
        // Worker picked the job up before the gateway recorded it.
        assert!(store.mark_processing("job-1", &progress(1)).unwrap());
        assert!(!store.create_pending("job-1").unwrap());
        assert_eq!(store.get("job-1").unwrap().unwrap().status, JobStatus::Processing);
    }

    #[test]
    fn test_terminal_states_are_final() {
        let store = JobStore::in_memory(DAY).unwrap();
        store.create_pending("job-1").unwrap();
        store.mark_processing("job-1", &progress(1)).unwrap();
        assert!(store.mark_failed("job-1", "backend down").unwrap());

        assert!(!store.mark_processing("job-1", &progress(2)).unwrap());
        assert!(!store.mark_completed("job-1", &result()).unwrap());
        assert!(!store.mark_failed("job-1", "again").unwrap());

        let job = store.get("job-1").unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.error.as_deref(), Some("backend down"));
    }

    #[test]
    fn test_pending_cannot_complete_directly() {
        let store = JobStore::in_memory(DAY).unwrap();
        store.create_pending("job-1").unwrap();
        assert!(!store.mark_completed("job-1", &result()).unwrap());
        assert_eq!(store.get("job-1").unwrap().unwrap().status, JobStatus::Pending);
    }

    #[test]
    fn test_retry_refreshes_progress_but_keeps_start() {
        let store = JobStore::in_memory(DAY).unwrap();
        store.mark_processing("job-1", &progress(1)).unwrap();
        let first = store.get("job-1").unwrap().unwrap().started_at;

        let mut second = progress(2);
        second.last_error = Some("timeout".into());
        assert!(store.mark_processing("job-1", &second).unwrap());

        let job = store.get("job-1").unwrap().unwrap();
        assert_eq!(job.started_at, first);
        assert_eq!(job.progress, Some(second));
    }

    #[test]
    fn test_expired_records_are_unknown_and_purged() {
        let store = JobStore::in_memory(Duration::ZERO).unwrap();
        store.create_pending("job-1").unwrap();
        assert!(store.get("job-1").unwrap().is_none());
        assert_eq!(store.purge_expired(Utc::now()).unwrap(), 1);
        assert!(store.get("missing").unwrap().is_none());
    }

    #[test]
    fn test_ping() {
        assert!(JobStore::in_memory(DAY).unwrap().ping().is_ok());
    }
}
