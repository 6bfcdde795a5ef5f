//! Durable work queue shared by the gateway and the workers.
//!
//! Reserving a job leases it; an unacknowledged job whose lease runs out
//! becomes visible again, so a crashed worker never loses work.

use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

use rusqlite::{params, Connection, OptionalExtension};
use thiserror::Error;
use tokio::sync::Notify;
use tracing::debug;
use uuid::Uuid;

use tracelift_core::RegistrationRequest;

use crate::now_ms;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("Lock error")]
    Lock,
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// A leased job handed to one worker.
#[derive(Debug)]
pub struct ReservedJob {
    pub job_id: String,
    /// Decoding error text when the stored payload no longer parses.
    pub request: Result<RegistrationRequest, String>,
    /// 1-based count of deliveries, including this one.
    pub attempt: u32,
    pub last_error: Option<String>,
}

pub struct JobQueue {
    conn: Mutex<Connection>,
    notify: Notify,
}

impl JobQueue {
    pub fn new(path: impl AsRef<Path>) -> Result<Self, QueueError> {
        let conn = Connection::open(path)?;
        conn.busy_timeout(Duration::from_secs(5))?;
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |_| Ok(()))?;
        Self::with_connection(conn)
    }

    /// Creates an in-memory queue (for testing).
    pub fn in_memory() -> Result<Self, QueueError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, QueueError> {
        let queue = Self {
            conn: Mutex::new(conn),
            notify: Notify::new(),
        };
        queue.init_schema()?;
        Ok(queue)
    }

    fn init_schema(&self) -> Result<(), QueueError> {
        let conn = self.conn.lock().map_err(|_| QueueError::Lock)?;

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS queue (
                job_id TEXT PRIMARY KEY,
                payload TEXT NOT NULL,
                attempts INTEGER NOT NULL DEFAULT 0,
                available_at INTEGER NOT NULL,
                leased_until INTEGER,
                enqueued_at INTEGER NOT NULL,
                last_error TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_queue_available ON queue(available_at, enqueued_at);
            "#,
        )?;

        Ok(())
    }

    /// Stores the request and wakes one idle worker. Returns the new job id.
    pub fn enqueue(&self, request: &RegistrationRequest) -> Result<String, QueueError> {
        let job_id = Uuid::new_v4().to_string();
        let payload = serde_json::to_string(request)?;
        let now = now_ms();

        {
            let conn = self.conn.lock().map_err(|_| QueueError::Lock)?;
            conn.execute(
                r#"INSERT INTO queue (job_id, payload, available_at, enqueued_at)
                   VALUES (?1, ?2, ?3, ?3)"#,
                params![job_id, payload, now],
            )?;
        }

        debug!(job_id = %job_id, traces = request.traces.len(), "Enqueued job");
        self.notify.notify_one();
        Ok(job_id)
    }

    /// Leases the oldest available job for `lease`.
    pub fn reserve(&self, lease: Duration) -> Result<Option<ReservedJob>, QueueError> {
        let mut conn = self.conn.lock().map_err(|_| QueueError::Lock)?;
        let now = now_ms();
        let tx = conn.transaction()?;

        let row = tx
            .query_row(
                r#"SELECT job_id, payload, attempts, last_error FROM queue
                   WHERE available_at <= ?1
                     AND (leased_until IS NULL OR leased_until <= ?1)
                   ORDER BY available_at, enqueued_at
                   LIMIT 1"#,
                params![now],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, u32>(2)?,
                        row.get::<_, Option<String>>(3)?,
                    ))
                },
            )
            .optional()?;

        let Some((job_id, payload, attempts, last_error)) = row else {
            return Ok(None);
        };

        let attempt = attempts.saturating_add(1);
        tx.execute(
            "UPDATE queue SET attempts = ?2, leased_until = ?3 WHERE job_id = ?1",
            params![job_id, attempt, now.saturating_add(lease.as_millis() as i64)],
        )?;
        tx.commit()?;

        let request = serde_json::from_str(&payload).map_err(|e| e.to_string());
        Ok(Some(ReservedJob {
            job_id,
            request,
            attempt,
            last_error,
        }))
    }

    /// Pushes the lease of a running job out to `lease` from now.
    pub fn extend_lease(&self, job_id: &str, lease: Duration) -> Result<(), QueueError> {
        let conn = self.conn.lock().map_err(|_| QueueError::Lock)?;
        conn.execute(
            "UPDATE queue SET leased_until = ?2 WHERE job_id = ?1 AND leased_until IS NOT NULL",
            params![job_id, now_ms().saturating_add(lease.as_millis() as i64)],
        )?;
        Ok(())
    }

    /// Removes a job for good. Call only after its outcome is recorded.
    pub fn ack(&self, job_id: &str) -> Result<(), QueueError> {
        let conn = self.conn.lock().map_err(|_| QueueError::Lock)?;
        conn.execute("DELETE FROM queue WHERE job_id = ?1", params![job_id])?;
        Ok(())
    }

    /// Releases the lease and hides the job for `delay`.
    pub fn retry_later(&self, job_id: &str, delay: Duration, error: &str) -> Result<(), QueueError> {
        let conn = self.conn.lock().map_err(|_| QueueError::Lock)?;
        conn.execute(
            r#"UPDATE queue SET available_at = ?2, leased_until = NULL, last_error = ?3
               WHERE job_id = ?1"#,
            params![
                job_id,
                now_ms().saturating_add(delay.as_millis() as i64),
                error
            ],
        )?;
        Ok(())
    }

    /// Number of jobs not yet acknowledged, leased or not.
    pub fn depth(&self) -> Result<usize, QueueError> {
        let conn = self.conn.lock().map_err(|_| QueueError::Lock)?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM queue", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    pub fn ping(&self) -> Result<(), QueueError> {
        let conn = self.conn.lock().map_err(|_| QueueError::Lock)?;
        conn.query_row("SELECT 1", [], |_| Ok(()))?;
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn conn_for_tests(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn.lock().unwrap()
    }

    /// Resolves when a job is enqueued.
    pub async fn notified(&self) {
        self.notify.notified().await;
    }
}
