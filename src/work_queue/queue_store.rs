//! Work queue storage and persistence.
//!
//! Provides SQLite-backed storage for pipeline jobs. Producers only see the
//! [`WorkQueue`] capabilities; the runner drives jobs through their lifecycle
//! with the [`JobLedger`] state transitions.

use super::models::*;
use super::schema::WORK_QUEUE_VERSIONED_SCHEMAS;
use crate::sqlite_persistence::open_versioned;
use anyhow::{Context, Result};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Default per-job estimate used by [`WorkQueue::get_wait_estimate`].
pub const DEFAULT_SECONDS_PER_JOB: u64 = 40;

/// Producer-side capabilities of the work queue.
pub trait WorkQueue: Send + Sync {
    /// Add a new job to the queue. Returns the job id.
    fn enqueue(&self, job: NewJob) -> Result<String>;

    /// Rough time until a job enqueued now would complete.
    fn get_wait_estimate(&self) -> Result<Duration>;

    /// Job counts per status.
    fn queue_stats(&self) -> Result<QueueStats>;
}

/// Consumer-side state transitions of the work queue.
pub trait JobLedger: Send + Sync {
    /// Get a job by ID.
    fn get_job(&self, id: &str) -> Result<Option<QueuedJob>>;

    /// Atomically claim the next pending job (PENDING → IN_PROGRESS),
    /// by priority, then age.
    fn claim_next(&self) -> Result<Option<QueuedJob>>;

    /// Mark a claimed job as completed.
    fn mark_completed(&self, id: &str) -> Result<()>;

    /// Schedule a claimed job for another attempt, consuming one retry.
    fn mark_retry_waiting(&self, id: &str, next_retry_at: i64, error: &str) -> Result<()>;

    /// Move a claimed job to `DEAD`.
    /// Returns true only for the call that performed the transition.
    fn mark_dead(&self, id: &str, error: &str) -> Result<bool>;

    /// `DEAD` jobs whose terminal-failure handling has not succeeded yet,
    /// oldest first.
    fn get_unreconciled_dead(&self, limit: usize) -> Result<Vec<QueuedJob>>;

    /// Record that terminal-failure handling of a `DEAD` job succeeded.
    fn mark_reconciled(&self, id: &str) -> Result<()>;

    /// Promote due `RETRY_WAITING` jobs back to `PENDING`. Returns the count.
    fn promote_retry_ready(&self) -> Result<usize>;

    /// Re-queue jobs stuck `IN_PROGRESS` for longer than the threshold.
    /// Returns the count.
    fn requeue_stale(&self, stale_threshold_secs: i64) -> Result<usize>;
}

/// SQLite-backed work queue.
pub struct SqliteWorkQueue {
    conn: Arc<Mutex<Connection>>,
    seconds_per_job: u64,
}

impl SqliteWorkQueue {
    /// Open an existing queue database or create a new one with the current schema.
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let conn = open_versioned(db_path, WORK_QUEUE_VERSIONED_SCHEMAS, "work queue")?;
        Ok(SqliteWorkQueue {
            conn: Arc::new(Mutex::new(conn)),
            seconds_per_job: DEFAULT_SECONDS_PER_JOB,
        })
    }

    /// Create an in-memory queue for testing.
    #[cfg(test)]
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        WORK_QUEUE_VERSIONED_SCHEMAS
            .last()
            .context("No schemas defined")?
            .create(&conn)?;

        Ok(SqliteWorkQueue {
            conn: Arc::new(Mutex::new(conn)),
            seconds_per_job: DEFAULT_SECONDS_PER_JOB,
        })
    }

    pub fn with_seconds_per_job(mut self, seconds_per_job: u64) -> Self {
        self.seconds_per_job = seconds_per_job;
        self
    }

    fn row_to_job(row: &rusqlite::Row) -> rusqlite::Result<QueuedJob> {
        let kind: String = row.get("kind")?;
        let status: String = row.get("status")?;
        let priority: i32 = row.get("priority")?;

        Ok(QueuedJob {
            id: row.get("id")?,
            kind: JobKind::from_db_str(&kind).ok_or_else(|| {
                rusqlite::Error::FromSqlConversionFailure(
                    0,
                    rusqlite::types::Type::Text,
                    format!("Unknown job kind: {}", kind).into(),
                )
            })?,
            payload: row.get("payload")?,
            status: JobStatus::from_db_str(&status).unwrap_or(JobStatus::Pending),
            priority: JobPriority::from_i32(priority).unwrap_or(JobPriority::Default),
            retry_count: row.get("retry_count")?,
            max_retries: row.get("max_retries")?,
            created_at: row.get("created_at")?,
            started_at: row.get("started_at")?,
            completed_at: row.get("completed_at")?,
            next_retry_at: row.get("next_retry_at")?,
            last_error: row.get("last_error")?,
        })
    }
}

impl WorkQueue for SqliteWorkQueue {
    fn enqueue(&self, job: NewJob) -> Result<String> {
        let conn = self.conn.lock().unwrap();
        let id = uuid::Uuid::new_v4().to_string();

        conn.execute(
            r#"INSERT INTO work_queue (
                id, kind, payload, status, priority, retry_count, max_retries, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, 0, ?6, ?7)"#,
            params![
                id,
                job.kind.as_db_str(),
                job.payload.to_string(),
                JobStatus::Pending.as_db_str(),
                job.priority.as_i32(),
                job.max_retries,
                chrono::Utc::now().timestamp(),
            ],
        )
        .with_context(|| format!("Failed to enqueue {} job", job.kind))?;

        Ok(id)
    }

    fn get_wait_estimate(&self) -> Result<Duration> {
        let stats = self.queue_stats()?;
        let jobs_ahead = stats.active() as u64 + 1;
        Ok(Duration::from_secs(jobs_ahead * self.seconds_per_job))
    }

    fn queue_stats(&self) -> Result<QueueStats> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare("SELECT status, COUNT(*) FROM work_queue GROUP BY status")?;
        let counts = stmt
            .query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)? as usize))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut stats = QueueStats::default();
        for (status, count) in counts {
            match JobStatus::from_db_str(&status) {
                Some(JobStatus::Pending) => stats.pending = count,
                Some(JobStatus::InProgress) => stats.in_progress = count,
                Some(JobStatus::RetryWaiting) => stats.retry_waiting = count,
                Some(JobStatus::Completed) => stats.completed = count,
                Some(JobStatus::Dead) => stats.dead = count,
                None => {}
            }
        }
        Ok(stats)
    }
}

impl JobLedger for SqliteWorkQueue {
    fn get_job(&self, id: &str) -> Result<Option<QueuedJob>> {
        let conn = self.conn.lock().unwrap();
        let job = conn
            .query_row(
                "SELECT * FROM work_queue WHERE id = ?1",
                [id],
                Self::row_to_job,
            )
            .optional()?;
        Ok(job)
    }

    fn claim_next(&self) -> Result<Option<QueuedJob>> {
        let conn = self.conn.lock().unwrap();
        let job = conn
            .query_row(
                r#"UPDATE work_queue
                   SET status = 'IN_PROGRESS', started_at = ?1
                   WHERE id = (
                       SELECT id FROM work_queue
                       WHERE status = 'PENDING'
                       ORDER BY priority ASC, created_at ASC, rowid ASC
                       LIMIT 1
                   ) AND status = 'PENDING'
                   RETURNING *"#,
                [chrono::Utc::now().timestamp()],
                Self::row_to_job,
            )
            .optional()
            .context("Failed to claim next job")?;
        Ok(job)
    }

    fn mark_completed(&self, id: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            r#"UPDATE work_queue
               SET status = 'COMPLETED', completed_at = ?1
               WHERE id = ?2 AND status = 'IN_PROGRESS'"#,
            params![chrono::Utc::now().timestamp(), id],
        )?;
        Ok(())
    }

    fn mark_retry_waiting(&self, id: &str, next_retry_at: i64, error: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            r#"UPDATE work_queue
               SET status = 'RETRY_WAITING',
                   retry_count = retry_count + 1,
                   next_retry_at = ?1,
                   last_error = ?2
               WHERE id = ?3 AND status = 'IN_PROGRESS'"#,
            params![next_retry_at, error, id],
        )?;
        Ok(())
    }

    fn mark_dead(&self, id: &str, error: &str) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let updated = conn.execute(
            r#"UPDATE work_queue
               SET status = 'DEAD', completed_at = ?1, last_error = ?2
               WHERE id = ?3 AND status = 'IN_PROGRESS'"#,
            params![chrono::Utc::now().timestamp(), error, id],
        )?;
        Ok(updated > 0)
    }

    fn get_unreconciled_dead(&self, limit: usize) -> Result<Vec<QueuedJob>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            r#"SELECT * FROM work_queue
               WHERE status = 'DEAD' AND reconciled_at IS NULL
               ORDER BY completed_at ASC, rowid ASC
               LIMIT ?1"#,
        )?;
        let jobs = stmt
            .query_map([limit as i64], Self::row_to_job)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("Failed to list unreconciled dead jobs")?;
        Ok(jobs)
    }

    fn mark_reconciled(&self, id: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            r#"UPDATE work_queue
               SET reconciled_at = ?1
               WHERE id = ?2 AND status = 'DEAD'"#,
            params![chrono::Utc::now().timestamp(), id],
        )?;
        Ok(())
    }

    fn promote_retry_ready(&self) -> Result<usize> {
        let conn = self.conn.lock().unwrap();
        let promoted = conn.execute(
            r#"UPDATE work_queue
               SET status = 'PENDING', next_retry_at = NULL
               WHERE status = 'RETRY_WAITING' AND next_retry_at <= ?1"#,
            [chrono::Utc::now().timestamp()],
        )?;
        Ok(promoted)
    }

    fn requeue_stale(&self, stale_threshold_secs: i64) -> Result<usize> {
        let conn = self.conn.lock().unwrap();
        let cutoff = chrono::Utc::now().timestamp() - stale_threshold_secs;
        let requeued = conn.execute(
            r#"UPDATE work_queue
               SET status = 'PENDING', started_at = NULL
               WHERE status = 'IN_PROGRESS' AND started_at < ?1"#,
            [cutoff],
        )?;
        Ok(requeued)
    }
}
