//! Data models for the work queue.
//!
//! Defines job kinds, payloads, statuses and priorities, plus the failure
//! value handlers report back to the queue.

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Status of a job in the work queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Pending,
    InProgress,
    RetryWaiting,
    Completed, // terminal
    Dead,      // terminal, retry budget exhausted
}

impl JobStatus {
    pub fn as_db_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "PENDING",
            JobStatus::InProgress => "IN_PROGRESS",
            JobStatus::RetryWaiting => "RETRY_WAITING",
            JobStatus::Completed => "COMPLETED",
            JobStatus::Dead => "DEAD",
        }
    }

    pub fn from_db_str(s: &str) -> Option<Self> {
        match s {
            "PENDING" => Some(JobStatus::Pending),
            "IN_PROGRESS" => Some(JobStatus::InProgress),
            "RETRY_WAITING" => Some(JobStatus::RetryWaiting),
            "COMPLETED" => Some(JobStatus::Completed),
            "DEAD" => Some(JobStatus::Dead),
            _ => None,
        }
    }
}

/// Priority level for jobs.
/// Lower values = higher priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum JobPriority {
    Critical = 1, // continuations of pipelines already in flight
    Default = 2,
}

impl JobPriority {
    pub fn as_i32(&self) -> i32 {
        *self as i32
    }

    pub fn from_i32(value: i32) -> Option<Self> {
        match value {
            1 => Some(JobPriority::Critical),
            2 => Some(JobPriority::Default),
            _ => None,
        }
    }
}

/// Pipeline stage a job belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    Search,
    Download,
    Upload,
}

impl JobKind {
    pub fn as_db_str(&self) -> &'static str {
        match self {
            JobKind::Search => "search",
            JobKind::Download => "download",
            JobKind::Upload => "upload",
        }
    }

    pub fn from_db_str(s: &str) -> Option<Self> {
        match s {
            "search" => Some(JobKind::Search),
            "download" => Some(JobKind::Download),
            "upload" => Some(JobKind::Upload),
            _ => None,
        }
    }
}

impl std::fmt::Display for JobKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_db_str())
    }
}

// =============================================================================
// Payloads
// =============================================================================

/// Payload of a `search` job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchPayload {
    pub external_id: i64,
}

/// Payload of a `download` job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadPayload {
    pub track_id: i64,
    pub source_id: String,
}

/// Payload of an `upload` job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadPayload {
    pub track_id: i64,
    pub file_path: String,
}

// =============================================================================
// Jobs
// =============================================================================

/// A job to be added to the queue.
#[derive(Debug, Clone, PartialEq)]
pub struct NewJob {
    pub kind: JobKind,
    pub payload: serde_json::Value,
    pub priority: JobPriority,
    pub max_retries: i32,
}

impl NewJob {
    pub fn new<T: Serialize>(kind: JobKind, payload: &T, max_retries: i32) -> Result<Self> {
        let payload = serde_json::to_value(payload)
            .with_context(|| format!("Failed to encode {} payload", kind))?;
        Ok(Self {
            kind,
            payload,
            priority: JobPriority::Default,
            max_retries,
        })
    }

    pub fn with_priority(mut self, priority: JobPriority) -> Self {
        self.priority = priority;
        self
    }
}

/// A job stored in the queue.
#[derive(Debug, Clone, PartialEq)]
pub struct QueuedJob {
    pub id: String,
    pub kind: JobKind,
    /// Raw JSON payload, kept undecoded so that malformed payloads still reach
    /// the terminal-failure path.
    pub payload: String,
    pub status: JobStatus,
    pub priority: JobPriority,
    pub retry_count: i32,
    pub max_retries: i32,
    pub created_at: i64,
    pub started_at: Option<i64>,
    pub completed_at: Option<i64>,
    pub next_retry_at: Option<i64>,
    pub last_error: Option<String>,
}

impl QueuedJob {
    /// Decode the payload into the stage-specific type.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_str(&self.payload)
    }
}

/// Outcome of a failed job attempt, as reported by a handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobFailure {
    pub message: String,
    /// Non-retryable failures go straight to `DEAD`.
    pub retryable: bool,
}

impl JobFailure {
    pub fn retryable(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: true,
        }
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: false,
        }
    }
}

impl std::fmt::Display for JobFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)
    }
}

/// Per-status job counts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    pub pending: usize,
    pub in_progress: usize,
    pub retry_waiting: usize,
    pub completed: usize,
    pub dead: usize,
}

impl QueueStats {
    /// Jobs that still occupy a worker or wait for one.
    pub fn active(&self) -> usize {
        self.pending + self.in_progress
    }
}
