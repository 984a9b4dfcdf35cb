//! Terminal-failure reconciler.
//!
//! The only writer that turns an `error` into a final one: invoked by the
//! work queue for each job whose retry budget is exhausted, until the write
//! succeeds.

use crate::logging::LogContext;
use crate::track_store::{FailureKind, TrackKey, TrackStatus, TrackStore};
use crate::work_queue::{JobFailure, QueuedJob, TerminalFailureHandler};
use anyhow::{Context, Result};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{error, info, warn};

pub struct TerminalFailureReconciler {
    tracks: Arc<dyn TrackStore>,
    log: LogContext,
}

impl TerminalFailureReconciler {
    pub fn new(tracks: Arc<dyn TrackStore>, log: LogContext) -> Self {
        Self { tracks, log }
    }
}

impl TerminalFailureHandler for TerminalFailureReconciler {
    fn on_exhausted(&self, job: &QueuedJob, last_failure: &JobFailure) -> Result<()> {
        self.log.in_scope(|| {
            let Some(key) = extract_track_key(&job.payload) else {
                error!(
                    "Dropping exhausted {} job {}: no track identity in payload {:?}",
                    job.kind, job.id, job.payload
                );
                return Ok(());
            };

            let updated = self
                .tracks
                .set_status(key, TrackStatus::Error, Some(FailureKind::Final))
                .with_context(|| format!("Failed to mark track {} as failed", key))?;

            if updated {
                warn!(
                    "Track {} failed permanently at {} stage: {}",
                    key, job.kind, last_failure
                );
            } else {
                info!(
                    "Track {} not marked failed after exhausted {} job (ready or missing)",
                    key, job.kind
                );
            }
            Ok(())
        })
    }
}

/// Track identity carried by any stage payload.
#[derive(Debug, Deserialize)]
struct PayloadIdentity {
    external_id: Option<i64>,
    track_id: Option<i64>,
}

/// Prefer the external catalog id, fall back to the internal id.
pub fn extract_track_key(payload: &str) -> Option<TrackKey> {
    let identity: PayloadIdentity = serde_json::from_str(payload).ok()?;
    identity
        .external_id
        .filter(|id| *id != 0)
        .map(TrackKey::External)
        .or_else(|| {
            identity
                .track_id
                .filter(|id| *id != 0)
                .map(TrackKey::Internal)
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::track_store::{ContentHandle, SqliteTrackStore, TrackReference};
    use crate::work_queue::{JobKind, JobPriority, JobStatus};

    fn exhausted_job(kind: JobKind, payload: &str) -> QueuedJob {
        QueuedJob {
            id: "job-1".to_string(),
            kind,
            payload: payload.to_string(),
            status: JobStatus::Dead,
            priority: JobPriority::Default,
            retry_count: 3,
            max_retries: 3,
            created_at: 0,
            started_at: None,
            completed_at: None,
            next_retry_at: None,
            last_error: Some("boom".to_string()),
        }
    }

    fn reconciler() -> (Arc<SqliteTrackStore>, TerminalFailureReconciler) {
        let tracks = Arc::new(SqliteTrackStore::in_memory().unwrap());
        let reconciler =
            TerminalFailureReconciler::new(tracks.clone(), LogContext::new("test_reconciler"));
        (tracks, reconciler)
    }

    #[test]
    fn test_extract_prefers_external_id() {
        assert_eq!(
            extract_track_key(r#"{"external_id": 42, "track_id": 7}"#),
            Some(TrackKey::External(42))
        );
        assert_eq!(
            extract_track_key(r#"{"track_id": 7, "file_path": "/tmp/a.mp3"}"#),
            Some(TrackKey::Internal(7))
        );
    }

    #[test]
    fn test_extract_rejects_missing_or_malformed_identity() {
        assert_eq!(extract_track_key(r#"{"source_id": "abc"}"#), None);
        assert_eq!(extract_track_key(r#"{"external_id": 0}"#), None);
        assert_eq!(extract_track_key(r#"{"external_id": "x"}"#), None);
        assert_eq!(extract_track_key("not json"), None);
        assert_eq!(extract_track_key("[1, 2]"), None);
    }

    #[test]
    fn test_search_job_marks_final_error_by_external_id() {
        let (tracks, reconciler) = reconciler();
        tracks.ensure_by_external_id(&TrackReference::new(42)).unwrap();

        reconciler.on_exhausted(
            &exhausted_job(JobKind::Search, r#"{"external_id": 42}"#),
            &JobFailure::retryable("no candidates"),
        ).unwrap();

        let stored = tracks.get_by_external_id(42).unwrap().unwrap();
        assert_eq!(stored.status, TrackStatus::Error);
        assert_eq!(stored.failure_kind, Some(FailureKind::Final));
    }

    #[test]
    fn test_upload_job_marks_final_error_by_track_id() {
        let (tracks, reconciler) = reconciler();
        let (record, _) = tracks.ensure_by_external_id(&TrackReference::new(42)).unwrap();

        reconciler.on_exhausted(
            &exhausted_job(
                JobKind::Upload,
                &format!(r#"{{"track_id": {}, "file_path": "/tmp/a.mp3"}}"#, record.id),
            ),
            &JobFailure::retryable("channel error"),
        ).unwrap();

        let stored = tracks.get_by_id(record.id).unwrap().unwrap();
        assert_eq!(stored.failure_kind, Some(FailureKind::Final));
    }

    #[test]
    fn test_ready_record_is_left_alone() {
        let (tracks, reconciler) = reconciler();
        let (record, _) = tracks.ensure_by_external_id(&TrackReference::new(42)).unwrap();
        tracks
            .upsert(&record.with_content(ContentHandle {
                handle: "file-1".to_string(),
                unique_token: "uniq-1".to_string(),
            }))
            .unwrap();

        reconciler.on_exhausted(
            &exhausted_job(JobKind::Search, r#"{"external_id": 42}"#),
            &JobFailure::retryable("stale attempt"),
        ).unwrap();

        let stored = tracks.get_by_external_id(42).unwrap().unwrap();
        assert_eq!(stored.status, TrackStatus::Ready);
    }

    #[test]
    fn test_unidentifiable_payload_is_dropped() {
        let (tracks, reconciler) = reconciler();
        tracks.ensure_by_external_id(&TrackReference::new(42)).unwrap();

        reconciler.on_exhausted(
            &exhausted_job(JobKind::Download, r#"{"source_id": "abc"}"#),
            &JobFailure::permanent("bad payload"),
        ).unwrap();

        let stored = tracks.get_by_external_id(42).unwrap().unwrap();
        assert_eq!(stored.status, TrackStatus::Processing);
    }
}
