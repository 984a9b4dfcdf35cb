//! Pipeline controller.
//!
//! Decides, for a requested track, whether a playable link can be served
//! right away or which stage the pipeline must be entered at.

use super::adapters::LinkResolver;
use super::error::PipelineError;
use super::jobs::{download_job, search_job};
use crate::config::PipelineSettings;
use crate::logging::LogContext;
use crate::track_store::{
    ContentHandle, FailureKind, TrackKey, TrackRecord, TrackReference, TrackStatus, TrackStore,
};
use crate::work_queue::{QueueStats, WorkQueue};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn, Instrument};

/// Caller-facing result of a playback request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PlaybackState {
    Ready { link: String },
    Processing,
}

/// Queue statistics as exposed to callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueueOverview {
    #[serde(flatten)]
    pub stats: QueueStats,
    pub estimated_wait_secs: u64,
}

pub struct PipelineController {
    tracks: Arc<dyn TrackStore>,
    queue: Arc<dyn WorkQueue>,
    links: Arc<dyn LinkResolver>,
    settings: PipelineSettings,
    log: LogContext,
}

impl PipelineController {
    pub fn new(
        tracks: Arc<dyn TrackStore>,
        queue: Arc<dyn WorkQueue>,
        links: Arc<dyn LinkResolver>,
        settings: PipelineSettings,
        log: LogContext,
    ) -> Self {
        Self {
            tracks,
            queue,
            links,
            settings,
            log,
        }
    }

    /// Serve a playable link, or make sure exactly one pipeline is working on it.
    ///
    /// Runs under the configured request timeout. Work already handed to the
    /// queue is unaffected when the timeout fires.
    pub async fn request_playback(
        &self,
        reference: &TrackReference,
    ) -> Result<PlaybackState, PipelineError> {
        let timeout = Duration::from_secs(self.settings.request_timeout_secs);
        let span = tracing::info_span!(
            parent: self.log.span(),
            "request_playback",
            external_id = reference.external_id
        );

        tokio::time::timeout(timeout, self.resolve_playback(reference))
            .instrument(span)
            .await
            .map_err(|_| PipelineError::Timeout(timeout))?
    }

    async fn resolve_playback(
        &self,
        reference: &TrackReference,
    ) -> Result<PlaybackState, PipelineError> {
        let (mut record, existed) = self
            .tracks
            .ensure_by_external_id(reference)
            .map_err(PipelineError::Persistence)?;

        let mut handle_invalidated = false;
        if let Some(handle) = delivered_handle(&record) {
            match self.links.resolve_link(&handle).await {
                Ok(link) => {
                    debug!("Serving cached content");
                    return Ok(PlaybackState::Ready { link });
                }
                Err(e) => {
                    warn!("Content handle no longer resolves, re-resolving: {}", e);
                    let invalidated = self
                        .tracks
                        .invalidate_content_handle(record.external_id, &handle)
                        .map_err(PipelineError::Persistence)?;

                    if invalidated {
                        record.content_handle = None;
                        record.content_unique_token = None;
                        handle_invalidated = true;
                    } else {
                        record = self.reload(record.external_id)?;
                        if let Some(fresh) = delivered_handle(&record) {
                            return Ok(self.serve_replacement(&fresh).await);
                        }
                    }
                }
            }
        }

        if existed && !handle_invalidated && record.is_in_flight() {
            debug!("Pipeline already in flight");
            return Ok(PlaybackState::Processing);
        }

        let mut pending = record;
        pending.status = TrackStatus::Processing;
        pending.failure_kind = None;
        overlay_metadata(&mut pending, reference);

        let stored = self
            .tracks
            .upsert(&pending)
            .map_err(PipelineError::Persistence)?;

        if stored.is_delivered() {
            // A concurrent upload won the race; the next request serves it.
            debug!("Track became ready while marking processing");
            return Ok(PlaybackState::Processing);
        }

        self.enter_pipeline(&stored)?;
        Ok(PlaybackState::Processing)
    }

    fn reload(&self, external_id: i64) -> Result<TrackRecord, PipelineError> {
        self.tracks
            .get_by_external_id(external_id)
            .map_err(PipelineError::Persistence)?
            .ok_or_else(|| {
                PipelineError::Persistence(anyhow::anyhow!("Track {} vanished", external_id))
            })
    }

    /// Another writer replaced the handle while the old one was being resolved.
    /// Serve the replacement if it resolves; never invalidate it from here.
    async fn serve_replacement(&self, handle: &str) -> PlaybackState {
        match self.links.resolve_link(handle).await {
            Ok(link) => {
                debug!("Serving content uploaded concurrently");
                PlaybackState::Ready { link }
            }
            Err(e) => {
                warn!("Replacement content handle does not resolve either: {}", e);
                PlaybackState::Processing
            }
        }
    }

    /// Enqueue the first stage the record's data supports, rolling the record
    /// back to a final error if the queue rejects it.
    fn enter_pipeline(&self, record: &TrackRecord) -> Result<(), PipelineError> {
        let (stage, job) = match record.source_id.as_deref().filter(|s| !s.is_empty()) {
            Some(source_id) => (
                "download",
                download_job(&self.settings, record.id, source_id),
            ),
            None => ("search", search_job(&self.settings, record.external_id)),
        };

        match job.and_then(|job| self.queue.enqueue(job)) {
            Ok(job_id) => {
                info!("Entered pipeline at {} stage (job {})", stage, job_id);
                Ok(())
            }
            Err(e) => {
                error!("Failed to enqueue {} job, rolling back: {:#}", stage, e);
                let rollback = self.tracks.set_status(
                    TrackKey::External(record.external_id),
                    TrackStatus::Error,
                    Some(FailureKind::Final),
                );
                if let Err(rollback_err) = rollback {
                    error!("Rollback to error failed: {:#}", rollback_err);
                }
                Err(PipelineError::Enqueue(e))
            }
        }
    }

    /// Read-only status lookup for polling callers.
    ///
    /// Provisional errors are reported as `processing`: until the retry budget
    /// is spent the pipeline is still working on the track.
    pub fn get_status(&self, external_id: i64) -> Result<Option<TrackRecord>, PipelineError> {
        let record = self
            .tracks
            .get_by_external_id(external_id)
            .map_err(PipelineError::Persistence)?;

        Ok(record.map(|mut record| {
            if record.status == TrackStatus::Error && record.is_in_flight() {
                record.status = TrackStatus::Processing;
                record.failure_kind = None;
            }
            record
        }))
    }

    /// Record content a user delivered to the channel directly as ready.
    pub fn register_external_upload(
        &self,
        reference: &TrackReference,
        content: ContentHandle,
    ) -> Result<TrackRecord, PipelineError> {
        let record = TrackRecord::from_reference(reference).with_content(content);
        let stored = self
            .tracks
            .upsert(&record)
            .map_err(PipelineError::Persistence)?;

        self.log.in_scope(|| {
            info!(
                "Registered external upload for external_id={} (track_id={})",
                stored.external_id, stored.id
            )
        });
        Ok(stored)
    }

    pub fn queue_stats(&self) -> Result<QueueOverview, PipelineError> {
        let stats = self
            .queue
            .queue_stats()
            .map_err(PipelineError::Persistence)?;
        let wait = self
            .queue
            .get_wait_estimate()
            .map_err(PipelineError::Persistence)?;

        Ok(QueueOverview {
            stats,
            estimated_wait_secs: wait.as_secs(),
        })
    }
}

fn delivered_handle(record: &TrackRecord) -> Option<String> {
    record
        .content_handle
        .as_deref()
        .filter(|h| !h.is_empty())
        .map(str::to_string)
}

/// Caller-supplied descriptive fields replace stored ones when present.
fn overlay_metadata(record: &mut TrackRecord, reference: &TrackReference) {
    if !reference.title.is_empty() {
        record.title = reference.title.clone();
    }
    if !reference.artist.is_empty() {
        record.artist = reference.artist.clone();
    }
    if !reference.cover_url.is_empty() {
        record.cover_url = reference.cover_url.clone();
    }
    if reference.duration > 0 {
        record.duration = reference.duration;
    }
}
