//! Stage handlers.
//!
//! Bind each job kind to its adapter, persist the outcome on the track record
//! and enqueue the next stage. Retries belong to the work queue: on failure a
//! handler records a provisional error and hands the failure back.

use super::adapters::{DownloadAdapter, SearchAdapter, UploadAdapter};
use super::error::PipelineError;
use super::jobs::{download_job, upload_job};
use crate::config::PipelineSettings;
use crate::logging::LogContext;
use crate::track_store::{FailureKind, TrackKey, TrackRecord, TrackStatus, TrackStore};
use crate::work_queue::{
    DownloadPayload, HandlerRegistry, JobFailure, JobHandler, JobKind, QueuedJob, SearchPayload,
    UploadPayload, WorkQueue,
};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, info, warn, Instrument};

pub struct StageHandlers {
    tracks: Arc<dyn TrackStore>,
    queue: Arc<dyn WorkQueue>,
    searcher: Arc<dyn SearchAdapter>,
    downloader: Arc<dyn DownloadAdapter>,
    uploader: Arc<dyn UploadAdapter>,
    settings: PipelineSettings,
    log: LogContext,
}

impl StageHandlers {
    pub fn new(
        tracks: Arc<dyn TrackStore>,
        queue: Arc<dyn WorkQueue>,
        searcher: Arc<dyn SearchAdapter>,
        downloader: Arc<dyn DownloadAdapter>,
        uploader: Arc<dyn UploadAdapter>,
        settings: PipelineSettings,
        log: LogContext,
    ) -> Self {
        Self {
            tracks,
            queue,
            searcher,
            downloader,
            uploader,
            settings,
            log,
        }
    }

    /// Register one handler per stage.
    pub fn register(self: &Arc<Self>, registry: &mut HandlerRegistry) {
        for kind in [JobKind::Search, JobKind::Download, JobKind::Upload] {
            registry.register(
                kind,
                Arc::new(StageJobHandler {
                    stages: self.clone(),
                    kind,
                }),
            );
        }
    }

    // =========================================================================
    // Search
    // =========================================================================

    pub async fn handle_search(&self, payload: SearchPayload) -> Result<(), PipelineError> {
        let key = TrackKey::External(payload.external_id);
        let mut record = self.load(key)?;
        if record.is_delivered() {
            info!("Track already delivered, skipping search");
            return Ok(());
        }

        let source_id = match self
            .searcher
            .search(&record.artist, &record.title, record.duration)
            .await
        {
            Ok(source_id) => source_id,
            Err(e) => {
                warn!("Search failed for {} - {}: {}", record.artist, record.title, e);
                self.mark_provisional_error(key);
                return Err(e.into());
            }
        };

        record.source_id = Some(source_id.clone());
        record.status = TrackStatus::Processing;
        record.failure_kind = None;
        let stored = self
            .tracks
            .upsert(&record)
            .map_err(PipelineError::Persistence)?;
        if stored.is_delivered() {
            info!("Track delivered concurrently, not enqueueing download");
            return Ok(());
        }

        let job_id = download_job(&self.settings, stored.id, &source_id)
            .and_then(|job| self.queue.enqueue(job))
            .map_err(PipelineError::Enqueue)?;
        info!("Resolved source {}, enqueued download job {}", source_id, job_id);
        Ok(())
    }

    // =========================================================================
    // Download
    // =========================================================================

    pub async fn handle_download(&self, payload: DownloadPayload) -> Result<(), PipelineError> {
        let key = TrackKey::Internal(payload.track_id);
        let record = self.load(key)?;
        if record.is_delivered() {
            info!("Track already delivered, skipping download");
            return Ok(());
        }

        let path = match self.downloader.download(&payload.source_id).await {
            Ok(path) => path,
            Err(e) => {
                warn!("Download of {} failed: {}", payload.source_id, e);
                self.mark_provisional_error(key);
                return Err(e.into());
            }
        };

        // Supersede a provisional error left by an earlier attempt
        self.tracks
            .set_status(key, TrackStatus::Processing, None)
            .map_err(PipelineError::Persistence)?;

        match upload_job(&self.settings, payload.track_id, &path)
            .and_then(|job| self.queue.enqueue(job))
        {
            Ok(job_id) => {
                info!("Downloaded {:?}, enqueued upload job {}", path, job_id);
                Ok(())
            }
            Err(e) => {
                // Nobody will consume the artifact
                drop(ArtifactGuard::new(path));
                Err(PipelineError::Enqueue(e))
            }
        }
    }

    // =========================================================================
    // Upload
    // =========================================================================

    pub async fn handle_upload(&self, payload: UploadPayload) -> Result<(), PipelineError> {
        let artifact = ArtifactGuard::new(PathBuf::from(&payload.file_path));

        let key = TrackKey::Internal(payload.track_id);
        let record = self.load(key)?;
        if record.is_delivered() {
            info!("Track already delivered, discarding artifact");
            return Ok(());
        }

        let content = match self
            .uploader
            .upload(artifact.path(), &record.metadata())
            .await
        {
            Ok(content) => content,
            Err(e) => {
                warn!("Upload of {:?} failed: {}", artifact.path(), e);
                self.mark_provisional_error(key);
                return Err(e.into());
            }
        };

        let stored = self
            .tracks
            .upsert(&record.with_content(content))
            .map_err(PipelineError::Persistence)?;
        info!(
            "Track external_id={} is ready (content {})",
            stored.external_id,
            stored.content_unique_token.as_deref().unwrap_or("")
        );
        Ok(())
    }

    fn load(&self, key: TrackKey) -> Result<TrackRecord, PipelineError> {
        self.tracks
            .get(key)
            .map_err(PipelineError::Persistence)?
            .ok_or(PipelineError::MissingRecord(key))
    }

    fn mark_provisional_error(&self, key: TrackKey) {
        match self
            .tracks
            .set_status(key, TrackStatus::Error, Some(FailureKind::Transient))
        {
            Ok(true) => {}
            Ok(false) => debug!("Track {} not marked as error (ready or missing)", key),
            Err(e) => error!("Failed to mark track {} as error: {:#}", key, e),
        }
    }
}

/// Adapts one stage of [`StageHandlers`] to the work queue.
struct StageJobHandler {
    stages: Arc<StageHandlers>,
    kind: JobKind,
}

impl StageJobHandler {
    fn decode<T: DeserializeOwned>(job: &QueuedJob) -> Result<T, PipelineError> {
        job.decode()
            .map_err(|e| PipelineError::InvalidPayload(format!("{} job {}: {}", job.kind, job.id, e)))
    }

    async fn run(&self, job: &QueuedJob) -> Result<(), PipelineError> {
        match self.kind {
            JobKind::Search => self.stages.handle_search(Self::decode(job)?).await,
            JobKind::Download => self.stages.handle_download(Self::decode(job)?).await,
            JobKind::Upload => self.stages.handle_upload(Self::decode(job)?).await,
        }
    }
}

#[async_trait]
impl JobHandler for StageJobHandler {
    async fn handle(&self, job: &QueuedJob) -> Result<(), JobFailure> {
        let span = tracing::info_span!(parent: self.stages.log.span(), "stage", kind = %self.kind);
        self.run(job)
            .instrument(span)
            .await
            .map_err(JobFailure::from)
    }
}

/// Deletes a transient artifact when dropped.
pub struct ArtifactGuard {
    path: PathBuf,
}

impl ArtifactGuard {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for ArtifactGuard {
    fn drop(&mut self) {
        match std::fs::remove_file(&self.path) {
            Ok(()) => debug!("Removed artifact {:?}", self.path),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!("Failed to remove artifact {:?}: {}", self.path, e),
        }
    }
}
