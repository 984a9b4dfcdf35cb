//! Test pipeline lifecycle management

use super::stubs::{StubDownloader, StubLinks, StubSearcher, StubTrackStore, StubUploader};
use std::path::PathBuf;
use std::sync::Arc;
use tempfile::TempDir;
use tunefetch::config::{PipelineSettings, QueueSettings};
use tunefetch::logging::LogContext;
use tunefetch::pipeline::{PipelineController, StageHandlers, TerminalFailureReconciler};
use tunefetch::track_store::{SqliteTrackStore, TrackReference};
use tunefetch::work_queue::{HandlerRegistry, QueueRunner, SqliteWorkQueue};

/// Source id the stub searcher finds unless told otherwise.
pub const DEFAULT_SOURCE_ID: &str = "dQw4w9WgXcQ";

/// A reference with enough metadata to search for.
pub fn song(external_id: i64) -> TrackReference {
    TrackReference::new(external_id).with_metadata("Song", "Band", 200)
}

/// Isolated pipeline wired exactly like `tunefetch serve`, minus the worker pool.
pub struct TestPipeline {
    pub tracks: Arc<SqliteTrackStore>,
    /// The store every pipeline component writes through.
    pub pipeline_tracks: Arc<StubTrackStore>,
    pub queue: Arc<SqliteWorkQueue>,
    pub controller: PipelineController,
    pub runner: QueueRunner,

    pub searcher: Arc<StubSearcher>,
    pub downloader: Arc<StubDownloader>,
    pub uploader: Arc<StubUploader>,
    pub links: Arc<StubLinks>,

    pub download_dir: PathBuf,

    // Keep the databases alive until drop
    _temp_dir: TempDir,
}

impl TestPipeline {
    pub fn spawn() -> Self {
        Self::with_settings(test_pipeline_settings())
    }

    pub fn with_settings(settings: PipelineSettings) -> Self {
        let temp_dir = TempDir::new().unwrap();
        let download_dir = temp_dir.path().join("downloads");
        std::fs::create_dir_all(&download_dir).unwrap();

        let tracks = Arc::new(SqliteTrackStore::new(temp_dir.path().join("tracks.db")).unwrap());
        let pipeline_tracks = Arc::new(StubTrackStore::new(tracks.clone()));
        let queue = Arc::new(
            SqliteWorkQueue::new(temp_dir.path().join("work_queue.db"))
                .unwrap()
                .with_seconds_per_job(40),
        );

        let searcher = Arc::new(StubSearcher::new(Some(DEFAULT_SOURCE_ID)));
        let downloader = Arc::new(StubDownloader::new(download_dir.clone()));
        let uploader = Arc::new(StubUploader::new());
        let links = Arc::new(StubLinks::new());

        let controller = PipelineController::new(
            pipeline_tracks.clone(),
            queue.clone(),
            links.clone(),
            settings.clone(),
            LogContext::new("test_controller"),
        );

        let stages = Arc::new(StageHandlers::new(
            pipeline_tracks.clone(),
            queue.clone(),
            searcher.clone(),
            downloader.clone(),
            uploader.clone(),
            settings,
            LogContext::new("test_stages"),
        ));
        let mut registry = HandlerRegistry::new();
        stages.register(&mut registry);
        registry.on_terminal_failure(Arc::new(TerminalFailureReconciler::new(
            pipeline_tracks.clone(),
            LogContext::new("test_reconciler"),
        )));

        let runner = QueueRunner::new(
            queue.clone(),
            registry,
            &test_queue_settings(),
            LogContext::new("test_runner"),
        );

        Self {
            tracks,
            pipeline_tracks,
            queue,
            controller,
            runner,
            searcher,
            downloader,
            uploader,
            links,
            download_dir,
            _temp_dir: temp_dir,
        }
    }

    /// Process everything pending, promote due retries, and repeat until the
    /// queue is idle. Returns the number of job attempts made.
    pub async fn settle(&self) -> usize {
        let mut attempts = 0;
        loop {
            self.runner.run_maintenance().unwrap();
            let processed = self.runner.drain().await.unwrap();
            if processed == 0 {
                return attempts;
            }
            attempts += processed;
        }
    }

    /// Files left behind in the download directory.
    pub fn leftover_artifacts(&self) -> usize {
        std::fs::read_dir(&self.download_dir).unwrap().count()
    }
}

fn test_pipeline_settings() -> PipelineSettings {
    PipelineSettings {
        search_max_retries: 1,
        download_max_retries: 1,
        upload_max_retries: 1,
        ..PipelineSettings::default()
    }
}

/// Zero backoff so retries are due as soon as maintenance runs.
fn test_queue_settings() -> QueueSettings {
    QueueSettings {
        workers: 1,
        initial_backoff_secs: 0,
        max_backoff_secs: 0,
        ..QueueSettings::default()
    }
}
