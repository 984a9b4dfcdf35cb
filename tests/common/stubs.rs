//! Stub stage adapters with call counters and scripted failures.

use anyhow::bail;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tunefetch::pipeline::{
    AdapterError, DownloadAdapter, LinkResolver, SearchAdapter, UploadAdapter,
};
use tunefetch::track_store::{
    ContentHandle, FailureKind, SqliteTrackStore, TrackKey, TrackMetadata, TrackRecord,
    TrackReference, TrackStatus, TrackStore,
};

type ResolveHook = Box<dyn Fn(&str) + Send + Sync>;

pub const CDN_BASE_URL: &str = "https://cdn.test/file";

/// Returns a fixed source id, or nothing when `source_id` is `None`.
pub struct StubSearcher {
    source_id: Mutex<Option<String>>,
    pub calls: AtomicUsize,
}

impl StubSearcher {
    pub fn new(source_id: Option<&str>) -> Self {
        Self {
            source_id: Mutex::new(source_id.map(str::to_string)),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn set_source_id(&self, source_id: Option<&str>) {
        *self.source_id.lock().unwrap() = source_id.map(str::to_string);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SearchAdapter for StubSearcher {
    async fn search(
        &self,
        artist: &str,
        title: &str,
        _target_duration_secs: u32,
    ) -> Result<String, AdapterError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.source_id
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| AdapterError::NotFound(format!("{} - {}", artist, title)))
    }
}

/// Writes a small file per download; fails the first `failures` calls.
pub struct StubDownloader {
    output_dir: PathBuf,
    failures: AtomicUsize,
    pub calls: AtomicUsize,
}

impl StubDownloader {
    pub fn new(output_dir: PathBuf) -> Self {
        Self {
            output_dir,
            failures: AtomicUsize::new(0),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn fail_next(&self, count: usize) {
        self.failures.store(count, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DownloadAdapter for StubDownloader {
    async fn download(&self, source_id: &str) -> Result<PathBuf, AdapterError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let remaining = self.failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures.store(remaining - 1, Ordering::SeqCst);
            return Err(AdapterError::SourceUnavailable(format!(
                "{} is temporarily unavailable",
                source_id
            )));
        }

        let path = self.output_dir.join(format!("{}.mp3", source_id));
        tokio::fs::write(&path, b"ID3 fake audio").await?;
        Ok(path)
    }
}

/// Hands out sequential content handles and remembers what it was given.
pub struct StubUploader {
    pub calls: AtomicUsize,
    uploaded: Mutex<Vec<(PathBuf, TrackMetadata)>>,
}

impl StubUploader {
    pub fn new() -> Self {
        Self {
            calls: AtomicUsize::new(0),
            uploaded: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn uploaded(&self) -> Vec<(PathBuf, TrackMetadata)> {
        self.uploaded.lock().unwrap().clone()
    }
}

#[async_trait]
impl UploadAdapter for StubUploader {
    async fn upload(
        &self,
        path: &Path,
        metadata: &TrackMetadata,
    ) -> Result<ContentHandle, AdapterError> {
        if !tokio::fs::try_exists(path).await? {
            return Err(AdapterError::InvalidOutput(format!("{:?} is missing", path)));
        }
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        self.uploaded
            .lock()
            .unwrap()
            .push((path.to_path_buf(), metadata.clone()));
        Ok(ContentHandle {
            handle: format!("file-{}", n),
            unique_token: format!("uniq-{}", n),
        })
    }
}

/// Resolves handles to CDN links until told the channel has expired them.
pub struct StubLinks {
    expired: AtomicBool,
    expired_handles: Mutex<Vec<String>>,
    on_resolve: Mutex<Option<ResolveHook>>,
}

impl StubLinks {
    pub fn new() -> Self {
        Self {
            expired: AtomicBool::new(false),
            expired_handles: Mutex::new(Vec::new()),
            on_resolve: Mutex::new(None),
        }
    }

    pub fn expire_all(&self, expired: bool) {
        self.expired.store(expired, Ordering::SeqCst);
    }

    pub fn expire_handle(&self, content_handle: &str) {
        self.expired_handles
            .lock()
            .unwrap()
            .push(content_handle.to_string());
    }

    /// Run `hook` with the handle while it is being resolved.
    pub fn on_resolve(&self, hook: impl Fn(&str) + Send + Sync + 'static) {
        *self.on_resolve.lock().unwrap() = Some(Box::new(hook));
    }
}

#[async_trait]
impl LinkResolver for StubLinks {
    async fn resolve_link(&self, content_handle: &str) -> Result<String, AdapterError> {
        if let Some(hook) = self.on_resolve.lock().unwrap().as_ref() {
            hook(content_handle);
        }
        let handle_expired = self
            .expired_handles
            .lock()
            .unwrap()
            .iter()
            .any(|h| h == content_handle);
        if handle_expired || self.expired.load(Ordering::SeqCst) {
            return Err(AdapterError::Channel(format!(
                "getFile failed (400): wrong file_id {}",
                content_handle
            )));
        }
        Ok(format!("{}/{}", CDN_BASE_URL, content_handle))
    }
}

/// Track store that can be told to reject final error writes.
pub struct StubTrackStore {
    inner: Arc<SqliteTrackStore>,
    final_error_failures: AtomicUsize,
}

impl StubTrackStore {
    pub fn new(inner: Arc<SqliteTrackStore>) -> Self {
        Self {
            inner,
            final_error_failures: AtomicUsize::new(0),
        }
    }

    pub fn fail_final_errors(&self, count: usize) {
        self.final_error_failures.store(count, Ordering::SeqCst);
    }
}

impl TrackStore for StubTrackStore {
    fn ensure_by_external_id(
        &self,
        reference: &TrackReference,
    ) -> anyhow::Result<(TrackRecord, bool)> {
        self.inner.ensure_by_external_id(reference)
    }

    fn upsert(&self, record: &TrackRecord) -> anyhow::Result<TrackRecord> {
        self.inner.upsert(record)
    }

    fn get_by_external_id(&self, external_id: i64) -> anyhow::Result<Option<TrackRecord>> {
        self.inner.get_by_external_id(external_id)
    }

    fn get_by_id(&self, id: i64) -> anyhow::Result<Option<TrackRecord>> {
        self.inner.get_by_id(id)
    }

    fn set_status(
        &self,
        key: TrackKey,
        status: TrackStatus,
        failure_kind: Option<FailureKind>,
    ) -> anyhow::Result<bool> {
        if failure_kind == Some(FailureKind::Final) {
            let remaining = self.final_error_failures.load(Ordering::SeqCst);
            if remaining > 0 {
                self.final_error_failures.store(remaining - 1, Ordering::SeqCst);
                bail!("database is locked");
            }
        }
        self.inner.set_status(key, status, failure_kind)
    }

    fn invalidate_content_handle(
        &self,
        external_id: i64,
        expected_handle: &str,
    ) -> anyhow::Result<bool> {
        self.inner
            .invalidate_content_handle(external_id, expected_handle)
    }
}
