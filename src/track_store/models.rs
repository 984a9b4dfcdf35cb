//! Data models for the track store.
//!
//! A track record is the unit the pipeline drives from `processing` to
//! `ready` or `error`. Absence of a record is the implicit `unresolved` state.

use serde::{Deserialize, Serialize};

/// Persisted pipeline status of a track.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackStatus {
    Processing,
    Ready, // terminal, sticky
    Error,
}

impl TrackStatus {
    pub fn as_db_str(&self) -> &'static str {
        match self {
            TrackStatus::Processing => "processing",
            TrackStatus::Ready => "ready",
            TrackStatus::Error => "error",
        }
    }

    pub fn from_db_str(s: &str) -> Option<Self> {
        match s {
            "processing" => Some(TrackStatus::Processing),
            "ready" => Some(TrackStatus::Ready),
            "error" => Some(TrackStatus::Error),
            _ => None,
        }
    }
}

/// Why a record is in the `error` status.
///
/// `Transient` errors are written by stage handlers and may be superseded by
/// a successful retry. `Final` errors are written only once the work queue
/// exhausted the retry budget of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Transient,
    Final,
}

impl FailureKind {
    pub fn as_db_str(&self) -> &'static str {
        match self {
            FailureKind::Transient => "transient",
            FailureKind::Final => "final",
        }
    }

    pub fn from_db_str(s: &str) -> Option<Self> {
        match s {
            "transient" => Some(FailureKind::Transient),
            "final" => Some(FailureKind::Final),
            _ => None,
        }
    }
}

/// Addresses a track record by one of its two identities.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackKey {
    /// The catalog id from the upstream metadata service (natural key).
    External(i64),
    /// The surrogate id assigned on first persistence.
    Internal(i64),
}

impl std::fmt::Display for TrackKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TrackKey::External(id) => write!(f, "external_id={}", id),
            TrackKey::Internal(id) => write!(f, "track_id={}", id),
        }
    }
}

/// A caller-supplied reference to a catalog track.
///
/// Descriptive fields are advisory: they seed a new record and feed search
/// scoring and upload tagging, but never identify the track.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackReference {
    pub external_id: i64,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub artist: String,
    #[serde(default)]
    pub cover_url: String,
    /// Duration in seconds.
    #[serde(default)]
    pub duration: u32,
}

impl TrackReference {
    pub fn new(external_id: i64) -> Self {
        Self {
            external_id,
            title: String::new(),
            artist: String::new(),
            cover_url: String::new(),
            duration: 0,
        }
    }

    pub fn with_metadata(
        mut self,
        title: impl Into<String>,
        artist: impl Into<String>,
        duration: u32,
    ) -> Self {
        self.title = title.into();
        self.artist = artist.into();
        self.duration = duration;
        self
    }

    pub fn with_cover(mut self, cover_url: impl Into<String>) -> Self {
        self.cover_url = cover_url.into();
        self
    }
}

/// Opaque reference to an uploaded artifact on the delivery channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentHandle {
    /// Used to regenerate access links.
    pub handle: String,
    /// Stable across re-sends of the same content.
    pub unique_token: String,
}

/// A persisted track record.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrackRecord {
    /// Surrogate id, 0 until first persisted.
    pub id: i64,
    pub external_id: i64,
    /// Matched item on the download-origin platform.
    pub source_id: Option<String>,
    pub content_handle: Option<String>,
    pub content_unique_token: Option<String>,
    pub title: String,
    pub artist: String,
    pub cover_url: String,
    /// Duration in seconds.
    pub duration: u32,
    pub status: TrackStatus,
    pub failure_kind: Option<FailureKind>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl TrackRecord {
    /// A fresh, not yet persisted record for a reference, in `processing`.
    pub fn from_reference(reference: &TrackReference) -> Self {
        let now = chrono::Utc::now().timestamp();
        Self {
            id: 0,
            external_id: reference.external_id,
            source_id: None,
            content_handle: None,
            content_unique_token: None,
            title: reference.title.clone(),
            artist: reference.artist.clone(),
            cover_url: reference.cover_url.clone(),
            duration: reference.duration,
            status: TrackStatus::Processing,
            failure_kind: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// True once the record holds a content handle and is `ready`.
    pub fn is_delivered(&self) -> bool {
        self.status == TrackStatus::Ready && self.content_handle.is_some()
    }

    /// True while a queued job still owns the record: `processing`, or a
    /// provisional error the work queue may yet retry.
    pub fn is_in_flight(&self) -> bool {
        match self.status {
            TrackStatus::Processing => true,
            TrackStatus::Error => self.failure_kind == Some(FailureKind::Transient),
            TrackStatus::Ready => false,
        }
    }

    pub fn with_content(mut self, content: ContentHandle) -> Self {
        self.content_handle = Some(content.handle);
        self.content_unique_token = Some(content.unique_token);
        self.status = TrackStatus::Ready;
        self.failure_kind = None;
        self
    }

    /// Metadata attached to the delivered content.
    pub fn metadata(&self) -> TrackMetadata {
        TrackMetadata {
            title: self.title.clone(),
            artist: self.artist.clone(),
            duration: self.duration,
        }
    }
}

/// Descriptive metadata used for search scoring and upload tagging.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackMetadata {
    pub title: String,
    pub artist: String,
    pub duration: u32,
}
