//! Task-chaining pipeline.
//!
//! Drives a track from `processing` through search, download and upload to
//! `ready`, or to `error` once the work queue gives up on it.

mod adapters;
mod controller;
mod error;
mod handlers;
mod jobs;
mod reconciler;

pub use adapters::{
    select_best_candidate, DownloadAdapter, LinkResolver, SearchAdapter, SearchCandidate,
    UploadAdapter,
};
pub use controller::{PipelineController, PlaybackState, QueueOverview};
pub use error::{AdapterError, PipelineError};
pub use handlers::{ArtifactGuard, StageHandlers};
pub use reconciler::{extract_track_key, TerminalFailureReconciler};
