//! Tunefetch library
//!
//! Turns a catalog track reference into a playable audio file by chaining
//! search, download and delivery-channel upload through a durable work queue.

pub mod adapters;
pub mod config;
pub mod logging;
pub mod pipeline;
pub mod sqlite_persistence;
pub mod track_store;
pub mod work_queue;

// Re-export commonly used types for convenience
pub use pipeline::{PipelineController, PipelineError, PlaybackState, StageHandlers};
pub use track_store::{SqliteTrackStore, TrackRecord, TrackStatus, TrackStore};
pub use work_queue::{QueueRunner, SqliteWorkQueue, WorkQueue};
