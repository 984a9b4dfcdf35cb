//! Track record store.
//!
//! Durable keyed storage for track pipeline state, addressed by the external
//! catalog id, with merge-on-upsert and conditional status updates.

mod models;
mod schema;
mod store;

pub use models::*;
pub use schema::TRACK_STORE_VERSIONED_SCHEMAS;
pub use store::{SqliteTrackStore, TrackStore};
