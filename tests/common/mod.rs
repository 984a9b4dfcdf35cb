//! Common test infrastructure
//!
//! Each test gets an isolated pipeline: file-backed stores in a temp dir,
//! stub adapters, and a queue runner driven by hand.
//!
//! # Example
//!
//! ```no_run
//! mod common;
//! use common::{song, TestPipeline};
//!
//! #[tokio::test]
//! async fn test_play() {
//!     let pipeline = TestPipeline::spawn();
//!     pipeline.controller.request_playback(&song(42)).await.unwrap();
//!     pipeline.runner.drain().await.unwrap();
//! }
//! ```

mod pipeline;
mod stubs;

pub use pipeline::{song, TestPipeline, DEFAULT_SOURCE_ID};
#[allow(unused_imports)]
pub use stubs::{
    StubDownloader, StubLinks, StubSearcher, StubTrackStore, StubUploader, CDN_BASE_URL,
};
