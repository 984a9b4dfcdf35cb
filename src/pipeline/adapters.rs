//! Stage adapter contracts.
//!
//! The pipeline treats search, download, upload and link materialization as
//! opaque calls that either produce a result or fail.

use super::error::AdapterError;
use crate::track_store::{ContentHandle, TrackMetadata};
use async_trait::async_trait;
use std::path::{Path, PathBuf};

/// Resolves a track to an item on the download-origin platform.
#[async_trait]
pub trait SearchAdapter: Send + Sync {
    /// Returns the source id of the best match.
    async fn search(
        &self,
        artist: &str,
        title: &str,
        target_duration_secs: u32,
    ) -> Result<String, AdapterError>;
}

/// Fetches a source item into a local artifact.
#[async_trait]
pub trait DownloadAdapter: Send + Sync {
    async fn download(&self, source_id: &str) -> Result<PathBuf, AdapterError>;
}

/// Delivers a local artifact to the delivery channel.
#[async_trait]
pub trait UploadAdapter: Send + Sync {
    async fn upload(
        &self,
        path: &Path,
        metadata: &TrackMetadata,
    ) -> Result<ContentHandle, AdapterError>;
}

/// Turns a durable content handle into a short-lived access link.
#[async_trait]
pub trait LinkResolver: Send + Sync {
    async fn resolve_link(&self, content_handle: &str) -> Result<String, AdapterError>;
}

/// A search result from the download-origin platform.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchCandidate {
    pub id: String,
    pub title: String,
    /// Duration in seconds, if the platform reported one.
    pub duration: Option<f64>,
}

/// Pick the candidate whose duration is closest to the target.
///
/// Candidates without a duration, or longer than `max_duration_secs`, are
/// never selected. Ties keep the earlier candidate.
pub fn select_best_candidate(
    candidates: &[SearchCandidate],
    target_duration_secs: u32,
    max_duration_secs: u32,
) -> Option<&SearchCandidate> {
    let target = f64::from(target_duration_secs);
    let limit = f64::from(max_duration_secs);

    candidates
        .iter()
        .filter_map(|candidate| match candidate.duration {
            Some(duration) if duration.is_finite() && duration >= 0.0 && duration <= limit => {
                Some((candidate, (duration - target).abs()))
            }
            _ => None,
        })
        .fold(None, |best: Option<(&SearchCandidate, f64)>, (candidate, diff)| {
            match best {
                Some((_, best_diff)) if best_diff <= diff => best,
                _ => Some((candidate, diff)),
            }
        })
        .map(|(candidate, _)| candidate)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(id: &str, duration: Option<f64>) -> SearchCandidate {
        SearchCandidate {
            id: id.to_string(),
            title: format!("video {}", id),
            duration,
        }
    }

    #[test]
    fn test_selects_closest_duration() {
        let candidates = vec![
            candidate("a", Some(180.0)),
            candidate("b", Some(200.0)),
            candidate("c", Some(500.0)),
            candidate("d", None),
        ];

        let best = select_best_candidate(&candidates, 195, 1200).unwrap();
        assert_eq!(best.id, "b");
    }

    #[test]
    fn test_excludes_over_threshold_even_if_closest() {
        let candidates = vec![
            candidate("long", Some(3600.0)),
            candidate("short", Some(100.0)),
        ];

        let best = select_best_candidate(&candidates, 3600, 1200).unwrap();
        assert_eq!(best.id, "short");
    }

    #[test]
    fn test_no_candidates_left() {
        let candidates = vec![candidate("long", Some(5000.0)), candidate("live", None)];

        assert!(select_best_candidate(&candidates, 200, 1200).is_none());
        assert!(select_best_candidate(&[], 200, 1200).is_none());
    }

    #[test]
    fn test_tie_keeps_first() {
        let candidates = vec![candidate("a", Some(190.0)), candidate("b", Some(210.0))];

        let best = select_best_candidate(&candidates, 200, 1200).unwrap();
        assert_eq!(best.id, "a");
    }

    #[test]
    fn test_threshold_is_inclusive() {
        let candidates = vec![candidate("edge", Some(1200.0))];

        assert_eq!(select_best_candidate(&candidates, 0, 1200).unwrap().id, "edge");
    }
}
