//! Search and download adapters backed by the `yt-dlp` executable.

use crate::pipeline::{
    select_best_candidate, AdapterError, DownloadAdapter, SearchAdapter, SearchCandidate,
};
use async_trait::async_trait;
use serde::Deserialize;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::process::Command;
use tracing::debug;

/// `--dump-single-json --flat-playlist` output of a search query.
#[derive(Debug, Deserialize)]
struct YtDlpPlaylist {
    #[serde(default)]
    entries: Vec<YtDlpEntry>,
}

#[derive(Debug, Deserialize)]
struct YtDlpEntry {
    id: String,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    duration: Option<f64>,
}

/// Parse the JSON printed by a flat-playlist search.
pub fn parse_search_output(stdout: &str) -> Result<Vec<SearchCandidate>, AdapterError> {
    let playlist: YtDlpPlaylist = serde_json::from_str(stdout)
        .map_err(|e| AdapterError::InvalidOutput(format!("JSON parse error: {}", e)))?;

    Ok(playlist
        .entries
        .into_iter()
        .map(|entry| SearchCandidate {
            id: entry.id,
            title: entry.title.unwrap_or_default(),
            duration: entry.duration,
        })
        .collect())
}

/// Source ids end up in file names and URLs.
fn is_safe_source_id(source_id: &str) -> bool {
    !source_id.is_empty()
        && source_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

async fn run_yt_dlp(binary: &str, args: &[String]) -> Result<String, AdapterError> {
    debug!("Running {} {}", binary, args.join(" "));
    let output = Command::new(binary)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .output()
        .await?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(AdapterError::SourceUnavailable(format!(
            "yt-dlp exited with {}: {}",
            output.status,
            stderr.trim()
        )));
    }

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

pub struct YtDlpSearcher {
    binary: String,
    candidates: u32,
    max_duration_secs: u32,
}

impl YtDlpSearcher {
    pub fn new(binary: impl Into<String>, candidates: u32, max_duration_secs: u32) -> Self {
        Self {
            binary: binary.into(),
            candidates: candidates.max(1),
            max_duration_secs,
        }
    }

    fn query(&self, artist: &str, title: &str) -> String {
        format!("ytsearch{}:{} - {}", self.candidates, artist, title)
    }
}

#[async_trait]
impl SearchAdapter for YtDlpSearcher {
    async fn search(
        &self,
        artist: &str,
        title: &str,
        target_duration_secs: u32,
    ) -> Result<String, AdapterError> {
        let args = vec![
            "--dump-single-json".to_string(),
            "--flat-playlist".to_string(),
            self.query(artist, title),
        ];
        let stdout = run_yt_dlp(&self.binary, &args).await?;
        let candidates = parse_search_output(&stdout)?;
        if candidates.is_empty() {
            return Err(AdapterError::NotFound(format!(
                "no results for {} - {}",
                artist, title
            )));
        }

        let best = select_best_candidate(&candidates, target_duration_secs, self.max_duration_secs)
            .ok_or_else(|| {
                AdapterError::NotFound(format!(
                    "no result for {} - {} within {}s",
                    artist, title, self.max_duration_secs
                ))
            })?;

        debug!(
            "Best match for {} - {}: {} ({:?}s, {:?})",
            artist, title, best.id, best.duration, best.title
        );
        Ok(best.id.clone())
    }
}

pub struct YtDlpDownloader {
    binary: String,
    output_dir: PathBuf,
}

impl YtDlpDownloader {
    pub fn new(binary: impl Into<String>, output_dir: PathBuf) -> Self {
        Self {
            binary: binary.into(),
            output_dir,
        }
    }

    fn output_path(&self, source_id: &str) -> PathBuf {
        self.output_dir.join(format!("{}.mp3", source_id))
    }
}

#[async_trait]
impl DownloadAdapter for YtDlpDownloader {
    async fn download(&self, source_id: &str) -> Result<PathBuf, AdapterError> {
        if !is_safe_source_id(source_id) {
            return Err(AdapterError::SourceUnavailable(format!(
                "refusing unsafe source id {:?}",
                source_id
            )));
        }

        tokio::fs::create_dir_all(&self.output_dir).await?;
        let output_path = self.output_path(source_id);

        let args = vec![
            "-x".to_string(),
            "--audio-format".to_string(),
            "mp3".to_string(),
            "--audio-quality".to_string(),
            "0".to_string(),
            "--no-playlist".to_string(),
            "-o".to_string(),
            output_path.to_string_lossy().into_owned(),
            format!("https://www.youtube.com/watch?v={}", source_id),
        ];
        run_yt_dlp(&self.binary, &args).await?;

        if !tokio::fs::try_exists(&output_path).await? {
            return Err(AdapterError::InvalidOutput(format!(
                "yt-dlp reported success but {:?} is missing",
                output_path
            )));
        }
        Ok(output_path)
    }
}
