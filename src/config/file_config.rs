use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct FileConfig {
    // Core settings (can override CLI)
    pub db_dir: Option<String>,
    pub download_dir: Option<String>,
    pub log_format: Option<String>,
    pub yt_dlp_path: Option<String>,

    // Sections
    pub pipeline: Option<PipelineConfig>,
    pub queue: Option<QueueConfig>,
    pub telegram: Option<TelegramConfig>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct PipelineConfig {
    pub search_max_retries: Option<i32>,
    pub download_max_retries: Option<i32>,
    pub upload_max_retries: Option<i32>,
    pub request_timeout_secs: Option<u64>,
    pub max_candidate_duration_secs: Option<u32>,
    pub search_candidates: Option<u32>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct QueueConfig {
    pub workers: Option<usize>,
    pub poll_interval_ms: Option<u64>,
    pub initial_backoff_secs: Option<u64>,
    pub max_backoff_secs: Option<u64>,
    pub backoff_multiplier: Option<f64>,
    pub job_timeout_secs: Option<u64>,
    pub stale_in_progress_threshold_secs: Option<u64>,
    pub seconds_per_job_estimate: Option<u64>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct TelegramConfig {
    pub bot_token: Option<String>,
    pub storage_chat_id: Option<i64>,
    pub api_base_url: Option<String>,
    pub timeout_secs: Option<u64>,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        toml::from_str(&content).with_context(|| format!("Failed to parse config file: {:?}", path))
    }
}
