mod file_config;

pub use file_config::{FileConfig, PipelineConfig, QueueConfig, TelegramConfig};

use anyhow::{bail, Result};
use clap::ValueEnum;
use serde::Deserialize;
use std::path::PathBuf;

/// Output format of the tracing subscriber.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// CLI arguments that can be used for config resolution.
/// This struct mirrors the CLI arguments that can be overridden by TOML config.
#[derive(Debug, Clone, Default)]
pub struct CliConfig {
    pub db_dir: Option<PathBuf>,
    pub download_dir: Option<PathBuf>,
    pub log_format: LogFormat,
    pub yt_dlp_path: Option<String>,
    pub telegram_bot_token: Option<String>,
    pub telegram_storage_chat_id: Option<i64>,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    // Core settings
    pub db_dir: PathBuf,
    pub download_dir: PathBuf,
    pub log_format: LogFormat,
    pub yt_dlp_path: String,

    // Feature configs (with defaults)
    pub pipeline: PipelineSettings,
    pub queue: QueueSettings,

    // None until both a bot token and a storage chat are configured
    pub telegram: Option<TelegramSettings>,
}

impl AppConfig {
    /// Resolve configuration from CLI arguments and optional TOML file config.
    /// TOML values override CLI values where present.
    pub fn resolve(cli: &CliConfig, file_config: Option<FileConfig>) -> Result<Self> {
        let file = file_config.unwrap_or_default();

        let db_dir = file
            .db_dir
            .map(PathBuf::from)
            .or_else(|| cli.db_dir.clone())
            .ok_or_else(|| {
                anyhow::anyhow!("db_dir must be specified via --db-dir or in config file")
            })?;

        if !db_dir.exists() {
            bail!("Database directory does not exist: {:?}", db_dir);
        }
        if !db_dir.is_dir() {
            bail!("db_dir is not a directory: {:?}", db_dir);
        }

        let download_dir = file
            .download_dir
            .map(PathBuf::from)
            .or_else(|| cli.download_dir.clone())
            .unwrap_or_else(|| db_dir.join("downloads"));

        let log_format = match file.log_format {
            Some(s) => match parse_log_format(&s) {
                Some(format) => format,
                None => bail!("Unknown log_format {:?}, expected \"text\" or \"json\"", s),
            },
            None => cli.log_format,
        };

        let yt_dlp_path = file
            .yt_dlp_path
            .or_else(|| cli.yt_dlp_path.clone())
            .unwrap_or_else(|| "yt-dlp".to_string());

        let pipeline_file = file.pipeline.unwrap_or_default();
        let pipeline_defaults = PipelineSettings::default();
        let pipeline = PipelineSettings {
            search_max_retries: pipeline_file
                .search_max_retries
                .unwrap_or(pipeline_defaults.search_max_retries),
            download_max_retries: pipeline_file
                .download_max_retries
                .unwrap_or(pipeline_defaults.download_max_retries),
            upload_max_retries: pipeline_file
                .upload_max_retries
                .unwrap_or(pipeline_defaults.upload_max_retries),
            request_timeout_secs: pipeline_file
                .request_timeout_secs
                .unwrap_or(pipeline_defaults.request_timeout_secs),
            max_candidate_duration_secs: pipeline_file
                .max_candidate_duration_secs
                .unwrap_or(pipeline_defaults.max_candidate_duration_secs),
            search_candidates: pipeline_file
                .search_candidates
                .unwrap_or(pipeline_defaults.search_candidates),
        };
        if pipeline.search_max_retries < 0
            || pipeline.download_max_retries < 0
            || pipeline.upload_max_retries < 0
        {
            bail!("Retry budgets must not be negative");
        }

        let queue_file = file.queue.unwrap_or_default();
        let queue_defaults = QueueSettings::default();
        let queue = QueueSettings {
            workers: queue_file.workers.unwrap_or(queue_defaults.workers),
            poll_interval_ms: queue_file
                .poll_interval_ms
                .unwrap_or(queue_defaults.poll_interval_ms),
            initial_backoff_secs: queue_file
                .initial_backoff_secs
                .unwrap_or(queue_defaults.initial_backoff_secs),
            max_backoff_secs: queue_file
                .max_backoff_secs
                .unwrap_or(queue_defaults.max_backoff_secs),
            backoff_multiplier: queue_file
                .backoff_multiplier
                .unwrap_or(queue_defaults.backoff_multiplier),
            job_timeout_secs: queue_file
                .job_timeout_secs
                .unwrap_or(queue_defaults.job_timeout_secs),
            stale_in_progress_threshold_secs: queue_file
                .stale_in_progress_threshold_secs
                .unwrap_or(queue_defaults.stale_in_progress_threshold_secs),
            seconds_per_job_estimate: queue_file
                .seconds_per_job_estimate
                .unwrap_or(queue_defaults.seconds_per_job_estimate),
        };
        if queue.workers == 0 {
            bail!("queue.workers must be at least 1");
        }

        // TOML [telegram] section takes precedence over CLI args
        let telegram_file = file.telegram.unwrap_or_default();
        let bot_token = telegram_file
            .bot_token
            .or_else(|| cli.telegram_bot_token.clone());
        let storage_chat_id = telegram_file
            .storage_chat_id
            .or(cli.telegram_storage_chat_id);
        let telegram = match (bot_token, storage_chat_id) {
            (Some(bot_token), Some(storage_chat_id)) => Some(TelegramSettings {
                bot_token,
                storage_chat_id,
                api_base_url: telegram_file
                    .api_base_url
                    .unwrap_or_else(|| DEFAULT_TELEGRAM_API_URL.to_string()),
                timeout_secs: telegram_file.timeout_secs.unwrap_or(120),
            }),
            (None, None) => None,
            _ => bail!("Both a Telegram bot token and a storage chat id must be provided together"),
        };

        Ok(Self {
            db_dir,
            download_dir,
            log_format,
            yt_dlp_path,
            pipeline,
            queue,
            telegram,
        })
    }

    pub fn track_db_path(&self) -> PathBuf {
        self.db_dir.join("tracks.db")
    }

    pub fn work_queue_db_path(&self) -> PathBuf {
        self.db_dir.join("work_queue.db")
    }
}

pub const DEFAULT_TELEGRAM_API_URL: &str = "https://api.telegram.org";

#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub search_max_retries: i32,
    pub download_max_retries: i32,
    pub upload_max_retries: i32,
    /// Bound on the caller-facing playback request.
    pub request_timeout_secs: u64,
    /// Search candidates longer than this are discarded.
    pub max_candidate_duration_secs: u32,
    pub search_candidates: u32,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            search_max_retries: 3,
            download_max_retries: 2,
            upload_max_retries: 5, // delivery channel is rate limited
            request_timeout_secs: 15,
            max_candidate_duration_secs: 1200,
            search_candidates: 5,
        }
    }
}

#[derive(Debug, Clone)]
pub struct QueueSettings {
    pub workers: usize,
    pub poll_interval_ms: u64,
    pub initial_backoff_secs: u64,
    pub max_backoff_secs: u64,
    pub backoff_multiplier: f64,
    pub job_timeout_secs: u64,
    pub stale_in_progress_threshold_secs: u64,
    pub seconds_per_job_estimate: u64,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            workers: 10,
            poll_interval_ms: 500,
            initial_backoff_secs: 10,
            max_backoff_secs: 600,
            backoff_multiplier: 2.0,
            job_timeout_secs: 1800,
            stale_in_progress_threshold_secs: 3600,
            seconds_per_job_estimate: 40,
        }
    }
}

#[derive(Debug, Clone)]
pub struct TelegramSettings {
    pub bot_token: String,
    pub storage_chat_id: i64,
    pub api_base_url: String,
    pub timeout_secs: u64,
}

/// Parses a log format string using clap's ValueEnum trait.
fn parse_log_format(s: &str) -> Option<LogFormat> {
    LogFormat::from_str(s, true).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn make_temp_db_dir() -> TempDir {
        TempDir::new().unwrap()
    }

    fn cli_with_db_dir(temp_dir: &TempDir) -> CliConfig {
        CliConfig {
            db_dir: Some(temp_dir.path().to_path_buf()),
            ..Default::default()
        }
    }

    #[test]
    fn test_parse_log_format() {
        assert_eq!(parse_log_format("text"), Some(LogFormat::Text));
        assert_eq!(parse_log_format("JSON"), Some(LogFormat::Json));
        assert!(parse_log_format("xml").is_none());
    }

    #[test]
    fn test_resolve_cli_only() {
        let temp_dir = make_temp_db_dir();
        let cli = CliConfig {
            db_dir: Some(temp_dir.path().to_path_buf()),
            download_dir: Some(PathBuf::from("/tmp/downloads")),
            log_format: LogFormat::Json,
            yt_dlp_path: Some("/usr/local/bin/yt-dlp".to_string()),
            telegram_bot_token: Some("123:abc".to_string()),
            telegram_storage_chat_id: Some(-100),
        };

        let config = AppConfig::resolve(&cli, None).unwrap();

        assert_eq!(config.db_dir, temp_dir.path());
        assert_eq!(config.download_dir, PathBuf::from("/tmp/downloads"));
        assert_eq!(config.log_format, LogFormat::Json);
        assert_eq!(config.yt_dlp_path, "/usr/local/bin/yt-dlp");
        let telegram = config.telegram.unwrap();
        assert_eq!(telegram.bot_token, "123:abc");
        assert_eq!(telegram.storage_chat_id, -100);
        assert_eq!(telegram.api_base_url, "https://api.telegram.org");
        assert_eq!(telegram.timeout_secs, 120);
    }

    #[test]
    fn test_resolve_defaults() {
        let temp_dir = make_temp_db_dir();

        let config = AppConfig::resolve(&cli_with_db_dir(&temp_dir), None).unwrap();

        assert_eq!(config.download_dir, temp_dir.path().join("downloads"));
        assert_eq!(config.log_format, LogFormat::Text);
        assert_eq!(config.yt_dlp_path, "yt-dlp");
        assert_eq!(config.pipeline.search_max_retries, 3);
        assert_eq!(config.pipeline.download_max_retries, 2);
        assert_eq!(config.pipeline.upload_max_retries, 5);
        assert_eq!(config.pipeline.max_candidate_duration_secs, 1200);
        assert_eq!(config.queue.workers, 10);
        assert_eq!(config.queue.seconds_per_job_estimate, 40);
        assert!(config.telegram.is_none());
    }

    #[test]
    fn test_resolve_toml_overrides_cli() {
        let temp_dir = make_temp_db_dir();
        let cli = CliConfig {
            db_dir: Some(PathBuf::from("/should/be/overridden")),
            yt_dlp_path: Some("/cli/yt-dlp".to_string()),
            telegram_bot_token: Some("cli-token".to_string()),
            telegram_storage_chat_id: Some(1),
            ..Default::default()
        };

        let file_config = FileConfig {
            db_dir: Some(temp_dir.path().to_string_lossy().to_string()),
            log_format: Some("json".to_string()),
            pipeline: Some(PipelineConfig {
                upload_max_retries: Some(9),
                ..Default::default()
            }),
            queue: Some(QueueConfig {
                workers: Some(2),
                ..Default::default()
            }),
            telegram: Some(TelegramConfig {
                bot_token: Some("toml-token".to_string()),
                ..Default::default()
            }),
            ..Default::default()
        };

        let config = AppConfig::resolve(&cli, Some(file_config)).unwrap();

        // TOML values should override CLI
        assert_eq!(config.db_dir, temp_dir.path());
        assert_eq!(config.log_format, LogFormat::Json);
        assert_eq!(config.pipeline.upload_max_retries, 9);
        assert_eq!(config.queue.workers, 2);
        let telegram = config.telegram.unwrap();
        assert_eq!(telegram.bot_token, "toml-token");
        // CLI value used when TOML doesn't specify
        assert_eq!(telegram.storage_chat_id, 1);
        assert_eq!(config.yt_dlp_path, "/cli/yt-dlp");
        assert_eq!(config.pipeline.search_max_retries, 3);
    }

    #[test]
    fn test_resolve_missing_db_dir_error() {
        let result = AppConfig::resolve(&CliConfig::default(), None);
        assert!(result
            .unwrap_err()
            .to_string()
            .contains("db_dir must be specified"));
    }

    #[test]
    fn test_resolve_nonexistent_db_dir_error() {
        let cli = CliConfig {
            db_dir: Some(PathBuf::from("/nonexistent/path/that/should/not/exist")),
            ..Default::default()
        };
        let result = AppConfig::resolve(&cli, None);
        assert!(result.unwrap_err().to_string().contains("does not exist"));
    }

    #[test]
    fn test_resolve_db_dir_not_directory_error() {
        let temp_file = tempfile::NamedTempFile::new().unwrap();
        let cli = CliConfig {
            db_dir: Some(temp_file.path().to_path_buf()),
            ..Default::default()
        };
        let result = AppConfig::resolve(&cli, None);
        assert!(result.unwrap_err().to_string().contains("not a directory"));
    }

    #[test]
    fn test_resolve_invalid_log_format_error() {
        let temp_dir = make_temp_db_dir();
        let file_config = FileConfig {
            log_format: Some("xml".to_string()),
            ..Default::default()
        };

        let result = AppConfig::resolve(&cli_with_db_dir(&temp_dir), Some(file_config));
        assert!(result.unwrap_err().to_string().contains("Unknown log_format"));
    }

    #[test]
    fn test_resolve_partial_telegram_error() {
        let temp_dir = make_temp_db_dir();
        let cli = CliConfig {
            telegram_bot_token: Some("123:abc".to_string()),
            ..cli_with_db_dir(&temp_dir)
        };

        let result = AppConfig::resolve(&cli, None);
        assert!(result.unwrap_err().to_string().contains("must be provided together"));
    }

    #[test]
    fn test_resolve_zero_workers_error() {
        let temp_dir = make_temp_db_dir();
        let file_config = FileConfig {
            queue: Some(QueueConfig {
                workers: Some(0),
                ..Default::default()
            }),
            ..Default::default()
        };

        let result = AppConfig::resolve(&cli_with_db_dir(&temp_dir), Some(file_config));
        assert!(result.is_err());
    }

    #[test]
    fn test_db_path_helpers() {
        let temp_dir = make_temp_db_dir();
        let config = AppConfig::resolve(&cli_with_db_dir(&temp_dir), None).unwrap();

        assert_eq!(config.track_db_path(), temp_dir.path().join("tracks.db"));
        assert_eq!(
            config.work_queue_db_path(),
            temp_dir.path().join("work_queue.db")
        );
    }
}
