use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::info;

use tunefetch::adapters::{TelegramChannel, YtDlpDownloader, YtDlpSearcher};
use tunefetch::config::{self, AppConfig, LogFormat};
use tunefetch::logging::{init_tracing, LogContext};
use tunefetch::pipeline::{
    AdapterError, LinkResolver, PipelineController, StageHandlers, TerminalFailureReconciler,
};
use tunefetch::track_store::{SqliteTrackStore, TrackReference, TrackStore};
use tunefetch::work_queue::{HandlerRegistry, QueueRunner, SqliteWorkQueue, WorkQueue};

fn parse_path(s: &str) -> Result<PathBuf, String> {
    let path_buf = PathBuf::from(s);
    let original_path = match path_buf.canonicalize() {
        Ok(path) => path,
        Err(msg) => {
            if msg.kind() == std::io::ErrorKind::NotFound {
                path_buf
            } else {
                return Err(format!("Error resolving path '{}': {}", s, msg));
            }
        }
    };
    if original_path.is_absolute() {
        return Ok(original_path);
    }
    let cwd = std::env::current_dir().map_err(|e| format!("Failed to get current dir: {}", e))?;
    Ok(cwd.join(original_path))
}

fn parse_dir(s: &str) -> Result<PathBuf, String> {
    let path = parse_path(s)?;
    if !path.exists() {
        return Err(format!("Directory does not exist: {}", s));
    }
    if !path.is_dir() {
        return Err(format!("Path is not a directory: {}", s));
    }
    Ok(path)
}

#[derive(Parser, Debug)]
#[command(version, about = "Turns catalog track references into playable audio")]
struct CliArgs {
    /// Path to TOML configuration file. Values in the file override CLI arguments.
    #[clap(long, value_parser = parse_path)]
    pub config: Option<PathBuf>,

    /// Directory holding tracks.db and work_queue.db.
    #[clap(long, value_parser = parse_dir)]
    pub db_dir: Option<PathBuf>,

    /// Directory for transient downloads. Defaults to <db_dir>/downloads.
    #[clap(long, value_parser = parse_path)]
    pub download_dir: Option<PathBuf>,

    #[clap(long, value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,

    #[clap(long)]
    pub yt_dlp_path: Option<String>,

    #[clap(long)]
    pub telegram_bot_token: Option<String>,

    /// Chat that stores uploaded audio.
    #[clap(long, allow_hyphen_values = true)]
    pub telegram_storage_chat_id: Option<i64>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the stage workers until Ctrl+C.
    Serve,

    /// Request a playable link, starting the pipeline if needed.
    Play {
        external_id: i64,

        #[clap(long, default_value = "")]
        title: String,

        #[clap(long, default_value = "")]
        artist: String,

        /// Duration in seconds.
        #[clap(long, default_value_t = 0)]
        duration: u32,

        #[clap(long)]
        cover: Option<String>,
    },

    /// Print the stored record of a track.
    Status { external_id: i64 },

    /// Print work queue statistics.
    Stats,
}

impl From<&CliArgs> for config::CliConfig {
    fn from(args: &CliArgs) -> Self {
        config::CliConfig {
            db_dir: args.db_dir.clone(),
            download_dir: args.download_dir.clone(),
            log_format: args.log_format,
            yt_dlp_path: args.yt_dlp_path.clone(),
            telegram_bot_token: args.telegram_bot_token.clone(),
            telegram_storage_chat_id: args.telegram_storage_chat_id,
        }
    }
}

/// Link resolver for commands that never materialize links.
struct NoDeliveryChannel;

#[async_trait]
impl LinkResolver for NoDeliveryChannel {
    async fn resolve_link(&self, _content_handle: &str) -> Result<String, AdapterError> {
        Err(AdapterError::Channel(
            "no delivery channel configured".to_string(),
        ))
    }
}

struct Stores {
    tracks: Arc<SqliteTrackStore>,
    queue: Arc<SqliteWorkQueue>,
}

fn open_stores(app_config: &AppConfig) -> Result<Stores> {
    if !app_config.track_db_path().exists() {
        info!(
            "Creating new track database at {:?}",
            app_config.track_db_path()
        );
    }
    let tracks = Arc::new(SqliteTrackStore::new(app_config.track_db_path())?);

    let queue = Arc::new(
        SqliteWorkQueue::new(app_config.work_queue_db_path())?
            .with_seconds_per_job(app_config.queue.seconds_per_job_estimate),
    );
    Ok(Stores { tracks, queue })
}

fn controller(
    app_config: &AppConfig,
    stores: &Stores,
    links: Arc<dyn LinkResolver>,
) -> PipelineController {
    PipelineController::new(
        stores.tracks.clone() as Arc<dyn TrackStore>,
        stores.queue.clone() as Arc<dyn WorkQueue>,
        links,
        app_config.pipeline.clone(),
        LogContext::new("pipeline_controller"),
    )
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn serve(app_config: &AppConfig, stores: Stores) -> Result<()> {
    let Some(telegram) = &app_config.telegram else {
        bail!("serve requires --telegram-bot-token and --telegram-storage-chat-id");
    };
    let channel = Arc::new(TelegramChannel::new(telegram)?);

    tokio::fs::create_dir_all(&app_config.download_dir)
        .await
        .with_context(|| format!("Failed to create {:?}", app_config.download_dir))?;

    let searcher = Arc::new(YtDlpSearcher::new(
        app_config.yt_dlp_path.clone(),
        app_config.pipeline.search_candidates,
        app_config.pipeline.max_candidate_duration_secs,
    ));
    let downloader = Arc::new(YtDlpDownloader::new(
        app_config.yt_dlp_path.clone(),
        app_config.download_dir.clone(),
    ));

    let stages = Arc::new(StageHandlers::new(
        stores.tracks.clone(),
        stores.queue.clone(),
        searcher,
        downloader,
        channel,
        app_config.pipeline.clone(),
        LogContext::new("stage_handlers"),
    ));

    let mut registry = HandlerRegistry::new();
    stages.register(&mut registry);
    registry.on_terminal_failure(Arc::new(TerminalFailureReconciler::new(
        stores.tracks.clone(),
        LogContext::new("terminal_failure_reconciler"),
    )));

    let runner = Arc::new(QueueRunner::new(
        stores.queue.clone(),
        registry,
        &app_config.queue,
        LogContext::new("queue_runner"),
    ));

    let shutdown_token = CancellationToken::new();
    let runner_handle = tokio::spawn(runner.run(shutdown_token.clone()));

    info!("Ready to process jobs");

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl+C")?;
    info!("Received Ctrl+C, initiating graceful shutdown");
    shutdown_token.cancel();

    runner_handle.await.context("Queue runner task failed")?;
    tokio::time::sleep(Duration::from_millis(100)).await;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli_args = CliArgs::parse();

    let file_config = match &cli_args.config {
        Some(path) => Some(config::FileConfig::load(path)?),
        None => None,
    };

    // Resolve final configuration (TOML overrides CLI)
    let cli_config: config::CliConfig = (&cli_args).into();
    let app_config = AppConfig::resolve(&cli_config, file_config)?;

    init_tracing(app_config.log_format)?;

    info!("Configuration loaded:");
    info!("  db_dir: {:?}", app_config.db_dir);
    info!("  download_dir: {:?}", app_config.download_dir);
    info!(
        "  delivery channel: {}",
        if app_config.telegram.is_some() {
            "telegram"
        } else {
            "none"
        }
    );

    let stores = open_stores(&app_config)?;

    match cli_args.command {
        Command::Serve => serve(&app_config, stores).await,
        Command::Play {
            external_id,
            title,
            artist,
            duration,
            cover,
        } => {
            let Some(telegram) = &app_config.telegram else {
                bail!("play requires --telegram-bot-token and --telegram-storage-chat-id");
            };
            let channel = Arc::new(TelegramChannel::new(telegram)?);
            let controller = controller(&app_config, &stores, channel);

            let mut reference =
                TrackReference::new(external_id).with_metadata(title, artist, duration);
            if let Some(cover) = cover {
                reference = reference.with_cover(cover);
            }

            let state = controller.request_playback(&reference).await?;
            print_json(&state)
        }
        Command::Status { external_id } => {
            let controller = controller(&app_config, &stores, Arc::new(NoDeliveryChannel));
            print_json(&controller.get_status(external_id)?)
        }
        Command::Stats => {
            let controller = controller(&app_config, &stores, Arc::new(NoDeliveryChannel));
            print_json(&controller.queue_stats()?)
        }
    }
}
