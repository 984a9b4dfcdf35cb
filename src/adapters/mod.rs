//! Concrete stage adapters.

mod telegram;
mod yt_dlp;

pub use telegram::TelegramChannel;
pub use yt_dlp::{parse_search_output, YtDlpDownloader, YtDlpSearcher};
