//! Delivery channel backed by the Telegram Bot API.
//!
//! Audio is sent to a private storage chat; the returned `file_id` is the
//! durable content handle and `getFile` turns it into a short-lived link.

use crate::config::TelegramSettings;
use crate::pipeline::{AdapterError, LinkResolver, UploadAdapter};
use crate::track_store::{ContentHandle, TrackMetadata};
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use tracing::debug;

/// Envelope of every Bot API response.
#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    result: Option<T>,
    description: Option<String>,
    error_code: Option<i32>,
}

impl<T> ApiResponse<T> {
    fn into_result(self, method: &str) -> Result<T, AdapterError> {
        match (self.ok, self.result) {
            (true, Some(result)) => Ok(result),
            _ => Err(AdapterError::Channel(format!(
                "{} failed ({}): {}",
                method,
                self.error_code
                    .map(|c| c.to_string())
                    .unwrap_or_else(|| "no code".to_string()),
                self.description.unwrap_or_else(|| "no description".to_string())
            ))),
        }
    }
}

#[derive(Debug, Deserialize)]
struct SentMessage {
    audio: Option<SentAudio>,
}

#[derive(Debug, Deserialize)]
struct SentAudio {
    file_id: String,
    file_unique_id: String,
}

#[derive(Debug, Deserialize)]
struct FileInfo {
    file_path: Option<String>,
}

pub struct TelegramChannel {
    client: reqwest::Client,
    api_base_url: String,
    bot_token: String,
    storage_chat_id: i64,
}

impl TelegramChannel {
    pub fn new(settings: &TelegramSettings) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.timeout_secs))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            api_base_url: settings.api_base_url.trim_end_matches('/').to_string(),
            bot_token: settings.bot_token.clone(),
            storage_chat_id: settings.storage_chat_id,
        })
    }

    fn method_url(&self, method: &str) -> String {
        format!("{}/bot{}/{}", self.api_base_url, self.bot_token, method)
    }

    fn file_url(&self, file_path: &str) -> String {
        format!("{}/file/bot{}/{}", self.api_base_url, self.bot_token, file_path)
    }

    async fn parse<T: DeserializeOwned>(
        method: &str,
        response: reqwest::Response,
    ) -> Result<T, AdapterError> {
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| AdapterError::Channel(format!("{} response unreadable: {}", method, e)))?;

        let parsed: ApiResponse<T> = serde_json::from_str(&body).map_err(|e| {
            AdapterError::InvalidOutput(format!("{} returned {} with unexpected body: {}", method, status, e))
        })?;
        parsed.into_result(method)
    }
}

#[async_trait]
impl UploadAdapter for TelegramChannel {
    async fn upload(
        &self,
        path: &Path,
        metadata: &TrackMetadata,
    ) -> Result<ContentHandle, AdapterError> {
        let bytes = tokio::fs::read(path).await?;
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "audio.mp3".to_string());
        let audio = Part::bytes(bytes)
            .file_name(file_name)
            .mime_str("audio/mpeg")
            .map_err(|e| AdapterError::Channel(format!("invalid mime type: {}", e)))?;

        let form = Form::new()
            .text("chat_id", self.storage_chat_id.to_string())
            .text("title", metadata.title.clone())
            .text("performer", metadata.artist.clone())
            .text("duration", metadata.duration.to_string())
            .part("audio", audio);

        let response = self
            .client
            .post(self.method_url("sendAudio"))
            .multipart(form)
            .send()
            .await
            .map_err(|e| AdapterError::Channel(format!("sendAudio request failed: {}", e)))?;

        let message: SentMessage = Self::parse("sendAudio", response).await?;
        let audio = message.audio.ok_or_else(|| {
            AdapterError::InvalidOutput("sendAudio returned no audio metadata".to_string())
        })?;

        debug!("Uploaded {:?} as {}", path, audio.file_unique_id);
        Ok(ContentHandle {
            handle: audio.file_id,
            unique_token: audio.file_unique_id,
        })
    }
}

#[async_trait]
impl LinkResolver for TelegramChannel {
    async fn resolve_link(&self, content_handle: &str) -> Result<String, AdapterError> {
        let response = self
            .client
            .get(self.method_url("getFile"))
            .query(&[("file_id", content_handle)])
            .send()
            .await
            .map_err(|e| AdapterError::Channel(format!("getFile request failed: {}", e)))?;

        let file: FileInfo = Self::parse("getFile", response).await?;
        let file_path = file.file_path.ok_or_else(|| {
            AdapterError::Channel("getFile returned no downloadable path".to_string())
        })?;
        Ok(self.file_url(&file_path))
    }
}
