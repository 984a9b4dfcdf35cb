//! Construction of stage jobs with their retry budgets and priorities.

use crate::config::PipelineSettings;
use crate::work_queue::{
    DownloadPayload, JobKind, JobPriority, NewJob, SearchPayload, UploadPayload,
};
use anyhow::Result;
use std::path::Path;

pub fn search_job(settings: &PipelineSettings, external_id: i64) -> Result<NewJob> {
    NewJob::new(
        JobKind::Search,
        &SearchPayload { external_id },
        settings.search_max_retries,
    )
}

pub fn download_job(settings: &PipelineSettings, track_id: i64, source_id: &str) -> Result<NewJob> {
    NewJob::new(
        JobKind::Download,
        &DownloadPayload {
            track_id,
            source_id: source_id.to_string(),
        },
        settings.download_max_retries,
    )
}

/// Uploads continue pipelines that already paid for a download, so they jump
/// ahead of new work.
pub fn upload_job(settings: &PipelineSettings, track_id: i64, file_path: &Path) -> Result<NewJob> {
    Ok(NewJob::new(
        JobKind::Upload,
        &UploadPayload {
            track_id,
            file_path: file_path.to_string_lossy().into_owned(),
        },
        settings.upload_max_retries,
    )?
    .with_priority(JobPriority::Critical))
}
