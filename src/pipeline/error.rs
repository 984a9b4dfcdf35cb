//! Error taxonomy of the pipeline and its stage adapters.

use crate::track_store::TrackKey;
use crate::work_queue::JobFailure;
use std::time::Duration;
use thiserror::Error;

/// Errors raised by stage adapters.
#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("No usable match: {0}")]
    NotFound(String),

    #[error("Source unavailable: {0}")]
    SourceUnavailable(String),

    #[error("Delivery channel error: {0}")]
    Channel(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid output: {0}")]
    InvalidOutput(String),
}

/// Errors raised by the pipeline controller and stage handlers.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("No usable source found: {0}")]
    NotFound(String),

    #[error("Adapter failure: {0}")]
    AdapterFailure(AdapterError),

    #[error("Persistence failure: {0:#}")]
    Persistence(anyhow::Error),

    #[error("Failed to enqueue work: {0:#}")]
    Enqueue(anyhow::Error),

    #[error("Track record not found ({0})")]
    MissingRecord(TrackKey),

    #[error("Invalid job payload: {0}")]
    InvalidPayload(String),

    #[error("Request timed out after {0:?}")]
    Timeout(Duration),
}

impl PipelineError {
    /// Whether the work queue should try the job again.
    ///
    /// Search misses stay retryable at the queue level: a later attempt may
    /// find a candidate once the source platform indexes it.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            PipelineError::MissingRecord(_) | PipelineError::InvalidPayload(_)
        )
    }
}

impl From<AdapterError> for PipelineError {
    fn from(err: AdapterError) -> Self {
        match err {
            AdapterError::NotFound(msg) => PipelineError::NotFound(msg),
            other => PipelineError::AdapterFailure(other),
        }
    }
}

impl From<PipelineError> for JobFailure {
    fn from(err: PipelineError) -> Self {
        JobFailure {
            retryable: err.is_retryable(),
            message: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_adapter_not_found_maps_to_not_found() {
        let err: PipelineError = AdapterError::NotFound("nothing".to_string()).into();
        assert!(matches!(err, PipelineError::NotFound(_)));
        assert!(err.is_retryable());
    }

    #[test]
    fn test_adapter_failure_is_retryable() {
        let err: PipelineError = AdapterError::Channel("429 Too Many Requests".to_string()).into();
        assert!(matches!(err, PipelineError::AdapterFailure(_)));

        let failure = JobFailure::from(err);
        assert!(failure.retryable);
        assert!(failure.message.contains("429"));
    }

    #[test]
    fn test_persistence_failure_is_retryable() {
        let err = PipelineError::Persistence(anyhow::anyhow!("database is locked"));
        assert!(err.is_retryable());
        assert!(err.to_string().contains("database is locked"));
    }

    #[test]
    fn test_payload_and_missing_record_are_permanent() {
        assert!(!PipelineError::InvalidPayload("bad".to_string()).is_retryable());
        assert!(!PipelineError::MissingRecord(TrackKey::Internal(3)).is_retryable());

        let failure = JobFailure::from(PipelineError::MissingRecord(TrackKey::Internal(3)));
        assert!(!failure.retryable);
        assert_eq!(failure.message, "Track record not found (track_id=3)");
    }
}
