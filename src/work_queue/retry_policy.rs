//! Retry policy for failed jobs.
//!
//! Implements exponential backoff with configurable parameters. The retry
//! budget itself travels with each job, since it differs per stage.

use super::models::{JobFailure, QueuedJob};
use crate::config::QueueSettings;

/// Retry policy implementing exponential backoff.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Initial backoff duration in seconds.
    pub initial_backoff_secs: u64,
    /// Maximum backoff duration in seconds (cap for exponential growth).
    pub max_backoff_secs: u64,
    /// Multiplier applied to backoff after each retry.
    pub backoff_multiplier: f64,
}

impl RetryPolicy {
    pub fn new(config: &QueueSettings) -> Self {
        Self {
            initial_backoff_secs: config.initial_backoff_secs,
            max_backoff_secs: config.max_backoff_secs,
            backoff_multiplier: config.backoff_multiplier,
        }
    }

    /// Unix timestamp of the next attempt: `now + backoff_secs(retry_count)`.
    pub fn next_retry_at(&self, retry_count: i32) -> i64 {
        chrono::Utc::now().timestamp() + self.backoff_secs(retry_count) as i64
    }

    /// `initial_backoff * multiplier^retry_count`, capped at `max_backoff_secs`.
    pub fn backoff_secs(&self, retry_count: i32) -> u64 {
        let backoff = self.initial_backoff_secs as f64 * self.backoff_multiplier.powi(retry_count);
        backoff.min(self.max_backoff_secs as f64) as u64
    }

    /// Returns true if the failure is retryable and the job still has budget.
    pub fn should_retry(&self, failure: &JobFailure, job: &QueuedJob) -> bool {
        failure.retryable && job.retry_count < job.max_retries
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_backoff_secs: 10,
            max_backoff_secs: 600,
            backoff_multiplier: 2.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::work_queue::models::{JobKind, JobPriority, JobStatus};

    fn job_with_retries(retry_count: i32, max_retries: i32) -> QueuedJob {
        QueuedJob {
            id: "job".to_string(),
            kind: JobKind::Upload,
            payload: "{}".to_string(),
            status: JobStatus::InProgress,
            priority: JobPriority::Critical,
            retry_count,
            max_retries,
            created_at: 0,
            started_at: None,
            completed_at: None,
            next_retry_at: None,
            last_error: None,
        }
    }

    #[test]
    fn test_new_from_config() {
        let policy = RetryPolicy::new(&QueueSettings::default());

        assert_eq!(policy.initial_backoff_secs, 10);
        assert_eq!(policy.max_backoff_secs, 600);
        assert_eq!(policy.backoff_multiplier, 2.0);
    }

    #[test]
    fn test_backoff_calculation() {
        let policy = RetryPolicy::default();

        assert_eq!(policy.backoff_secs(0), 10);
        assert_eq!(policy.backoff_secs(1), 20);
        assert_eq!(policy.backoff_secs(2), 40);
        assert_eq!(policy.backoff_secs(10), 600); // capped
    }

    #[test]
    fn test_next_retry_at_is_in_future() {
        let policy = RetryPolicy::default();
        let now = chrono::Utc::now().timestamp();

        let next = policy.next_retry_at(1);
        assert!(next >= now + 20);
        assert!(next <= now + 21);
    }

    #[test]
    fn test_should_retry_within_budget() {
        let policy = RetryPolicy::default();
        let failure = JobFailure::retryable("channel busy");

        assert!(policy.should_retry(&failure, &job_with_retries(0, 5)));
        assert!(policy.should_retry(&failure, &job_with_retries(4, 5)));
        assert!(!policy.should_retry(&failure, &job_with_retries(5, 5)));
    }

    #[test]
    fn test_should_not_retry_permanent_failure() {
        let policy = RetryPolicy::default();
        let failure = JobFailure::permanent("malformed payload");

        assert!(!policy.should_retry(&failure, &job_with_retries(0, 5)));
    }

    #[test]
    fn test_zero_budget_never_retries() {
        let policy = RetryPolicy::default();
        let failure = JobFailure::retryable("boom");

        assert!(!policy.should_retry(&failure, &job_with_retries(0, 0)));
    }
}
