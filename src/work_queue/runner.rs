//! Worker pool draining the work queue.
//!
//! Each worker claims one job at a time, dispatches it to the handler
//! registered for its kind and records the outcome in the ledger. Retry
//! decisions live here, never in the handlers.

use super::models::{JobFailure, JobKind, QueuedJob};
use super::queue_store::JobLedger;
use super::retry_policy::RetryPolicy;
use crate::config::QueueSettings;
use crate::logging::LogContext;
use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn, Instrument};

/// Stage logic bound to one job kind.
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn handle(&self, job: &QueuedJob) -> Result<(), JobFailure>;
}

/// Callback fired for every job that ends up `DEAD`.
///
/// A job counts as reconciled only once every handler returned `Ok`. Until
/// then maintenance calls the handlers again, also after a restart, so they
/// must be idempotent.
pub trait TerminalFailureHandler: Send + Sync {
    fn on_exhausted(&self, job: &QueuedJob, last_failure: &JobFailure) -> Result<()>;
}

/// Dead jobs reconciled per maintenance pass.
const RECONCILE_BATCH: usize = 50;

/// Maps job kinds to their handlers.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<JobKind, Arc<dyn JobHandler>>,
    terminal: Vec<Arc<dyn TerminalFailureHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the handler for a job kind, replacing any previous one.
    pub fn register(&mut self, kind: JobKind, handler: Arc<dyn JobHandler>) {
        if self.handlers.insert(kind, handler).is_some() {
            warn!("Replacing handler for {} jobs", kind);
        }
    }

    pub fn on_terminal_failure(&mut self, handler: Arc<dyn TerminalFailureHandler>) {
        self.terminal.push(handler);
    }

    pub fn handler(&self, kind: JobKind) -> Option<&Arc<dyn JobHandler>> {
        self.handlers.get(&kind)
    }

    fn notify_exhausted(&self, job: &QueuedJob, failure: &JobFailure) -> Result<()> {
        let mut outcome = Ok(());
        for handler in &self.terminal {
            if let Err(e) = handler.on_exhausted(job, failure) {
                outcome = Err(e);
            }
        }
        outcome
    }
}

/// Runs the worker pool and the queue maintenance loop.
pub struct QueueRunner {
    ledger: Arc<dyn JobLedger>,
    registry: HandlerRegistry,
    retry_policy: RetryPolicy,
    workers: usize,
    poll_interval: Duration,
    job_timeout: Duration,
    stale_threshold_secs: i64,
    log: LogContext,
}

impl QueueRunner {
    pub fn new(
        ledger: Arc<dyn JobLedger>,
        registry: HandlerRegistry,
        settings: &QueueSettings,
        log: LogContext,
    ) -> Self {
        Self {
            ledger,
            registry,
            retry_policy: RetryPolicy::new(settings),
            workers: settings.workers.max(1),
            poll_interval: Duration::from_millis(settings.poll_interval_ms),
            job_timeout: Duration::from_secs(settings.job_timeout_secs),
            stale_threshold_secs: settings.stale_in_progress_threshold_secs as i64,
            log,
        }
    }

    /// Run workers and maintenance until the shutdown token is cancelled.
    ///
    /// In-flight jobs finish their current attempt before their worker exits.
    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) {
        let span = self.log.span().clone();
        async move {
            info!(
                "Queue runner starting (workers={}, poll_interval={:?}, job_timeout={:?})",
                self.workers, self.poll_interval, self.job_timeout
            );

            let mut tasks = JoinSet::new();
            for worker in 0..self.workers {
                let runner = self.clone();
                let token = shutdown.clone();
                tasks.spawn(
                    async move { runner.worker_loop(worker, token).await }
                        .instrument(self.log.span().clone()),
                );
            }
            {
                let runner = self.clone();
                let token = shutdown.clone();
                tasks.spawn(
                    async move { runner.maintenance_loop(token).await }
                        .instrument(self.log.span().clone()),
                );
            }

            while let Some(result) = tasks.join_next().await {
                if let Err(e) = result {
                    error!("Queue runner task panicked: {}", e);
                }
            }

            info!("Queue runner stopped");
        }
        .instrument(span)
        .await
    }

    async fn worker_loop(&self, worker: usize, shutdown: CancellationToken) {
        debug!("Worker {} started", worker);
        while !shutdown.is_cancelled() {
            match self.process_next().await {
                Ok(true) => continue,
                Ok(false) => {}
                Err(e) => error!("Worker {} failed to process job: {:#}", worker, e),
            }

            tokio::select! {
                _ = tokio::time::sleep(self.poll_interval) => {}
                _ = shutdown.cancelled() => break,
            }
        }
        debug!("Worker {} stopped", worker);
    }

    async fn maintenance_loop(&self, shutdown: CancellationToken) {
        loop {
            if let Err(e) = self.run_maintenance() {
                error!("Queue maintenance failed: {:#}", e);
            }

            tokio::select! {
                _ = tokio::time::sleep(self.poll_interval) => {}
                _ = shutdown.cancelled() => break,
            }
        }
    }

    /// Promote due retries, re-queue jobs abandoned by a crashed worker and
    /// retry terminal-failure handling of dead jobs not yet reconciled.
    pub fn run_maintenance(&self) -> Result<()> {
        let promoted = self.ledger.promote_retry_ready()?;
        if promoted > 0 {
            debug!("Promoted {} jobs from retry waiting", promoted);
        }

        let requeued = self.ledger.requeue_stale(self.stale_threshold_secs)?;
        if requeued > 0 {
            warn!("Re-queued {} stale in-progress jobs", requeued);
        }

        let mut reconciled = 0;
        for job in self.ledger.get_unreconciled_dead(RECONCILE_BATCH)? {
            let failure = JobFailure::permanent(job.last_error.clone().unwrap_or_default());
            if self.reconcile(&job, &failure) {
                reconciled += 1;
            }
        }
        if reconciled > 0 {
            info!("Reconciled {} dead jobs", reconciled);
        }
        Ok(())
    }

    /// Run the terminal-failure handlers of a dead job. Returns true once the
    /// job is recorded as reconciled.
    fn reconcile(&self, job: &QueuedJob, failure: &JobFailure) -> bool {
        if let Err(e) = self.registry.notify_exhausted(job, failure) {
            warn!(
                "Terminal failure handling of job {} failed, retrying on next maintenance: {:#}",
                job.id, e
            );
            return false;
        }

        match self.ledger.mark_reconciled(&job.id) {
            Ok(()) => true,
            Err(e) => {
                error!("Failed to mark job {} as reconciled: {:#}", job.id, e);
                false
            }
        }
    }

    /// Claim and process one job. Returns false if the queue had nothing pending.
    pub async fn process_next(&self) -> Result<bool> {
        let Some(job) = self.ledger.claim_next()? else {
            return Ok(false);
        };

        let span = tracing::info_span!(
            "job",
            id = %job.id,
            kind = %job.kind,
            attempt = job.retry_count + 1
        );
        let outcome = self.dispatch(&job).instrument(span.clone()).await;
        span.in_scope(|| self.record_outcome(&job, outcome))?;
        Ok(true)
    }

    /// Process jobs until none is pending. Returns the number processed.
    pub async fn drain(&self) -> Result<usize> {
        let mut processed = 0;
        while self.process_next().await? {
            processed += 1;
        }
        Ok(processed)
    }

    async fn dispatch(&self, job: &QueuedJob) -> Result<(), JobFailure> {
        let Some(handler) = self.registry.handler(job.kind) else {
            return Err(JobFailure::permanent(format!(
                "No handler registered for {} jobs",
                job.kind
            )));
        };

        match tokio::time::timeout(self.job_timeout, handler.handle(job)).await {
            Ok(result) => result,
            Err(_) => Err(JobFailure::retryable(format!(
                "Job timed out after {:?}",
                self.job_timeout
            ))),
        }
    }

    fn record_outcome(&self, job: &QueuedJob, outcome: Result<(), JobFailure>) -> Result<()> {
        let failure = match outcome {
            Ok(()) => {
                self.ledger.mark_completed(&job.id)?;
                debug!("Job completed");
                return Ok(());
            }
            Err(failure) => failure,
        };

        if self.retry_policy.should_retry(&failure, job) {
            let next_retry_at = self.retry_policy.next_retry_at(job.retry_count);
            warn!(
                "Job failed (retry {}/{}), next attempt in {}s: {}",
                job.retry_count + 1,
                job.max_retries,
                self.retry_policy.backoff_secs(job.retry_count),
                failure
            );
            self.ledger
                .mark_retry_waiting(&job.id, next_retry_at, &failure.message)?;
            return Ok(());
        }

        if self.ledger.mark_dead(&job.id, &failure.message)? {
            error!(
                "Job exhausted after {} retries: {}",
                job.retry_count, failure
            );
            self.reconcile(job, &failure);
        }
        Ok(())
    }
}
