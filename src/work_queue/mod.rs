//! Durable work queue.
//!
//! At-least-once, multi-priority job queue with a per-job retry budget,
//! exponential backoff and a terminal-failure callback.

mod models;
mod queue_store;
mod retry_policy;
mod runner;
mod schema;

pub use models::*;
pub use queue_store::{JobLedger, SqliteWorkQueue, WorkQueue, DEFAULT_SECONDS_PER_JOB};
pub use retry_policy::RetryPolicy;
pub use runner::{HandlerRegistry, JobHandler, QueueRunner, TerminalFailureHandler};
pub use schema::WORK_QUEUE_VERSIONED_SCHEMAS;
