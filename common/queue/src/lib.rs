//! A durable job queue on a PostgreSQL table.
//!
//! Producers enqueue a JSON payload onto a named queue, optionally delayed
//! and optionally deduplicated by a caller-chosen key. Delivery is
//! at-least-once: a worker that crashes mid-job leaves the row `running`
//! until the stall sweep returns it to `available`.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum QueueError {
    #[error("connection failed with: {error}")]
    ConnectionError { error: sqlx::Error },
    #[error("{command} query failed with: {error}")]
    QueryError {
        command: String,
        error: sqlx::Error,
    },
    #[error("{0} is not a valid JobStatus")]
    ParseJobStatusError(String),
}

/// Options for a single enqueue.
#[derive(Debug, Default, Clone)]
pub struct EnqueueOptions {
    /// Hold the job back for this long before it becomes available.
    pub delay: Option<Duration>,
    /// Collapse duplicate enqueues: while a job with this key is queued or
    /// running, a second enqueue on the same queue is dropped. Settled jobs
    /// release their key.
    pub dedup_key: Option<String>,
}

/// The producer side of the queue. The gateway only ever sees this trait;
/// durability is the queue's problem once enqueue returns.
#[async_trait]
pub trait Enqueue: Send + Sync {
    async fn enqueue(
        &self,
        queue: &str,
        payload: serde_json::Value,
        options: EnqueueOptions,
    ) -> Result<(), QueueError>;
}

mod memory;
mod pgqueue;
mod retry;
mod worker;

pub use memory::{CapturedJob, MemoryQueue};
pub use pgqueue::{Job, JobStatus, PgQueue};
pub use retry::RetryPolicy;
pub use worker::{JobError, JobHandler, Worker};
