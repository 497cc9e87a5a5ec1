use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use metrics::counter;
use thiserror::Error;
use tokio::sync::Semaphore;
use tracing::error;

use crate::{Job, PgQueue, RetryPolicy};

/// How a job run ended, from the queue's point of view.
#[derive(Error, Debug)]
pub enum JobError {
    /// Worth retrying per the queue's backoff policy.
    #[error("transient failure: {0}")]
    Retryable(String),
    /// Retrying would fail the same way; record and move on.
    #[error("permanent failure: {0}")]
    Fatal(String),
}

#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn handle(&self, job: &Job) -> Result<(), JobError>;
}

/// A worker polling one named queue and spawning tasks to process its jobs,
/// up to a fixed number in flight at once.
pub struct Worker {
    queue_name: String,
    queue: Arc<PgQueue>,
    handler: Arc<dyn JobHandler>,
    poll_interval: Duration,
    /// Maximum number of concurrently running jobs. Queues whose handler
    /// mutates one logical row per key run at 1.
    concurrency: usize,
    retry_policy: RetryPolicy,
}

impl Worker {
    pub fn new(
        queue_name: &str,
        queue: Arc<PgQueue>,
        handler: Arc<dyn JobHandler>,
        poll_interval: Duration,
        concurrency: usize,
        retry_policy: RetryPolicy,
    ) -> Self {
        Self {
            queue_name: queue_name.to_owned(),
            queue,
            handler,
            poll_interval,
            concurrency,
            retry_policy,
        }
    }

    /// Wait until a job becomes available in our queue.
    async fn wait_for_job(&self) -> Job {
        let mut interval = tokio::time::interval(self.poll_interval);

        loop {
            interval.tick().await;

            match self.queue.dequeue(&self.queue_name).await {
                Ok(Some(job)) => return job,
                Ok(None) => continue,
                Err(e) => {
                    error!(queue = self.queue_name, "failed to dequeue job: {}", e);
                    continue;
                }
            }
        }
    }

    /// Run forever, processing jobs as they become due.
    pub async fn run(&self) {
        let semaphore = Arc::new(Semaphore::new(self.concurrency));

        loop {
            let permit = semaphore
                .clone()
                .acquire_owned()
                .await
                .expect("semaphore has been closed");

            let job = self.wait_for_job().await;

            let queue = self.queue.clone();
            let queue_name = self.queue_name.clone();
            let handler = self.handler.clone();
            let retry_policy = self.retry_policy;

            tokio::spawn(async move {
                let result = handler.handle(&job).await;
                finish_job(&queue, &queue_name, &job, result, &retry_policy).await;
                drop(permit);
            });
        }
    }
}

async fn finish_job(
    queue: &PgQueue,
    queue_name: &str,
    job: &Job,
    result: Result<(), JobError>,
    retry_policy: &RetryPolicy,
) {
    let outcome = match result {
        Ok(()) => {
            counter!("jobs_completed_total", "queue" => job.queue.clone()).increment(1);
            queue.complete(job.id).await
        }
        Err(JobError::Retryable(message)) => {
            match retry_policy.time_until_next_retry(job.attempt as u32) {
                Some(backoff) => {
                    counter!("jobs_retried_total", "queue" => job.queue.clone()).increment(1);
                    queue.retry(job.id, backoff, &message).await
                }
                None => {
                    counter!("jobs_failed_total", "queue" => job.queue.clone()).increment(1);
                    error!(queue = queue_name, job = job.id, "retries exhausted: {}", message);
                    queue.fail(job.id, &message).await
                }
            }
        }
        Err(JobError::Fatal(message)) => {
            counter!("jobs_failed_total", "queue" => job.queue.clone()).increment(1);
            error!(queue = queue_name, job = job.id, "job failed: {}", message);
            queue.fail(job.id, &message).await
        }
    };

    // Bookkeeping failures leave the job running; the stall sweep will
    // return it to the queue.
    if let Err(e) = outcome {
        error!(queue = queue_name, job = job.id, "failed to settle job: {}", e);
    }
}
