use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use chrono::prelude::*;
use sqlx::postgres::{PgPool, PgPoolOptions};

use crate::{Enqueue, EnqueueOptions, QueueError};

/// Enumeration of possible statuses for a Job.
/// Available: waiting in the queue to be picked up by a worker.
/// Running: picked up by a worker and currently being run.
/// Completed: successfully completed by a worker.
/// Failed: unsuccessfully completed by a worker, retries exhausted.
#[derive(Debug, PartialEq, sqlx::Type)]
#[sqlx(type_name = "job_status")]
#[sqlx(rename_all = "lowercase")]
pub enum JobStatus {
    Available,
    Running,
    Completed,
    Failed,
}

impl FromStr for JobStatus {
    type Err = QueueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "available" => Ok(JobStatus::Available),
            "running" => Ok(JobStatus::Running),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            invalid => Err(QueueError::ParseJobStatusError(invalid.to_owned())),
        }
    }
}

/// A dequeued job, owned by one worker until completed, retried or failed.
#[derive(Debug, sqlx::FromRow)]
pub struct Job {
    pub id: i64,
    pub queue: String,
    pub attempt: i32,
    pub created_at: DateTime<Utc>,
    pub scheduled_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub payload: sqlx::types::Json<serde_json::Value>,
}

/// A queue implemented on top of a PostgreSQL table.
pub struct PgQueue {
    table: String,
    pool: PgPool,
}

pub type PgQueueResult<T> = std::result::Result<T, QueueError>;

impl PgQueue {
    /// Initialize a new PgQueue backed by table in PostgreSQL.
    pub async fn new(table: &str, url: &str) -> PgQueueResult<Self> {
        let table = table.to_owned();
        let pool = PgPoolOptions::new()
            .connect(url)
            .await
            .map_err(|error| QueueError::ConnectionError { error })?;

        Ok(Self { table, pool })
    }

    pub fn from_pool(table: &str, pool: PgPool) -> Self {
        Self {
            table: table.to_owned(),
            pool,
        }
    }

    /// Dequeue the next due job from one named queue, if any.
    pub async fn dequeue(&self, queue: &str) -> PgQueueResult<Option<Job>> {
        // The SKIP LOCKED CTE keeps concurrent workers from double-claiming
        // a job without serializing the whole table.
        let base_query = format!(
            r#"
WITH available_in_queue AS (
    SELECT
        id
    FROM
        "{0}"
    WHERE
        status = 'available'
        AND queue = $1
        AND scheduled_at <= NOW()
    ORDER BY
        id
    LIMIT 1
    FOR UPDATE SKIP LOCKED
)
UPDATE
    "{0}"
SET
    started_at = NOW(),
    status = 'running'::job_status,
    attempt = "{0}".attempt + 1
FROM
    available_in_queue
WHERE
    "{0}".id = available_in_queue.id
RETURNING
    "{0}".id,
    "{0}".queue,
    "{0}".attempt,
    "{0}".created_at,
    "{0}".scheduled_at,
    "{0}".started_at,
    "{0}".payload
            "#,
            &self.table
        );

        let item: Option<Job> = sqlx::query_as(&base_query)
            .bind(queue)
            .fetch_optional(&self.pool)
            .await
            .map_err(|error| QueueError::QueryError {
                command: "UPDATE".to_owned(),
                error,
            })?;

        Ok(item)
    }

    /// Mark a job as successfully completed.
    pub async fn complete(&self, job_id: i64) -> PgQueueResult<()> {
        let base_query = format!(
            r#"
UPDATE "{0}"
SET status = 'completed'::job_status, finished_at = NOW()
WHERE id = $1
            "#,
            &self.table
        );

        sqlx::query(&base_query)
            .bind(job_id)
            .execute(&self.pool)
            .await
            .map_err(|error| QueueError::QueryError {
                command: "UPDATE".to_owned(),
                error,
            })?;

        Ok(())
    }

    /// Return a job to the queue after a transient failure, backing off.
    pub async fn retry(&self, job_id: i64, backoff: Duration, error: &str) -> PgQueueResult<()> {
        let base_query = format!(
            r#"
UPDATE "{0}"
SET status = 'available'::job_status,
    scheduled_at = NOW() + make_interval(secs => $2),
    last_error = $3
WHERE id = $1
            "#,
            &self.table
        );

        sqlx::query(&base_query)
            .bind(job_id)
            .bind(backoff.as_secs_f64())
            .bind(error)
            .execute(&self.pool)
            .await
            .map_err(|error| QueueError::QueryError {
                command: "UPDATE".to_owned(),
                error,
            })?;

        Ok(())
    }

    /// Mark a job as permanently failed, recording the final error for
    /// operators. Terminal: the job will never run again.
    pub async fn fail(&self, job_id: i64, error: &str) -> PgQueueResult<()> {
        let base_query = format!(
            r#"
UPDATE "{0}"
SET status = 'failed'::job_status, finished_at = NOW(), last_error = $2
WHERE id = $1
            "#,
            &self.table
        );

        sqlx::query(&base_query)
            .bind(job_id)
            .bind(error)
            .execute(&self.pool)
            .await
            .map_err(|error| QueueError::QueryError {
                command: "UPDATE".to_owned(),
                error,
            })?;

        Ok(())
    }

    /// Delete completed and failed rows older than `retention`, so the
    /// table does not grow without bound. Run periodically.
    pub async fn delete_settled(&self, retention: Duration) -> PgQueueResult<u64> {
        let base_query = format!(
            r#"
DELETE FROM "{0}"
WHERE status IN ('completed', 'failed')
    AND finished_at < NOW() - make_interval(secs => $1)
            "#,
            &self.table
        );

        let result = sqlx::query(&base_query)
            .bind(retention.as_secs_f64())
            .execute(&self.pool)
            .await
            .map_err(|error| QueueError::QueryError {
                command: "DELETE".to_owned(),
                error,
            })?;

        Ok(result.rows_affected())
    }

    /// Return jobs stuck `running` longer than `stall_timeout` to the queue.
    /// Covers workers that died holding a job; run periodically.
    pub async fn sweep_stalled(&self, stall_timeout: Duration) -> PgQueueResult<u64> {
        let base_query = format!(
            r#"
UPDATE "{0}"
SET status = 'available'::job_status
WHERE status = 'running' AND started_at < NOW() - make_interval(secs => $1)
            "#,
            &self.table
        );

        let result = sqlx::query(&base_query)
            .bind(stall_timeout.as_secs_f64())
            .execute(&self.pool)
            .await
            .map_err(|error| QueueError::QueryError {
                command: "UPDATE".to_owned(),
                error,
            })?;

        Ok(result.rows_affected())
    }
}

#[async_trait]
impl Enqueue for PgQueue {
    /// Enqueue a job. A duplicate dedup key on the same queue makes this a
    /// no-op, which is what collapses retriggered merges and redelivered
    /// event inserts. The dedup index is partial over queued and running
    /// rows, so a settled job releases its key and the same work can be
    /// triggered again later.
    async fn enqueue(
        &self,
        queue: &str,
        payload: serde_json::Value,
        options: EnqueueOptions,
    ) -> Result<(), QueueError> {
        let base_query = format!(
            r#"
INSERT INTO "{0}"
    (queue, dedup_key, status, attempt, created_at, scheduled_at, payload)
VALUES
    ($1, $2, 'available'::job_status, 0, NOW(), NOW() + make_interval(secs => $3), $4)
ON CONFLICT (queue, dedup_key) WHERE status IN ('available', 'running') DO NOTHING
            "#,
            &self.table
        );

        let delay = options.delay.unwrap_or(Duration::ZERO);

        sqlx::query(&base_query)
            .bind(queue)
            .bind(&options.dedup_key)
            .bind(delay.as_secs_f64())
            .bind(sqlx::types::Json(&payload))
            .execute(&self.pool)
            .await
            .map_err(|error| QueueError::QueryError {
                command: "INSERT".to_owned(),
                error,
            })?;

        Ok(())
    }
}
