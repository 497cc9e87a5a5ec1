use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::{Enqueue, EnqueueOptions, QueueError};

/// A job captured by the in-memory queue, for assertions.
#[derive(Debug, Clone, PartialEq)]
pub struct CapturedJob {
    pub queue: String,
    pub payload: serde_json::Value,
    pub delay: Option<Duration>,
    pub dedup_key: Option<String>,
}

/// In-memory `Enqueue` with the same dedup-collapse semantics as the
/// Postgres queue. Gateway tests assert against what landed here.
pub struct MemoryQueue {
    jobs: Mutex<Vec<CapturedJob>>,
}

impl MemoryQueue {
    pub fn new() -> Self {
        MemoryQueue {
            jobs: Mutex::new(Vec::new()),
        }
    }

    pub fn jobs(&self) -> Vec<CapturedJob> {
        self.lock().clone()
    }

    pub fn jobs_on(&self, queue: &str) -> Vec<CapturedJob> {
        self.lock()
            .iter()
            .filter(|j| j.queue == queue)
            .cloned()
            .collect()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<CapturedJob>> {
        match self.jobs.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl Default for MemoryQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Enqueue for MemoryQueue {
    async fn enqueue(
        &self,
        queue: &str,
        payload: serde_json::Value,
        options: EnqueueOptions,
    ) -> Result<(), QueueError> {
        let mut jobs = self.lock();

        if let Some(key) = &options.dedup_key {
            let duplicate = jobs
                .iter()
                .any(|j| j.queue == queue && j.dedup_key.as_deref() == Some(key));
            if duplicate {
                return Ok(());
            }
        }

        jobs.push(CapturedJob {
            queue: queue.to_owned(),
            payload,
            delay: options.delay,
            dedup_key: options.dedup_key,
        });

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn duplicate_dedup_keys_collapse() {
        let queue = MemoryQueue::new();
        let options = EnqueueOptions {
            delay: None,
            dedup_key: Some("1:2".to_string()),
        };

        queue
            .enqueue("merge", json!({"from": "1"}), options.clone())
            .await
            .unwrap();
        queue
            .enqueue("merge", json!({"from": "1"}), options.clone())
            .await
            .unwrap();
        // Same key on a different queue is a different job.
        queue
            .enqueue("event", json!({"from": "1"}), options)
            .await
            .unwrap();

        assert_eq!(queue.jobs_on("merge").len(), 1);
        assert_eq!(queue.jobs_on("event").len(), 1);
    }
}
