use std::sync::Arc;
use std::time::Duration;

use tracing::warn;

use common_kv::{Client, KvError};
use common_types::ProjectId;

/// Single-flight lock for explicit identify calls.
///
/// One identify per (project, identifier) may be in flight at a time; a
/// second caller gets `None` and should report a conflict. The TTL bounds
/// how long a crashed holder can block the identifier.
pub struct IdentifyLock {
    kv: Arc<dyn Client>,
    ttl: Duration,
}

impl IdentifyLock {
    pub fn new(kv: Arc<dyn Client>, ttl: Duration) -> Self {
        IdentifyLock { kv, ttl }
    }

    fn key(project_id: ProjectId, identifier: &str) -> String {
        format!("identify-lock:{project_id}:{identifier}")
    }

    /// Try to take the lock. `None` means another identify holds it.
    pub async fn acquire(
        &self,
        project_id: ProjectId,
        identifier: &str,
    ) -> Result<Option<LockGuard>, KvError> {
        let key = Self::key(project_id, identifier);
        let acquired = self
            .kv
            .set_nx_ex(key.clone(), "1".to_string(), self.ttl.as_secs())
            .await?;

        if acquired {
            Ok(Some(LockGuard {
                kv: self.kv.clone(),
                key,
            }))
        } else {
            Ok(None)
        }
    }
}

/// Held lock. Release is explicit; if the holder dies without releasing,
/// the TTL cleans up.
pub struct LockGuard {
    kv: Arc<dyn Client>,
    key: String,
}

impl LockGuard {
    pub async fn release(self) {
        if let Err(e) = self.kv.del(self.key.clone()).await {
            // The TTL will reclaim it, so failing to release is not fatal.
            warn!(key = %self.key, error = %e, "failed to release identify lock");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common_kv::MemoryKvClient;
    use uuid::Uuid;

    #[tokio::test]
    async fn second_acquire_is_refused_until_release() {
        let kv = Arc::new(MemoryKvClient::new());
        let lock = IdentifyLock::new(kv, Duration::from_secs(60));
        let project = Uuid::new_v4();

        let guard = lock.acquire(project, "user@example.com").await.unwrap();
        assert!(guard.is_some());
        assert!(lock.acquire(project, "user@example.com").await.unwrap().is_none());

        // A different identifier is an independent lock.
        assert!(lock.acquire(project, "other@example.com").await.unwrap().is_some());

        guard.unwrap().release().await;
        assert!(lock.acquire(project, "user@example.com").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn ttl_reclaims_a_crashed_holder() {
        let kv = Arc::new(MemoryKvClient::new());
        let lock = IdentifyLock::new(kv.clone(), Duration::from_secs(60));
        let project = Uuid::new_v4();

        let guard = lock.acquire(project, "user@example.com").await.unwrap();
        assert!(guard.is_some());
        drop(guard); // holder dies without releasing

        kv.advance(Duration::from_secs(61));
        assert!(lock.acquire(project, "user@example.com").await.unwrap().is_some());
    }
}
