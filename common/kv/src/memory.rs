use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;

use crate::{Client, KvError};

/// In-memory stand-in for the keyed store, with real expiry semantics.
///
/// Tests that exercise window TTLs can't sleep out a 30-minute window, so
/// expiry is checked against a virtual clock that `advance` moves forward.
pub struct MemoryKvClient {
    inner: Mutex<Inner>,
}

struct Inner {
    entries: HashMap<String, Entry>,
    /// Virtual offset added to `Instant::now()` when checking expiry.
    skew: Duration,
}

struct Entry {
    value: String,
    expires_at: Instant,
}

impl MemoryKvClient {
    pub fn new() -> Self {
        MemoryKvClient {
            inner: Mutex::new(Inner {
                entries: HashMap::new(),
                skew: Duration::ZERO,
            }),
        }
    }

    /// Move the virtual clock forward.
    pub fn advance(&self, by: Duration) {
        self.lock().skew += by;
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl Default for MemoryKvClient {
    fn default() -> Self {
        Self::new()
    }
}

impl Inner {
    fn now(&self) -> Instant {
        Instant::now() + self.skew
    }

    fn live(&mut self, k: &str) -> Option<&Entry> {
        let now = self.now();
        if let Some(entry) = self.entries.get(k) {
            if entry.expires_at <= now {
                self.entries.remove(k);
                return None;
            }
        }
        self.entries.get(k)
    }
}

#[async_trait]
impl Client for MemoryKvClient {
    async fn get(&self, k: String) -> Result<String, KvError> {
        let mut inner = self.lock();
        inner
            .live(&k)
            .map(|e| e.value.clone())
            .ok_or(KvError::NotFound)
    }

    async fn setex(&self, k: String, v: String, seconds: u64) -> Result<(), KvError> {
        let mut inner = self.lock();
        let expires_at = inner.now() + Duration::from_secs(seconds);
        inner.entries.insert(
            k,
            Entry {
                value: v,
                expires_at,
            },
        );
        Ok(())
    }

    async fn set_nx_ex(&self, k: String, v: String, seconds: u64) -> Result<bool, KvError> {
        let mut inner = self.lock();
        if inner.live(&k).is_some() {
            return Ok(false);
        }
        let expires_at = inner.now() + Duration::from_secs(seconds);
        inner.entries.insert(
            k,
            Entry {
                value: v,
                expires_at,
            },
        );
        Ok(true)
    }

    async fn del(&self, k: String) -> Result<(), KvError> {
        self.lock().entries.remove(&k);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn set_nx_ex_is_first_writer_wins() {
        let kv = MemoryKvClient::new();

        assert!(kv
            .set_nx_ex("lock".to_string(), "a".to_string(), 60)
            .await
            .unwrap());
        assert!(!kv
            .set_nx_ex("lock".to_string(), "b".to_string(), 60)
            .await
            .unwrap());
        assert_eq!(kv.get("lock".to_string()).await.unwrap(), "a");
    }

    #[tokio::test]
    async fn entries_expire_when_the_clock_advances() {
        let kv = MemoryKvClient::new();
        kv.setex("k".to_string(), "v".to_string(), 60).await.unwrap();

        kv.advance(Duration::from_secs(59));
        assert!(kv.get("k".to_string()).await.is_ok());

        kv.advance(Duration::from_secs(2));
        assert!(matches!(
            kv.get("k".to_string()).await,
            Err(KvError::NotFound)
        ));

        // Expired key can be re-acquired.
        assert!(kv
            .set_nx_ex("k".to_string(), "w".to_string(), 60)
            .await
            .unwrap());
    }
}
