use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum KvError {
    #[error("key not found")]
    NotFound,
    #[error("timeout talking to the keyed store")]
    Timeout,
    #[error(transparent)]
    Redis(#[from] Arc<redis::RedisError>),
}

impl From<redis::RedisError> for KvError {
    fn from(err: redis::RedisError) -> Self {
        if err.is_timeout() {
            KvError::Timeout
        } else {
            KvError::Redis(Arc::new(err))
        }
    }
}

/// A shared low-latency keyed store with TTLs.
///
/// This is the only coordination state in the system: session windows and
/// identify locks live here. `set_nx_ex` is the single-flight primitive,
/// `setex` the sliding-window refresh. Values are plain utf8 strings.
#[async_trait]
pub trait Client: Send + Sync {
    async fn get(&self, k: String) -> Result<String, KvError>;
    /// Set with a TTL, overwriting any existing value.
    async fn setex(&self, k: String, v: String, seconds: u64) -> Result<(), KvError>;
    /// Set with a TTL only if the key is absent; returns whether it was set.
    async fn set_nx_ex(&self, k: String, v: String, seconds: u64) -> Result<bool, KvError>;
    async fn del(&self, k: String) -> Result<(), KvError>;
}

mod client;
mod memory;

pub use client::RedisClient;
pub use memory::MemoryKvClient;
