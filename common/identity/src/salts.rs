use std::sync::Arc;
use std::time::Duration;

use base64::{engine::general_purpose, Engine};
use moka::sync::Cache;
use thiserror::Error;
use tracing::info;

use common_store::{new_salt_material, AppStore, StoreError};
use common_types::SaltId;

#[derive(Debug, Error)]
pub enum SaltError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("stored salt is not 16 base64 bytes")]
    Malformed,
}

/// A decoded salt, ready for hashing.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedSalt {
    pub id: SaltId,
    pub bytes: [u8; 16],
}

/// The two salts the resolver works with. `previous` is what preserves
/// session continuity across a rotation boundary.
#[derive(Debug, Clone)]
pub struct SaltPair {
    pub current: DecodedSalt,
    pub previous: Option<DecodedSalt>,
}

/// In-process cache over the app store's salt table, so the hot path does
/// not hit the store on every request. Entries expire quickly relative to
/// the rotation period; a rotation is picked up within one cache TTL.
pub struct SaltCache {
    cache: Cache<u8, Arc<SaltPair>>,
    store: Arc<dyn AppStore>,
}

const LATEST: u8 = 0;

impl SaltCache {
    pub fn new(store: Arc<dyn AppStore>, ttl: Duration) -> Self {
        let cache = Cache::builder().max_capacity(1).time_to_live(ttl).build();

        SaltCache { cache, store }
    }

    /// The (current, previous) salt pair, creating the very first salt on a
    /// fresh install.
    pub async fn latest(&self) -> Result<Arc<SaltPair>, SaltError> {
        if let Some(pair) = self.cache.get(&LATEST) {
            return Ok(pair);
        }

        let mut salts = self.store.latest_salts(2).await?;
        if salts.is_empty() {
            info!("no hashing salt present, creating the initial one");
            salts = vec![self.store.create_salt(&new_salt_material()).await?];
        }

        let current = decode(&salts[0])?;
        let previous = salts.get(1).map(decode).transpose()?;

        let pair = Arc::new(SaltPair { current, previous });
        self.cache.insert(LATEST, pair.clone());

        Ok(pair)
    }

    /// Drop the cached pair, forcing a re-read on the next request.
    pub fn invalidate(&self) {
        self.cache.invalidate(&LATEST);
    }
}

fn decode(salt: &common_types::Salt) -> Result<DecodedSalt, SaltError> {
    let bytes = general_purpose::STANDARD
        .decode(&salt.salt)
        .map_err(|_| SaltError::Malformed)?;
    let bytes: [u8; 16] = bytes.try_into().map_err(|_| SaltError::Malformed)?;

    Ok(DecodedSalt {
        id: salt.id,
        bytes,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use common_store::MemoryAppStore;

    #[tokio::test]
    async fn bootstraps_a_salt_on_empty_store() {
        let store = Arc::new(MemoryAppStore::new());
        let cache = SaltCache::new(store.clone(), Duration::from_secs(60));

        let pair = cache.latest().await.unwrap();
        assert!(pair.previous.is_none());

        // The bootstrap salt is durable, not cache-local.
        assert_eq!(store.latest_salts(2).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn rotation_is_visible_after_invalidation() {
        let store = Arc::new(MemoryAppStore::new());
        let cache = SaltCache::new(store.clone(), Duration::from_secs(60));

        let first = cache.latest().await.unwrap();

        store.create_salt(&new_salt_material()).await.unwrap();
        // Still the cached pair until the TTL or an invalidation.
        assert_eq!(
            cache.latest().await.unwrap().current,
            first.current
        );

        cache.invalidate();
        let rotated = cache.latest().await.unwrap();
        assert_ne!(rotated.current, first.current);
        assert_eq!(rotated.previous.as_ref(), Some(&first.current));
    }
}
