use std::time::Duration;

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;
use tokio::time::timeout;

use crate::{Client, KvError};

// Window touches and lock acquisitions sit on the synchronous request path,
// so commands get a short deadline rather than blocking the gateway.
const KV_TIMEOUT: Duration = Duration::from_millis(100);

pub struct RedisClient {
    connection: MultiplexedConnection,
}

impl RedisClient {
    pub async fn new(addr: String) -> Result<RedisClient, KvError> {
        let client = redis::Client::open(addr).map_err(KvError::from)?;
        let connection = client.get_multiplexed_async_connection().await?;

        Ok(RedisClient { connection })
    }
}

#[async_trait]
impl Client for RedisClient {
    async fn get(&self, k: String) -> Result<String, KvError> {
        let mut conn = self.connection.clone();
        let fut = conn.get::<_, Option<String>>(k);
        let result = timeout(KV_TIMEOUT, fut)
            .await
            .map_err(|_| KvError::Timeout)??;

        result.ok_or(KvError::NotFound)
    }

    async fn setex(&self, k: String, v: String, seconds: u64) -> Result<(), KvError> {
        let mut conn = self.connection.clone();
        let fut = conn.set_ex::<_, _, ()>(k, v, seconds);
        timeout(KV_TIMEOUT, fut)
            .await
            .map_err(|_| KvError::Timeout)??;
        Ok(())
    }

    async fn set_nx_ex(&self, k: String, v: String, seconds: u64) -> Result<bool, KvError> {
        let mut conn = self.connection.clone();

        // SET with both NX and EX options, one round trip.
        let cmd = async {
            redis::cmd("SET")
                .arg(&k)
                .arg(&v)
                .arg("EX")
                .arg(seconds)
                .arg("NX")
                .query_async::<_, Option<String>>(&mut conn)
                .await
        };
        let result = timeout(KV_TIMEOUT, cmd)
            .await
            .map_err(|_| KvError::Timeout)??;

        Ok(result.is_some())
    }

    async fn del(&self, k: String) -> Result<(), KvError> {
        let mut conn = self.connection.clone();
        let fut = conn.del::<_, ()>(k);
        timeout(KV_TIMEOUT, fut)
            .await
            .map_err(|_| KvError::Timeout)??;
        Ok(())
    }
}
