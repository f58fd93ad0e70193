use super::QueueStore;
use crate::error::{JobError, Result};
use async_trait::async_trait;
use redis::{AsyncCommands, Client};

/// Redis-backed queue store: LPUSH to head, RPOP from tail, LLEN for depth.
/// RPOP is atomic on the server, which is what makes concurrent workers
/// safe without extra locking.
#[derive(Debug, Clone)]
pub struct RedisStore {
    client: Client,
}

impl RedisStore {
    pub fn new(url: &str) -> Result<Self> {
        let client = Client::open(url).map_err(|e| JobError::Config(e.to_string()))?;
        Ok(Self { client })
    }

    async fn connection(&self) -> Result<redis::aio::Connection> {
        self.client
            .get_async_connection()
            .await
            .map_err(|e| JobError::Store(e.to_string()))
    }
}

#[async_trait]
impl QueueStore for RedisStore {
    async fn push_head(&self, queue: &str, payload: String) -> Result<()> {
        let mut conn = self.connection().await?;
        conn.lpush::<_, _, ()>(queue, payload)
            .await
            .map_err(|e| JobError::Store(e.to_string()))?;
        Ok(())
    }

    async fn pop_tail(&self, queue: &str) -> Result<Option<String>> {
        let mut conn = self.connection().await?;
        conn.rpop(queue, None)
            .await
            .map_err(|e| JobError::Store(e.to_string()))
    }

    async fn len(&self, queue: &str) -> Result<u64> {
        let mut conn = self.connection().await?;
        conn.llen(queue)
            .await
            .map_err(|e| JobError::Store(e.to_string()))
    }

    async fn ping(&self) -> Result<()> {
        let mut conn = self.connection().await?;
        redis::cmd("PING")
            .query_async::<_, String>(&mut conn)
            .await
            .map_err(|e| JobError::Store(e.to_string()))?;
        Ok(())
    }
}
