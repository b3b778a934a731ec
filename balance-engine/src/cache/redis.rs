use super::BalanceCache;
use crate::errors::Result;
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use std::time::Duration;
use tracing::info;

/// Redis-backed snapshot cache
#[derive(Clone)]
pub struct RedisBalanceCache {
    redis: ConnectionManager,
}

impl RedisBalanceCache {
    pub async fn connect(url: &str) -> Result<Self> {
        let client = redis::Client::open(url)?;
        let redis = ConnectionManager::new(client).await?;

        info!("Connected to Redis at {}", url);

        Ok(RedisBalanceCache { redis })
    }
}

#[async_trait]
impl BalanceCache for RedisBalanceCache {
    async fn exists(&self, key: &str) -> Result<bool> {
        let exists: bool = self.redis.clone().exists(key).await?;
        Ok(exists)
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        let value: Option<String> = self.redis.clone().get(key).await?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        // SET EX rejects a zero expiry
        let seconds = ttl.as_secs().max(1);
        let _: () = self.redis.clone().set_ex(key, value, seconds).await?;
        Ok(())
    }
}
