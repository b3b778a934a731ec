use super::BalanceCache;
use crate::errors::{EngineError, Result};
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
struct Entry {
    value: String,
    expires_at: Instant,
}

/// Process-local cache with the same expiry semantics as Redis
#[derive(Debug, Default)]
pub struct InMemoryBalanceCache {
    entries: DashMap<String, Entry>,
    unavailable: AtomicBool,
}

impl InMemoryBalanceCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every call fail, as if the cache server were down
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Drop a key without waiting for expiry
    pub fn evict(&self, key: &str) {
        self.entries.remove(key);
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn check_available(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(EngineError::Internal("cache unavailable".to_string()));
        }
        Ok(())
    }

    fn live_value(&self, key: &str) -> Option<String> {
        let now = Instant::now();
        let value = self.entries.get(key).and_then(|entry| {
            if entry.expires_at > now {
                Some(entry.value.clone())
            } else {
                None
            }
        });

        if value.is_none() {
            self.entries.remove_if(key, |_, entry| entry.expires_at <= now);
        }
        value
    }
}

#[async_trait]
impl BalanceCache for InMemoryBalanceCache {
    async fn exists(&self, key: &str) -> Result<bool> {
        self.check_available()?;
        Ok(self.live_value(key).is_some())
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        self.check_available()?;
        Ok(self.live_value(key))
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        self.check_available()?;
        self.entries.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(())
    }
}
