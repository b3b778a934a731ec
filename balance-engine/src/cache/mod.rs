//! Balance snapshot cache
//!
//! The cache is an accelerator only. Every balance-changing transaction
//! re-validates against the store, and snapshots are written only after the
//! owning transaction has committed.

pub mod memory;
pub mod redis;

use crate::errors::Result;
use crate::metrics;
use async_trait::async_trait;
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

pub use self::memory::InMemoryBalanceCache;
pub use self::redis::RedisBalanceCache;

/// Cache key prefix for balance snapshots
pub const BALANCE_KEY_PREFIX: &str = "balance";

pub fn balance_key(user_id: i64) -> String {
    format!("{}:{}", BALANCE_KEY_PREFIX, user_id)
}

/// Key/value cache with per-entry expiry
#[async_trait]
pub trait BalanceCache: Send + Sync {
    async fn exists(&self, key: &str) -> Result<bool>;
    async fn get(&self, key: &str) -> Result<Option<String>>;
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<()>;
}

/// Read-through helper over a [`BalanceCache`]
#[derive(Clone)]
pub struct BalanceSnapshots {
    cache: Arc<dyn BalanceCache>,
    ttl: Duration,
}

impl BalanceSnapshots {
    pub fn new(cache: Arc<dyn BalanceCache>, ttl: Duration) -> Self {
        BalanceSnapshots { cache, ttl }
    }

    /// Cached balance for a user, if one is present and readable.
    ///
    /// Cache failures and undecodable entries count as a miss.
    pub async fn lookup(&self, user_id: i64) -> Option<Decimal> {
        let key = balance_key(user_id);

        match self.cache.exists(&key).await {
            Ok(true) => {}
            Ok(false) => {
                metrics::CACHE_MISSES.inc();
                return None;
            }
            Err(e) => {
                warn!("Balance cache unavailable for user {}: {}", user_id, e);
                metrics::CACHE_MISSES.inc();
                return None;
            }
        }

        match self.cache.get(&key).await {
            Ok(Some(raw)) => match raw.parse::<Decimal>() {
                Ok(balance) => {
                    metrics::CACHE_HITS.inc();
                    debug!("Balance cache hit for user {}", user_id);
                    Some(balance)
                }
                Err(e) => {
                    warn!("Undecodable cached balance for user {}: {}", user_id, e);
                    metrics::CACHE_MISSES.inc();
                    None
                }
            },
            // expired between EXISTS and GET
            Ok(None) => {
                metrics::CACHE_MISSES.inc();
                None
            }
            Err(e) => {
                warn!("Failed to read cached balance for user {}: {}", user_id, e);
                metrics::CACHE_MISSES.inc();
                None
            }
        }
    }

    /// Best-effort snapshot write; failures are logged and swallowed.
    ///
    /// Writes land in completion order, not commit order, so two racing
    /// mutations on one account can leave the older balance cached until the
    /// next write or expiry. A snapshot only ever lets a debit skip its
    /// explicit read; the store decides every debit.
    pub async fn refresh(&self, user_id: i64, balance: Decimal) {
        let key = balance_key(user_id);
        if let Err(e) = self.cache.set(&key, &balance.to_string(), self.ttl).await {
            metrics::CACHE_WRITE_FAILURES.inc();
            warn!("Failed to cache balance for user {}: {}", user_id, e);
        }
    }
}
