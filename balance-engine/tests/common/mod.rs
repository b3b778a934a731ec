//! Shared in-memory wiring for engine integration tests

#![allow(dead_code)]

use balance_engine::cache::InMemoryBalanceCache;
use balance_engine::notifier::RecordingNotifier;
use balance_engine::services::{DEFAULT_BALANCE_TTL, DEFAULT_HISTORY_LIMIT};
use balance_engine::store::InMemoryLedgerStore;
use balance_engine::{Services, ServicesDependencies};
use std::sync::Arc;

pub struct TestEnvironment {
    pub store: Arc<InMemoryLedgerStore>,
    pub cache: Arc<InMemoryBalanceCache>,
    pub notifier: Arc<RecordingNotifier>,
    pub services: Services,
}

impl TestEnvironment {
    pub fn new() -> Self {
        let store = Arc::new(InMemoryLedgerStore::new());
        let cache = Arc::new(InMemoryBalanceCache::new());
        let notifier = Arc::new(RecordingNotifier::new());

        let services = Services::new(ServicesDependencies {
            store: store.clone(),
            cache: cache.clone(),
            notifier: notifier.clone(),
            balance_ttl: DEFAULT_BALANCE_TTL,
            history_page_limit: DEFAULT_HISTORY_LIMIT,
        });

        TestEnvironment {
            store,
            cache,
            notifier,
            services,
        }
    }
}
