use lazy_static::lazy_static;
use prometheus::{Encoder, IntCounter, IntCounterVec, Opts, Registry, TextEncoder};

lazy_static! {
    pub static ref REGISTRY: Registry = Registry::new();

    // Ledger metrics
    pub static ref OPERATIONS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("ledger_operations_total", "Committed ledger operations by type"),
        &["type"]
    ).expect("metric can be created");

    pub static ref REJECTIONS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("ledger_rejections_total", "Rejected balance mutations by reason"),
        &["reason"]
    ).expect("metric can be created");

    // Redis cache metrics
    pub static ref CACHE_HITS: IntCounter = IntCounter::new(
        "balance_cache_hits_total",
        "Total balance cache hits"
    ).expect("metric can be created");

    pub static ref CACHE_MISSES: IntCounter = IntCounter::new(
        "balance_cache_misses_total",
        "Total balance cache misses"
    ).expect("metric can be created");

    pub static ref CACHE_WRITE_FAILURES: IntCounter = IntCounter::new(
        "balance_cache_write_failures_total",
        "Balance cache writes that failed after commit"
    ).expect("metric can be created");

    // NATS metrics
    pub static ref NOTIFICATIONS_PUBLISHED: IntCounterVec = IntCounterVec::new(
        Opts::new("notifications_published_total", "Notifications published by type and status"),
        &["type", "status"]
    ).expect("metric can be created");
}

/// Register all metrics with the given registry
pub fn register_metrics(registry: &Registry) -> Result<(), prometheus::Error> {
    registry.register(Box::new(OPERATIONS_TOTAL.clone()))?;
    registry.register(Box::new(REJECTIONS_TOTAL.clone()))?;
    registry.register(Box::new(CACHE_HITS.clone()))?;
    registry.register(Box::new(CACHE_MISSES.clone()))?;
    registry.register(Box::new(CACHE_WRITE_FAILURES.clone()))?;
    registry.register(Box::new(NOTIFICATIONS_PUBLISHED.clone()))?;
    Ok(())
}

/// Text exposition of the process registry
pub fn metrics_handler() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    encoder.encode(&REGISTRY.gather(), &mut buffer)?;
    String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
}

pub fn record_operation(kind: &str) {
    OPERATIONS_TOTAL.with_label_values(&[kind]).inc();
}

pub fn record_rejection(reason: &str) {
    REJECTIONS_TOTAL.with_label_values(&[reason]).inc();
}

pub fn record_notification(kind: &str, ok: bool) {
    let status = if ok { "ok" } else { "error" };
    NOTIFICATIONS_PUBLISHED.with_label_values(&[kind, status]).inc();
}
