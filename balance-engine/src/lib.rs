//! Balance engine
//!
//! Per-user balances, a hold/confirm/release workflow for funds reserved
//! against product orders, and an append-only operation ledger. Postgres is
//! the source of truth; Redis keeps short-lived balance snapshots and NATS
//! carries post-commit notifications.

pub mod cache;
pub mod config;
pub mod errors;
pub mod handlers;
pub mod metrics;
pub mod models;
pub mod notifier;
pub mod services;
pub mod store;

pub use config::Config;
pub use errors::{EngineError, ErrorKind, Result};
pub use services::{Services, ServicesDependencies};
