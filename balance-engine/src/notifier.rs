//! Post-commit notifications to the message bus
//!
//! Messages are keyed by operation type: the NATS subject is
//! `<prefix>.<operation-type>` and the body is the JSON [`Notification`].

use crate::errors::{EngineError, Result};
use crate::metrics;
use crate::models::{Notification, OperationType};
use async_nats::Client;
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use tracing::{error, info};

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn publish(&self, kind: OperationType, message: &Notification) -> Result<()>;
}

pub struct NatsNotifier {
    client: Client,
    subject_prefix: String,
}

impl NatsNotifier {
    pub async fn connect(url: &str, subject_prefix: &str) -> Result<Self> {
        let client = async_nats::connect(url)
            .await
            .map_err(|e| EngineError::Nats(e.to_string()))?;

        info!("Connected to NATS at {}", url);

        Ok(NatsNotifier {
            client,
            subject_prefix: subject_prefix.to_string(),
        })
    }

    pub fn subject(&self, kind: OperationType) -> String {
        format!("{}.{}", self.subject_prefix, kind)
    }
}

#[async_trait]
impl Notifier for NatsNotifier {
    async fn publish(&self, kind: OperationType, message: &Notification) -> Result<()> {
        let subject = self.subject(kind);
        let payload = serde_json::to_vec(message)?;

        if let Err(e) = self.client.publish(subject.clone(), payload.into()).await {
            metrics::record_notification(kind.as_str(), false);
            error!("Failed to publish {} notification to {}: {}", kind, subject, e);
            return Err(e.into());
        }

        metrics::record_notification(kind.as_str(), true);
        info!(
            "Published {} notification for user {} to subject {}",
            kind, message.user_id, subject
        );

        Ok(())
    }
}

/// Keeps published messages in memory
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<(OperationType, Notification)>>,
    failing: AtomicBool,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject every publish until switched back
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn sent(&self) -> Vec<(OperationType, Notification)> {
        self.sent
            .lock()
            .map(|sent| sent.clone())
            .unwrap_or_default()
    }

    pub fn sent_of(&self, kind: OperationType) -> Vec<Notification> {
        self.sent()
            .into_iter()
            .filter(|(k, _)| *k == kind)
            .map(|(_, message)| message)
            .collect()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn publish(&self, kind: OperationType, message: &Notification) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(EngineError::Nats("bus unavailable".to_string()));
        }

        self.sent
            .lock()
            .map_err(|_| EngineError::Internal("notifier lock poisoned".to_string()))?
            .push((kind, message.clone()));
        Ok(())
    }
}
