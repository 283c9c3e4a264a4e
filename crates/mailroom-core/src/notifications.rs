use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;

use crate::UtcDateTime;

#[derive(Error, Debug)]
pub enum NotificationError {
    #[error("Failed to deliver notification: {0}")]
    Delivery(String),

    #[error("Notification sink not configured")]
    NotConfigured,
}

/// Kinds of domain lifecycle events surfaced to tenants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DomainEventKind {
    /// All verification signals succeeded; the domain can send mail.
    DomainVerified,
    /// Verification ended in failure (TTL expiry or a provider failure
    /// signal).
    DomainVerificationFailed,
    /// Another team proved ownership of the same name; this team's domain was
    /// revoked.
    DomainOwnershipTransferred,
}

impl fmt::Display for DomainEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DomainEventKind::DomainVerified => write!(f, "domain_verified"),
            DomainEventKind::DomainVerificationFailed => {
                write!(f, "domain_verification_failed")
            }
            DomainEventKind::DomainOwnershipTransferred => {
                write!(f, "domain_ownership_transferred")
            }
        }
    }
}

/// Event payload handed to the notification sink.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DomainNotification {
    pub id: String,
    pub event: DomainEventKind,
    pub domain_id: i32,
    pub domain_name: String,
    pub message: String,
    pub timestamp: UtcDateTime,
    pub metadata: HashMap<String, String>,
}

impl DomainNotification {
    pub fn new(
        event: DomainEventKind,
        domain_id: i32,
        domain_name: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            event,
            domain_id,
            domain_name: domain_name.into(),
            message: message.into(),
            timestamp: chrono::Utc::now(),
            metadata: HashMap::new(),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// Delivery channel for tenant-facing notifications. Implementations fan out
/// to email/webhooks/etc.; the pipeline only depends on this seam.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn notify(
        &self,
        team_id: i32,
        notification: DomainNotification,
    ) -> Result<(), NotificationError>;
}

/// In-memory sink for tests. Clones share the same delivered list.
#[derive(Debug, Clone, Default)]
pub struct RecordingNotificationSink {
    delivered: Arc<Mutex<Vec<(i32, DomainNotification)>>>,
    fail_delivery: Arc<AtomicBool>,
}

impl RecordingNotificationSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every notify call fails, for exercising callers that must
    /// survive delivery outages.
    pub fn with_delivery_failure(self) -> Self {
        self.fail_delivery.store(true, Ordering::SeqCst);
        self
    }

    pub fn delivered(&self) -> Vec<(i32, DomainNotification)> {
        self.lock().clone()
    }

    /// (team_id, event kind) pairs in delivery order.
    pub fn events(&self) -> Vec<(i32, DomainEventKind)> {
        self.lock().iter().map(|(team, n)| (*team, n.event)).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<(i32, DomainNotification)>> {
        self.delivered
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl NotificationSink for RecordingNotificationSink {
    async fn notify(
        &self,
        team_id: i32,
        notification: DomainNotification,
    ) -> Result<(), NotificationError> {
        if self.fail_delivery.load(Ordering::SeqCst) {
            return Err(NotificationError::Delivery(
                "simulated delivery failure".to_string(),
            ));
        }
        self.lock().push((team_id, notification));
        Ok(())
    }
}
