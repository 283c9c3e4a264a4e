//! Error types for the domain verification pipeline

use mailroom_core::{NotificationError, QueueError};
use thiserror::Error;

use crate::models::DomainStatus;

#[derive(Error, Debug)]
pub enum DomainError {
    #[error("Key generation error: {0}")]
    KeyGeneration(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Domain not found: {0}")]
    DomainNotFound(i32),

    #[error("Record not found: {0}")]
    RecordNotFound(i32),

    #[error("Invalid status transition from {from} to {to}")]
    InvalidTransition {
        from: DomainStatus,
        to: DomainStatus,
    },

    #[error("Repository error: {0}")]
    Repository(String),

    #[error("Provider error: {0}")]
    Provider(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("Notification error: {0}")]
    Notification(#[from] NotificationError),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for DomainError {
    fn from(err: serde_json::Error) -> Self {
        DomainError::Serialization(err.to_string())
    }
}
