//! Core utilities and types shared across all Mailroom crates

pub mod jobs;
pub mod notifications;
pub mod types;

// Re-export commonly used types
pub use jobs::*;
pub use notifications::*;
pub use types::UtcDateTime;

// Re-export external dependencies
pub use async_trait;
pub use chrono;
pub use serde;
pub use serde_json;
pub use thiserror;
pub use tokio;
pub use tracing;
pub use uuid;
