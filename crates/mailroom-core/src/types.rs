//! Custom types for common data structures

use chrono::{DateTime as ChronoDateTime, Utc};

/// Standard UTC DateTime type used across all Mailroom crates
///
/// This is the canonical datetime type for:
/// - Lifecycle timestamps on domains and DNS records
/// - Absolute verification deadlines carried inside job payloads
///
/// # Example
/// ```rust
/// use mailroom_core::UtcDateTime;
/// use serde::Serialize;
///
/// #[derive(Serialize)]
/// pub struct Response {
///     pub created_at: UtcDateTime,
/// }
/// ```
pub type UtcDateTime = ChronoDateTime<Utc>;
