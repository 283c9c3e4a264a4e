//! Configuration for the verification pipeline

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// AWS regions where the mail provider offers a sending endpoint.
pub const SUPPORTED_REGIONS: &[&str] = &[
    "us-east-1",
    "us-east-2",
    "us-west-2",
    "af-south-1",
    "ap-northeast-1",
    "ap-northeast-2",
    "ap-northeast-3",
    "ap-south-1",
    "ap-southeast-1",
    "ap-southeast-2",
    "ap-southeast-3",
    "ca-central-1",
    "eu-central-1",
    "eu-north-1",
    "eu-south-1",
    "eu-west-1",
    "eu-west-2",
    "eu-west-3",
    "il-central-1",
    "me-south-1",
    "sa-east-1",
];

/// Tuning knobs for verification polling.
///
/// Each phase gets an absolute deadline (`now + ttl`) computed once when
/// the phase starts, and a fixed tick interval that is independent of
/// the deadline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationConfig {
    /// How long the DNS phase may run before the domain fails.
    pub dns_ttl: Duration,
    /// How often DNS records are re-checked.
    pub dns_poll_interval: Duration,
    /// How long the provider phase may run before the domain fails.
    pub provider_ttl: Duration,
    /// How often provider signals are re-checked.
    pub provider_poll_interval: Duration,
    /// Prefix for generated DKIM selectors.
    pub selector_prefix: String,
}

impl Default for VerificationConfig {
    fn default() -> Self {
        Self {
            dns_ttl: Duration::from_secs(30 * 60),
            dns_poll_interval: Duration::from_secs(3 * 60),
            provider_ttl: Duration::from_secs(30 * 60),
            provider_poll_interval: Duration::from_secs(2 * 60),
            selector_prefix: "mailroom".to_string(),
        }
    }
}
