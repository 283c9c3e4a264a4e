use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use crate::UtcDateTime;

/// Payload for the repeating DNS-phase verification check of one domain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerifyDnsJob {
    pub domain_id: i32,
    /// Absolute wall-clock deadline for the DNS phase. Carried in the payload
    /// and re-checked on every tick so the timeout survives worker restarts.
    pub deadline: UtcDateTime,
}

/// Payload for the repeating provider-status check of one domain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerifyProviderJob {
    pub domain_id: i32,
    /// Absolute wall-clock deadline for the provider phase, set fresh when
    /// the domain enters `pending_aws`.
    pub deadline: UtcDateTime,
}

/// Core job enum containing all queue-resident job types
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Job {
    VerifyDns(VerifyDnsJob),
    VerifyProvider(VerifyProviderJob),
}

impl Job {
    pub fn job_type(&self) -> JobType {
        match self {
            Job::VerifyDns(_) => JobType::VerifyDns,
            Job::VerifyProvider(_) => JobType::VerifyProvider,
        }
    }

    /// Domain the job belongs to, used for dedupe keys and logging.
    pub fn domain_id(&self) -> i32 {
        match self {
            Job::VerifyDns(job) => job.domain_id,
            Job::VerifyProvider(job) => job.domain_id,
        }
    }
}

impl fmt::Display for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Job::VerifyDns(job) => write!(
                f,
                "VerifyDns(domain_id: {}, deadline: {})",
                job.domain_id,
                job.deadline.to_rfc3339()
            ),
            Job::VerifyProvider(job) => write!(
                f,
                "VerifyProvider(domain_id: {}, deadline: {})",
                job.domain_id,
                job.deadline.to_rfc3339()
            ),
        }
    }
}

/// Discriminant for [`Job`], used together with a dedupe key to identify a
/// scheduled job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    VerifyDns,
    VerifyProvider,
}

impl fmt::Display for JobType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobType::VerifyDns => write!(f, "verify_dns"),
            JobType::VerifyProvider => write!(f, "verify_provider"),
        }
    }
}

// Core queue abstraction - mailroom-queue implements this
use async_trait::async_trait;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum QueueError {
    #[error("Failed to send job: {0}")]
    SendError(String),
    #[error("Failed to receive job: {0}")]
    ReceiveError(String),
    #[error("Queue channel closed")]
    ChannelClosed,
}

/// Core trait for scheduling repeatable, dedupe-keyed jobs.
///
/// A job scheduled under a (job type, dedupe key) pair that is already
/// scheduled replaces the previous schedule instead of duplicating it: this is
/// what makes re-issuing a verification phase idempotent.
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Deliver `job` now and then every `repeat_interval` until cancelled or
    /// replaced.
    async fn enqueue_repeatable(
        &self,
        job: Job,
        dedupe_key: &str,
        repeat_interval: Duration,
    ) -> Result<(), QueueError>;

    /// Stop the repeatable job registered under (job_type, dedupe_key).
    /// Cancelling a key that is not scheduled is a no-op.
    async fn cancel_repeatable(&self, job_type: JobType, dedupe_key: &str)
        -> Result<(), QueueError>;
}

/// Core trait for receiving jobs
#[async_trait]
pub trait JobReceiver: Send {
    /// Receive the next job
    async fn recv(&mut self) -> Result<Job, QueueError>;
}
