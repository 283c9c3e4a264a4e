//! Verification job scheduling

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use mailroom_core::{Job, JobQueue, JobType, UtcDateTime, VerifyDnsJob, VerifyProviderJob};
use tracing::{debug, info};

use crate::config::VerificationConfig;
use crate::errors::DomainError;

/// Schedules the repeating, deadline-bounded verification jobs.
///
/// The dedupe key is deterministic per (phase, domain), so scheduling a
/// phase again replaces the previous schedule instead of stacking a
/// second one. The absolute deadline is computed once per phase start
/// and travels inside the job payload, so it survives worker restarts.
pub struct VerificationScheduler {
    queue: Arc<dyn JobQueue>,
    config: VerificationConfig,
}

impl VerificationScheduler {
    pub fn new(queue: Arc<dyn JobQueue>, config: VerificationConfig) -> Self {
        Self { queue, config }
    }

    pub fn dns_dedupe_key(domain_id: i32) -> String {
        format!("verify_dns:{}", domain_id)
    }

    pub fn provider_dedupe_key(domain_id: i32) -> String {
        format!("verify_provider:{}", domain_id)
    }

    /// Start (or restart) DNS polling for a domain. Returns the deadline.
    pub async fn schedule_dns_phase(&self, domain_id: i32) -> Result<UtcDateTime, DomainError> {
        let deadline = self.deadline_after(self.config.dns_ttl)?;
        let job = Job::VerifyDns(VerifyDnsJob {
            domain_id,
            deadline,
        });

        self.queue
            .enqueue_repeatable(
                job,
                &Self::dns_dedupe_key(domain_id),
                self.config.dns_poll_interval,
            )
            .await?;

        info!(
            "Scheduled DNS verification for domain {} with deadline {}",
            domain_id, deadline
        );
        Ok(deadline)
    }

    /// Start provider polling for a domain with a fresh deadline.
    pub async fn schedule_provider_phase(
        &self,
        domain_id: i32,
    ) -> Result<UtcDateTime, DomainError> {
        let deadline = self.deadline_after(self.config.provider_ttl)?;
        let job = Job::VerifyProvider(VerifyProviderJob {
            domain_id,
            deadline,
        });

        self.queue
            .enqueue_repeatable(
                job,
                &Self::provider_dedupe_key(domain_id),
                self.config.provider_poll_interval,
            )
            .await?;

        info!(
            "Scheduled provider verification for domain {} with deadline {}",
            domain_id, deadline
        );
        Ok(deadline)
    }

    pub async fn cancel_dns_phase(&self, domain_id: i32) -> Result<(), DomainError> {
        debug!("Cancelling DNS verification schedule for domain {}", domain_id);
        self.queue
            .cancel_repeatable(JobType::VerifyDns, &Self::dns_dedupe_key(domain_id))
            .await?;
        Ok(())
    }

    pub async fn cancel_provider_phase(&self, domain_id: i32) -> Result<(), DomainError> {
        debug!(
            "Cancelling provider verification schedule for domain {}",
            domain_id
        );
        self.queue
            .cancel_repeatable(JobType::VerifyProvider, &Self::provider_dedupe_key(domain_id))
            .await?;
        Ok(())
    }

    /// Cancel one phase by job type, used when a job gets parked.
    pub async fn cancel_for(&self, job_type: JobType, domain_id: i32) -> Result<(), DomainError> {
        match job_type {
            JobType::VerifyDns => self.cancel_dns_phase(domain_id).await,
            JobType::VerifyProvider => self.cancel_provider_phase(domain_id).await,
        }
    }

    /// Cancel both phases, used on domain deletion.
    pub async fn cancel_all(&self, domain_id: i32) -> Result<(), DomainError> {
        self.cancel_dns_phase(domain_id).await?;
        self.cancel_provider_phase(domain_id).await?;
        Ok(())
    }

    fn deadline_after(&self, ttl: Duration) -> Result<UtcDateTime, DomainError> {
        let ttl = chrono::Duration::from_std(ttl).map_err(|e| {
            DomainError::Configuration(format!("Verification TTL out of range: {}", e))
        })?;
        Ok(Utc::now() + ttl)
    }
}
