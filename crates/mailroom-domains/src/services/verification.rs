//! Background verification tick handlers

use std::sync::Arc;

use chrono::Utc;
use mailroom_core::{
    DomainEventKind, DomainNotification, Job, NotificationSink, VerifyDnsJob, VerifyProviderJob,
};
use tracing::{debug, error, info, warn};

use crate::dns::DnsPoller;
use crate::errors::DomainError;
use crate::models::{Domain, DomainStatus, RecordStatus};
use crate::repository::DomainRepository;
use crate::services::registrar::{ProviderRegistrar, RegistrationOutcome};
use crate::services::scheduler::VerificationScheduler;
use crate::services::transfer::OwnershipTransferResolver;
use crate::services::DomainLifecycle;

const DNS_DEADLINE_MESSAGE: &str = "DNS records were not verified within the allowed time";
const PROVIDER_DEADLINE_MESSAGE: &str =
    "The provider did not confirm the domain within the allowed time";

/// Handles the repeating verification jobs for both phases.
///
/// Each tick is self-contained: it re-reads the domain, re-checks the
/// persisted deadline and either makes progress or leaves the schedule
/// running. Ticks arriving for a domain that has moved on (deleted,
/// failed, already verified) cancel their own schedule and return.
pub struct VerificationService {
    repository: Arc<dyn DomainRepository>,
    poller: DnsPoller,
    scheduler: Arc<VerificationScheduler>,
    lifecycle: Arc<DomainLifecycle>,
    transfer: Arc<OwnershipTransferResolver>,
    registrar: Arc<ProviderRegistrar>,
    notifications: Arc<dyn NotificationSink>,
}

impl VerificationService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        repository: Arc<dyn DomainRepository>,
        poller: DnsPoller,
        scheduler: Arc<VerificationScheduler>,
        lifecycle: Arc<DomainLifecycle>,
        transfer: Arc<OwnershipTransferResolver>,
        registrar: Arc<ProviderRegistrar>,
        notifications: Arc<dyn NotificationSink>,
    ) -> Self {
        Self {
            repository,
            poller,
            scheduler,
            lifecycle,
            transfer,
            registrar,
            notifications,
        }
    }

    pub async fn handle_job(&self, job: Job) -> Result<(), DomainError> {
        match job {
            Job::VerifyDns(job) => self.verify_dns_tick(job).await,
            Job::VerifyProvider(job) => self.verify_provider_tick(job).await,
        }
    }

    /// One DNS-phase tick: poll the domain's records and, once all of
    /// them verify, resolve ownership, register with the provider and
    /// move the domain into the provider phase.
    async fn verify_dns_tick(&self, job: VerifyDnsJob) -> Result<(), DomainError> {
        let Some(domain) = self.repository.get_domain(job.domain_id).await? else {
            debug!(
                "Domain {} no longer exists, cancelling DNS verification",
                job.domain_id
            );
            self.scheduler.cancel_dns_phase(job.domain_id).await?;
            return Ok(());
        };

        if domain.status != DomainStatus::PendingDns {
            debug!(
                "Domain {} is {}, cancelling stale DNS verification job",
                domain.name, domain.status
            );
            self.scheduler.cancel_dns_phase(domain.id).await?;
            return Ok(());
        }

        // Deadline first: partial progress does not extend the phase.
        if Utc::now() > job.deadline {
            warn!("DNS verification deadline expired for {}", domain.name);
            self.scheduler.cancel_dns_phase(domain.id).await?;
            return self.fail_phase(&domain, DNS_DEADLINE_MESSAGE).await;
        }

        let records = self.repository.get_records(domain.id).await?;
        let results = self.poller.check_records(&records).await;

        let now = Utc::now();
        let mut all_verified = !records.is_empty();
        for (record_id, status) in results {
            if status != RecordStatus::Verified {
                all_verified = false;
            }
            self.repository
                .update_record_status(record_id, status, now)
                .await?;
        }

        if !all_verified {
            debug!("Domain {} still has unverified DNS records", domain.name);
            return Ok(());
        }

        info!("All DNS records verified for {}", domain.name);

        // Errors here bubble up to the worker's retry loop; resolve is
        // re-entrant, so a retried tick picks up where this one stopped.
        self.transfer.resolve(&domain).await?;

        match self.registrar.register(&domain).await {
            Ok(registered) => {
                self.scheduler.cancel_dns_phase(domain.id).await?;
                let updated = self
                    .lifecycle
                    .transition(&registered, DomainStatus::PendingAws)
                    .await?;
                self.scheduler.schedule_provider_phase(updated.id).await?;
                Ok(())
            }
            Err(e) => {
                error!("Provider registration failed for {}: {}", domain.name, e);
                self.scheduler.cancel_dns_phase(domain.id).await?;
                self.fail_phase(&domain, &format!("Provider registration failed: {}", e))
                    .await
            }
        }
    }

    /// One provider-phase tick: read the provider's signals and settle
    /// the domain once they are terminal.
    async fn verify_provider_tick(&self, job: VerifyProviderJob) -> Result<(), DomainError> {
        let Some(domain) = self.repository.get_domain(job.domain_id).await? else {
            debug!(
                "Domain {} no longer exists, cancelling provider verification",
                job.domain_id
            );
            self.scheduler.cancel_provider_phase(job.domain_id).await?;
            return Ok(());
        };

        if domain.status != DomainStatus::PendingAws {
            debug!(
                "Domain {} is {}, cancelling stale provider verification job",
                domain.name, domain.status
            );
            self.scheduler.cancel_provider_phase(domain.id).await?;
            return Ok(());
        }

        if Utc::now() > job.deadline {
            warn!(
                "Provider verification deadline expired for {}",
                domain.name
            );
            self.scheduler.cancel_provider_phase(domain.id).await?;
            return self.fail_phase(&domain, PROVIDER_DEADLINE_MESSAGE).await;
        }

        // A failed status read is not a verification failure. Skip the
        // tick and let the schedule try again; the deadline bounds the
        // total wait.
        let outcome = match self.registrar.check_registration(&domain).await {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(
                    "Could not read provider status for {}, will retry: {}",
                    domain.name, e
                );
                return Ok(());
            }
        };

        match outcome {
            RegistrationOutcome::Verified => {
                self.scheduler.cancel_provider_phase(domain.id).await?;
                let verified = self
                    .lifecycle
                    .transition(&domain, DomainStatus::Verified)
                    .await?;
                info!("Domain {} is fully verified", verified.name);
                self.notify_event(
                    &verified,
                    DomainEventKind::DomainVerified,
                    "Domain verified and ready to send",
                )
                .await;
                Ok(())
            }
            RegistrationOutcome::Failed(reason) => {
                self.scheduler.cancel_provider_phase(domain.id).await?;
                self.fail_phase(&domain, &reason).await
            }
            RegistrationOutcome::Pending => {
                debug!("Provider still verifying {}", domain.name);
                Ok(())
            }
        }
    }

    async fn fail_phase(&self, domain: &Domain, reason: &str) -> Result<(), DomainError> {
        let failed = self
            .lifecycle
            .transition(domain, DomainStatus::Failed)
            .await?;
        self.notify_event(&failed, DomainEventKind::DomainVerificationFailed, reason)
            .await;
        Ok(())
    }

    /// Notification delivery failures are logged, never propagated: the
    /// domain's state is already settled by the time we notify.
    async fn notify_event(&self, domain: &Domain, event: DomainEventKind, message: &str) {
        let notification = DomainNotification::new(event, domain.id, &domain.name, message);
        if let Err(e) = self.notifications.notify(domain.team_id, notification).await {
            error!(
                "Failed to notify team {} about {} for {}: {}",
                domain.team_id, event, domain.name, e
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::VerificationConfig;
    use crate::dns::MockDnsResolver;
    use crate::models::NewDomain;
    use crate::planner::plan_records;
    use crate::providers::{MailProvider, MockMailProvider, SignalStatus};
    use crate::repository::InMemoryDomainRepository;
    use mailroom_core::{JobQueue, JobType, RecordingNotificationSink};
    use mailroom_queue::ScheduledJobQueue;

    struct Harness {
        repo: Arc<InMemoryDomainRepository>,
        queue: Arc<ScheduledJobQueue>,
        // Keeps the channel open so ticker sends do not error.
        _receiver: mailroom_queue::ChannelJobReceiver,
        sink: RecordingNotificationSink,
        service: VerificationService,
    }

    fn harness(resolver: MockDnsResolver, provider: MockMailProvider) -> Harness {
        let repo = Arc::new(InMemoryDomainRepository::new());
        let (queue, receiver) = ScheduledJobQueue::create_channel(64);
        let queue = Arc::new(queue);
        let scheduler = Arc::new(VerificationScheduler::new(
            queue.clone(),
            VerificationConfig::default(),
        ));
        let lifecycle = Arc::new(DomainLifecycle::new(repo.clone()));
        let sink = RecordingNotificationSink::new();
        let provider: Arc<dyn MailProvider> = Arc::new(provider);
        let transfer = Arc::new(OwnershipTransferResolver::new(
            repo.clone(),
            provider.clone(),
            scheduler.clone(),
            lifecycle.clone(),
            Arc::new(sink.clone()),
        ));
        let registrar = Arc::new(ProviderRegistrar::new(provider, repo.clone()));
        let service = VerificationService::new(
            repo.clone(),
            DnsPoller::new(Arc::new(resolver)),
            scheduler,
            lifecycle,
            transfer,
            registrar,
            Arc::new(sink.clone()),
        );
        Harness {
            repo,
            queue,
            _receiver: receiver,
            sink,
            service,
        }
    }

    async fn seed_domain(h: &Harness, name: &str) -> Domain {
        let domain = h
            .repo
            .create_domain(NewDomain {
                name: name.to_string(),
                team_id: 1,
                region: "us-east-1".to_string(),
                dkim_selector: "sel".to_string(),
                dkim_public_key: "PUB".to_string(),
                dkim_private_key: "PRIV".to_string(),
            })
            .await
            .unwrap();
        let plan = plan_records(
            &domain.name,
            &domain.dkim_selector,
            &domain.dkim_public_key,
            &domain.region,
        );
        h.repo.create_records(domain.id, &plan).await.unwrap();
        domain
    }

    fn dns_job(domain_id: i32, minutes_from_now: i64) -> VerifyDnsJob {
        VerifyDnsJob {
            domain_id,
            deadline: Utc::now() + chrono::Duration::minutes(minutes_from_now),
        }
    }

    fn provider_job(domain_id: i32, minutes_from_now: i64) -> VerifyProviderJob {
        VerifyProviderJob {
            domain_id,
            deadline: Utc::now() + chrono::Duration::minutes(minutes_from_now),
        }
    }

    // ==================== DNS tick tests ====================

    #[tokio::test]
    async fn test_dns_tick_cancels_job_for_missing_domain() {
        let h = harness(MockDnsResolver::new(), MockMailProvider::new());

        h.queue
            .enqueue_repeatable(
                Job::VerifyDns(dns_job(42, 30)),
                &VerificationScheduler::dns_dedupe_key(42),
                std::time::Duration::from_secs(600),
            )
            .await
            .unwrap();
        assert_eq!(h.queue.scheduled_count(), 1);

        h.service.verify_dns_tick(dns_job(42, 30)).await.unwrap();

        assert_eq!(h.queue.scheduled_count(), 0);
    }

    #[tokio::test]
    async fn test_dns_tick_cancels_stale_job_when_domain_moved_on() {
        let h = harness(MockDnsResolver::new(), MockMailProvider::new());
        let domain = seed_domain(&h, "example.com").await;
        h.repo
            .update_domain_status(domain.id, DomainStatus::Failed)
            .await
            .unwrap();

        h.queue
            .enqueue_repeatable(
                Job::VerifyDns(dns_job(domain.id, 30)),
                &VerificationScheduler::dns_dedupe_key(domain.id),
                std::time::Duration::from_secs(600),
            )
            .await
            .unwrap();

        h.service
            .verify_dns_tick(dns_job(domain.id, 30))
            .await
            .unwrap();

        assert_eq!(h.queue.scheduled_count(), 0);
        let unchanged = h.repo.get_domain(domain.id).await.unwrap().unwrap();
        assert_eq!(unchanged.status, DomainStatus::Failed);
    }

    #[tokio::test]
    async fn test_dns_tick_deadline_expiry_fails_before_polling() {
        // The resolver would verify every record, but the deadline has
        // already passed: partial progress must not extend the phase.
        let resolver = MockDnsResolver::new().with_plan(&plan_records(
            "example.com",
            "sel",
            "PUB",
            "us-east-1",
        ));
        let h = harness(resolver, MockMailProvider::new());
        let domain = seed_domain(&h, "example.com").await;

        h.service
            .verify_dns_tick(dns_job(domain.id, -1))
            .await
            .unwrap();

        let failed = h.repo.get_domain(domain.id).await.unwrap().unwrap();
        assert_eq!(failed.status, DomainStatus::Failed);
        assert_eq!(
            h.sink.events(),
            vec![(1, DomainEventKind::DomainVerificationFailed)]
        );
        // Records never polled.
        let records = h.repo.get_records(domain.id).await.unwrap();
        assert!(records.iter().all(|r| r.last_checked_at.is_none()));
    }

    #[tokio::test]
    async fn test_dns_tick_keeps_waiting_while_records_unverified() {
        let h = harness(MockDnsResolver::new(), MockMailProvider::new());
        let domain = seed_domain(&h, "example.com").await;

        h.service
            .verify_dns_tick(dns_job(domain.id, 30))
            .await
            .unwrap();

        let unchanged = h.repo.get_domain(domain.id).await.unwrap().unwrap();
        assert_eq!(unchanged.status, DomainStatus::PendingDns);
        let records = h.repo.get_records(domain.id).await.unwrap();
        assert!(records.iter().all(|r| r.status == RecordStatus::Pending));
        assert!(records.iter().all(|r| r.last_checked_at.is_some()));
        assert!(h.sink.events().is_empty());
    }

    #[tokio::test]
    async fn test_dns_tick_promotes_verified_domain_to_provider_phase() {
        let resolver = MockDnsResolver::new().with_plan(&plan_records(
            "example.com",
            "sel",
            "PUB",
            "us-east-1",
        ));
        let provider = MockMailProvider::new();
        let h = harness(resolver, provider.clone());
        let domain = seed_domain(&h, "example.com").await;

        h.service
            .verify_dns_tick(dns_job(domain.id, 30))
            .await
            .unwrap();

        let promoted = h.repo.get_domain(domain.id).await.unwrap().unwrap();
        assert_eq!(promoted.status, DomainStatus::PendingAws);
        assert!(promoted.aws_registered_at.is_some());
        assert_eq!(provider.create_identity_call_count(), 1);
        assert_eq!(provider.configure_bounce_call_count(), 1);

        assert!(!h.queue.is_scheduled(
            JobType::VerifyDns,
            &VerificationScheduler::dns_dedupe_key(domain.id)
        ));
        assert!(h.queue.is_scheduled(
            JobType::VerifyProvider,
            &VerificationScheduler::provider_dedupe_key(domain.id)
        ));
    }

    #[tokio::test]
    async fn test_dns_tick_fails_domain_when_registration_fails() {
        let resolver = MockDnsResolver::new().with_plan(&plan_records(
            "example.com",
            "sel",
            "PUB",
            "us-east-1",
        ));
        let h = harness(resolver, MockMailProvider::new().with_create_failure());
        let domain = seed_domain(&h, "example.com").await;

        h.service
            .verify_dns_tick(dns_job(domain.id, 30))
            .await
            .unwrap();

        let failed = h.repo.get_domain(domain.id).await.unwrap().unwrap();
        assert_eq!(failed.status, DomainStatus::Failed);
        assert_eq!(
            h.sink.events(),
            vec![(1, DomainEventKind::DomainVerificationFailed)]
        );
        assert_eq!(h.queue.scheduled_count(), 0);
    }

    // ==================== Provider tick tests ====================

    #[tokio::test]
    async fn test_provider_tick_skips_when_status_read_errors() {
        let h = harness(
            MockDnsResolver::new(),
            MockMailProvider::new().with_status_failure(),
        );
        let domain = seed_domain(&h, "example.com").await;
        h.repo
            .update_domain_status(domain.id, DomainStatus::PendingAws)
            .await
            .unwrap();

        h.queue
            .enqueue_repeatable(
                Job::VerifyProvider(provider_job(domain.id, 30)),
                &VerificationScheduler::provider_dedupe_key(domain.id),
                std::time::Duration::from_secs(600),
            )
            .await
            .unwrap();

        h.service
            .verify_provider_tick(provider_job(domain.id, 30))
            .await
            .unwrap();

        // Still waiting: schedule intact, no state change.
        let unchanged = h.repo.get_domain(domain.id).await.unwrap().unwrap();
        assert_eq!(unchanged.status, DomainStatus::PendingAws);
        assert_eq!(h.queue.scheduled_count(), 1);
        assert!(h.sink.events().is_empty());
    }

    #[tokio::test]
    async fn test_provider_tick_verifies_domain_on_success_signals() {
        let provider =
            MockMailProvider::new().with_signals(SignalStatus::Success, SignalStatus::Success);
        let h = harness(MockDnsResolver::new(), provider);
        let domain = seed_domain(&h, "example.com").await;
        h.repo
            .update_domain_status(domain.id, DomainStatus::PendingAws)
            .await
            .unwrap();

        h.service
            .verify_provider_tick(provider_job(domain.id, 30))
            .await
            .unwrap();

        let verified = h.repo.get_domain(domain.id).await.unwrap().unwrap();
        assert_eq!(verified.status, DomainStatus::Verified);
        assert_eq!(h.sink.events(), vec![(1, DomainEventKind::DomainVerified)]);
    }

    #[tokio::test]
    async fn test_provider_tick_fails_domain_on_failed_signal() {
        let provider =
            MockMailProvider::new().with_signals(SignalStatus::Success, SignalStatus::Failed);
        let h = harness(MockDnsResolver::new(), provider);
        let domain = seed_domain(&h, "example.com").await;
        h.repo
            .update_domain_status(domain.id, DomainStatus::PendingAws)
            .await
            .unwrap();

        h.service
            .verify_provider_tick(provider_job(domain.id, 30))
            .await
            .unwrap();

        let failed = h.repo.get_domain(domain.id).await.unwrap().unwrap();
        assert_eq!(failed.status, DomainStatus::Failed);
        let delivered = h.sink.delivered();
        assert_eq!(delivered.len(), 1);
        assert!(delivered[0].1.message.contains("mail-from"));
    }

    #[tokio::test]
    async fn test_provider_tick_deadline_expiry_fails_domain() {
        let provider =
            MockMailProvider::new().with_signals(SignalStatus::Success, SignalStatus::Success);
        let h = harness(MockDnsResolver::new(), provider);
        let domain = seed_domain(&h, "example.com").await;
        h.repo
            .update_domain_status(domain.id, DomainStatus::PendingAws)
            .await
            .unwrap();

        h.service
            .verify_provider_tick(provider_job(domain.id, -1))
            .await
            .unwrap();

        let failed = h.repo.get_domain(domain.id).await.unwrap().unwrap();
        assert_eq!(failed.status, DomainStatus::Failed);
        assert_eq!(
            h.sink.events(),
            vec![(1, DomainEventKind::DomainVerificationFailed)]
        );
    }
}
