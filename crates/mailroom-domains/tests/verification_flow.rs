//! Integration tests for the domain verification pipeline
//!
//! These wire the real queue, scheduler, poller, transfer resolver,
//! registrar and lifecycle together and drive domains through the same
//! tick entry points the background worker uses:
//! 1. add_domain persists the planned records and schedules DNS polling
//! 2. DNS ticks poll until every record verifies, then register the
//!    domain with the provider and switch to the provider phase
//! 3. provider ticks settle the domain as verified or failed
//! 4. a competing tenant verifying the same name revokes the previous
//!    owner
//! 5. a competing tenant verifying the same name while another claim is
//!    still in the provider phase supersedes that claim

use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use mailroom_core::{
    DomainEventKind, Job, JobType, RecordingNotificationSink, VerifyDnsJob, VerifyProviderJob,
};
use mailroom_domains::config::VerificationConfig;
use mailroom_domains::dns::{DnsLookupError, DnsPoller, DnsResolver, MockDnsResolver, MxExchange};
use mailroom_domains::models::{
    DnsRecordKind, Domain, DomainStatus, NewDomain, RecordStatus, RecordType,
};
use mailroom_domains::planner::plan_records;
use mailroom_domains::providers::{MailProvider, MockMailProvider, SignalStatus};
use mailroom_domains::repository::{DomainRepository, InMemoryDomainRepository};
use mailroom_domains::services::{
    AddDomainRequest, DomainLifecycle, DomainService, OwnershipTransferResolver,
    ProviderRegistrar, VerificationScheduler, VerificationService,
};
use mailroom_domains::worker::VerificationWorker;
use mailroom_queue::{ChannelJobReceiver, ScheduledJobQueue};

/// Resolver whose zone contents can be replaced mid-test, simulating a
/// domain owner publishing records while polling is already running.
#[derive(Clone, Default)]
struct SwappableResolver {
    inner: Arc<RwLock<MockDnsResolver>>,
}

impl SwappableResolver {
    fn publish(&self, zone: MockDnsResolver) {
        *self.inner.write().unwrap() = zone;
    }

    fn snapshot(&self) -> MockDnsResolver {
        self.inner.read().unwrap().clone()
    }
}

#[async_trait]
impl DnsResolver for SwappableResolver {
    async fn resolve_txt(&self, name: &str) -> Result<Vec<String>, DnsLookupError> {
        self.snapshot().resolve_txt(name).await
    }

    async fn resolve_mx(&self, name: &str) -> Result<Vec<MxExchange>, DnsLookupError> {
        self.snapshot().resolve_mx(name).await
    }

    async fn resolve_cname(&self, name: &str) -> Result<Vec<String>, DnsLookupError> {
        self.snapshot().resolve_cname(name).await
    }
}

struct Pipeline {
    repo: Arc<InMemoryDomainRepository>,
    queue: Arc<ScheduledJobQueue>,
    receiver: Option<ChannelJobReceiver>,
    resolver: SwappableResolver,
    provider: MockMailProvider,
    sink: RecordingNotificationSink,
    scheduler: Arc<VerificationScheduler>,
    domains: DomainService,
    verification: Arc<VerificationService>,
}

fn pipeline(config: VerificationConfig) -> Pipeline {
    pipeline_with_sink(config, RecordingNotificationSink::new())
}

fn pipeline_with_sink(config: VerificationConfig, sink: RecordingNotificationSink) -> Pipeline {
    let repo = Arc::new(InMemoryDomainRepository::new());
    let (queue, receiver) = ScheduledJobQueue::create_channel(64);
    let queue = Arc::new(queue);
    let scheduler = Arc::new(VerificationScheduler::new(queue.clone(), config.clone()));
    let lifecycle = Arc::new(DomainLifecycle::new(repo.clone()));
    let resolver = SwappableResolver::default();
    let provider = MockMailProvider::new();
    let provider_arc: Arc<dyn MailProvider> = Arc::new(provider.clone());

    let transfer = Arc::new(OwnershipTransferResolver::new(
        repo.clone(),
        provider_arc.clone(),
        scheduler.clone(),
        lifecycle.clone(),
        Arc::new(sink.clone()),
    ));
    let registrar = Arc::new(ProviderRegistrar::new(provider_arc, repo.clone()));
    let verification = Arc::new(VerificationService::new(
        repo.clone(),
        DnsPoller::new(Arc::new(resolver.clone())),
        scheduler.clone(),
        lifecycle.clone(),
        transfer,
        registrar.clone(),
        Arc::new(sink.clone()),
    ));
    let domains = DomainService::new(repo.clone(), scheduler.clone(), registrar, lifecycle, config);

    Pipeline {
        repo,
        queue,
        receiver: Some(receiver),
        resolver,
        provider,
        sink,
        scheduler,
        domains,
        verification,
    }
}

fn fast_config() -> VerificationConfig {
    VerificationConfig {
        dns_ttl: Duration::from_secs(30),
        dns_poll_interval: Duration::from_millis(50),
        provider_ttl: Duration::from_secs(30),
        provider_poll_interval: Duration::from_millis(50),
        selector_prefix: "mailroom".to_string(),
    }
}

/// Seed a domain directly through the repository with fixed key
/// material, skipping the expensive RSA generation in add_domain.
async fn seed(p: &Pipeline, name: &str, team_id: i32, selector: &str) -> Domain {
    let domain = p
        .repo
        .create_domain(NewDomain {
            name: name.to_string(),
            team_id,
            region: "us-east-1".to_string(),
            dkim_selector: selector.to_string(),
            dkim_public_key: format!("PUB-{}", selector),
            dkim_private_key: format!("PRIV-{}", selector),
        })
        .await
        .unwrap();
    let plan = plan_records(
        &domain.name,
        &domain.dkim_selector,
        &domain.dkim_public_key,
        &domain.region,
    );
    p.repo.create_records(domain.id, &plan).await.unwrap();
    domain
}

fn zone_for(domain: &Domain) -> MockDnsResolver {
    MockDnsResolver::new().with_plan(&plan_records(
        &domain.name,
        &domain.dkim_selector,
        &domain.dkim_public_key,
        &domain.region,
    ))
}

async fn dns_tick(p: &Pipeline, domain_id: i32) {
    p.verification
        .handle_job(Job::VerifyDns(VerifyDnsJob {
            domain_id,
            deadline: Utc::now() + chrono::Duration::minutes(30),
        }))
        .await
        .unwrap();
}

async fn provider_tick(p: &Pipeline, domain_id: i32) {
    p.verification
        .handle_job(Job::VerifyProvider(VerifyProviderJob {
            domain_id,
            deadline: Utc::now() + chrono::Duration::minutes(30),
        }))
        .await
        .unwrap();
}

async fn status_of(p: &Pipeline, domain_id: i32) -> DomainStatus {
    p.repo
        .get_domain(domain_id)
        .await
        .unwrap()
        .unwrap_or_else(|| panic!("domain {} missing", domain_id))
        .status
}

async fn wait_for_status(p: &Pipeline, domain_id: i32, expected: DomainStatus) {
    for _ in 0..500 {
        if status_of(p, domain_id).await == expected {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!(
        "domain {} never reached {}, still {}",
        domain_id,
        expected,
        status_of(p, domain_id).await
    );
}

async fn wait_until(label: &str, mut condition: impl FnMut() -> bool) {
    for _ in 0..500 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("timed out waiting for {}", label);
}

#[tokio::test]
async fn test_add_domain_plans_canonical_records() {
    let p = pipeline(VerificationConfig::default());

    let added = p
        .domains
        .add_domain(AddDomainRequest {
            team_id: 1,
            name: "Example.com".to_string(),
            region: "us-east-1".to_string(),
        })
        .await
        .unwrap();

    let domain = &added.domain;
    assert_eq!(domain.name, "example.com");
    assert_eq!(domain.status, DomainStatus::PendingDns);
    assert!(domain.dkim_selector.starts_with("mailroom-"));

    let records = &added.dns_records;
    assert_eq!(records.len(), 4);

    assert_eq!(records[0].kind, DnsRecordKind::Dkim);
    assert_eq!(
        records[0].name,
        format!("{}._domainkey.example.com", domain.dkim_selector)
    );
    assert_eq!(records[0].record_type, RecordType::Txt);
    assert_eq!(
        records[0].value,
        format!("v=DKIM1; k=rsa; p={}", domain.dkim_public_key)
    );

    assert_eq!(records[1].kind, DnsRecordKind::Spf);
    assert_eq!(records[1].name, "send.example.com");
    assert_eq!(records[1].value, "v=spf1 include:amazonses.com ~all");

    assert_eq!(records[2].kind, DnsRecordKind::Mx);
    assert_eq!(records[2].name, "send.example.com");
    assert_eq!(records[2].record_type, RecordType::Mx);
    assert_eq!(records[2].value, "feedback-smtp.us-east-1.amazonses.com");
    assert_eq!(records[2].priority, Some(10));

    assert_eq!(records[3].kind, DnsRecordKind::Dmarc);
    assert_eq!(records[3].name, "_dmarc.example.com");
    assert_eq!(
        records[3].value,
        "v=DMARC1; p=none; rua=mailto:dmarc@example.com"
    );

    assert!(p.queue.is_scheduled(
        JobType::VerifyDns,
        &VerificationScheduler::dns_dedupe_key(domain.id)
    ));
}

#[tokio::test]
async fn test_full_pipeline_reaches_verified_through_worker() {
    let mut p = pipeline(fast_config());
    let worker = VerificationWorker::new(
        Box::new(p.receiver.take().unwrap()),
        p.verification.clone(),
        p.scheduler.clone(),
    );
    let worker_task = tokio::spawn(worker.run());

    let added = p
        .domains
        .add_domain(AddDomainRequest {
            team_id: 3,
            name: "example.com".to_string(),
            region: "us-east-1".to_string(),
        })
        .await
        .unwrap();
    let id = added.domain.id;

    // Records are not published yet: ticks run but the domain waits.
    let mut polled = false;
    for _ in 0..500 {
        let records = p.repo.get_records(id).await.unwrap();
        if records.iter().all(|r| r.last_checked_at.is_some()) {
            polled = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(polled, "DNS records were never polled");
    assert_eq!(status_of(&p, id).await, DomainStatus::PendingDns);

    // The owner publishes every planned record.
    p.resolver.publish(zone_for(&added.domain));
    wait_for_status(&p, id, DomainStatus::PendingAws).await;

    assert!(p.provider.has_identity("example.com"));
    assert_eq!(
        p.provider.last_signing_material(),
        Some((
            added.domain.dkim_selector.clone(),
            added.domain.dkim_private_key.clone()
        ))
    );

    let queue = p.queue.clone();
    wait_until("provider schedule", || {
        queue.is_scheduled(
            JobType::VerifyProvider,
            &VerificationScheduler::provider_dedupe_key(id),
        )
    })
    .await;
    assert!(!p.queue.is_scheduled(
        JobType::VerifyDns,
        &VerificationScheduler::dns_dedupe_key(id)
    ));

    // The provider confirms both signals.
    p.provider
        .set_signals(SignalStatus::Success, SignalStatus::Success);
    wait_for_status(&p, id, DomainStatus::Verified).await;

    let queue = p.queue.clone();
    wait_until("schedules drained", || queue.scheduled_count() == 0).await;

    assert_eq!(p.sink.events(), vec![(3, DomainEventKind::DomainVerified)]);
    let records = p.repo.get_records(id).await.unwrap();
    assert!(records.iter().all(|r| r.status == RecordStatus::Verified));

    worker_task.abort();
}

#[tokio::test]
async fn test_competing_verification_revokes_previous_owner() {
    let p = pipeline(VerificationConfig::default());

    // Team 1 verifies shared.com end to end.
    let first = seed(&p, "shared.com", 1, "sela").await;
    p.resolver.publish(zone_for(&first));
    dns_tick(&p, first.id).await;
    assert_eq!(status_of(&p, first.id).await, DomainStatus::PendingAws);

    p.provider
        .set_signals(SignalStatus::Success, SignalStatus::Success);
    provider_tick(&p, first.id).await;
    assert_eq!(status_of(&p, first.id).await, DomainStatus::Verified);

    // Team 2 claims the same name and publishes its own records.
    let second = seed(&p, "shared.com", 2, "selb").await;
    p.resolver.publish(zone_for(&second));
    p.provider
        .set_signals(SignalStatus::Pending, SignalStatus::Pending);
    dns_tick(&p, second.id).await;

    // The previous owner is revoked and told why.
    assert_eq!(status_of(&p, first.id).await, DomainStatus::Revoked);
    let transfer_events: Vec<(i32, DomainEventKind)> = p
        .sink
        .events()
        .into_iter()
        .filter(|(_, event)| *event == DomainEventKind::DomainOwnershipTransferred)
        .collect();
    assert_eq!(
        transfer_events,
        vec![(1, DomainEventKind::DomainOwnershipTransferred)]
    );

    // The audit trail references both teams.
    let history = p.repo.list_ownership_history("shared.com").await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].previous_team_id, Some(1));
    assert_eq!(history[0].new_team_id, 2);
    assert_eq!(history[0].domain_id, second.id);

    // The new claim continues into the provider phase with its own key
    // material registered under the shared name.
    assert_eq!(status_of(&p, second.id).await, DomainStatus::PendingAws);
    assert_eq!(
        p.provider.last_signing_material(),
        Some(("selb".to_string(), "PRIV-selb".to_string()))
    );
    assert!(p.queue.is_scheduled(
        JobType::VerifyProvider,
        &VerificationScheduler::provider_dedupe_key(second.id)
    ));
}

#[tokio::test]
async fn test_racing_claims_never_hold_two_verified_rows() {
    let p = pipeline(VerificationConfig::default());

    // Team 1 reaches the provider phase for shared.com.
    let first = seed(&p, "shared.com", 1, "sela").await;
    p.resolver.publish(zone_for(&first));
    dns_tick(&p, first.id).await;
    assert_eq!(status_of(&p, first.id).await, DomainStatus::PendingAws);

    // Team 2 completes DNS for the same name while team 1 is still
    // waiting on the provider. Registering team 2 replaces the
    // provider identity, so team 1's claim has nothing left to verify.
    let second = seed(&p, "shared.com", 2, "selb").await;
    p.resolver.publish(zone_for(&second));
    dns_tick(&p, second.id).await;

    assert_eq!(status_of(&p, first.id).await, DomainStatus::Failed);
    assert!(!p.queue.is_scheduled(
        JobType::VerifyProvider,
        &VerificationScheduler::provider_dedupe_key(first.id)
    ));
    assert_eq!(
        p.provider.last_signing_material(),
        Some(("selb".to_string(), "PRIV-selb".to_string()))
    );

    // The provider turns green for the registration it actually
    // holds. A tick still in flight for the superseded claim must not
    // resurrect it.
    p.provider
        .set_signals(SignalStatus::Success, SignalStatus::Success);
    provider_tick(&p, second.id).await;
    provider_tick(&p, first.id).await;

    assert_eq!(status_of(&p, second.id).await, DomainStatus::Verified);
    assert_eq!(status_of(&p, first.id).await, DomainStatus::Failed);
    let verified = p
        .repo
        .find_verified_domain_by_name("shared.com")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(verified.id, second.id);

    // Nothing verified changed hands, so there is no transfer entry,
    // just a failure notification for the superseded team.
    assert!(p
        .repo
        .list_ownership_history("shared.com")
        .await
        .unwrap()
        .is_empty());
    let failures: Vec<(i32, DomainEventKind)> = p
        .sink
        .events()
        .into_iter()
        .filter(|(_, event)| *event == DomainEventKind::DomainVerificationFailed)
        .collect();
    assert_eq!(
        failures,
        vec![(1, DomainEventKind::DomainVerificationFailed)]
    );
}

#[tokio::test]
async fn test_deadline_expiry_fails_domain_despite_partial_progress() {
    let p = pipeline(VerificationConfig::default());
    let domain = seed(&p, "example.com", 1, "sel").await;

    // Only the DKIM and DMARC records are published; SPF and MX never
    // appear.
    let plan = plan_records(
        &domain.name,
        &domain.dkim_selector,
        &domain.dkim_public_key,
        &domain.region,
    );
    p.resolver.publish(
        MockDnsResolver::new()
            .with_txt(&plan[0].name, &plan[0].value)
            .with_txt(&plan[3].name, &plan[3].value),
    );
    p.scheduler.schedule_dns_phase(domain.id).await.unwrap();

    dns_tick(&p, domain.id).await;
    assert_eq!(status_of(&p, domain.id).await, DomainStatus::PendingDns);
    let records = p.repo.get_records(domain.id).await.unwrap();
    let verified: Vec<DnsRecordKind> = records
        .iter()
        .filter(|r| r.status == RecordStatus::Verified)
        .map(|r| r.kind)
        .collect();
    assert_eq!(verified, vec![DnsRecordKind::Dkim, DnsRecordKind::Dmarc]);

    // Deadline passes with two records still pending.
    p.verification
        .handle_job(Job::VerifyDns(VerifyDnsJob {
            domain_id: domain.id,
            deadline: Utc::now() - chrono::Duration::seconds(1),
        }))
        .await
        .unwrap();

    assert_eq!(status_of(&p, domain.id).await, DomainStatus::Failed);
    assert_eq!(p.queue.scheduled_count(), 0);
    assert_eq!(
        p.sink.events(),
        vec![(1, DomainEventKind::DomainVerificationFailed)]
    );
    let delivered = p.sink.delivered();
    assert!(delivered[0].1.message.contains("allowed time"));
}

#[tokio::test]
async fn test_delete_mid_verification_stops_polling() {
    let p = pipeline(VerificationConfig::default());
    let domain = seed(&p, "example.com", 1, "sel").await;
    p.scheduler.schedule_dns_phase(domain.id).await.unwrap();
    assert_eq!(p.queue.scheduled_count(), 1);

    p.domains.delete_domain(domain.id).await.unwrap();

    assert_eq!(p.queue.scheduled_count(), 0);
    assert!(p.repo.get_domain(domain.id).await.unwrap().is_none());
    assert!(p.repo.get_records(domain.id).await.unwrap().is_empty());
    // Never registered with the provider, so nothing to unregister.
    assert_eq!(p.provider.delete_identity_call_count(), 0);

    // A tick that was already in the channel when the domain vanished
    // is a harmless no-op.
    dns_tick(&p, domain.id).await;
    assert!(p.sink.is_empty());
}

#[tokio::test]
async fn test_restart_after_failure_runs_fresh_verification() {
    let p = pipeline(VerificationConfig::default());
    let domain = seed(&p, "example.com", 1, "sel").await;

    // Fail the first attempt by expiring its deadline.
    p.scheduler.schedule_dns_phase(domain.id).await.unwrap();
    p.verification
        .handle_job(Job::VerifyDns(VerifyDnsJob {
            domain_id: domain.id,
            deadline: Utc::now() - chrono::Duration::seconds(1),
        }))
        .await
        .unwrap();
    assert_eq!(status_of(&p, domain.id).await, DomainStatus::Failed);

    // The owner fixes their DNS and restarts.
    p.resolver.publish(zone_for(&domain));
    let restarted = p.domains.restart_verification(domain.id).await.unwrap();
    assert_eq!(restarted.status, DomainStatus::PendingDns);
    assert!(p.queue.is_scheduled(
        JobType::VerifyDns,
        &VerificationScheduler::dns_dedupe_key(domain.id)
    ));

    dns_tick(&p, domain.id).await;
    assert_eq!(status_of(&p, domain.id).await, DomainStatus::PendingAws);
}

#[tokio::test]
async fn test_notification_outage_does_not_block_verification() {
    let p = pipeline_with_sink(
        VerificationConfig::default(),
        RecordingNotificationSink::new().with_delivery_failure(),
    );
    let domain = seed(&p, "example.com", 1, "sel").await;
    p.repo
        .update_domain_status(domain.id, DomainStatus::PendingAws)
        .await
        .unwrap();
    p.provider
        .set_signals(SignalStatus::Success, SignalStatus::Success);

    provider_tick(&p, domain.id).await;

    // The domain settles even though the sink is down.
    assert_eq!(status_of(&p, domain.id).await, DomainStatus::Verified);
    assert!(p.sink.is_empty());
}
