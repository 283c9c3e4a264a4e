//! Cross-tenant ownership transfer resolution

use std::sync::Arc;

use mailroom_core::{DomainEventKind, DomainNotification, NotificationSink};
use serde_json::json;
use tracing::{debug, error, info};

use crate::errors::DomainError;
use crate::models::{Domain, DomainStatus, NewOwnershipHistory};
use crate::providers::MailProvider;
use crate::repository::DomainRepository;
use crate::services::scheduler::VerificationScheduler;
use crate::services::DomainLifecycle;

const TRANSFER_REASON_DNS: &str = "dns_verification";

/// What resolving a candidate produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferOutcome {
    /// No identity at the provider, nothing to resolve.
    NoConflict,
    /// An identity existed without a verified owner; removed it.
    StaleIdentityRemoved,
    /// Another domain held the name and has been revoked.
    Transferred {
        previous_domain_id: i32,
        previous_team_id: i32,
    },
}

/// Resolves domain-name collisions across tenants.
///
/// Runs after all of a candidate's DNS records verify, before provider
/// registration. Steps run in a fixed order (supersede waiting claims,
/// history, revoke, notify, identity delete) and the current state is
/// re-checked on entry, so a crash mid-sequence is recovered by running
/// resolve again: already completed steps fall into the stale-identity
/// branch instead of being repeated.
pub struct OwnershipTransferResolver {
    repository: Arc<dyn DomainRepository>,
    provider: Arc<dyn MailProvider>,
    scheduler: Arc<VerificationScheduler>,
    lifecycle: Arc<DomainLifecycle>,
    notifications: Arc<dyn NotificationSink>,
}

impl OwnershipTransferResolver {
    pub fn new(
        repository: Arc<dyn DomainRepository>,
        provider: Arc<dyn MailProvider>,
        scheduler: Arc<VerificationScheduler>,
        lifecycle: Arc<DomainLifecycle>,
        notifications: Arc<dyn NotificationSink>,
    ) -> Self {
        Self {
            repository,
            provider,
            scheduler,
            lifecycle,
            notifications,
        }
    }

    pub async fn resolve(&self, candidate: &Domain) -> Result<TransferOutcome, DomainError> {
        if !self.provider.identity_exists(&candidate.name).await? {
            return Ok(TransferOutcome::NoConflict);
        }

        let previous = self
            .repository
            .find_verified_domain_by_name(&candidate.name)
            .await?;

        // Both branches below remove the identity, and with it the
        // registration any same-name claim in pending_aws is polling
        // on. Those claims must be settled before the identity changes
        // hands, or their next status read reports on the candidate's
        // registration.
        self.supersede_pending_claims(candidate).await?;

        match previous {
            Some(previous) if previous.id != candidate.id => {
                info!(
                    "Transferring ownership of {} from team {} to team {}",
                    candidate.name, previous.team_id, candidate.team_id
                );

                self.repository
                    .create_ownership_history(NewOwnershipHistory {
                        domain_id: candidate.id,
                        domain_name: candidate.name.clone(),
                        previous_team_id: Some(previous.team_id),
                        new_team_id: candidate.team_id,
                        transfer_reason: TRANSFER_REASON_DNS.to_string(),
                        metadata: json!({
                            "previous_domain_id": previous.id,
                            "dkim_key_rotated": true,
                        }),
                    })
                    .await?;

                self.lifecycle
                    .transition(&previous, DomainStatus::Revoked)
                    .await?;

                self.notify_previous_owner(&previous, candidate.team_id).await;

                // Identities are keyed by name, so the old one must go
                // before the new tenant's key material can be registered.
                self.provider.delete_identity(&candidate.name).await?;

                Ok(TransferOutcome::Transferred {
                    previous_domain_id: previous.id,
                    previous_team_id: previous.team_id,
                })
            }
            _ => {
                // Identity without a verified owner: an earlier run of
                // this flow stopped after the revoke but before the
                // delete. Finish only the cleanup.
                debug!(
                    "Provider identity for {} has no verified owner, removing stale identity",
                    candidate.name
                );
                self.provider.delete_identity(&candidate.name).await?;
                Ok(TransferOutcome::StaleIdentityRemoved)
            }
        }
    }

    /// Fail every other same-name claim still waiting on the provider
    /// and stop its polling. Keeps the single-verified-holder rule
    /// intact when a claim completes DNS while another one is in
    /// `pending_aws`. Nothing verified changed hands, so no history
    /// row is written.
    async fn supersede_pending_claims(&self, candidate: &Domain) -> Result<(), DomainError> {
        let claims = self
            .repository
            .find_domains_by_name(&candidate.name)
            .await?;

        for claim in claims {
            if claim.id == candidate.id || claim.status != DomainStatus::PendingAws {
                continue;
            }

            info!(
                "Superseding pending registration of {} for team {}: team {} verified DNS for the same name",
                claim.name, claim.team_id, candidate.team_id
            );

            self.scheduler.cancel_provider_phase(claim.id).await?;
            self.lifecycle
                .transition(&claim, DomainStatus::Failed)
                .await?;
            self.notify_superseded(&claim, candidate.team_id).await;
        }

        Ok(())
    }

    async fn notify_superseded(&self, claim: &Domain, new_team_id: i32) {
        let notification = DomainNotification::new(
            DomainEventKind::DomainVerificationFailed,
            claim.id,
            &claim.name,
            format!(
                "Another team proved ownership of {} before the provider confirmed your registration.",
                claim.name
            ),
        )
        .with_metadata("new_team_id", new_team_id.to_string());

        if let Err(e) = self.notifications.notify(claim.team_id, notification).await {
            error!(
                "Failed to notify team {} about superseded registration of {}: {}",
                claim.team_id, claim.name, e
            );
        }
    }

    async fn notify_previous_owner(&self, previous: &Domain, new_team_id: i32) {
        let notification = DomainNotification::new(
            DomainEventKind::DomainOwnershipTransferred,
            previous.id,
            &previous.name,
            format!(
                "Another team proved ownership of {} via DNS. Your domain has been revoked.",
                previous.name
            ),
        )
        .with_metadata("new_team_id", new_team_id.to_string());

        if let Err(e) = self
            .notifications
            .notify(previous.team_id, notification)
            .await
        {
            error!(
                "Failed to notify team {} about ownership transfer of {}: {}",
                previous.team_id, previous.name, e
            );
        }
    }
}
