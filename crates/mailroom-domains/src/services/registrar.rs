//! Provider-side identity registration and signal polling

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info};

use crate::errors::DomainError;
use crate::models::{DnsRecordKind, Domain, RecordStatus};
use crate::providers::{MailProvider, ProviderVerificationStatus, SignalStatus};
use crate::repository::DomainRepository;

/// Result of one provider poll tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistrationOutcome {
    /// Every provider signal succeeded.
    Verified,
    /// A signal reported a terminal failure.
    Failed(String),
    /// Still waiting on the provider.
    Pending,
}

/// Registers domains with the mail provider and tracks its signals.
pub struct ProviderRegistrar {
    provider: Arc<dyn MailProvider>,
    repository: Arc<dyn DomainRepository>,
}

impl ProviderRegistrar {
    pub fn new(provider: Arc<dyn MailProvider>, repository: Arc<dyn DomainRepository>) -> Self {
        Self {
            provider,
            repository,
        }
    }

    /// Create the provider identity with the domain's own DKIM key
    /// material and point bounce traffic at the mail-from subdomain.
    ///
    /// Returns the domain with its registration timestamp set.
    pub async fn register(&self, domain: &Domain) -> Result<Domain, DomainError> {
        info!("Registering {} with the mail provider", domain.name);

        self.provider
            .create_identity(&domain.name, &domain.dkim_selector, &domain.dkim_private_key)
            .await?;
        self.provider.configure_bounce_domain(&domain.name).await?;

        self.repository
            .set_aws_registered_at(domain.id, Utc::now())
            .await
    }

    /// Remove the provider identity if one was ever created.
    pub async fn unregister(&self, domain: &Domain) -> Result<(), DomainError> {
        if domain.aws_registered_at.is_none() {
            debug!(
                "Domain {} was never registered with the provider, skipping identity delete",
                domain.name
            );
            return Ok(());
        }
        self.provider.delete_identity(&domain.name).await
    }

    /// Poll the provider's signals and map them onto the domain's
    /// DNS record rows.
    ///
    /// The dkim signal drives the DKIM record, the mail-from signal
    /// drives the SPF and MX records, and DMARC has no provider-side
    /// signal: it is derived locally, verified once both signals
    /// succeed.
    pub async fn check_registration(
        &self,
        domain: &Domain,
    ) -> Result<RegistrationOutcome, DomainError> {
        let signals = self.provider.get_verification_status(&domain.name).await?;
        debug!(
            "Provider signals for {}: dkim={}, mail_from={}",
            domain.name, signals.dkim, signals.mail_from
        );

        let now = Utc::now();
        let records = self.repository.get_records(domain.id).await?;
        for record in &records {
            let status = match record.kind {
                DnsRecordKind::Dkim => record_status_from_signal(signals.dkim),
                DnsRecordKind::Spf | DnsRecordKind::Mx => {
                    record_status_from_signal(signals.mail_from)
                }
                DnsRecordKind::Dmarc => {
                    if signals.all_successful() {
                        RecordStatus::Verified
                    } else {
                        RecordStatus::Pending
                    }
                }
            };
            self.repository
                .update_record_status(record.id, status, now)
                .await?;
        }

        if signals.all_successful() {
            Ok(RegistrationOutcome::Verified)
        } else if signals.any_failed() {
            Ok(RegistrationOutcome::Failed(failure_reason(signals)))
        } else {
            Ok(RegistrationOutcome::Pending)
        }
    }
}

fn record_status_from_signal(signal: SignalStatus) -> RecordStatus {
    match signal {
        SignalStatus::Success => RecordStatus::Verified,
        SignalStatus::Failed => RecordStatus::Failed,
        SignalStatus::NotStarted | SignalStatus::Pending | SignalStatus::TemporaryFailure => {
            RecordStatus::Pending
        }
    }
}

fn failure_reason(signals: ProviderVerificationStatus) -> String {
    let mut failed = Vec::new();
    if signals.dkim.is_failed() {
        failed.push("DKIM");
    }
    if signals.mail_from.is_failed() {
        failed.push("mail-from");
    }
    format!(
        "Provider reported {} verification failure",
        failed.join(" and ")
    )
}
