//! Tenant-facing domain management operations

use std::sync::Arc;

use tracing::{debug, info};

use crate::config::{VerificationConfig, SUPPORTED_REGIONS};
use crate::errors::DomainError;
use crate::keys::generate_key_material;
use crate::models::{
    DnsRecordOut, Domain, DomainFilter, DomainStatus, NewDomain, SendingSettingsUpdate,
};
use crate::planner::plan_records;
use crate::repository::DomainRepository;
use crate::services::registrar::ProviderRegistrar;
use crate::services::scheduler::VerificationScheduler;
use crate::services::DomainLifecycle;

const MAX_DOMAIN_NAME_LEN: usize = 253;
const MAX_LABEL_LEN: usize = 63;

/// Input for [`DomainService::add_domain`].
#[derive(Debug, Clone)]
pub struct AddDomainRequest {
    pub team_id: i32,
    pub name: String,
    pub region: String,
}

/// A domain together with the records the owner must publish.
#[derive(Debug, Clone)]
pub struct DomainWithRecords {
    pub domain: Domain,
    pub dns_records: Vec<DnsRecordOut>,
}

/// Synchronous entry points for managing sending domains.
///
/// Everything long-running (DNS polling, provider polling) happens on
/// the job queue; these calls only validate, persist and (re)schedule.
pub struct DomainService {
    repository: Arc<dyn DomainRepository>,
    scheduler: Arc<VerificationScheduler>,
    registrar: Arc<ProviderRegistrar>,
    lifecycle: Arc<DomainLifecycle>,
    config: VerificationConfig,
}

impl DomainService {
    pub fn new(
        repository: Arc<dyn DomainRepository>,
        scheduler: Arc<VerificationScheduler>,
        registrar: Arc<ProviderRegistrar>,
        lifecycle: Arc<DomainLifecycle>,
        config: VerificationConfig,
    ) -> Self {
        Self {
            repository,
            scheduler,
            registrar,
            lifecycle,
            config,
        }
    }

    /// Register a new sending domain for a team.
    ///
    /// Generates DKIM key material, persists the domain in
    /// `pending_dns` with its planned records and starts the DNS
    /// verification schedule. Key generation happens before anything is
    /// persisted, so a key failure leaves no partial rows behind.
    pub async fn add_domain(
        &self,
        request: AddDomainRequest,
    ) -> Result<DomainWithRecords, DomainError> {
        let name = normalize_domain_name(&request.name);
        validate_domain_name(&name)?;
        validate_region(&request.region)?;

        let keys = generate_key_material(&self.config.selector_prefix)?;

        let domain = self
            .repository
            .create_domain(NewDomain {
                name,
                team_id: request.team_id,
                region: request.region,
                dkim_selector: keys.selector,
                dkim_public_key: keys.public_key,
                dkim_private_key: keys.private_key,
            })
            .await?;

        let plan = plan_records(
            &domain.name,
            &domain.dkim_selector,
            &domain.dkim_public_key,
            &domain.region,
        );
        let records = self.repository.create_records(domain.id, &plan).await?;

        let deadline = self.scheduler.schedule_dns_phase(domain.id).await?;
        info!(
            "Added domain {} for team {} with selector {}, DNS deadline {}",
            domain.name,
            domain.team_id,
            domain.dkim_selector,
            deadline.to_rfc3339()
        );

        Ok(DomainWithRecords {
            dns_records: records.iter().map(DnsRecordOut::from).collect(),
            domain,
        })
    }

    pub async fn get_domain(&self, id: i32) -> Result<DomainWithRecords, DomainError> {
        let domain = self.require_domain(id).await?;
        let records = self.repository.get_records(id).await?;
        Ok(DomainWithRecords {
            domain,
            dns_records: records.iter().map(DnsRecordOut::from).collect(),
        })
    }

    pub async fn list_domains(
        &self,
        team_id: i32,
        filter: &DomainFilter,
    ) -> Result<Vec<Domain>, DomainError> {
        self.repository.list_domains(team_id, filter).await
    }

    /// Remove a domain, its records, its schedules and, if it ever
    /// registered, its provider identity.
    pub async fn delete_domain(&self, id: i32) -> Result<(), DomainError> {
        let domain = self.require_domain(id).await?;

        self.scheduler.cancel_all(domain.id).await?;
        self.registrar.unregister(&domain).await?;
        self.repository.delete_domain(domain.id).await?;

        info!("Deleted domain {} for team {}", domain.name, domain.team_id);
        Ok(())
    }

    /// Put a `failed` (or still `pending_dns`) domain back at the start
    /// of DNS verification with a fresh deadline.
    ///
    /// The schedule's dedupe key is per domain and phase, so restarting
    /// replaces any job already running instead of stacking a second
    /// one. Restarting from any other state changes nothing.
    pub async fn restart_verification(&self, id: i32) -> Result<Domain, DomainError> {
        let domain = self.require_domain(id).await?;

        match domain.status {
            DomainStatus::Failed | DomainStatus::PendingDns => {
                let restarted = self
                    .lifecycle
                    .transition(&domain, DomainStatus::PendingDns)
                    .await?;
                self.repository.reset_record_statuses(restarted.id).await?;
                let deadline = self.scheduler.schedule_dns_phase(restarted.id).await?;
                info!(
                    "Restarted verification for {}, new DNS deadline {}",
                    restarted.name,
                    deadline.to_rfc3339()
                );
                Ok(restarted)
            }
            _ => {
                debug!(
                    "Domain {} is {}, restart has no effect",
                    domain.name, domain.status
                );
                Ok(domain)
            }
        }
    }

    /// Pass-through sending configuration, independent of the
    /// verification state machine.
    pub async fn update_sending_settings(
        &self,
        id: i32,
        update: &SendingSettingsUpdate,
    ) -> Result<Domain, DomainError> {
        self.require_domain(id).await?;
        self.repository.update_sending_settings(id, update).await
    }

    async fn require_domain(&self, id: i32) -> Result<Domain, DomainError> {
        self.repository
            .get_domain(id)
            .await?
            .ok_or(DomainError::DomainNotFound(id))
    }
}

/// Lowercase, trim surrounding whitespace and any trailing root dot.
fn normalize_domain_name(name: &str) -> String {
    name.trim().trim_end_matches('.').to_lowercase()
}

fn validate_domain_name(name: &str) -> Result<(), DomainError> {
    if name.is_empty() {
        return Err(DomainError::Validation(
            "Domain name must not be empty".to_string(),
        ));
    }
    if name.len() > MAX_DOMAIN_NAME_LEN {
        return Err(DomainError::Validation(format!(
            "Domain name exceeds {} characters",
            MAX_DOMAIN_NAME_LEN
        )));
    }

    let labels: Vec<&str> = name.split('.').collect();
    if labels.len() < 2 {
        return Err(DomainError::Validation(format!(
            "'{}' is not a fully qualified domain name",
            name
        )));
    }

    for label in labels {
        if label.is_empty() || label.len() > MAX_LABEL_LEN {
            return Err(DomainError::Validation(format!(
                "Invalid label length in domain name '{}'",
                name
            )));
        }
        if label.starts_with('-') || label.ends_with('-') {
            return Err(DomainError::Validation(format!(
                "Domain label '{}' must not start or end with a hyphen",
                label
            )));
        }
        if !label
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
        {
            return Err(DomainError::Validation(format!(
                "Domain label '{}' contains invalid characters",
                label
            )));
        }
    }

    Ok(())
}

fn validate_region(region: &str) -> Result<(), DomainError> {
    if SUPPORTED_REGIONS.contains(&region) {
        Ok(())
    } else {
        Err(DomainError::Validation(format!(
            "Unsupported region: {}",
            region
        )))
    }
}
