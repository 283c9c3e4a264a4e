//! Persistence boundary for domains, DNS records, and ownership history
//!
//! The pipeline only ever talks to [`DomainRepository`], storage
//! technology stays behind the trait. [`InMemoryDomainRepository`] backs
//! tests and single-process deployments.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI32, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use mailroom_core::UtcDateTime;
use tokio::sync::RwLock;

use crate::errors::DomainError;
use crate::models::{
    Domain, DomainFilter, DomainStatus, DnsRecord, NewDomain, NewOwnershipHistory,
    OwnershipHistory, RecordStatus, SendingSettingsUpdate, TlsMode,
};
use crate::planner::PlannedDnsRecord;

#[async_trait]
pub trait DomainRepository: Send + Sync {
    /// Insert a domain in `pending_dns`, the only valid initial status.
    async fn create_domain(&self, new: NewDomain) -> Result<Domain, DomainError>;

    async fn get_domain(&self, id: i32) -> Result<Option<Domain>, DomainError>;

    async fn list_domains(
        &self,
        team_id: i32,
        filter: &DomainFilter,
    ) -> Result<Vec<Domain>, DomainError>;

    /// The at-most-one verified holder of a name, across all teams.
    async fn find_verified_domain_by_name(&self, name: &str)
        -> Result<Option<Domain>, DomainError>;

    /// Every row holding `name` in any status, across all teams.
    async fn find_domains_by_name(&self, name: &str) -> Result<Vec<Domain>, DomainError>;

    async fn update_domain_status(
        &self,
        id: i32,
        status: DomainStatus,
    ) -> Result<Domain, DomainError>;

    async fn set_aws_registered_at(
        &self,
        id: i32,
        at: UtcDateTime,
    ) -> Result<Domain, DomainError>;

    async fn update_sending_settings(
        &self,
        id: i32,
        update: &SendingSettingsUpdate,
    ) -> Result<Domain, DomainError>;

    /// Remove the domain and all of its DNS records.
    async fn delete_domain(&self, id: i32) -> Result<(), DomainError>;

    /// Persist a plan's records for a domain, in plan order.
    async fn create_records(
        &self,
        domain_id: i32,
        plan: &[PlannedDnsRecord],
    ) -> Result<Vec<DnsRecord>, DomainError>;

    async fn get_records(&self, domain_id: i32) -> Result<Vec<DnsRecord>, DomainError>;

    async fn update_record_status(
        &self,
        record_id: i32,
        status: RecordStatus,
        checked_at: UtcDateTime,
    ) -> Result<(), DomainError>;

    /// Put every record of a domain back to `pending`, for restarts.
    async fn reset_record_statuses(&self, domain_id: i32) -> Result<(), DomainError>;

    async fn create_ownership_history(
        &self,
        entry: NewOwnershipHistory,
    ) -> Result<OwnershipHistory, DomainError>;

    async fn list_ownership_history(
        &self,
        domain_name: &str,
    ) -> Result<Vec<OwnershipHistory>, DomainError>;
}

/// Map-backed repository with monotonically increasing ids.
pub struct InMemoryDomainRepository {
    domains: RwLock<HashMap<i32, Domain>>,
    records: RwLock<HashMap<i32, DnsRecord>>,
    history: RwLock<Vec<OwnershipHistory>>,
    next_domain_id: AtomicI32,
    next_record_id: AtomicI32,
    next_history_id: AtomicI32,
}

impl Default for InMemoryDomainRepository {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryDomainRepository {
    pub fn new() -> Self {
        Self {
            domains: RwLock::new(HashMap::new()),
            records: RwLock::new(HashMap::new()),
            history: RwLock::new(Vec::new()),
            next_domain_id: AtomicI32::new(1),
            next_record_id: AtomicI32::new(1),
            next_history_id: AtomicI32::new(1),
        }
    }
}

#[async_trait]
impl DomainRepository for InMemoryDomainRepository {
    async fn create_domain(&self, new: NewDomain) -> Result<Domain, DomainError> {
        let now = Utc::now();
        let domain = Domain {
            id: self.next_domain_id.fetch_add(1, Ordering::SeqCst),
            name: new.name,
            team_id: new.team_id,
            status: DomainStatus::PendingDns,
            region: new.region,
            dkim_selector: new.dkim_selector,
            dkim_public_key: new.dkim_public_key,
            dkim_private_key: new.dkim_private_key,
            click_tracking: false,
            open_tracking: false,
            tls_mode: TlsMode::Opportunistic,
            aws_registered_at: None,
            created_at: now,
            updated_at: now,
        };

        self.domains.write().await.insert(domain.id, domain.clone());
        Ok(domain)
    }

    async fn get_domain(&self, id: i32) -> Result<Option<Domain>, DomainError> {
        Ok(self.domains.read().await.get(&id).cloned())
    }

    async fn list_domains(
        &self,
        team_id: i32,
        filter: &DomainFilter,
    ) -> Result<Vec<Domain>, DomainError> {
        let domains = self.domains.read().await;
        let mut matches: Vec<Domain> = domains
            .values()
            .filter(|d| d.team_id == team_id)
            .filter(|d| filter.status.map_or(true, |s| d.status == s))
            .filter(|d| filter.name.as_deref().map_or(true, |n| d.name == n))
            .cloned()
            .collect();

        matches.sort_by_key(|d| d.id);
        Ok(matches)
    }

    async fn find_verified_domain_by_name(
        &self,
        name: &str,
    ) -> Result<Option<Domain>, DomainError> {
        let domains = self.domains.read().await;
        Ok(domains
            .values()
            .find(|d| d.name == name && d.status == DomainStatus::Verified)
            .cloned())
    }

    async fn find_domains_by_name(&self, name: &str) -> Result<Vec<Domain>, DomainError> {
        let domains = self.domains.read().await;
        let mut matches: Vec<Domain> = domains
            .values()
            .filter(|d| d.name == name)
            .cloned()
            .collect();

        matches.sort_by_key(|d| d.id);
        Ok(matches)
    }

    async fn update_domain_status(
        &self,
        id: i32,
        status: DomainStatus,
    ) -> Result<Domain, DomainError> {
        let mut domains = self.domains.write().await;
        let domain = domains.get_mut(&id).ok_or(DomainError::DomainNotFound(id))?;
        domain.status = status;
        domain.updated_at = Utc::now();
        Ok(domain.clone())
    }

    async fn set_aws_registered_at(
        &self,
        id: i32,
        at: UtcDateTime,
    ) -> Result<Domain, DomainError> {
        let mut domains = self.domains.write().await;
        let domain = domains.get_mut(&id).ok_or(DomainError::DomainNotFound(id))?;
        domain.aws_registered_at = Some(at);
        domain.updated_at = Utc::now();
        Ok(domain.clone())
    }

    async fn update_sending_settings(
        &self,
        id: i32,
        update: &SendingSettingsUpdate,
    ) -> Result<Domain, DomainError> {
        let mut domains = self.domains.write().await;
        let domain = domains.get_mut(&id).ok_or(DomainError::DomainNotFound(id))?;

        if let Some(click_tracking) = update.click_tracking {
            domain.click_tracking = click_tracking;
        }
        if let Some(open_tracking) = update.open_tracking {
            domain.open_tracking = open_tracking;
        }
        if let Some(tls_mode) = update.tls_mode {
            domain.tls_mode = tls_mode;
        }
        domain.updated_at = Utc::now();
        Ok(domain.clone())
    }

    async fn delete_domain(&self, id: i32) -> Result<(), DomainError> {
        let mut domains = self.domains.write().await;
        domains.remove(&id).ok_or(DomainError::DomainNotFound(id))?;

        let mut records = self.records.write().await;
        records.retain(|_, r| r.domain_id != id);
        Ok(())
    }

    async fn create_records(
        &self,
        domain_id: i32,
        plan: &[PlannedDnsRecord],
    ) -> Result<Vec<DnsRecord>, DomainError> {
        let mut records = self.records.write().await;
        let mut created = Vec::with_capacity(plan.len());

        for planned in plan {
            let record = DnsRecord {
                id: self.next_record_id.fetch_add(1, Ordering::SeqCst),
                domain_id,
                kind: planned.kind,
                name: planned.name.clone(),
                record_type: planned.record_type,
                value: planned.value.clone(),
                priority: planned.priority,
                status: RecordStatus::Pending,
                last_checked_at: None,
            };
            records.insert(record.id, record.clone());
            created.push(record);
        }

        Ok(created)
    }

    async fn get_records(&self, domain_id: i32) -> Result<Vec<DnsRecord>, DomainError> {
        let records = self.records.read().await;
        let mut matches: Vec<DnsRecord> = records
            .values()
            .filter(|r| r.domain_id == domain_id)
            .cloned()
            .collect();

        matches.sort_by_key(|r| r.id);
        Ok(matches)
    }

    async fn update_record_status(
        &self,
        record_id: i32,
        status: RecordStatus,
        checked_at: UtcDateTime,
    ) -> Result<(), DomainError> {
        let mut records = self.records.write().await;
        let record = records
            .get_mut(&record_id)
            .ok_or(DomainError::RecordNotFound(record_id))?;
        record.status = status;
        record.last_checked_at = Some(checked_at);
        Ok(())
    }

    async fn reset_record_statuses(&self, domain_id: i32) -> Result<(), DomainError> {
        let mut records = self.records.write().await;
        for record in records.values_mut().filter(|r| r.domain_id == domain_id) {
            record.status = RecordStatus::Pending;
        }
        Ok(())
    }

    async fn create_ownership_history(
        &self,
        entry: NewOwnershipHistory,
    ) -> Result<OwnershipHistory, DomainError> {
        let history = OwnershipHistory {
            id: self.next_history_id.fetch_add(1, Ordering::SeqCst),
            domain_id: entry.domain_id,
            domain_name: entry.domain_name,
            previous_team_id: entry.previous_team_id,
            new_team_id: entry.new_team_id,
            transfer_reason: entry.transfer_reason,
            metadata: entry.metadata,
            created_at: Utc::now(),
        };

        self.history.write().await.push(history.clone());
        Ok(history)
    }

    async fn list_ownership_history(
        &self,
        domain_name: &str,
    ) -> Result<Vec<OwnershipHistory>, DomainError> {
        let history = self.history.read().await;
        Ok(history
            .iter()
            .filter(|h| h.domain_name == domain_name)
            .cloned()
            .collect())
    }
}
