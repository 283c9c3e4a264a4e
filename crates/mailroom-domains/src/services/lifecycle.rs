//! Domain lifecycle state machine

use std::sync::Arc;

use tracing::info;

use crate::errors::DomainError;
use crate::models::{Domain, DomainStatus};
use crate::repository::DomainRepository;

/// Owns every status change. All transitions flow through here so
/// illegal edges are rejected in one place.
pub struct DomainLifecycle {
    repository: Arc<dyn DomainRepository>,
}

impl DomainLifecycle {
    pub fn new(repository: Arc<dyn DomainRepository>) -> Self {
        Self { repository }
    }

    /// Move `domain` to `next`, enforcing the allowed edges.
    ///
    /// The edge check runs against the stored row, not the caller's
    /// snapshot: a tick can hold a domain that another path has moved
    /// since, and its transition must lose.
    pub async fn transition(
        &self,
        domain: &Domain,
        next: DomainStatus,
    ) -> Result<Domain, DomainError> {
        let current = self
            .repository
            .get_domain(domain.id)
            .await?
            .ok_or(DomainError::DomainNotFound(domain.id))?;

        if !current.status.can_transition_to(next) {
            return Err(DomainError::InvalidTransition {
                from: current.status,
                to: next,
            });
        }

        let updated = self.repository.update_domain_status(domain.id, next).await?;
        info!(
            "Domain {} ({}) moved from {} to {}",
            domain.id, domain.name, current.status, next
        );
        Ok(updated)
    }
}
