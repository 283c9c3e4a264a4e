//! Mock mail provider for testing

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;

use super::traits::{MailProvider, ProviderVerificationStatus, SignalStatus};
use crate::errors::DomainError;

/// Mock mail provider for testing. Clones share identity state,
/// signals, and call counters.
#[derive(Debug, Clone)]
pub struct MockMailProvider {
    /// Counters for tracking calls
    pub create_identity_count: Arc<AtomicUsize>,
    pub configure_bounce_count: Arc<AtomicUsize>,
    pub get_status_count: Arc<AtomicUsize>,
    pub delete_identity_count: Arc<AtomicUsize>,
    pub identity_exists_count: Arc<AtomicUsize>,

    identities: Arc<Mutex<HashSet<String>>>,
    signals: Arc<Mutex<ProviderVerificationStatus>>,
    last_signing_material: Arc<Mutex<Option<(String, String)>>>,

    /// Configurable failures
    pub should_fail_create: bool,
    pub should_fail_status: bool,
}

impl Default for MockMailProvider {
    fn default() -> Self {
        Self::new()
    }
}

fn locked<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl MockMailProvider {
    pub fn new() -> Self {
        Self {
            create_identity_count: Arc::new(AtomicUsize::new(0)),
            configure_bounce_count: Arc::new(AtomicUsize::new(0)),
            get_status_count: Arc::new(AtomicUsize::new(0)),
            delete_identity_count: Arc::new(AtomicUsize::new(0)),
            identity_exists_count: Arc::new(AtomicUsize::new(0)),
            identities: Arc::new(Mutex::new(HashSet::new())),
            signals: Arc::new(Mutex::new(ProviderVerificationStatus {
                dkim: SignalStatus::Pending,
                mail_from: SignalStatus::Pending,
            })),
            last_signing_material: Arc::new(Mutex::new(None)),
            should_fail_create: false,
            should_fail_status: false,
        }
    }

    /// Seed an identity as if another tenant had registered this name.
    pub fn with_existing_identity(self, domain: &str) -> Self {
        locked(&self.identities).insert(domain.to_string());
        self
    }

    pub fn with_create_failure(mut self) -> Self {
        self.should_fail_create = true;
        self
    }

    pub fn with_status_failure(mut self) -> Self {
        self.should_fail_status = true;
        self
    }

    pub fn with_signals(self, dkim: SignalStatus, mail_from: SignalStatus) -> Self {
        self.set_signals(dkim, mail_from);
        self
    }

    /// Flip the reported signals mid-test.
    pub fn set_signals(&self, dkim: SignalStatus, mail_from: SignalStatus) {
        *locked(&self.signals) = ProviderVerificationStatus { dkim, mail_from };
    }

    pub fn has_identity(&self, domain: &str) -> bool {
        locked(&self.identities).contains(domain)
    }

    /// Selector and private key from the most recent `create_identity`.
    pub fn last_signing_material(&self) -> Option<(String, String)> {
        locked(&self.last_signing_material).clone()
    }

    pub fn create_identity_call_count(&self) -> usize {
        self.create_identity_count.load(Ordering::SeqCst)
    }

    pub fn configure_bounce_call_count(&self) -> usize {
        self.configure_bounce_count.load(Ordering::SeqCst)
    }

    pub fn get_status_call_count(&self) -> usize {
        self.get_status_count.load(Ordering::SeqCst)
    }

    pub fn delete_identity_call_count(&self) -> usize {
        self.delete_identity_count.load(Ordering::SeqCst)
    }

    pub fn identity_exists_call_count(&self) -> usize {
        self.identity_exists_count.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MailProvider for MockMailProvider {
    async fn create_identity(
        &self,
        domain: &str,
        selector: &str,
        private_key: &str,
    ) -> Result<(), DomainError> {
        self.create_identity_count.fetch_add(1, Ordering::SeqCst);

        if self.should_fail_create {
            return Err(DomainError::Provider(
                "Mock identity creation failure".to_string(),
            ));
        }

        locked(&self.identities).insert(domain.to_string());
        *locked(&self.last_signing_material) =
            Some((selector.to_string(), private_key.to_string()));
        Ok(())
    }

    async fn configure_bounce_domain(&self, domain: &str) -> Result<(), DomainError> {
        self.configure_bounce_count.fetch_add(1, Ordering::SeqCst);

        if !locked(&self.identities).contains(domain) {
            return Err(DomainError::Provider(format!(
                "No identity for {}",
                domain
            )));
        }
        Ok(())
    }

    async fn get_verification_status(
        &self,
        _domain: &str,
    ) -> Result<ProviderVerificationStatus, DomainError> {
        self.get_status_count.fetch_add(1, Ordering::SeqCst);

        if self.should_fail_status {
            return Err(DomainError::Provider(
                "Mock status failure".to_string(),
            ));
        }

        Ok(*locked(&self.signals))
    }

    async fn delete_identity(&self, domain: &str) -> Result<(), DomainError> {
        self.delete_identity_count.fetch_add(1, Ordering::SeqCst);
        locked(&self.identities).remove(domain);
        Ok(())
    }

    async fn identity_exists(&self, domain: &str) -> Result<bool, DomainError> {
        self.identity_exists_count.fetch_add(1, Ordering::SeqCst);
        Ok(locked(&self.identities).contains(domain))
    }
}
