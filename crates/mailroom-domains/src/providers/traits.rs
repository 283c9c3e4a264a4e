//! Mail provider trait definitions

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::errors::DomainError;

/// Status of one provider-reported verification signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalStatus {
    NotStarted,
    Pending,
    Success,
    Failed,
    TemporaryFailure,
}

impl SignalStatus {
    pub fn is_success(self) -> bool {
        matches!(self, SignalStatus::Success)
    }

    pub fn is_failed(self) -> bool {
        matches!(self, SignalStatus::Failed)
    }
}

impl std::fmt::Display for SignalStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SignalStatus::NotStarted => write!(f, "not_started"),
            SignalStatus::Pending => write!(f, "pending"),
            SignalStatus::Success => write!(f, "success"),
            SignalStatus::Failed => write!(f, "failed"),
            SignalStatus::TemporaryFailure => write!(f, "temporary_failure"),
        }
    }
}

/// Verification signals the provider reports for one identity.
///
/// There is no provider-side DMARC signal; DMARC is derived locally
/// once DKIM and mail-from both succeed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderVerificationStatus {
    /// DKIM signing status.
    pub dkim: SignalStatus,
    /// Custom mail-from (bounce) domain status.
    pub mail_from: SignalStatus,
}

impl ProviderVerificationStatus {
    pub fn all_successful(self) -> bool {
        self.dkim.is_success() && self.mail_from.is_success()
    }

    pub fn any_failed(self) -> bool {
        self.dkim.is_failed() || self.mail_from.is_failed()
    }
}

/// The mail-provider capability the verification pipeline depends on.
///
/// Identities are keyed by domain name, not by tenant, so at most one
/// identity per name can exist at the provider.
#[async_trait]
pub trait MailProvider: Send + Sync {
    /// Create an identity for `domain`, signing with the caller's own
    /// DKIM private key (base64 PKCS#8 body) under `selector`.
    async fn create_identity(
        &self,
        domain: &str,
        selector: &str,
        private_key: &str,
    ) -> Result<(), DomainError>;

    /// Point bounce and feedback traffic at the mail-from subdomain.
    async fn configure_bounce_domain(&self, domain: &str) -> Result<(), DomainError>;

    async fn get_verification_status(
        &self,
        domain: &str,
    ) -> Result<ProviderVerificationStatus, DomainError>;

    /// Delete the identity. Deleting an unknown identity is not an error.
    async fn delete_identity(&self, domain: &str) -> Result<(), DomainError>;

    /// Whether any tenant's identity exists for this name.
    async fn identity_exists(&self, domain: &str) -> Result<bool, DomainError>;
}
