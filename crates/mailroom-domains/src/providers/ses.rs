//! AWS SES mail provider implementation
//!
//! Identities are created with bring-your-own-DKIM signing attributes,
//! so the DKIM key pair generated for the domain is the one SES signs
//! with, and the public half in the planned TXT record stays valid.

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_sesv2::config::{Credentials, Region};
use aws_sdk_sesv2::error::SdkError;
use aws_sdk_sesv2::types::{BehaviorOnMxFailure, DkimSigningAttributes};
use aws_sdk_sesv2::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::traits::{MailProvider, ProviderVerificationStatus, SignalStatus};
use crate::errors::DomainError;
use crate::planner::DEFAULT_MAIL_FROM_SUBDOMAIN;

/// Static credentials for the SES client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SesCredentials {
    pub access_key_id: String,
    pub secret_access_key: String,
    /// Custom endpoint, for LocalStack or other AWS-compatible stand-ins.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint_url: Option<String>,
}

/// SES-backed provider.
pub struct SesMailProvider {
    client: Client,
    region: String,
}

impl SesMailProvider {
    /// Build a client for `region` with static credentials.
    pub async fn new(credentials: &SesCredentials, region: &str) -> Result<Self, DomainError> {
        let creds = Credentials::new(
            &credentials.access_key_id,
            &credentials.secret_access_key,
            None,
            None,
            "mailroom-domains",
        );

        let mut config_builder = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(region.to_string()))
            .credentials_provider(creds);

        if let Some(ref endpoint_url) = credentials.endpoint_url {
            config_builder = config_builder.endpoint_url(endpoint_url);
        }

        let config = config_builder.load().await;
        let client = Client::new(&config);

        Ok(Self {
            client,
            region: region.to_string(),
        })
    }

    /// Region the client was built for.
    pub fn region(&self) -> &str {
        &self.region
    }
}

fn signal_from_str(status: &str) -> SignalStatus {
    match status {
        "SUCCESS" => SignalStatus::Success,
        "PENDING" => SignalStatus::Pending,
        "FAILED" => SignalStatus::Failed,
        "TEMPORARY_FAILURE" => SignalStatus::TemporaryFailure,
        "NOT_STARTED" => SignalStatus::NotStarted,
        _ => SignalStatus::Pending,
    }
}

#[async_trait]
impl MailProvider for SesMailProvider {
    async fn create_identity(
        &self,
        domain: &str,
        selector: &str,
        private_key: &str,
    ) -> Result<(), DomainError> {
        debug!(
            "Creating SES identity for domain: {} with selector: {}",
            domain, selector
        );

        let signing_attributes = DkimSigningAttributes::builder()
            .domain_signing_selector(selector)
            .domain_signing_private_key(private_key)
            .build();

        self.client
            .create_email_identity()
            .email_identity(domain)
            .dkim_signing_attributes(signing_attributes)
            .send()
            .await
            .map_err(|e| DomainError::Provider(format!("Failed to create identity: {}", e)))?;

        Ok(())
    }

    async fn configure_bounce_domain(&self, domain: &str) -> Result<(), DomainError> {
        let mail_from_domain = format!("{}.{}", DEFAULT_MAIL_FROM_SUBDOMAIN, domain);

        debug!(
            "Configuring custom MAIL FROM: {} for domain: {}",
            mail_from_domain, domain
        );

        self.client
            .put_email_identity_mail_from_attributes()
            .email_identity(domain)
            .mail_from_domain(&mail_from_domain)
            .behavior_on_mx_failure(BehaviorOnMxFailure::UseDefaultValue)
            .send()
            .await
            .map_err(|e| DomainError::Provider(format!("Failed to configure MAIL FROM: {}", e)))?;

        Ok(())
    }

    async fn get_verification_status(
        &self,
        domain: &str,
    ) -> Result<ProviderVerificationStatus, DomainError> {
        debug!("Fetching SES verification status for domain: {}", domain);

        let result = self
            .client
            .get_email_identity()
            .email_identity(domain)
            .send()
            .await
            .map_err(|e| DomainError::Provider(format!("Failed to get identity: {}", e)))?;

        let dkim = result
            .dkim_attributes()
            .and_then(|attrs| attrs.status())
            .map(|status| signal_from_str(status.as_str()))
            .unwrap_or(SignalStatus::NotStarted);

        let mail_from = result
            .mail_from_attributes()
            .map(|attrs| signal_from_str(attrs.mail_from_domain_status.as_str()))
            .unwrap_or(SignalStatus::NotStarted);

        Ok(ProviderVerificationStatus { dkim, mail_from })
    }

    async fn delete_identity(&self, domain: &str) -> Result<(), DomainError> {
        debug!("Deleting SES identity for domain: {}", domain);

        match self
            .client
            .delete_email_identity()
            .email_identity(domain)
            .send()
            .await
        {
            Ok(_) => Ok(()),
            Err(SdkError::ServiceError(ref service_err))
                if service_err.err().is_not_found_exception() =>
            {
                debug!("SES identity for {} already gone", domain);
                Ok(())
            }
            Err(e) => Err(DomainError::Provider(format!(
                "Failed to delete identity: {}",
                e
            ))),
        }
    }

    async fn identity_exists(&self, domain: &str) -> Result<bool, DomainError> {
        match self
            .client
            .get_email_identity()
            .email_identity(domain)
            .send()
            .await
        {
            Ok(_) => Ok(true),
            Err(SdkError::ServiceError(ref service_err))
                if service_err.err().is_not_found_exception() =>
            {
                Ok(false)
            }
            Err(e) => Err(DomainError::Provider(format!(
                "Failed to check identity: {}",
                e
            ))),
        }
    }
}
