//! Domain, DNS record, and ownership history models

use mailroom_core::UtcDateTime;
use serde::{Deserialize, Serialize};

/// Lifecycle status of a sending domain.
///
/// `pending_dns` and `pending_aws` are the two polling phases. `failed`
/// can be restarted by the owner, `revoked` cannot: it is only entered
/// when another tenant proves ownership of the same name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DomainStatus {
    PendingDns,
    PendingAws,
    Verified,
    Failed,
    Revoked,
}

impl DomainStatus {
    /// Whether the state machine allows moving from `self` to `next`.
    ///
    /// The `PendingDns -> PendingDns` self edge models a verification
    /// restart, which re-arms the deadline without changing state.
    pub fn can_transition_to(self, next: DomainStatus) -> bool {
        use DomainStatus::*;
        matches!(
            (self, next),
            (PendingDns, PendingAws)
                | (PendingDns, Failed)
                | (PendingDns, PendingDns)
                | (PendingAws, Verified)
                | (PendingAws, Failed)
                | (Failed, PendingDns)
                | (Verified, Revoked)
        )
    }

    /// Whether a verification phase is currently polling for this status.
    pub fn is_polling(self) -> bool {
        matches!(self, DomainStatus::PendingDns | DomainStatus::PendingAws)
    }
}

impl std::fmt::Display for DomainStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DomainStatus::PendingDns => write!(f, "pending_dns"),
            DomainStatus::PendingAws => write!(f, "pending_aws"),
            DomainStatus::Verified => write!(f, "verified"),
            DomainStatus::Failed => write!(f, "failed"),
            DomainStatus::Revoked => write!(f, "revoked"),
        }
    }
}

/// TLS policy applied to outbound connections for this domain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TlsMode {
    /// Use TLS when the receiving server offers it.
    Opportunistic,
    /// Refuse delivery without TLS.
    Require,
}

impl std::fmt::Display for TlsMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TlsMode::Opportunistic => write!(f, "opportunistic"),
            TlsMode::Require => write!(f, "require"),
        }
    }
}

/// A sending domain owned by a team.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Domain {
    pub id: i32,
    pub name: String,
    pub team_id: i32,
    pub status: DomainStatus,
    pub region: String,
    pub dkim_selector: String,
    /// Base64 SPKI body, published in the DKIM TXT record.
    pub dkim_public_key: String,
    /// Base64 PKCS#8 body, handed to the provider at registration.
    pub dkim_private_key: String,
    pub click_tracking: bool,
    pub open_tracking: bool,
    pub tls_mode: TlsMode,
    /// Set when the provider identity was created. Deletion only
    /// unregisters from the provider when this is present.
    pub aws_registered_at: Option<UtcDateTime>,
    pub created_at: UtcDateTime,
    pub updated_at: UtcDateTime,
}

/// Input for creating a domain row. Status is always `pending_dns`.
#[derive(Debug, Clone)]
pub struct NewDomain {
    pub name: String,
    pub team_id: i32,
    pub region: String,
    pub dkim_selector: String,
    pub dkim_public_key: String,
    pub dkim_private_key: String,
}

/// What a DNS record proves. Determines which provider signal maps onto it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DnsRecordKind {
    Dkim,
    Spf,
    Mx,
    Dmarc,
}

impl std::fmt::Display for DnsRecordKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DnsRecordKind::Dkim => write!(f, "dkim"),
            DnsRecordKind::Spf => write!(f, "spf"),
            DnsRecordKind::Mx => write!(f, "mx"),
            DnsRecordKind::Dmarc => write!(f, "dmarc"),
        }
    }
}

/// Wire type the record is published as.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RecordType {
    Txt,
    Mx,
}

impl std::fmt::Display for RecordType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RecordType::Txt => write!(f, "TXT"),
            RecordType::Mx => write!(f, "MX"),
        }
    }
}

/// Verification state of a single DNS record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordStatus {
    Pending,
    Verified,
    Failed,
}

impl std::fmt::Display for RecordStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RecordStatus::Pending => write!(f, "pending"),
            RecordStatus::Verified => write!(f, "verified"),
            RecordStatus::Failed => write!(f, "failed"),
        }
    }
}

/// A DNS record the owner must publish, created at plan time together
/// with the domain and mutated only by polling and provider mapping.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DnsRecord {
    pub id: i32,
    pub domain_id: i32,
    pub kind: DnsRecordKind,
    pub name: String,
    pub record_type: RecordType,
    pub value: String,
    /// Only MX records carry a priority.
    pub priority: Option<u16>,
    pub status: RecordStatus,
    pub last_checked_at: Option<UtcDateTime>,
}

/// DNS record shape returned to callers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DnsRecordOut {
    #[serde(rename = "type")]
    pub kind: DnsRecordKind,
    pub name: String,
    pub record_type: RecordType,
    pub value: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub priority: Option<u16>,
    pub status: RecordStatus,
}

impl From<&DnsRecord> for DnsRecordOut {
    fn from(record: &DnsRecord) -> Self {
        Self {
            kind: record.kind,
            name: record.name.clone(),
            record_type: record.record_type,
            value: record.value.clone(),
            priority: record.priority,
            status: record.status,
        }
    }
}

/// Append-only audit entry written when a domain name changes hands.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OwnershipHistory {
    pub id: i32,
    pub domain_id: i32,
    pub domain_name: String,
    pub previous_team_id: Option<i32>,
    pub new_team_id: i32,
    pub transfer_reason: String,
    pub metadata: serde_json::Value,
    pub created_at: UtcDateTime,
}

/// Input for an ownership history entry.
#[derive(Debug, Clone)]
pub struct NewOwnershipHistory {
    pub domain_id: i32,
    pub domain_name: String,
    pub previous_team_id: Option<i32>,
    pub new_team_id: i32,
    pub transfer_reason: String,
    pub metadata: serde_json::Value,
}

/// Partial update of per-domain sending settings. Not part of the
/// verification state machine.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SendingSettingsUpdate {
    pub click_tracking: Option<bool>,
    pub open_tracking: Option<bool>,
    pub tls_mode: Option<TlsMode>,
}

/// Filters for listing a team's domains.
#[derive(Debug, Clone, Default)]
pub struct DomainFilter {
    pub status: Option<DomainStatus>,
    pub name: Option<String>,
}
