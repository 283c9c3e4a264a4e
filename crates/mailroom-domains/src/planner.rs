//! DNS record planning
//!
//! Turns a domain's key material into the canonical set of records the
//! owner must publish. The plan doubles as user-facing setup
//! instructions and as the target the poller verifies against, so it
//! must be deterministic.

use serde::{Deserialize, Serialize};

use crate::models::{DnsRecordKind, RecordType};

/// Subdomain that carries SPF and bounce MX records. Splitting bounce
/// traffic onto a subdomain keeps the root domain's own mail setup
/// untouched.
pub const DEFAULT_MAIL_FROM_SUBDOMAIN: &str = "send";

/// Domain suffix of the provider's sending and feedback infrastructure.
pub const PROVIDER_DOMAIN: &str = "amazonses.com";

const MX_PRIORITY: u16 = 10;

/// A record in the plan, not yet persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlannedDnsRecord {
    pub kind: DnsRecordKind,
    pub name: String,
    pub record_type: RecordType,
    pub value: String,
    pub priority: Option<u16>,
}

/// Plan the four records for a domain: DKIM on the selector name, SPF
/// and MX on the mail-from subdomain, DMARC on `_dmarc`.
pub fn plan_records(
    domain_name: &str,
    selector: &str,
    public_key_b64: &str,
    region: &str,
) -> Vec<PlannedDnsRecord> {
    let mail_from_domain = format!("{}.{}", DEFAULT_MAIL_FROM_SUBDOMAIN, domain_name);

    vec![
        PlannedDnsRecord {
            kind: DnsRecordKind::Dkim,
            name: format!("{}._domainkey.{}", selector, domain_name),
            record_type: RecordType::Txt,
            value: format!("v=DKIM1; k=rsa; p={}", public_key_b64),
            priority: None,
        },
        PlannedDnsRecord {
            kind: DnsRecordKind::Spf,
            name: mail_from_domain.clone(),
            record_type: RecordType::Txt,
            value: format!("v=spf1 include:{} ~all", PROVIDER_DOMAIN),
            priority: None,
        },
        PlannedDnsRecord {
            kind: DnsRecordKind::Mx,
            name: mail_from_domain,
            record_type: RecordType::Mx,
            value: format!("feedback-smtp.{}.{}", region, PROVIDER_DOMAIN),
            priority: Some(MX_PRIORITY),
        },
        PlannedDnsRecord {
            kind: DnsRecordKind::Dmarc,
            name: format!("_dmarc.{}", domain_name),
            record_type: RecordType::Txt,
            value: format!("v=DMARC1; p=none; rua=mailto:dmarc@{}", domain_name),
            priority: None,
        },
    ]
}
