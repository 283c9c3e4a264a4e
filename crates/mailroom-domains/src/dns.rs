//! DNS resolution and record polling
//!
//! The poller compares planned records against live DNS. Lookups that
//! fail or return nothing are never a hard failure, the record just
//! stays pending until the phase deadline expires.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::join_all;
use hickory_resolver::config::{ResolverConfig, ResolverOpts};
use hickory_resolver::error::{ResolveError, ResolveErrorKind};
use hickory_resolver::TokioAsyncResolver;
use thiserror::Error;
use tracing::debug;

use crate::models::{DnsRecord, RecordStatus, RecordType};
use crate::planner::PlannedDnsRecord;

/// Lookup failure modes. The poller treats both as "not yet verified",
/// the split only matters for logging.
#[derive(Error, Debug)]
pub enum DnsLookupError {
    #[error("No records found for {0}")]
    NotFound(String),

    #[error("Lookup failed for {0}: {1}")]
    Transient(String, String),
}

/// One MX answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MxExchange {
    pub exchange: String,
    pub priority: u16,
}

/// Read-only DNS lookups against public resolvers.
#[async_trait]
pub trait DnsResolver: Send + Sync {
    /// TXT values for `name`, chunks of each record joined.
    async fn resolve_txt(&self, name: &str) -> Result<Vec<String>, DnsLookupError>;

    async fn resolve_mx(&self, name: &str) -> Result<Vec<MxExchange>, DnsLookupError>;

    async fn resolve_cname(&self, name: &str) -> Result<Vec<String>, DnsLookupError>;
}

/// Resolver backed by hickory against Cloudflare's public servers.
pub struct HickoryDnsResolver {
    resolver: TokioAsyncResolver,
}

impl Default for HickoryDnsResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl HickoryDnsResolver {
    pub fn new() -> Self {
        let mut options = ResolverOpts::default();
        options.try_tcp_on_error = true;
        options.use_hosts_file = false;

        let resolver = TokioAsyncResolver::tokio(ResolverConfig::cloudflare(), options);

        Self { resolver }
    }
}

fn classify_error(name: &str, e: ResolveError) -> DnsLookupError {
    match e.kind() {
        ResolveErrorKind::NoRecordsFound { .. } => DnsLookupError::NotFound(name.to_string()),
        _ => DnsLookupError::Transient(name.to_string(), e.to_string()),
    }
}

#[async_trait]
impl DnsResolver for HickoryDnsResolver {
    async fn resolve_txt(&self, name: &str) -> Result<Vec<String>, DnsLookupError> {
        let lookup = self
            .resolver
            .txt_lookup(name)
            .await
            .map_err(|e| classify_error(name, e))?;

        Ok(lookup
            .iter()
            .map(|record| {
                record
                    .txt_data()
                    .iter()
                    .map(|data| String::from_utf8_lossy(data).to_string())
                    .collect()
            })
            .collect())
    }

    async fn resolve_mx(&self, name: &str) -> Result<Vec<MxExchange>, DnsLookupError> {
        let lookup = self
            .resolver
            .mx_lookup(name)
            .await
            .map_err(|e| classify_error(name, e))?;

        Ok(lookup
            .iter()
            .map(|record| MxExchange {
                exchange: record.exchange().to_string(),
                priority: record.preference(),
            })
            .collect())
    }

    async fn resolve_cname(&self, name: &str) -> Result<Vec<String>, DnsLookupError> {
        let lookup = self
            .resolver
            .lookup(name, hickory_resolver::proto::rr::RecordType::CNAME)
            .await
            .map_err(|e| classify_error(name, e))?;

        Ok(lookup
            .iter()
            .filter_map(|record| record.as_cname().map(|cname| cname.to_string()))
            .collect())
    }
}

/// Normalize a record value for comparison. Resolvers hand TXT data
/// back chunked, quoted, and sometimes escaped, so strip backslashes,
/// double quotes, and all whitespace from both sides before comparing.
pub fn normalize_value(value: &str) -> String {
    value
        .chars()
        .filter(|c| *c != '\\' && *c != '"' && !c.is_whitespace())
        .collect()
}

/// Checks planned records against live DNS.
pub struct DnsPoller {
    resolver: Arc<dyn DnsResolver>,
}

impl DnsPoller {
    pub fn new(resolver: Arc<dyn DnsResolver>) -> Self {
        Self { resolver }
    }

    /// Check every record of a domain. Lookups run concurrently, there
    /// is no ordering between records. Returns (record id, fresh status).
    pub async fn check_records(&self, records: &[DnsRecord]) -> Vec<(i32, RecordStatus)> {
        let checks = records
            .iter()
            .map(|record| async move { (record.id, self.check_record(record).await) });

        join_all(checks).await
    }

    /// Check one persisted record.
    pub async fn check_record(&self, record: &DnsRecord) -> RecordStatus {
        self.verify(
            &record.name,
            record.record_type,
            &record.value,
            record.priority,
        )
        .await
    }

    /// Check one planned record that has not been persisted yet.
    pub async fn check_planned(&self, record: &PlannedDnsRecord) -> RecordStatus {
        self.verify(
            &record.name,
            record.record_type,
            &record.value,
            record.priority,
        )
        .await
    }

    async fn verify(
        &self,
        name: &str,
        record_type: RecordType,
        expected: &str,
        priority: Option<u16>,
    ) -> RecordStatus {
        match record_type {
            RecordType::Txt => self.verify_txt(name, expected).await,
            RecordType::Mx => self.verify_mx(name, expected, priority).await,
        }
    }

    async fn verify_txt(&self, name: &str, expected: &str) -> RecordStatus {
        debug!("Verifying TXT record: {} = {}", name, expected);

        match self.resolver.resolve_txt(name).await {
            Ok(values) => {
                let want = normalize_value(expected);
                for value in values {
                    debug!("Found TXT record: {}", value);
                    if normalize_value(&value) == want {
                        return RecordStatus::Verified;
                    }
                }

                debug!(
                    "TXT records found for {} but no match for expected value",
                    name
                );
                RecordStatus::Pending
            }
            Err(e) => {
                debug!("TXT lookup for {} not conclusive: {}", name, e);
                RecordStatus::Pending
            }
        }
    }

    async fn verify_mx(
        &self,
        name: &str,
        expected: &str,
        expected_priority: Option<u16>,
    ) -> RecordStatus {
        debug!(
            "Verifying MX record: {} -> {} (priority: {:?})",
            name, expected, expected_priority
        );

        match self.resolver.resolve_mx(name).await {
            Ok(exchanges) => {
                let expected_clean = expected.trim_end_matches('.');

                for mx in exchanges {
                    debug!("Found MX record: {} (priority: {})", mx.exchange, mx.priority);

                    let exchange_clean = mx.exchange.trim_end_matches('.');
                    if exchange_clean.eq_ignore_ascii_case(expected_clean) {
                        if let Some(priority) = expected_priority {
                            if mx.priority == priority {
                                return RecordStatus::Verified;
                            }
                        } else {
                            return RecordStatus::Verified;
                        }
                    }
                }

                debug!(
                    "MX records found for {} but no match for expected value",
                    name
                );
                RecordStatus::Pending
            }
            Err(e) => {
                debug!("MX lookup for {} not conclusive: {}", name, e);
                RecordStatus::Pending
            }
        }
    }
}

/// In-memory resolver for tests.
#[derive(Debug, Clone, Default)]
pub struct MockDnsResolver {
    txt: HashMap<String, Vec<String>>,
    mx: HashMap<String, Vec<MxExchange>>,
    cname: HashMap<String, Vec<String>>,
    transient_failures: HashSet<String>,
}

impl MockDnsResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_txt(mut self, name: &str, value: &str) -> Self {
        self.txt
            .entry(name.to_string())
            .or_default()
            .push(value.to_string());
        self
    }

    pub fn with_mx(mut self, name: &str, exchange: &str, priority: u16) -> Self {
        self.mx.entry(name.to_string()).or_default().push(MxExchange {
            exchange: exchange.to_string(),
            priority,
        });
        self
    }

    pub fn with_cname(mut self, name: &str, target: &str) -> Self {
        self.cname
            .entry(name.to_string())
            .or_default()
            .push(target.to_string());
        self
    }

    /// Every lookup of `name` fails as if the resolver were unreachable.
    pub fn with_transient_failure(mut self, name: &str) -> Self {
        self.transient_failures.insert(name.to_string());
        self
    }

    /// Publish every record of a plan, the way a correctly configured
    /// DNS host would.
    pub fn with_plan(mut self, plan: &[PlannedDnsRecord]) -> Self {
        for record in plan {
            match record.record_type {
                RecordType::Txt => {
                    self = self.with_txt(&record.name, &record.value);
                }
                RecordType::Mx => {
                    self = self.with_mx(&record.name, &record.value, record.priority.unwrap_or(0));
                }
            }
        }
        self
    }

    fn check_failure(&self, name: &str) -> Result<(), DnsLookupError> {
        if self.transient_failures.contains(name) {
            return Err(DnsLookupError::Transient(
                name.to_string(),
                "simulated resolver failure".to_string(),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl DnsResolver for MockDnsResolver {
    async fn resolve_txt(&self, name: &str) -> Result<Vec<String>, DnsLookupError> {
        self.check_failure(name)?;
        self.txt
            .get(name)
            .cloned()
            .ok_or_else(|| DnsLookupError::NotFound(name.to_string()))
    }

    async fn resolve_mx(&self, name: &str) -> Result<Vec<MxExchange>, DnsLookupError> {
        self.check_failure(name)?;
        self.mx
            .get(name)
            .cloned()
            .ok_or_else(|| DnsLookupError::NotFound(name.to_string()))
    }

    async fn resolve_cname(&self, name: &str) -> Result<Vec<String>, DnsLookupError> {
        self.check_failure(name)?;
        self.cname
            .get(name)
            .cloned()
            .ok_or_else(|| DnsLookupError::NotFound(name.to_string()))
    }
}
