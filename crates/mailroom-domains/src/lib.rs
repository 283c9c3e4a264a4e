//! Domain verification pipeline for Mailroom
//!
//! This crate proves that a team owns a sending domain before the mail
//! provider will accept mail from it:
//! - DKIM key generation and DNS record planning
//! - Repeated, deadline-bounded DNS polling
//! - Provider (SES) registration and signal polling
//! - Domain lifecycle state machine with cross-tenant ownership transfer

pub mod config;
pub mod dns;
pub mod errors;
pub mod keys;
pub mod models;
pub mod planner;
pub mod providers;
pub mod repository;
pub mod services;
pub mod worker;

// Re-export main types
pub use config::VerificationConfig;
pub use errors::DomainError;
pub use models::{DnsRecord, DnsRecordOut, Domain, DomainFilter, DomainStatus};
pub use repository::{DomainRepository, InMemoryDomainRepository};
pub use services::{
    AddDomainRequest, DomainService, DomainWithRecords, VerificationScheduler,
    VerificationService,
};
pub use worker::VerificationWorker;
