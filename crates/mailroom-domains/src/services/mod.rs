//! Domain verification services

mod domain_service;
mod lifecycle;
mod registrar;
mod scheduler;
mod transfer;
mod verification;

pub use domain_service::{AddDomainRequest, DomainService, DomainWithRecords};
pub use lifecycle::DomainLifecycle;
pub use registrar::{ProviderRegistrar, RegistrationOutcome};
pub use scheduler::VerificationScheduler;
pub use transfer::{OwnershipTransferResolver, TransferOutcome};
pub use verification::VerificationService;
