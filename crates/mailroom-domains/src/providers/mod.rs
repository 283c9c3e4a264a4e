//! Mail provider abstractions and implementations

mod mock;
mod ses;
mod traits;

pub use mock::MockMailProvider;
pub use ses::{SesCredentials, SesMailProvider};
pub use traits::*;
