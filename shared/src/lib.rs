pub mod ledger;
pub mod models;
pub mod orders;
pub mod paths;
pub mod processor;
pub mod store;
pub mod stripe;

#[cfg(feature = "test-utils")]
pub mod testing;

pub use models::*;
pub use processor::{PaymentProcessor, ProcessorError};
pub use store::{Store, StoreError, Transaction};
