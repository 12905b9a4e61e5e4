//! In-memory adapters for tests and local development.

mod billing_store;
mod collaborators;

pub use billing_store::{FailurePoint, InMemoryBillingStore, InMemoryTransaction};
pub use collaborators::{InMemoryNotificationLog, InMemoryPlanCatalog, RecordingScheduler};
