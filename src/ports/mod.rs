//! Ports - Interfaces for external dependencies.
//!
//! Following hexagonal architecture, ports define the contracts between
//! the reconciliation engine and the outside world. Adapters implement them.
//!
//! ## Storage Ports
//!
//! - `BillingStore` / `BillingTransaction` - transactional ledger + aggregate access
//! - `PlanCatalog` - subscription plan lookup
//!
//! ## Collaborator Ports
//!
//! - `PaymentResolvedHook` - service-request workflow callback (in-transaction)
//! - `InvoiceGenerator`, `Notifier`, `NotificationLog` - side-effect targets
//! - `SideEffectScheduler` - detached post-commit execution

mod billing_store;
mod payment_resolved_hook;
mod plan_catalog;
mod side_effects;

pub use billing_store::{
    BillingStore, BillingTransaction, LedgerTransaction, PaymentLookup, PaymentTransaction,
    ServiceRequestTransaction, SubscriptionTransaction,
};
pub use payment_resolved_hook::PaymentResolvedHook;
pub use plan_catalog::{Plan, PlanCatalog};
pub use side_effects::{InvoiceGenerator, InvoiceRef, NotificationLog, Notifier, SideEffectScheduler};
