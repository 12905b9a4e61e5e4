//! HTTP adapters - REST API implementations.

pub mod billing;

pub use billing::{billing_router, BillingAppState, ACTOR_HEADER, SIGNATURE_HEADER};
