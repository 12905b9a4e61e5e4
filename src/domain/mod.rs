//! Domain layer containing business logic and domain types.
//!
//! # Module Organization
//!
//! - `foundation` - Shared domain primitives (IDs, timestamps, errors, state machine trait)
//! - `billing` - Payments, subscriptions, gateway events, and the reconciliation taxonomy

pub mod billing;
pub mod foundation;
