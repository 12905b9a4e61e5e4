//! Application layer - orchestrates domain operations through ports.
//!
//! - `reconciliation` - the gateway event pipeline
//! - `support` - operations for support staff and the background janitor

pub mod reconciliation;
pub mod support;

pub use reconciliation::{ProcessOutcome, ReconciliationEngine, ReplayResult};
pub use support::{
    Janitor, JanitorConfig, JanitorReport, ManualRefundCommand, SupportError, SupportService,
};
