//! Support operations - what staff use when automated reconciliation
//! could not finish on its own.

mod errors;
mod janitor;
mod service;

pub use errors::SupportError;
pub use janitor::{Janitor, JanitorConfig, JanitorReport};
pub use service::{ManualRefundCommand, SupportService};
