//! Fiscal Desk - payment and subscription reconciliation engine
//!
//! Applies asynchronous payment-gateway events to local payments,
//! subscriptions, and service requests exactly once, tolerating duplicate
//! and out-of-order delivery.

pub mod adapters;
pub mod application;
pub mod config;
pub mod domain;
pub mod ports;
