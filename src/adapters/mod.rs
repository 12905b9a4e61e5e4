//! Adapters - Implementations of port interfaces.
//!
//! - `postgres` - sqlx-backed store, plan catalog, and notification log
//! - `memory` - in-memory equivalents for tests and local runs
//! - `side_effects` - post-commit worker pool and logging collaborators
//! - `workflow` - default service-request workflow hook
//! - `http` - axum routers

pub mod http;
pub mod memory;
pub mod postgres;
pub mod side_effects;
pub mod workflow;
