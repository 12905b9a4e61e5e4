//! Reconciliation - applies verified gateway events to payments,
//! subscriptions, and service requests.
//!
//! ## Components
//!
//! - `IdempotencyLedger` - reserve-before-process policy, stale marker takeover
//! - `EventRouter` - event type to handler, `NoOpHandler` for the rest
//! - `handlers` - one handler per event family
//! - `ServiceRequestUnblocker` - workflow hook call after a payment resolves
//! - `ReconciliationEngine` - the transaction boundary tying it all together

mod engine;
mod handler;
pub mod handlers;
mod ledger;
mod router;
mod unblocker;

pub use engine::{ProcessOutcome, ReconciliationEngine, ReplayResult};
pub use handler::{correlation, EventHandler, HandlerContext, HandlerOutcome, OutcomeStatus};
pub use ledger::{IdempotencyLedger, DEFAULT_PROCESSING_TIMEOUT};
pub use router::{EventRouter, NoOpHandler};
pub use unblocker::ServiceRequestUnblocker;
