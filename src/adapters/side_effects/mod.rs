//! Post-commit side-effect execution.

mod logging;
mod orchestrator;

pub use logging::{LoggingInvoiceGenerator, LoggingNotifier};
pub use orchestrator::{OrchestratorConfig, SideEffectOrchestrator};
