//! Service configuration.
//!
//! Everything comes from the environment: `FISCAL_DESK__<SECTION>__<KEY>`,
//! with a `.env` file honoured in development. `database` and `gateway`
//! have required keys; every other section falls back to defaults.
//!
//! ```no_run
//! use fiscal_desk::config::AppConfig;
//!
//! let config = AppConfig::load().expect("configuration");
//! config.validate().expect("valid configuration");
//! ```

mod database;
mod error;
mod gateway;
mod reconciliation;
mod server;
mod side_effects;

pub use database::DatabaseConfig;
pub use error::{ConfigError, ValidationError};
pub use gateway::GatewayConfig;
pub use reconciliation::ReconciliationConfig;
pub use server::{Environment, ServerConfig};
pub use side_effects::SideEffectsConfig;

use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,

    pub database: DatabaseConfig,

    pub gateway: GatewayConfig,

    #[serde(default)]
    pub reconciliation: ReconciliationConfig,

    #[serde(default)]
    pub side_effects: SideEffectsConfig,
}

impl AppConfig {
    /// Reads the environment (after `.env`, if present).
    ///
    /// `FISCAL_DESK__SERVER__PORT=8080` sets `server.port`;
    /// `FISCAL_DESK__GATEWAY__WEBHOOK_SECRET=whsec_...` sets the signing secret.
    pub fn load() -> Result<Self, ConfigError> {
        if let Err(e) = dotenvy::dotenv() {
            if !e.not_found() {
                return Err(ConfigError::Dotenv(e.to_string()));
            }
        }

        let config = config::Config::builder()
            .add_source(
                config::Environment::with_prefix("FISCAL_DESK")
                    .prefix_separator("__")
                    .separator("__"),
            )
            .build()?
            .try_deserialize()?;

        Ok(config)
    }

    /// Checks every section; the first violation wins.
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.server.validate()?;
        self.database.validate()?;
        self.gateway.validate()?;
        self.reconciliation.validate()?;
        self.side_effects.validate()
    }

    pub fn is_production(&self) -> bool {
        self.server.is_production()
    }
}
