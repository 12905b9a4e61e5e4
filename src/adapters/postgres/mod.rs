//! PostgreSQL adapters - Database implementations for the storage ports.
//!
//! - `PostgresBillingStore` - transactional ledger, payments, subscriptions,
//!   and the service-request status column
//! - `PostgresPlanCatalog` - read-only plan lookup
//! - `PostgresNotificationLog` - notification attempts for support resend

mod billing_store;
mod catalog;
mod rows;

pub use billing_store::{PostgresBillingStore, PostgresTransaction};
pub use catalog::{PostgresNotificationLog, PostgresPlanCatalog};

use std::str::FromStr;

use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use sqlx::PgPool;

use crate::config::DatabaseConfig;

/// Opens the connection pool with the configured statement timeout applied
/// to every session.
pub async fn connect(config: &DatabaseConfig) -> Result<PgPool, sqlx::Error> {
    let statement_timeout_ms = config.statement_timeout().as_millis().to_string();
    let options = PgConnectOptions::from_str(&config.url)?
        .options([("statement_timeout", statement_timeout_ms.as_str())]);

    PgPoolOptions::new()
        .min_connections(config.min_connections)
        .max_connections(config.max_connections)
        .acquire_timeout(config.acquire_timeout())
        .connect_with(options)
        .await
}

pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::migrate::MigrateError> {
    tracing::info!("Running database migrations");
    sqlx::migrate!("./migrations").run(pool).await?;
    tracing::info!("Database migrations completed");
    Ok(())
}
