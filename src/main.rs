//! Fiscal Desk reconciliation service.
//!
//! Serves the gateway webhook endpoint and the support API, runs the
//! side-effect orchestrator and the ledger janitor.

use std::sync::Arc;

use axum::{extract::DefaultBodyLimit, Router};
use tokio::sync::watch;
use tower::ServiceBuilder;
use tower_http::{
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer},
};
use tracing::Level;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use fiscal_desk::adapters::http::{billing_router, BillingAppState};
use fiscal_desk::adapters::postgres::{
    self, PostgresBillingStore, PostgresNotificationLog, PostgresPlanCatalog,
};
use fiscal_desk::adapters::side_effects::{
    LoggingInvoiceGenerator, LoggingNotifier, SideEffectOrchestrator,
};
use fiscal_desk::adapters::workflow::StatusWorkflowHook;
use fiscal_desk::application::reconciliation::IdempotencyLedger;
use fiscal_desk::application::{
    Janitor, JanitorConfig, ReconciliationEngine, SupportService,
};
use fiscal_desk::config::{AppConfig, ServerConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::load()?;
    config.validate()?;

    init_tracing(&config.server);

    tracing::info!(
        environment = ?config.server.environment,
        "Starting fiscal-desk"
    );

    let pool = postgres::connect(&config.database).await?;
    if config.database.run_migrations {
        postgres::run_migrations(&pool).await?;
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let store = Arc::new(PostgresBillingStore::new(pool.clone()));
    let plans = Arc::new(PostgresPlanCatalog::new(pool.clone()));
    let notifications = Arc::new(PostgresNotificationLog::new(pool.clone()));

    let (orchestrator, orchestrator_handle) = SideEffectOrchestrator::start(
        Arc::new(LoggingInvoiceGenerator),
        Arc::new(LoggingNotifier),
        notifications.clone(),
        config.side_effects.orchestrator(),
        shutdown_rx.clone(),
    );
    let scheduler = Arc::new(orchestrator);

    let engine = Arc::new(
        ReconciliationEngine::new(
            config.gateway.verifier(),
            store.clone(),
            plans,
            Arc::new(StatusWorkflowHook),
            scheduler.clone(),
        )
        .with_ledger(IdempotencyLedger::new(
            config.reconciliation.processing_timeout(),
        )),
    );

    let support = Arc::new(SupportService::new(
        store,
        engine.clone(),
        notifications,
        scheduler,
    ));

    let janitor = Janitor::new(
        support.clone(),
        JanitorConfig::default()
            .with_interval(config.reconciliation.purge_interval())
            .with_retention(config.reconciliation.retention()),
    );
    let janitor_rx = shutdown_rx.clone();
    let janitor_handle = tokio::spawn(async move { janitor.run(janitor_rx).await });

    let app = build_router(BillingAppState::new(engine, support), &config.server);

    let addr = config.server.socket_addr()?;
    tracing::info!("HTTP server listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("HTTP server stopped, draining background work");
    let _ = shutdown_tx.send(true);

    match tokio::time::timeout(config.server.shutdown_grace(), orchestrator_handle).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::error!(error = %e, "Side-effect orchestrator task failed"),
        Err(_) => tracing::warn!(
            grace_secs = config.server.shutdown_grace_secs,
            "Side effects still queued at shutdown; abandoning them"
        ),
    }
    if let Err(e) = janitor_handle.await {
        tracing::error!(error = %e, "Janitor task failed");
    }

    pool.close().await;
    tracing::info!("Shutdown complete");
    Ok(())
}

fn init_tracing(server: &ServerConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&server.log_level));

    let registry = tracing_subscriber::registry().with(filter);
    if server.json_logs() {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

fn build_router(state: BillingAppState, server: &ServerConfig) -> Router {
    let middleware = ServiceBuilder::new()
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(TimeoutLayer::new(server.request_timeout()));

    billing_router()
        .layer(DefaultBodyLimit::max(server.max_body_bytes))
        .layer(middleware)
        .with_state(state)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}
