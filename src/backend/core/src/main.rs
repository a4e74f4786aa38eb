//! Quorum Server - Main entry point

use std::sync::Arc;

use quorum_core::{
    api::{self, AppState},
    config::Config,
    db::Database,
    events::EventStore,
    identity::IdentityStore,
    service::QaService,
    store::MemoryStore,
    telemetry::init_telemetry,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let config = Config::load().unwrap_or_else(|e| {
        eprintln!("Warning: Could not load config: {}. Using defaults.", e);
        Config::default()
    });

    let telemetry = init_telemetry(&config.telemetry)?;

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "Starting Quorum server");

    let (identities, events): (Arc<dyn IdentityStore>, Arc<dyn EventStore>) = match &config.database.url {
        Some(url) => {
            let db = Arc::new(Database::new(&config.database, url, config.store.operation_timeout).await?);
            if config.database.run_migrations {
                db.migrate().await?;
                tracing::info!("Database migrations applied");
            }
            tracing::info!("Connected to database");
            (db.clone(), db)
        }
        None => {
            tracing::warn!("No database configured, state lives in memory and is lost on restart");
            let store = Arc::new(MemoryStore::new());
            (store.clone(), store)
        }
    };

    let service = Arc::new(QaService::new(identities, events, &config));
    let app = api::build_router(AppState::new(service, telemetry.metrics.clone()));

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(address = %addr, "Starting HTTP server");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    telemetry.shutdown();
    tracing::info!("Server shutdown complete");

    Ok(())
}

/// Wait for shutdown signal.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
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
