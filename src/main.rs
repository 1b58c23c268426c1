//! Campus sync - campus IoT monitoring API with periodic external data sync

use anyhow::Context;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use campus_sync::config::{Config, LogFormat};
use campus_sync::db::Database;
use campus_sync::routes;
use campus_sync::services::external_api::HttpExternalSource;
use campus_sync::shutdown::Shutdown;
use campus_sync::state::AppState;
use campus_sync::tasks::sync::{SyncService, SyncStats};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env().context("Failed to load configuration")?;

    init_tracing(config.log_format);

    info!(
        "Campus sync v{} starting on {}",
        env!("CARGO_PKG_VERSION"),
        config.listen_addr
    );
    info!(
        "Database: {}",
        config.database_url.split('@').last().unwrap_or("***")
    );

    let db = Database::new(&config.database_url, config.db_max_connections)
        .await
        .context("Failed to connect to database")?;
    db.migrate().await.context("Failed to run migrations")?;
    let db = Arc::new(db);

    let shutdown = Shutdown::new();
    let sync_stats = Arc::new(SyncStats::new());

    // Background sync task shares the request-serving pool
    let sync_handle = if config.sync.enabled {
        let source = HttpExternalSource::new(
            config.sync.external_api_url.clone(),
            config.sync.http_timeout,
        )?;
        info!("External source: {}", source.url());

        let service = SyncService::new(
            &config.sync,
            db.clone(),
            Arc::new(source),
            Arc::clone(&sync_stats),
            shutdown.listener(),
        );
        Some(tokio::spawn(service.run()))
    } else {
        warn!("SYNC_ENABLED=false, external data sync disabled");
        None
    };

    let state = AppState::new(db, sync_stats, config.sync.enabled);
    let app = routes::router(state);

    let listener = tokio::net::TcpListener::bind(config.listen_addr)
        .await
        .with_context(|| format!("Failed to bind to {}", config.listen_addr))?;

    info!("HTTP server listening on {}", config.listen_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "Failed to listen for shutdown signal");
                std::future::pending::<()>().await;
            }
            info!("Received shutdown signal");
            shutdown.trigger();
        })
        .await
        .context("HTTP server error")?;

    if let Some(handle) = sync_handle {
        if let Err(e) = handle.await {
            warn!(error = %e, "Data sync task ended abnormally");
        }
    }

    info!("Shutting down");
    Ok(())
}

fn init_tracing(format: LogFormat) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "campus_sync=info,tower_http=info".into());

    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json())
            .init(),
        LogFormat::Text => registry.with(tracing_subscriber::fmt::layer()).init(),
    }
}
