use anyhow::Result;
use folio_api::{
    config::AppConfig,
    routes::routes::app,
    services::{
        record_store::SqliteRecordStore, staging::StagingArea, upload_service::UploadService,
    },
    state::AppState,
};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use std::{io::ErrorKind, path::Path, str::FromStr, sync::Arc, time::Duration};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // --- Logging setup ---
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // --- Parse config + migrate flag ---
    let (cfg, migrate) = AppConfig::from_env_and_args()?;

    tracing::info!("Starting folio-api with config: {:?}", cfg);

    // --- Storage root: tmp/ for staged chunks, files/ for assembled uploads ---
    let staging = StagingArea::new(&cfg.storage_dir);
    staging.prepare().await?;
    tracing::info!("Upload storage ready at {}", cfg.storage_dir);

    // --- Initialize SQLite connection ---
    let db_url = &cfg.database_url;
    let connect_opts = SqliteConnectOptions::from_str(db_url)?.create_if_missing(true);
    if let Some(parent) = Path::new(connect_opts.get_filename()).parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            std::fs::create_dir_all(parent)?;
            tracing::info!("Created missing directory {:?}", parent);
        }
    }
    tracing::debug!("Connecting to SQLite at {}", db_url);

    let db = Arc::new(
        SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(connect_opts)
            .await?,
    );
    let records = SqliteRecordStore::new(db);
    records.migrate().await?;

    // --- Handle migration mode ---
    if migrate {
        tracing::info!("Database migration complete.");
        return Ok(()); // exit after migration
    }

    // --- Initialize core service ---
    let uploads = UploadService::new(staging, Arc::new(records.clone()));
    if let Some(secs) = cfg.reap_after_secs {
        tracing::info!("Reaping upload sessions older than {}s", secs);
        uploads.spawn_reaper(Duration::from_secs(secs));
    }

    let state = AppState::new(uploads, records, &cfg);
    let router = app(state, &cfg);

    // --- Start server ---
    let addr = cfg.addr();
    let listener = match TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(err)
            if err.kind() == ErrorKind::PermissionDenied
                && matches!(cfg.host.as_str(), "0.0.0.0" | "::") =>
        {
            let fallback_addr = format!("127.0.0.1:{}", cfg.port);
            tracing::warn!(
                "Permission denied binding to {} ({}). Falling back to {}",
                addr,
                err,
                fallback_addr
            );
            TcpListener::bind(&fallback_addr).await?
        }
        Err(err) => return Err(err.into()),
    };

    tracing::info!("Server listening on http://{}", listener.local_addr()?);
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::warn!("failed to listen for shutdown signal: {}", err);
    }
    tracing::info!("Shutting down");
}
