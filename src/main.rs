use anyhow::{Context, Result};
use presigned_store::{
    config::AppConfig,
    routes::routes,
    services::{
        authorizer::Authorizer, registry::PresignedUrlRegistry, signer::Signer,
        storage_service::StorageService,
    },
    state::AppState,
};
use std::{io::ErrorKind, sync::Arc};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // --- Logging setup ---
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // --- Parse config + reconcile flag ---
    let (cfg, reconcile) = AppConfig::from_env_and_args()?;

    tracing::info!("Starting presigned-store with config: {:?}", cfg);

    // --- Open object store (creates storage directory, loads index) ---
    let storage = StorageService::open(&cfg.storage_dir, &cfg.metadata_path)
        .await
        .with_context(|| format!("opening storage at {}", cfg.storage_dir))?;

    // --- Handle reconcile mode ---
    if reconcile {
        let report = storage.reconcile(true).await?;
        tracing::info!(
            orphaned = report.orphaned_metadata.len(),
            untracked = report.untracked_objects.len(),
            stale_temp_files = report.stale_temp_files,
            "Reconciliation complete."
        );
        return Ok(()); // exit after reconcile
    }

    let report = storage.reconcile(false).await?;
    if !report.is_consistent() {
        tracing::warn!(
            orphaned = ?report.orphaned_metadata,
            untracked = ?report.untracked_objects,
            "metadata index out of sync with stored objects; run with --reconcile"
        );
    }

    // --- Authorization ---
    let signer = Signer::new(&cfg.signing_secret)?;
    let registry = Arc::new(PresignedUrlRegistry::new());
    let sweeper = registry.spawn_sweeper(cfg.sweep_interval);
    if cfg.allow_unsigned {
        tracing::warn!("unsigned requests are admitted without authentication");
    }
    let authorizer = Arc::new(Authorizer::new(
        signer,
        registry,
        cfg.allow_unsigned,
        cfg.public_url.clone(),
    ));

    // --- Build router ---
    let app = routes::app(AppState::new(storage, authorizer));

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
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    sweeper.shutdown().await;
    tracing::info!("Server shutdown complete");
    Ok(())
}

/// Resolves on Ctrl-C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::warn!("failed to listen for Ctrl-C: {}", err);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                tracing::warn!("failed to install SIGTERM handler: {}", err);
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
