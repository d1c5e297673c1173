//! tenantry Control Plane
//!
//! Registers tenants, provisions one runtime unit per tenant and reports
//! how the runtime compares with the registry.

use std::sync::Arc;

use anyhow::Result;
use tenantry_control_plane::{
    api,
    config::{self, RegistryBackend},
    db::Database,
    registry::{MemoryRegistry, TenantRegistry},
    runtime::RuntimeClient,
    state::AppState,
};
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = config::Config::from_env()?;

    // Initialize tracing (prefer RUST_LOG, fallback to TENANTRY_LOG_LEVEL)
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| config.log_level.clone().into()))
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("Starting tenantry control plane");
    info!(
        listen_addr = %config.listen_addr,
        registry = ?config.registry,
        base_domain = %config.provisioning.base_domain,
        "Configuration loaded"
    );

    let registry: Arc<dyn TenantRegistry> = match config.registry {
        RegistryBackend::Postgres => {
            let db = match Database::connect(&config.database).await {
                Ok(db) => {
                    info!("Database connection established");
                    db
                }
                Err(e) => {
                    error!(error = %e, "Failed to connect to database");
                    return Err(e.into());
                }
            };

            // Run migrations in dev mode
            if config.dev_mode {
                info!("Running database migrations (dev mode)");
                if let Err(e) = db.run_migrations().await {
                    error!(error = %e, "Failed to run migrations");
                    return Err(e.into());
                }
            }

            Arc::new(db.tenant_registry())
        }
        RegistryBackend::Memory => {
            warn!("Using in-memory tenant registry; tenants are lost on restart");
            Arc::new(MemoryRegistry::new())
        }
    };

    let runtime = Arc::new(RuntimeClient::from_config(&config.runtime));
    match runtime.probe().await {
        Ok(transport) => info!(transport, "Container runtime reachable"),
        Err(e) => warn!(error = %e, "Container runtime unreachable at startup"),
    }

    // Create shutdown channel for graceful shutdown
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Create application state
    let state = AppState::new(registry, runtime, config.provisioning.clone());

    // Build and run the server
    let app = api::create_router(state);

    let listener = tokio::net::TcpListener::bind(&config.listen_addr).await?;
    info!(addr = %config.listen_addr, "Listening for connections");

    // Spawn the server with graceful shutdown
    let mut server_handle = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let mut shutdown_rx = shutdown_rx;
                loop {
                    if *shutdown_rx.borrow() {
                        break;
                    }
                    if shutdown_rx.changed().await.is_err() {
                        break;
                    }
                }
                info!("HTTP server shutting down");
            })
            .await
    });

    // Wait for shutdown signal (Ctrl+C)
    let server_exited = tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
            false
        }
        result = &mut server_handle => {
            match result {
                Ok(Ok(())) => info!("Server exited normally"),
                Ok(Err(e)) => error!(error = %e, "Server error"),
                Err(e) => error!(error = %e, "Server task panicked"),
            }
            true
        }
    };

    let _ = shutdown_tx.send(true);

    // Draining the server drops the last state handle, and with it the
    // runtime client.
    if !server_exited {
        let shutdown_timeout = std::time::Duration::from_secs(10);
        if tokio::time::timeout(shutdown_timeout, server_handle).await.is_err() {
            warn!("HTTP server did not shut down in time");
        }
    }

    info!("Control plane shutdown complete");
    Ok(())
}
