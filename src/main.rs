//! Panasonic Blu-ray Control
//!
//! HTTP bridge for networked Panasonic Blu-ray players.

use panasonic_bluray_control::{api, bus, config, registry::DeviceRegistry};

use anyhow::Result;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "panasonic_bluray_control=debug,tower_http=info".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!(
        "Starting Panasonic Blu-ray Control v{} ({})",
        env!("PBC_VERSION"),
        env!("PBC_GIT_SHA")
    );

    // Load configuration
    let config = config::load_config()?;
    let settings = config.session.to_settings();
    tracing::info!("Configuration loaded, port: {}, session: {:?}", config.port, settings);

    // Create event bus
    let bus = bus::create_bus();

    // Device list: persisted store, seeded from the config file
    let mut store = config::DeviceStore::in_config_dir();
    if let Err(e) = store.load() {
        tracing::warn!("Failed to load device store {}: {}", store.path().display(), e);
    }
    for device in config.devices {
        if store.get_by_id_or_address(&device.id, &device.address).is_none() {
            tracing::info!("Seeding device {} from config", device.id);
            if let Err(e) = store.add_or_update(device) {
                tracing::warn!("Failed to persist seeded device: {}", e);
            }
        }
    }

    let registry = Arc::new(DeviceRegistry::new(settings, bus.clone()));
    for device in store.all() {
        registry.add_or_update(device.clone()).await;
    }
    tracing::info!("{} device(s) configured", registry.len().await);

    let state = api::AppState::new(registry.clone(), store, bus);
    let app = api::router(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    // Start server with graceful shutdown
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!("Listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Disconnecting devices...");
    registry.disconnect_all().await;
    tracing::info!("Shutdown complete");

    Ok(())
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received Ctrl+C, shutting down..."),
        _ = terminate => tracing::info!("Received SIGTERM, shutting down..."),
    }
}
