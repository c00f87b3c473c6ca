//! Storefront edge service.
//!
//! # Architecture Overview
//!
//! ```text
//!                        ┌──────────────────────────────────────────────────┐
//!                        │                 STOREFRONT EDGE                  │
//!   Client Request       │  ┌─────────────┐   ┌──────────────┐              │
//!   ─────────────────────┼─▶│ assignment  │──▶│  storefront  │              │
//!                        │  │ middleware  │   │   handlers   │              │
//!                        │  └──────┬──────┘   └──────┬───────┘              │
//!                        │         │                 │                      │
//!                        │         ▼                 ▼                      │
//!                        │  ┌─────────────┐   ┌──────────────┐              │
//!                        │  │ experiment  │   │ tagged cache │◀── revalidate│◀── CMS webhook
//!                        │  │  registry   │   │ content/page │              │
//!                        │  └──────┬──────┘   └──────┬───────┘              │
//!                        └─────────┼─────────────────┼──────────────────────┘
//!                                  ▼                 ▼
//!                              data server: /experiments, /header, /footer, /global
//! ```

use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;

use storefront_edge::admin::setup_admin_router;
use storefront_edge::config::watcher::ConfigWatcher;
use storefront_edge::http::{AppState, HttpServer};
use storefront_edge::lifecycle::{signals, startup, Shutdown};
use storefront_edge::observability::{logging, metrics};

#[derive(Parser)]
#[command(name = "storefront-edge")]
#[command(about = "A/B assignment and tagged content cache in front of the storefront", long_about = None)]
struct Args {
    /// TOML configuration file. Defaults apply when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let config = startup::startup_config(args.config.as_deref())?;
    logging::init_logging(&config.observability.log_level);

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "storefront-edge starting");

    tracing::info!(
        bind_address = %config.listener.bind_address,
        registry = %config.registry.url,
        content = %config.content.url,
        environment = ?config.cookies.environment,
        "Configuration ready"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let shutdown = Arc::new(Shutdown::new());
    signals::spawn_signal_handler(shutdown.clone());

    // The watcher handle must outlive the server.
    let (_watcher, config_updates) = match &args.config {
        Some(path) => {
            let (watcher, updates) = ConfigWatcher::new(path, config.clone());
            match watcher.run() {
                Ok(handle) => (Some(handle), Some(updates)),
                Err(e) => {
                    tracing::warn!(error = %e, "Config watcher unavailable, hot reload disabled");
                    (None, None)
                }
            }
        }
        None => (None, None),
    };

    let state = AppState::from_config(config.clone());

    if config.admin.enabled {
        let admin_listener = TcpListener::bind(&config.admin.bind_address).await?;
        tracing::info!(address = %admin_listener.local_addr()?, "Admin API listening");
        let admin = setup_admin_router(state.clone());
        let mut stop = shutdown.subscribe();
        tokio::spawn(async move {
            let served = axum::serve(admin_listener, admin)
                .with_graceful_shutdown(async move {
                    let _ = stop.recv().await;
                })
                .await;
            if let Err(e) = served {
                tracing::error!(error = %e, "Admin API failed");
            }
        });
    }

    let listener = TcpListener::bind(&config.listener.bind_address).await?;
    HttpServer::new(state)
        .run(listener, config_updates, shutdown)
        .await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
