//! # fuente-server
//!
//! Real-time anonymous peer-support server for La Fuente.
//!
//! This binary provides:
//! - **Anonymous identities** backed by a recovery phrase and a hashed
//!   device fingerprint (no email, no password)
//! - **Trust scoring** that gates who may be paired with whom
//! - **Availability directory and matcher** for browsing peers and urgent
//!   one-to-one matching
//! - **Moderated relay** of chat messages over WebSocket, with sliding-window
//!   rate limits and report-driven conversation freezing
//! - **REST API** (axum) for identity bootstrap, trust lookup and health checks
//!
//! All state is in memory and lost on restart.

mod api;
mod config;
mod conversation;
mod directory;
mod engine;
mod error;
mod gateway;
mod identity;
mod rate_limit;
mod trust;
mod ws;

use std::sync::Arc;

use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::api::AppState;
use crate::config::ServerConfig;
use crate::engine::Engine;
use crate::gateway::Gateway;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // -----------------------------------------------------------------------
    // 1. Initialize tracing (respects RUST_LOG env var)
    // -----------------------------------------------------------------------
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,fuente_server=debug")),
        )
        .init();

    info!("Starting La Fuente server v{}", env!("CARGO_PKG_VERSION"));

    // -----------------------------------------------------------------------
    // 2. Load configuration
    // -----------------------------------------------------------------------
    let config = ServerConfig::from_env();
    info!(?config, "Loaded configuration");

    // -----------------------------------------------------------------------
    // 3. Initialize the engine and connection gateway
    // -----------------------------------------------------------------------
    let engine = Engine::from_config(&config);
    let gateway = Gateway::new(engine);

    let http_addr = config.http_addr;
    let app_state = AppState {
        gateway,
        config: Arc::new(config),
    };

    // -----------------------------------------------------------------------
    // 4. Run the HTTP + WebSocket server (blocks until shutdown)
    // -----------------------------------------------------------------------
    tokio::select! {
        result = api::serve(app_state, http_addr) => {
            if let Err(e) = result {
                tracing::error!(error = %e, "HTTP server failed");
                return Err(e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
        }
    }

    Ok(())
}
