//! # nearcast-server
//!
//! Rendezvous mailbox for Nearcast rooms.
//!
//! This binary provides:
//! - **Host election** per room code (first claimant wins, TTL-bounded)
//! - **Signal relay**: a TTL key-value queue that couriers offers, answers
//!   and transport candidates between devices until their direct link opens
//! - **REST API** (axum) for join, signal deposit and signal drain
//!
//! No message or file content ever touches this server; it only sees
//! negotiation payloads, and only until they are drained or expire.

mod api;
mod config;
mod error;
mod store;

use std::sync::Arc;

use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::api::AppState;
use crate::config::ServerConfig;
use crate::store::SignalStore;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,nearcast_server=debug")),
        )
        .init();

    info!("Starting Nearcast mailbox server v{}", env!("CARGO_PKG_VERSION"));

    let config = ServerConfig::from_env();
    info!(?config, "Loaded configuration");

    let store = Arc::new(SignalStore::new(config.host_ttl, config.signal_ttl));

    // Periodic sweep of expired host claims and signal queues.
    let sweeper = store.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(60));
        loop {
            interval.tick().await;
            sweeper.purge_expired();
        }
    });

    let app_state = AppState { store };

    tokio::select! {
        result = api::serve(app_state, config.http_addr) => {
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
