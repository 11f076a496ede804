use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::Method,
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{debug, info};

use nearcast_shared::protocol::{JoinInfo, Signal};
use nearcast_shared::types::{DeviceId, RoomId};

use crate::error::ServerError;
use crate::store::SignalStore;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<SignalStore>,
}

pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_check))
        .route("/api/join/:room/:device", get(join_room))
        .route("/api/signal/:room/:device", post(post_signal))
        .route("/api/signals/:room/:device", get(drain_signals))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// Room and device path segments, validated before any store access.
fn parse_path(room: &str, device: &str) -> Result<(RoomId, DeviceId), ServerError> {
    let room: RoomId = room.parse()?;
    if device.is_empty() {
        return Err(ServerError::BadRequest("Empty device id".into()));
    }
    Ok((room, DeviceId::from(device)))
}

async fn join_room(
    State(state): State<AppState>,
    Path((room, device)): Path<(String, String)>,
) -> Result<Json<JoinInfo>, ServerError> {
    let (room, device) = parse_path(&room, &device)?;
    let info = state.store.join(&room, &device);

    info!(
        room = %room,
        device = %device.short(),
        is_host = info.is_host,
        "Room join"
    );
    Ok(Json(info))
}

async fn post_signal(
    State(state): State<AppState>,
    Path((room, device)): Path<(String, String)>,
    Json(signal): Json<Signal>,
) -> Result<Json<serde_json::Value>, ServerError> {
    let (room, to) = parse_path(&room, &device)?;

    debug!(
        room = %room,
        to = %to.short(),
        from = %signal.from.short(),
        kind = ?signal.kind,
        "Signal deposited"
    );
    state.store.push_signal(&room, &to, signal);
    Ok(Json(serde_json::json!({ "success": true })))
}

async fn drain_signals(
    State(state): State<AppState>,
    Path((room, device)): Path<(String, String)>,
) -> Result<Json<Vec<Signal>>, ServerError> {
    let (room, device) = parse_path(&room, &device)?;
    let signals = state.store.drain_signals(&room, &device);

    if !signals.is_empty() {
        debug!(room = %room, device = %device.short(), count = signals.len(), "Signals drained");
    }
    Ok(Json(signals))
}

pub async fn serve(state: AppState, addr: std::net::SocketAddr) -> anyhow::Result<()> {
    let app = build_router(state);

    info!(addr = %addr, "Starting HTTP API server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
