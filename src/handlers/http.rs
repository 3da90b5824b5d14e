//! HTTP handlers: viewer info, live count, and health.

use axum::{
    extract::{ConnectInfo, State},
    http::{header::USER_AGENT, HeaderMap, StatusCode},
    Json,
};
use serde_json::json;
use std::net::SocketAddr;

use crate::error::AppError;
use crate::models::Identity;
use crate::services::{PresenceService, SnapshotReader, ViewerSnapshot};

/// Shared application state for HTTP handlers.
#[derive(Clone)]
pub struct AppState {
    pub presence: PresenceService,
    pub snapshot: SnapshotReader,
}

impl AppState {
    pub fn new(presence: PresenceService, snapshot: SnapshotReader) -> Self {
        Self { presence, snapshot }
    }
}

const HEADER_FORWARDED_FOR: &str = "x-forwarded-for";

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// Fingerprint the caller from forwarded-for, peer address, and user agent.
pub fn identity_from_request(headers: &HeaderMap, peer: Option<SocketAddr>) -> Identity {
    let peer = peer.map(|p| p.to_string()).unwrap_or_default();
    Identity::from_request(
        header_str(headers, HEADER_FORWARDED_FOR),
        &peer,
        header_str(headers, USER_AGENT.as_str()).unwrap_or(""),
    )
}

/// GET /info: record the caller's presence and return the cached viewer snapshot.
pub async fn info(
    State(state): State<AppState>,
    peer: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
) -> Result<Json<ViewerSnapshot>, AppError> {
    let identity = identity_from_request(&headers, peer.map(|ConnectInfo(addr)| addr));
    state.presence.record(&identity).await?;
    Ok(Json(state.snapshot.current()))
}

/// GET /count: live viewer count straight from the store.
pub async fn count(State(state): State<AppState>) -> Result<Json<i64>, AppError> {
    let n = state.presence.active_count().await?;
    Ok(Json(n))
}

/// GET /health: liveness probe.
pub async fn health(State(state): State<AppState>) -> (StatusCode, Json<serde_json::Value>) {
    (
        StatusCode::OK,
        Json(json!({
            "status": "ok",
            "service": "televise",
            "backend": state.presence.backend(),
        })),
    )
}
