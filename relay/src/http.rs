//! The relay's URL surface.
//!
//! - `GET /rooms/{roomId}` - WebSocket upgrade, host endpoint
//! - `GET /rooms/{roomId}/join?token=...` - WebSocket upgrade, client endpoint
//! - `POST /invite/create/{roomId}` - mint a single-use invite token
//! - `GET /invite/validate/{token}` - non-consuming token peek
//! - `GET /metrics` - Prometheus text counters, no PII

use std::net::SocketAddr;

use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{ConnectInfo, Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use crate::invite::CreateError;
use crate::metrics::RelayMetrics;
use crate::room::valid_room_id;
use crate::router::{handle_client_socket, handle_host_socket, AppState};

/// Assemble the relay router.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/rooms/{room_id}", get(host_ws))
        .route("/rooms/{room_id}/join", get(client_ws))
        .route("/invite/create/{room_id}", post(invite_create))
        .route("/invite/validate/{token}", get(invite_validate))
        .route("/metrics", get(metrics_text))
        .with_state(state)
}

#[derive(Debug, Deserialize)]
struct JoinQuery {
    token: Option<String>,
}

async fn host_ws(
    Path(room_id): Path<String>,
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    ws: WebSocketUpgrade,
) -> Response {
    if !valid_room_id(&room_id) {
        return (StatusCode::BAD_REQUEST, "invalid room id").into_response();
    }
    if !state.conn_limiter.check(&addr.ip()) {
        RelayMetrics::inc(&state.metrics.rate_limited_total);
        return (StatusCode::TOO_MANY_REQUESTS, "rate limited").into_response();
    }
    ws.on_upgrade(move |socket| handle_host_socket(socket, state, room_id))
}

async fn client_ws(
    Path(room_id): Path<String>,
    Query(query): Query<JoinQuery>,
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    ws: WebSocketUpgrade,
) -> Response {
    if !valid_room_id(&room_id) {
        return (StatusCode::BAD_REQUEST, "invalid room id").into_response();
    }
    if !state.conn_limiter.check(&addr.ip()) {
        RelayMetrics::inc(&state.metrics.rate_limited_total);
        return (StatusCode::TOO_MANY_REQUESTS, "rate limited").into_response();
    }
    ws.on_upgrade(move |socket| handle_client_socket(socket, state, room_id, query.token))
}

async fn invite_create(
    Path(room_id): Path<String>,
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
) -> Response {
    if !valid_room_id(&room_id) || state.registry.get(&room_id).is_none() {
        return (StatusCode::NOT_FOUND, "room not found").into_response();
    }
    if !state.conn_limiter.check(&addr.ip()) {
        RelayMetrics::inc(&state.metrics.rate_limited_total);
        return (StatusCode::TOO_MANY_REQUESTS, "rate limited").into_response();
    }
    match state.invites.create(&room_id) {
        Ok((token, ttl)) => {
            RelayMetrics::inc(&state.metrics.invites_issued);
            debug!("invite token issued");
            (
                StatusCode::CREATED,
                Json(json!({
                    "token": token,
                    "roomId": room_id,
                    "expiresIn": ttl.as_secs(),
                })),
            )
                .into_response()
        }
        Err(CreateError::TokenLimit) => {
            (StatusCode::SERVICE_UNAVAILABLE, "token limit reached").into_response()
        }
        Err(CreateError::RandomFailed) => {
            (StatusCode::INTERNAL_SERVER_ERROR, "random failure").into_response()
        }
    }
}

async fn invite_validate(
    Path(token): Path<String>,
    State(state): State<AppState>,
) -> Response {
    Json(state.invites.validate(&token)).into_response()
}

async fn metrics_text(State(state): State<AppState>) -> Response {
    let body = state
        .metrics
        .render_prometheus(state.registry.len() as u64);
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        body,
    )
        .into_response()
}
