//! HTTP API handlers

use crate::adapters::{CommandStatus, PanasonicDevice};
use crate::bus::SharedBus;
use crate::commands::{handle_media_player_command, handle_remote_command};
use crate::config::{DeviceConfig, DeviceStore};
use crate::registry::DeviceRegistry;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::{get, post},
    Json, Router,
};
use futures::stream::Stream;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<DeviceRegistry>,
    pub store: Arc<Mutex<DeviceStore>>,
    pub bus: SharedBus,
}

impl AppState {
    pub fn new(registry: Arc<DeviceRegistry>, store: DeviceStore, bus: SharedBus) -> Self {
        Self {
            registry,
            store: Arc::new(Mutex::new(store)),
            bus,
        }
    }
}

/// Build the API router
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/status", get(status_handler))
        .route("/events", get(events_handler))
        .route("/devices", get(list_devices_handler))
        .route("/devices/{id}", get(device_handler).put(upsert_device_handler).delete(remove_device_handler))
        .route("/devices/{id}/connect", post(connect_handler))
        .route("/devices/{id}/disconnect", post(disconnect_handler))
        .route("/devices/{id}/refresh", post(refresh_handler))
        .route("/devices/{id}/media_player", post(media_player_handler))
        .route("/devices/{id}/remote", post(remote_handler))
        .with_state(state)
}

/// Error response
#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

fn error_response(status: StatusCode, error: impl Into<String>) -> Response {
    (
        status,
        Json(ErrorResponse {
            error: error.into(),
        }),
    )
        .into_response()
}

fn not_found(id: &str) -> Response {
    error_response(StatusCode::NOT_FOUND, format!("Device not found: {}", id))
}

/// HTTP status for a command outcome
pub fn command_status_code(status: CommandStatus) -> StatusCode {
    match status {
        CommandStatus::Ok => StatusCode::OK,
        CommandStatus::BadRequest => StatusCode::BAD_REQUEST,
        CommandStatus::ServiceUnavailable => StatusCode::SERVICE_UNAVAILABLE,
        CommandStatus::NotImplemented => StatusCode::NOT_IMPLEMENTED,
    }
}

fn command_response(status: CommandStatus) -> Response {
    (
        command_status_code(status),
        Json(json!({ "status": status.as_str() })),
    )
        .into_response()
}

/// General status response
#[derive(Serialize)]
pub struct StatusResponse {
    pub service: &'static str,
    pub version: &'static str,
    pub git_sha: &'static str,
    pub devices: usize,
    pub bus_subscribers: usize,
}

/// GET /status - Service health check
pub async fn status_handler(State(state): State<AppState>) -> Json<StatusResponse> {
    Json(StatusResponse {
        service: "panasonic-bluray-control",
        version: env!("PBC_VERSION"),
        git_sha: env!("PBC_GIT_SHA"),
        devices: state.registry.len().await,
        bus_subscribers: state.bus.subscriber_count(),
    })
}

// =============================================================================
// Device handlers
// =============================================================================

/// GET /devices - Snapshot of every configured device
pub async fn list_devices_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.registry.snapshots().await)
}

/// GET /devices/{id}
pub async fn device_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match state.registry.get(&id).await {
        Some(device) => Json(device.snapshot().await).into_response(),
        None => not_found(&id),
    }
}

/// Body of PUT /devices/{id}
#[derive(Debug, Deserialize)]
pub struct DeviceRequest {
    pub name: Option<String>,
    pub address: String,
    #[serde(default)]
    pub always_on: bool,
}

/// PUT /devices/{id} - Add or update a device and persist it
pub async fn upsert_device_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<DeviceRequest>,
) -> impl IntoResponse {
    let address = req.address.trim();
    if address.is_empty() {
        return error_response(StatusCode::BAD_REQUEST, "address must not be empty");
    }

    let config = DeviceConfig {
        name: req.name.unwrap_or_else(|| id.clone()),
        id,
        address: address.to_string(),
        always_on: req.always_on,
    };

    if let Err(e) = state.store.lock().await.add_or_update(config.clone()) {
        tracing::error!("Failed to persist device {}: {}", config.id, e);
        return error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string());
    }

    let device = state.registry.add_or_update(config).await;
    Json(device.snapshot().await).into_response()
}

/// DELETE /devices/{id} - Remove a device and forget it
pub async fn remove_device_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    let removed = state.registry.remove(&id).await;
    let forgotten = match state.store.lock().await.remove(&id) {
        Ok(forgotten) => forgotten,
        Err(e) => {
            tracing::error!("Failed to persist removal of {}: {}", id, e);
            return error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string());
        }
    };

    if removed || forgotten {
        StatusCode::NO_CONTENT.into_response()
    } else {
        not_found(&id)
    }
}

async fn lookup(state: &AppState, id: &str) -> Result<PanasonicDevice, Response> {
    state.registry.get(id).await.ok_or_else(|| not_found(id))
}

/// POST /devices/{id}/connect
pub async fn connect_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    let device = match lookup(&state, &id).await {
        Ok(device) => device,
        Err(response) => return response,
    };
    match device.connect().await {
        Ok(()) => command_response(CommandStatus::Ok),
        Err(e) => error_response(StatusCode::SERVICE_UNAVAILABLE, e.to_string()),
    }
}

/// POST /devices/{id}/disconnect
pub async fn disconnect_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    let device = match lookup(&state, &id).await {
        Ok(device) => device,
        Err(response) => return response,
    };
    device.stop_polling().await;
    device.disconnect().await;
    command_response(CommandStatus::Ok)
}

/// POST /devices/{id}/refresh - Poll now and return the snapshot
pub async fn refresh_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    let device = match lookup(&state, &id).await {
        Ok(device) => device,
        Err(response) => return response,
    };
    device.refresh().await;
    Json(device.snapshot().await).into_response()
}

/// Body of POST /devices/{id}/media_player
#[derive(Debug, Deserialize)]
pub struct MediaPlayerRequest {
    pub cmd_id: String,
}

/// POST /devices/{id}/media_player
pub async fn media_player_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<MediaPlayerRequest>,
) -> impl IntoResponse {
    let device = state.registry.get(&id).await;
    command_response(handle_media_player_command(device.as_ref(), &req.cmd_id).await)
}

/// Body of POST /devices/{id}/remote
#[derive(Debug, Deserialize)]
pub struct RemoteRequest {
    pub cmd_id: String,
    #[serde(default)]
    pub params: Value,
}

/// POST /devices/{id}/remote
pub async fn remote_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<RemoteRequest>,
) -> impl IntoResponse {
    let device = state.registry.get(&id).await;
    command_response(handle_remote_command(device.as_ref(), &req.cmd_id, &req.params).await)
}

// =============================================================================
// Events
// =============================================================================

/// GET /events - Server-sent stream of bus events
pub async fn events_handler(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let rx = state.bus.subscribe();

    let stream = BroadcastStream::new(rx).filter_map(|result| match result {
        Ok(event) => match serde_json::to_string(&event) {
            Ok(json) => Some(Ok(Event::default().data(json))),
            Err(_) => None,
        },
        // Lagged receivers skip what they missed
        Err(_) => None,
    });

    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("ping"),
    )
}
