//! Dashboard HTTP routes (pull-based; the dashboard polls on a timer)

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use serde::Serialize;

use kennel_core::{
    Capabilities, ClientId, CommandReply, DashboardCommand, DetectionResult, DistancePoint,
    RelayError,
};
use kennel_pursuit::Mode;

use super::WebState;

/// Error body `{status: "error", message}` with a status code per kind
pub(super) enum ApiError {
    Relay(RelayError),
    NotFound(&'static str),
}

impl From<RelayError> for ApiError {
    fn from(e: RelayError) -> Self {
        ApiError::Relay(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::Relay(e) => (status_for(&e), e.to_string()),
            ApiError::NotFound(what) => (StatusCode::NOT_FOUND, what.to_string()),
        };
        (status, Json(CommandReply::error(message))).into_response()
    }
}

fn status_for(e: &RelayError) -> StatusCode {
    match e {
        RelayError::UnknownClient(_) => StatusCode::NOT_FOUND,
        RelayError::DuplicateId(_) => StatusCode::CONFLICT,
        RelayError::MalformedMessage(_) => StatusCode::BAD_REQUEST,
        RelayError::ActuatorUnavailable { .. } => StatusCode::UNPROCESSABLE_ENTITY,
        RelayError::SensorStale { .. } => StatusCode::SERVICE_UNAVAILABLE,
    }
}

#[derive(Serialize)]
pub(super) struct ClientList {
    clients: Vec<ClientId>,
}

#[derive(Serialize)]
pub(super) struct ClientStatus {
    client_id: ClientId,
    capabilities: Capabilities,
    ip_address: Option<String>,
    /// Seconds since the last telemetry, `null` before the first one
    last_update_age_secs: Option<f64>,
    mode: Mode,
    manual_override: bool,
    camera_unavailable: bool,
    distance_cm: Option<f32>,
    distance_history: Vec<DistancePoint>,
}

#[derive(Serialize)]
struct LatestDetection<'a> {
    #[serde(flatten)]
    result: &'a DetectionResult,
    /// Relay receive time, unix seconds
    timestamp: f64,
}

/// GET /clients: clients heard from within the liveness window
pub(super) async fn list_clients(State(state): State<Arc<WebState>>) -> Json<ClientList> {
    Json(ClientList {
        clients: state.gateway.on_dashboard_list_clients().await,
    })
}

/// GET /client/{client_id}/status
pub(super) async fn client_status(
    State(state): State<Arc<WebState>>,
    Path(client_id): Path<String>,
) -> Result<Json<ClientStatus>, ApiError> {
    let id = ClientId::new(client_id)?;
    let view = state.gateway.on_dashboard_get_snapshot(&id).await?;
    let now = tokio::time::Instant::now().into_std();
    let telemetry = view.telemetry;

    Ok(Json(ClientStatus {
        client_id: view.client_id,
        capabilities: telemetry.capabilities,
        ip_address: telemetry.ip_address.clone(),
        last_update_age_secs: telemetry.age(now).map(|d| d.as_secs_f64()),
        mode: view.mode,
        manual_override: view.manual_override,
        camera_unavailable: view.camera_unavailable,
        distance_cm: telemetry.distance_cm.as_ref().map(|s| s.value),
        distance_history: telemetry.distance_history.into_iter().collect(),
    }))
}

/// GET /client/{client_id}/latest_frame: JPEG bytes, never cached
pub(super) async fn latest_frame(
    State(state): State<Arc<WebState>>,
    Path(client_id): Path<String>,
) -> Result<Response, ApiError> {
    let id = ClientId::new(client_id)?;
    let view = state.gateway.on_dashboard_get_snapshot(&id).await?;
    let frame = view
        .telemetry
        .frame
        .ok_or(ApiError::NotFound("no frame received yet"))?;

    Ok((
        [
            (header::CONTENT_TYPE, "image/jpeg"),
            (header::CACHE_CONTROL, "no-store"),
        ],
        frame.value,
    )
        .into_response())
}

/// GET /client/{client_id}/latest_detection
pub(super) async fn latest_detection(
    State(state): State<Arc<WebState>>,
    Path(client_id): Path<String>,
) -> Result<Response, ApiError> {
    let id = ClientId::new(client_id)?;
    let view = state.gateway.on_dashboard_get_snapshot(&id).await?;
    let detections = view
        .telemetry
        .detections
        .as_ref()
        .ok_or(ApiError::NotFound("no detection result yet"))?;

    Ok(Json(LatestDetection {
        result: &detections.value,
        timestamp: view.telemetry.detections_unix_ms as f64 / 1000.0,
    })
    .into_response())
}

/// POST /client/{client_id}/command
///
/// The body is parsed by hand so schema errors get the same JSON error
/// shape as every other failure.
pub(super) async fn send_command(
    State(state): State<Arc<WebState>>,
    Path(client_id): Path<String>,
    body: Bytes,
) -> Result<Json<CommandReply>, ApiError> {
    let id = ClientId::new(client_id)?;
    let request: DashboardCommand = serde_json::from_slice(&body).map_err(RelayError::from)?;
    let kind = state.gateway.on_dashboard_send_command(&id, request).await?;
    Ok(Json(CommandReply::success(format!("{} command sent to {}", kind, id))))
}

/// GET /api/status: relay statistics
pub(super) async fn api_status(State(state): State<Arc<WebState>>) -> Json<serde_json::Value> {
    let stats = state.gateway.stats();
    let active = state.gateway.on_dashboard_list_clients().await.len();

    Json(serde_json::json!({
        "sessions": stats.sessions,
        "active_clients": active,
        "telemetry_received": stats.telemetry_received,
        "commands_forwarded": stats.commands_forwarded,
        "evictions": stats.evictions,
        "uptime_secs": state.start_time.elapsed().as_secs(),
    }))
}
