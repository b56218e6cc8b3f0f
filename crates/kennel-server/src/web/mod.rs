//! Web server module: axum HTTP + WebSocket.
//!
//! Robots and the dashboard share one listener:
//! - `WS /ws/{client_id}`: robot connection (telemetry in, commands out)
//! - `GET /clients`: active client ids
//! - `GET /client/{client_id}/status`: capabilities, address, pursuit mode
//! - `GET /client/{client_id}/latest_frame`: newest JPEG frame
//! - `GET /client/{client_id}/latest_detection`: newest detection result
//! - `POST /client/{client_id}/command`: send a command to a robot
//! - `GET /api/status`: relay statistics

mod dashboard;
mod robot_ws;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::gateway::RelayGateway;

/// Shared state for the web server
struct WebState {
    gateway: RelayGateway,
    start_time: Instant,
}

/// Build the relay's axum application.
pub fn router(gateway: RelayGateway) -> Router {
    let state = Arc::new(WebState {
        gateway,
        start_time: Instant::now(),
    });

    Router::new()
        .route("/ws", get(robot_ws::missing_client_id))
        .route("/ws/{client_id}", get(robot_ws::ws_upgrade))
        .route("/clients", get(dashboard::list_clients))
        .route("/client/{client_id}/status", get(dashboard::client_status))
        .route("/client/{client_id}/latest_frame", get(dashboard::latest_frame))
        .route(
            "/client/{client_id}/latest_detection",
            get(dashboard::latest_detection),
        )
        .route("/client/{client_id}/command", post(dashboard::send_command))
        .route("/api/status", get(dashboard::api_status))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Start the web server and serve until it fails.
pub async fn start(gateway: RelayGateway, bind: SocketAddr) -> Result<()> {
    let app = router(gateway);

    let listener = tokio::net::TcpListener::bind(bind)
        .await
        .context(format!("Failed to bind to {}", bind))?;

    info!("Relay listening on http://{}", bind);

    axum::serve(listener, app)
        .await
        .context("Web server error")?;

    Ok(())
}
