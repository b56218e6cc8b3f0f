//! Robot WebSocket: JSON messages tagged by `type`, binary messages are frames.

use std::ops::ControlFlow;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{Path, State, WebSocketUpgrade};
use axum::response::Response;
use bytes::Bytes;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use kennel_core::{Capabilities, ClientId, RelayError, RelayMessage, RobotMessage, TelemetryUpdate};

use super::dashboard::ApiError;
use super::WebState;
use crate::gateway::{RelayGateway, RobotLink};
use crate::rate_limit::{ConnectionRateLimiter, RateCheck};

/// GET /ws without an id segment
pub(super) async fn missing_client_id() -> ApiError {
    ApiError::Relay(RelayError::MalformedMessage(
        "client id required: connect to /ws/{client_id}".into(),
    ))
}

/// WebSocket upgrade handler.
///
/// The session is registered before upgrading so a duplicate id is
/// refused with 409 instead of an accepted-then-closed socket. A handshake
/// that fails after that releases the registration again.
pub(super) async fn ws_upgrade(
    ws: WebSocketUpgrade,
    State(state): State<Arc<WebState>>,
    Path(client_id): Path<String>,
) -> Result<Response, ApiError> {
    let id = ClientId::new(client_id)?;
    let link = match state
        .gateway
        .on_robot_connect(id.clone(), Capabilities::default())
        .await
    {
        Ok(link) => link,
        Err(e) => {
            warn!(client = %id, error = %e, "Robot connection refused");
            return Err(e.into());
        }
    };
    let gateway = state.gateway.clone();
    let failed = {
        let gateway = gateway.clone();
        let id = id.clone();
        let session = link.session.clone();
        let generation = link.generation;
        move |e: axum::Error| {
            warn!(client = %id, generation, error = %e, "Robot WebSocket upgrade failed");
            session.close();
            tokio::spawn(async move {
                gateway.on_robot_disconnect(&id, generation).await;
            });
        }
    };
    Ok(ws
        .on_failed_upgrade(failed)
        .on_upgrade(move |socket| handle_robot_ws(socket, gateway, id, link)))
}

/// Handle one robot connection until it closes or its session is invalidated.
async fn handle_robot_ws(socket: WebSocket, gateway: RelayGateway, id: ClientId, link: RobotLink) {
    let RobotLink {
        session,
        generation,
        outbound,
    } = link;
    let (ws_tx, mut ws_rx) = socket.split();
    let closed = session.closed_token();
    let limiter = ConnectionRateLimiter::new(gateway.config().rate_limit.clone());
    info!(client = %id, generation, "Robot connected");

    let writer = tokio::spawn(write_outbound(ws_tx, outbound, closed.clone(), id.clone()));
    let mut abuse_check = tokio::time::interval(Duration::from_secs(1));

    loop {
        tokio::select! {
            _ = closed.cancelled() => {
                debug!(client = %id, "Session closed, dropping robot connection");
                break;
            }
            _ = abuse_check.tick() => {
                if limiter.tick_abuse_check() {
                    warn!(
                        client = %id,
                        dropped = limiter.dropped(),
                        "Disconnecting robot: sustained rate limit abuse"
                    );
                    break;
                }
            }
            msg = ws_rx.next() => {
                let flow = match msg {
                    Some(Ok(Message::Text(text))) => {
                        handle_text(&gateway, &id, &limiter, text.as_str()).await
                    }
                    Some(Ok(Message::Binary(data))) => {
                        handle_frame(&gateway, &id, &limiter, data).await
                    }
                    Some(Ok(Message::Close(_))) | None => ControlFlow::Break(()),
                    Some(Err(e)) => {
                        debug!(client = %id, error = %e, "Robot socket error");
                        ControlFlow::Break(())
                    }
                    Some(Ok(_)) => ControlFlow::Continue(()),
                };
                if flow.is_break() {
                    break;
                }
            }
        }
    }

    gateway.on_robot_disconnect(&id, generation).await;
    session.close();
    let _ = writer.await;
    info!(client = %id, generation, "Robot disconnected");
}

/// Drain the session's outbound queue onto the socket
async fn write_outbound(
    mut ws_tx: SplitSink<WebSocket, Message>,
    mut outbound: mpsc::Receiver<RelayMessage>,
    closed: CancellationToken,
    id: ClientId,
) {
    loop {
        tokio::select! {
            biased;
            _ = closed.cancelled() => break,
            msg = outbound.recv() => {
                let Some(msg) = msg else { break };
                let text = match serde_json::to_string(&msg) {
                    Ok(text) => text,
                    Err(e) => {
                        warn!(client = %id, error = %e, "Failed to encode relay message");
                        continue;
                    }
                };
                if ws_tx.send(Message::Text(text.into())).await.is_err() {
                    debug!(client = %id, "Robot socket closed while sending");
                    closed.cancel();
                    break;
                }
            }
        }
    }
    let _ = ws_tx.send(Message::Close(None)).await;
}

async fn handle_text(
    gateway: &RelayGateway,
    id: &ClientId,
    limiter: &ConnectionRateLimiter,
    text: &str,
) -> ControlFlow<()> {
    let message: RobotMessage = match serde_json::from_str(text) {
        Ok(message) => message,
        Err(e) => {
            warn!(client = %id, error = %e, "Malformed robot message dropped");
            return ControlFlow::Continue(());
        }
    };

    let result = match message {
        RobotMessage::Hello {
            capabilities,
            ip_address,
        } => gateway.on_robot_hello(id, capabilities, ip_address).await,
        RobotMessage::Telemetry(mut telemetry) => {
            if limiter.check_telemetry() == RateCheck::Dropped {
                log_drop(id, limiter, "telemetry");
                return ControlFlow::Continue(());
            }
            if let Some(frame_len) = telemetry.frame_len() {
                if limiter.check_frame(frame_len) == RateCheck::Dropped {
                    log_drop(id, limiter, "frame");
                    telemetry.frame = None;
                }
            }
            match telemetry.into_update(gateway.config().rate_limit.max_frame_bytes) {
                Ok(update) => gateway.on_robot_telemetry(id, update).await.map(|_| ()),
                Err(e) => Err(e),
            }
        }
        RobotMessage::Ack {
            command_type,
            success,
            message,
        } => {
            let message = message.unwrap_or_default();
            if success {
                info!(client = %id, command = %command_type, %message, "Command acknowledged");
            } else {
                warn!(client = %id, command = %command_type, %message, "Command failed on robot");
            }
            Ok(())
        }
    };
    settle(id, result)
}

/// A binary message is a bare JPEG frame
async fn handle_frame(
    gateway: &RelayGateway,
    id: &ClientId,
    limiter: &ConnectionRateLimiter,
    data: Bytes,
) -> ControlFlow<()> {
    if limiter.check_telemetry() == RateCheck::Dropped || limiter.check_frame(data.len()) == RateCheck::Dropped {
        log_drop(id, limiter, "frame");
        return ControlFlow::Continue(());
    }
    let update = TelemetryUpdate {
        frame: Some(data),
        ..Default::default()
    };
    let result = gateway.on_robot_telemetry(id, update).await.map(|_| ());
    settle(id, result)
}

/// Per-message errors keep the connection; a vanished session ends it
fn settle(id: &ClientId, result: Result<(), RelayError>) -> ControlFlow<()> {
    match result {
        Ok(()) => ControlFlow::Continue(()),
        Err(RelayError::UnknownClient(_)) => ControlFlow::Break(()),
        Err(e) => {
            warn!(client = %id, kind = e.kind(), error = %e, "Robot message dropped");
            ControlFlow::Continue(())
        }
    }
}

fn log_drop(id: &ClientId, limiter: &ConnectionRateLimiter, what: &str) {
    if limiter.should_log_drop() {
        warn!(
            client = %id,
            dropped = limiter.dropped(),
            "Rate limit: dropping {} from robot",
            what
        );
    }
}
