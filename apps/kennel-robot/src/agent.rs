//! One relay connection: hello, periodic telemetry, command execution

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::Result;
use futures_util::{Sink, SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::time::{interval, MissedTickBehavior};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use kennel_core::{Capabilities, RelayMessage, RobotMessage, TelemetryMessage};

use crate::actuator::{dispatch, Actuator};
use crate::sensors::{run_detector, Camera, Detector, DistanceSensor};

/// The robot's hardware as the agent sees it
pub struct Rig {
    pub capabilities: Capabilities,
    pub ip_address: Option<String>,
    pub actuator: Arc<dyn Actuator>,
    pub camera: Option<Box<dyn Camera>>,
    pub detector: Box<dyn Detector>,
    pub distance_sensor: Option<Box<dyn DistanceSensor>>,
}

impl Rig {
    pub fn hello(&self) -> RobotMessage {
        RobotMessage::Hello {
            capabilities: self.capabilities,
            ip_address: self.ip_address.clone(),
        }
    }

    /// Read every sensor once
    pub fn sample(&mut self) -> TelemetryMessage {
        let frame = self.camera.as_mut().and_then(|camera| camera.capture());
        let detections = frame.as_ref().and_then(|frame| {
            match run_detector(self.detector.as_mut(), frame) {
                Ok(result) => Some(result),
                Err(e) => {
                    warn!(error = %e, "Detector failed");
                    None
                }
            }
        });
        let distance_cm = self.distance_sensor.as_mut().and_then(|sensor| sensor.read_cm());

        TelemetryMessage {
            frame: frame.map(|f| TelemetryMessage::encode_frame(&f)),
            detections,
            distance_cm,
            capabilities: None,
            timestamp: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .ok()
                .map(|d| d.as_secs_f64()),
        }
    }
}

/// Why a session ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    /// Shutdown was requested; do not reconnect
    Shutdown,
    /// The relay closed the connection
    Disconnected,
}

/// Drive one connected socket until the relay goes away or shutdown
pub async fn run_session<S>(
    socket: WebSocketStream<S>,
    rig: &mut Rig,
    telemetry_every: Duration,
    cancel: &CancellationToken,
) -> Result<SessionEnd>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let (mut tx, mut rx) = socket.split();
    send(&mut tx, &rig.hello()).await?;

    let mut ticker = interval(telemetry_every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut telemetry_sent = 0u64;
    let mut commands_handled = 0u64;

    let end = loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                let _ = tx.send(Message::Close(None)).await;
                break SessionEnd::Shutdown;
            }
            _ = ticker.tick() => {
                let telemetry = RobotMessage::Telemetry(rig.sample());
                send(&mut tx, &telemetry).await?;
                telemetry_sent += 1;
            }
            msg = rx.next() => {
                let text = match msg {
                    Some(Ok(Message::Text(text))) => text,
                    Some(Ok(Message::Close(_))) | None => break SessionEnd::Disconnected,
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => return Err(e.into()),
                };
                let reply = match serde_json::from_str::<RelayMessage>(text.as_str()) {
                    Ok(RelayMessage::StatusRequest) => {
                        debug!("Status requested");
                        rig.hello()
                    }
                    Ok(RelayMessage::Command(command)) => {
                        info!(command = %command.kind(), "Received command");
                        commands_handled += 1;
                        dispatch(rig.actuator.as_ref(), &command).await
                    }
                    Err(e) => {
                        warn!(error = %e, "Unrecognized message from relay");
                        continue;
                    }
                };
                send(&mut tx, &reply).await?;
            }
        }
    };

    info!(
        telemetry = telemetry_sent,
        commands = commands_handled,
        "Session ended"
    );
    Ok(end)
}

async fn send<T>(tx: &mut T, message: &RobotMessage) -> Result<()>
where
    T: Sink<Message, Error = tokio_tungstenite::tungstenite::Error> + Unpin,
{
    let text = serde_json::to_string(message)?;
    tx.send(Message::Text(text.into())).await?;
    Ok(())
}
