//! Kennel Robot Agent
//!
//! Streams camera frames, person detections and distance readings to the
//! relay over a WebSocket and executes the commands it sends back.
//!
//! ## Usage
//!
//! ```bash
//! # Connect to a local relay with a generated client id
//! kennel-robot
//!
//! # Named robot on a remote relay, no RGB strip
//! KENNEL_RELAY_URL=ws://relay.local:8000 KENNEL_CLIENT_ID=rpi-1 KENNEL_HAS_RGB=0 kennel-robot
//! ```

mod actuator;
mod agent;
mod sensors;

use std::net::UdpSocket;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio_tungstenite::connect_async;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use kennel_core::{Capabilities, ClientId, PostureAction, DEFAULT_RELAY_PORT, ROBOT_WS_PATH};

use crate::actuator::{posture, Actuator, LoggingActuator};
use crate::agent::{Rig, SessionEnd};
use crate::sensors::{SimulatedScene, TestPattern};

/// Agent configuration from environment
struct Config {
    /// Relay base URL (`ws://host:port`)
    relay_url: String,
    client_id: ClientId,
    /// How often a telemetry message is sent
    telemetry_interval: Duration,
    capabilities: Capabilities,
    /// Cycle length of the simulated person's approach
    scene_period: Duration,
}

impl Config {
    fn from_env() -> Result<Self> {
        let relay_url = std::env::var("KENNEL_RELAY_URL")
            .unwrap_or_else(|_| format!("ws://127.0.0.1:{}", DEFAULT_RELAY_PORT));

        let client_id = match std::env::var("KENNEL_CLIENT_ID") {
            Ok(id) => ClientId::new(id).context("Invalid KENNEL_CLIENT_ID")?,
            Err(_) => ClientId::generate(),
        };

        let telemetry_ms: u64 = std::env::var("KENNEL_TELEMETRY_MS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(100);

        let scene_secs: u64 = std::env::var("KENNEL_SCENE_PERIOD_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(20);

        // Hardware present unless disabled with KENNEL_HAS_*=0
        let capabilities = Capabilities {
            has_camera: flag("KENNEL_HAS_CAMERA"),
            has_distance_sensor: flag("KENNEL_HAS_DISTANCE_SENSOR"),
            has_imu: flag("KENNEL_HAS_IMU"),
            has_rgb: flag("KENNEL_HAS_RGB"),
        };

        Ok(Self {
            relay_url,
            client_id,
            telemetry_interval: Duration::from_millis(telemetry_ms.max(1)),
            capabilities,
            scene_period: Duration::from_secs(scene_secs.max(1)),
        })
    }

    fn ws_url(&self) -> String {
        format!(
            "{}{}/{}",
            self.relay_url.trim_end_matches('/'),
            ROBOT_WS_PATH,
            self.client_id
        )
    }
}

fn flag(name: &str) -> bool {
    std::env::var(name).map(|v| v != "0").unwrap_or(true)
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();

    let config = Config::from_env()?;

    info!("Kennel Robot starting");
    info!("  Client ID: {}", config.client_id);
    info!("  Relay: {}", config.ws_url());
    info!("  Telemetry every {:?}", config.telemetry_interval);
    info!(
        "  Hardware: camera={} distance={} imu={} rgb={}",
        config.capabilities.has_camera,
        config.capabilities.has_distance_sensor,
        config.capabilities.has_imu,
        config.capabilities.has_rgb
    );

    let mut rig = simulated_rig(&config);
    info!("Using simulated sensors");

    let cancel = CancellationToken::new();
    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received shutdown signal");
            signal_cancel.cancel();
        }
    });

    settle(rig.actuator.as_ref(), PostureAction::Stand).await;
    run(&config, &mut rig, &cancel).await;
    settle(rig.actuator.as_ref(), PostureAction::Sit).await;

    info!("Robot shutting down");
    Ok(())
}

fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("kennel=info".parse().unwrap()),
        )
        .init();
}

fn simulated_rig(config: &Config) -> Rig {
    let caps = config.capabilities;
    let scene = SimulatedScene::new(config.scene_period);
    Rig {
        capabilities: caps,
        ip_address: local_ip(),
        actuator: Arc::new(LoggingActuator::new(caps)),
        camera: caps
            .has_camera
            .then(|| Box::new(TestPattern::new()) as Box<dyn sensors::Camera>),
        detector: Box::new(scene.clone()),
        distance_sensor: caps
            .has_distance_sensor
            .then(|| Box::new(scene) as Box<dyn sensors::DistanceSensor>),
    }
}

/// Connect, stream, reconnect with backoff, until shutdown
async fn run(config: &Config, rig: &mut Rig, cancel: &CancellationToken) {
    let url = config.ws_url();
    let mut attempt: u32 = 0;

    loop {
        let connected = tokio::select! {
            result = connect_async(url.as_str()) => result,
            _ = cancel.cancelled() => break,
        };

        let socket = match connected {
            Ok((socket, _)) => socket,
            Err(e) => {
                let delay = reconnect_delay(attempt);
                attempt = attempt.saturating_add(1);
                warn!("Failed to connect: {}. Retrying in {:.0}s", e, delay.as_secs_f64());
                if sleep_or_cancel(delay, cancel).await {
                    break;
                }
                continue;
            }
        };

        // Connected, reset the backoff
        attempt = 0;
        info!("Connected to relay!");

        match agent::run_session(socket, rig, config.telemetry_interval, cancel).await {
            Ok(SessionEnd::Shutdown) => break,
            Ok(SessionEnd::Disconnected) => warn!("Relay closed the connection"),
            Err(e) => warn!("Connection lost: {:#}", e),
        }

        if sleep_or_cancel(Duration::from_secs(1), cancel).await {
            break;
        }
    }
}

/// Exponential backoff: 1s, 2s, 4s, 8s, 16s, 30s (capped).
fn reconnect_delay(attempt: u32) -> Duration {
    let secs = if attempt >= 5 { 30 } else { 1u64 << attempt };
    Duration::from_secs(secs)
}

/// Sleep for `delay`; true if shutdown was requested meanwhile
async fn sleep_or_cancel(delay: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(delay) => false,
        _ = cancel.cancelled() => true,
    }
}

/// Move into a resting posture; failures are logged, not fatal
async fn settle(actuator: &dyn Actuator, action: PostureAction) {
    if let Err(e) = actuator.execute(&posture(action)).await {
        warn!(error = %e, "Failed to {:?}", action);
    }
}

/// Address of the interface that routes to the outside world
fn local_ip() -> Option<String> {
    let socket = UdpSocket::bind("0.0.0.0:0").ok()?;
    socket.connect("8.8.8.8:80").ok()?;
    socket.local_addr().ok().map(|addr| addr.ip().to_string())
}
