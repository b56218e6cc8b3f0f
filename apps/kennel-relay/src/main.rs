//! Kennel Relay: connects robots to the operator dashboard
//!
//! Robots attach over a WebSocket at `/ws/{client_id}` and stream telemetry;
//! the dashboard polls HTTP routes and posts commands. In autonomous mode the
//! relay runs each robot's pursuit machine on incoming telemetry.
//!
//! ## Usage
//!
//! ```bash
//! # Start relay (port 8000)
//! kennel-relay
//!
//! # Custom port, tighter pursuit
//! KENNEL_WEB_PORT=9000 KENNEL_CLOSE_DISTANCE_CM=40 kennel-relay
//! ```

use anyhow::Result;
use tokio::time::{interval, Duration};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{error, info, warn};

use kennel_server::{RelayConfig, RelayGateway};

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();

    let config = RelayConfig::from_env()?;

    info!("Kennel Relay starting");
    info!("  Bind: {}", config.bind);
    info!("  Liveness window: {:?}", config.liveness);
    info!("  Command buffer: {}", config.command_buffer);
    info!(
        "  Pursuit: close {} cm, follow {} cm, safe {} cm, retreat {} cm",
        config.session.pursuit.close_distance_cm,
        config.session.pursuit.follow_distance_cm,
        config.session.pursuit.safe_distance_cm,
        config.session.pursuit.retreat_distance_cm
    );
    info!(
        "  Rate limits: {} telemetry/s, {} frames/s, {} byte frames",
        config.rate_limit.telemetry_hz, config.rate_limit.frame_hz, config.rate_limit.max_frame_bytes
    );

    let bind = config.bind;
    let sweep_every = config.sweep_interval;
    let gateway = RelayGateway::new(config);

    // Graceful shutdown
    let cancel = CancellationToken::new();
    let tracker = TaskTracker::new();

    // Spawn web server
    let web_gateway = gateway.clone();
    let web_cancel = cancel.clone();
    tracker.spawn(async move {
        tokio::select! {
            result = kennel_server::web::start(web_gateway, bind) => {
                if let Err(e) = result {
                    error!("Web server error: {:#}", e);
                }
            }
            _ = web_cancel.cancelled() => {
                info!("Web server: shutting down");
            }
        }
    });

    // Spawn liveness sweep
    let sweep_gateway = gateway.clone();
    let sweep_cancel = cancel.clone();
    tracker.spawn(async move {
        let mut ticker = interval(sweep_every);
        loop {
            tokio::select! {
                _ = sweep_cancel.cancelled() => break,
                _ = ticker.tick() => {
                    let evicted = sweep_gateway.sweep().await;
                    if !evicted.is_empty() {
                        info!(count = evicted.len(), "Liveness sweep evicted stale sessions");
                    }
                }
            }
        }
    });

    tracker.close();

    run_headless(gateway, cancel, tracker).await
}

fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("kennel=info".parse().unwrap()),
        )
        .init();
}

/// Log stats periodically, shut down on Ctrl-C
async fn run_headless(
    gateway: RelayGateway,
    cancel: CancellationToken,
    tracker: TaskTracker,
) -> Result<()> {
    info!("Waiting for robots...");
    let mut stats_interval = interval(Duration::from_secs(30));
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Received shutdown signal");
                cancel.cancel();
                break;
            }
            _ = stats_interval.tick() => {
                let stats = gateway.stats();
                let active = gateway.on_dashboard_list_clients().await.len();
                info!(
                    "Stats: {} sessions ({} active), {} telemetry rx, {} commands tx, {} evictions",
                    stats.sessions, active, stats.telemetry_received,
                    stats.commands_forwarded, stats.evictions
                );
            }
        }
    }

    if tokio::time::timeout(Duration::from_secs(5), tracker.wait()).await.is_err() {
        warn!("Shutdown timed out after 5s");
    }
    Ok(())
}
