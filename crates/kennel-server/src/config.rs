//! Relay configuration from environment

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use kennel_core::{DEFAULT_HISTORY_LEN, DEFAULT_LIVENESS_SECS, DEFAULT_RELAY_PORT, DEFAULT_SENSOR_FRESHNESS_MS};
use kennel_pursuit::PursuitConfig;

use crate::rate_limit::RateLimitConfig;
use crate::session::SessionConfig;

#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub bind: SocketAddr,
    /// Sessions silent for longer are stale
    pub liveness: Duration,
    pub sweep_interval: Duration,
    /// Outbound command queue depth per robot
    pub command_buffer: usize,
    pub session: SessionConfig,
    pub rate_limit: RateLimitConfig,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), DEFAULT_RELAY_PORT),
            liveness: Duration::from_secs(DEFAULT_LIVENESS_SECS),
            sweep_interval: Duration::from_secs(2),
            command_buffer: 32,
            session: SessionConfig::default(),
            rate_limit: RateLimitConfig::default(),
        }
    }
}

impl RelayConfig {
    /// Read `KENNEL_*` variables, falling back to defaults.
    ///
    /// Unparseable values fall back silently; pursuit thresholds that do not
    /// make sense together are an error.
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();

        let port: u16 = env_or("KENNEL_WEB_PORT", DEFAULT_RELAY_PORT);
        let ip: IpAddr = env_or("KENNEL_BIND", defaults.bind.ip());

        let pursuit_defaults = PursuitConfig::default();
        let pursuit = PursuitConfig {
            close_distance_cm: env_or("KENNEL_CLOSE_DISTANCE_CM", pursuit_defaults.close_distance_cm),
            follow_distance_cm: env_or("KENNEL_FOLLOW_DISTANCE_CM", pursuit_defaults.follow_distance_cm),
            safe_distance_cm: env_or("KENNEL_SAFE_DISTANCE_CM", pursuit_defaults.safe_distance_cm),
            retreat_distance_cm: env_or("KENNEL_RETREAT_DISTANCE_CM", pursuit_defaults.retreat_distance_cm),
            hysteresis_cm: env_or("KENNEL_HYSTERESIS_CM", pursuit_defaults.hysteresis_cm),
            detection_confidence_min: env_or("KENNEL_CONFIDENCE_MIN", pursuit_defaults.detection_confidence_min),
            step_interval: env_millis("KENNEL_STEP_INTERVAL_MS", pursuit_defaults.step_interval),
            scan_interval: env_millis("KENNEL_SCAN_INTERVAL_MS", pursuit_defaults.scan_interval),
            lost_dwell: env_millis("KENNEL_LOST_DWELL_MS", pursuit_defaults.lost_dwell),
            sensor_freshness: env_millis(
                "KENNEL_SENSOR_FRESHNESS_MS",
                Duration::from_millis(DEFAULT_SENSOR_FRESHNESS_MS),
            ),
        };
        pursuit.validate().context("invalid pursuit configuration")?;

        let rate_defaults = RateLimitConfig::default();
        let rate_limit = RateLimitConfig {
            telemetry_hz: env_or("KENNEL_TELEMETRY_HZ", rate_defaults.telemetry_hz),
            frame_hz: env_or("KENNEL_FRAME_HZ", rate_defaults.frame_hz),
            max_frame_bytes: env_or("KENNEL_MAX_FRAME_BYTES", rate_defaults.max_frame_bytes),
            abuse_threshold_secs: rate_defaults.abuse_threshold_secs,
        };

        Ok(Self {
            bind: SocketAddr::new(ip, port),
            liveness: Duration::from_secs(env_or("KENNEL_LIVENESS_SECS", DEFAULT_LIVENESS_SECS)),
            sweep_interval: Duration::from_secs(env_or("KENNEL_SWEEP_SECS", 2u64).max(1)),
            command_buffer: env_or("KENNEL_COMMAND_BUFFER", defaults.command_buffer).max(1),
            session: SessionConfig {
                pursuit,
                history_len: env_or("KENNEL_HISTORY_LEN", DEFAULT_HISTORY_LEN),
            },
            rate_limit,
        })
    }
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

fn env_millis(key: &str, default: Duration) -> Duration {
    std::env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .map(Duration::from_millis)
        .unwrap_or(default)
}
