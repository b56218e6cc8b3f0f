//! Relay core for kennel
//!
//! The relay is the meeting point between robots and the dashboard:
//! - Robots attach over a WebSocket and stream telemetry
//! - Each robot gets a client session holding its latest snapshot and
//!   pursuit state, stepping the pursuit machine in autonomous mode
//! - The registry tracks live sessions and evicts stale ones
//! - The gateway translates wire traffic into registry/session calls
//! - The web layer serves the robot WebSocket and dashboard HTTP routes

mod config;
mod gateway;
mod rate_limit;
mod registry;
mod session;
pub mod web;

pub use config::RelayConfig;
pub use gateway::{RelayGateway, RobotLink};
pub use rate_limit::{ConnectionRateLimiter, RateCheck, RateLimitConfig};
pub use registry::{Registry, RelayCounters, RelayStats};
pub use session::{ClientSession, SessionConfig, SessionView};
