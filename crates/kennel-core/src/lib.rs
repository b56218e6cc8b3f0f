//! Core types and protocol definitions for kennel
//!
//! This crate contains foundational types shared by the relay and the robot agent:
//! - Client identifiers
//! - Telemetry value types (frames, detections, distance, capabilities)
//! - Command enumeration and the robot/relay wire envelopes
//! - The relay error taxonomy
//! - Protocol constants

mod client_id;
mod command;
mod error;
mod protocol;
mod telemetry;

pub use client_id::ClientId;
pub use command::*;
pub use error::RelayError;
pub use protocol::*;
pub use telemetry::*;
