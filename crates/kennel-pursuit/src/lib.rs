//! Pursuit state machine for kennel robots
//!
//! Turns a stream of (detections, distance) observations into behavior
//! modes and discrete actions. Pure logic: callers supply the clock, so a
//! replayed sequence of observations always yields the same actions.
//!
//! - [`PursuitConfig`]: thresholds and intervals, validated up front
//! - [`select_target`]: picks the person to react to
//! - [`PursuitState::step`]: `(state, observation) -> (state', outcome)`
//! - [`PursuitMachine`]: owns a config and a state, steps in place

mod config;
mod machine;
mod target;

pub use config::{ConfigError, PursuitConfig};
pub use machine::{Action, Mode, Observation, PursuitMachine, PursuitState, StepOutcome, Transition};
pub use target::{select_target, yaw_offset};
