//! Pursuit modes, transitions and actions

use serde::Serialize;
use std::fmt;
use std::time::{Duration, Instant};

use kennel_core::{
    Capabilities, Command, DetectionResult, HeadParams, LightParams, MoveAction, MovementParams,
    Sample, SoundEffect, SoundParams,
};

use crate::config::PursuitConfig;
use crate::target::{select_target, yaw_offset};

/// Beyond this yaw the robot turns its body instead of walking straight
const ALIGN_THRESHOLD_DEG: f32 = 20.0;
const PURSUIT_SPEED: u32 = 90;
const RETREAT_SPEED: u32 = 95;
const SCAN_SPEED: u32 = 80;
const CONFRONT_VOLUME: u32 = 100;
/// Upper bound on edges traversed in one step (Idle → Retreating is four)
const MAX_HOPS: usize = 5;

/// Behavior mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    Idle,
    Tracking,
    Following,
    Confronting,
    Retreating,
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Mode::Idle => "idle",
            Mode::Tracking => "tracking",
            Mode::Following => "following",
            Mode::Confronting => "confronting",
            Mode::Retreating => "retreating",
        };
        f.write_str(s)
    }
}

/// One traversed edge
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub from: Mode,
    pub to: Mode,
}

/// Discrete behavior emitted by a step
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Action {
    /// Look around for a target
    Scan { direction: MoveAction },
    /// Aim head/camera at the target without walking
    Orient { yaw: f32 },
    /// Walk toward the target
    Advance { movement: MoveAction },
    /// Hold position, make noise, flash lights
    Confront { sound: SoundEffect },
    /// Back away
    Retreat,
}

impl Action {
    /// Actuator commands that carry out this action
    pub fn commands(&self) -> Vec<Command> {
        match *self {
            Action::Scan { direction } => vec![Command::Movement(MovementParams {
                action: direction,
                speed: SCAN_SPEED,
                steps: Some(1),
            })],
            Action::Orient { yaw } => vec![Command::Head(HeadParams {
                yaw,
                pitch: 0.0,
                speed: PURSUIT_SPEED,
            })],
            Action::Advance { movement } => vec![Command::Movement(MovementParams {
                action: movement,
                speed: PURSUIT_SPEED,
                steps: Some(if movement == MoveAction::Forward { 2 } else { 1 }),
            })],
            Action::Confront { sound } => vec![
                Command::Sound(SoundParams {
                    sound,
                    volume: CONFRONT_VOLUME,
                }),
                Command::Light(LightParams {
                    mode: "boom".into(),
                    color: "red".into(),
                    delay: 0.01,
                }),
            ],
            Action::Retreat => vec![Command::Movement(MovementParams {
                action: MoveAction::Backward,
                speed: RETREAT_SPEED,
                steps: Some(2),
            })],
        }
    }
}

/// Inputs for one step.
///
/// Samples carry their receive instant; the machine itself decides whether
/// they are fresh enough to use.
#[derive(Debug, Clone, Copy)]
pub struct Observation<'a> {
    pub detections: Option<&'a Sample<DetectionResult>>,
    pub distance_cm: Option<&'a Sample<f32>>,
    pub capabilities: Capabilities,
}

/// Result of one step
#[derive(Debug, Clone, PartialEq)]
pub struct StepOutcome {
    pub mode: Mode,
    pub transitions: Vec<Transition>,
    pub action: Option<Action>,
    /// The robot has no camera, so no target can ever be seen
    pub camera_unavailable: bool,
}

impl StepOutcome {
    pub fn mode_changed(&self) -> bool {
        !self.transitions.is_empty()
    }
}

/// Mutable pursuit state, advanced only by [`PursuitState::step`]
#[derive(Debug, Clone, PartialEq)]
pub struct PursuitState {
    pub mode: Mode,
    pub mode_entered: Option<Instant>,
    last_action_at: Option<Instant>,
    /// Last action that skipped the step interval on a mode change
    last_bypass_at: Option<Instant>,
    last_target_seen: Option<Instant>,
    scan_right: bool,
}

impl Default for PursuitState {
    fn default() -> Self {
        Self {
            mode: Mode::Idle,
            mode_entered: None,
            last_action_at: None,
            last_bypass_at: None,
            last_target_seen: None,
            scan_right: false,
        }
    }
}

/// Inputs after freshness filtering and target selection
struct Inputs {
    target_yaw: Option<f32>,
    distance: Option<f32>,
    target_lost: bool,
    has_camera: bool,
    has_distance_sensor: bool,
}

impl PursuitState {
    /// Advance the machine by one observation.
    ///
    /// Pure: the receiver is untouched and the successor state is returned
    /// alongside the outcome.
    pub fn step(
        &self,
        config: &PursuitConfig,
        obs: &Observation<'_>,
        now: Instant,
    ) -> (PursuitState, StepOutcome) {
        let mut next = self.clone();
        let caps = obs.capabilities;

        let detections = if caps.has_camera {
            obs.detections
                .and_then(|s| s.fresh(now, config.sensor_freshness, "detection").ok())
        } else {
            None
        };
        let target = detections.and_then(|result| {
            select_target(&result.detections, config.detection_confidence_min)
                .map(|(_, d)| yaw_offset(d, result.image_size.map(|s| s.width)))
        });
        if target.is_some() {
            next.last_target_seen = Some(now);
        }

        // unknown distance never counts as near or far
        let distance = if caps.has_distance_sensor {
            obs.distance_cm
                .and_then(|s| s.fresh(now, config.sensor_freshness, "distance").ok())
                .copied()
        } else {
            None
        };

        let target_lost = target.is_none()
            && (!caps.has_camera
                || next
                    .last_target_seen
                    .map_or(true, |seen| now.saturating_duration_since(seen) >= config.lost_dwell));

        let inputs = Inputs {
            target_yaw: target,
            distance,
            target_lost,
            has_camera: caps.has_camera,
            has_distance_sensor: caps.has_distance_sensor,
        };

        let mut transitions = Vec::new();
        for _ in 0..MAX_HOPS {
            match next_mode(next.mode, config, &inputs) {
                Some(to) => {
                    transitions.push(Transition { from: next.mode, to });
                    next.mode = to;
                }
                None => break,
            }
        }

        if !transitions.is_empty() || next.mode_entered.is_none() {
            next.mode_entered = Some(now);
        }

        let interval = if next.mode == Mode::Idle {
            config.scan_interval
        } else {
            config.step_interval
        };
        let elapsed = |at: Option<Instant>, wait: Duration| {
            at.map_or(true, |at| now.saturating_duration_since(at) >= wait)
        };
        let on_schedule = elapsed(next.last_action_at, interval);
        // Retreating always acts at once; other mode changes may jump the
        // schedule at most once per step interval
        let bypass = !on_schedule
            && !transitions.is_empty()
            && (next.mode == Mode::Retreating || elapsed(next.last_bypass_at, config.step_interval));

        let action = if on_schedule || bypass {
            next.choose_action(config, &inputs, caps)
        } else {
            None
        };
        if action.is_some() {
            next.last_action_at = Some(now);
            if bypass {
                next.last_bypass_at = Some(now);
            }
        }

        let outcome = StepOutcome {
            mode: next.mode,
            transitions,
            action,
            camera_unavailable: !caps.has_camera,
        };
        (next, outcome)
    }

    fn choose_action(
        &mut self,
        config: &PursuitConfig,
        inputs: &Inputs,
        caps: Capabilities,
    ) -> Option<Action> {
        match self.mode {
            Mode::Idle => {
                if !caps.has_camera {
                    return None;
                }
                let direction = if self.scan_right {
                    MoveAction::TurnRight
                } else {
                    MoveAction::TurnLeft
                };
                self.scan_right = !self.scan_right;
                Some(Action::Scan { direction })
            }
            Mode::Tracking => {
                let yaw = inputs.target_yaw?;
                match inputs.distance {
                    Some(d) if d > config.safe_distance_cm => None,
                    _ => Some(Action::Orient { yaw }),
                }
            }
            Mode::Following => {
                let yaw = inputs.target_yaw?;
                let movement = if yaw > ALIGN_THRESHOLD_DEG {
                    MoveAction::TurnRight
                } else if yaw < -ALIGN_THRESHOLD_DEG {
                    MoveAction::TurnLeft
                } else {
                    MoveAction::Forward
                };
                Some(Action::Advance { movement })
            }
            Mode::Confronting => {
                let sound = match inputs.distance {
                    Some(d) if d <= config.close_distance_cm / 3.0 => SoundEffect::Growl,
                    _ => SoundEffect::Bark,
                };
                Some(Action::Confront { sound })
            }
            Mode::Retreating => Some(Action::Retreat),
        }
    }
}

/// The single edge out of `mode` enabled by `inputs`, if any
fn next_mode(mode: Mode, config: &PursuitConfig, inputs: &Inputs) -> Option<Mode> {
    let close = config.close_distance_cm;
    let follow = config.follow_distance_cm;
    let margin = config.hysteresis_cm;

    // Hardware gate ahead of the per-mode edges
    if !inputs.has_camera && mode != Mode::Idle {
        return Some(Mode::Idle);
    }
    if !inputs.has_distance_sensor
        && matches!(mode, Mode::Following | Mode::Confronting | Mode::Retreating)
    {
        return Some(Mode::Tracking);
    }

    match mode {
        Mode::Idle => inputs.target_yaw.map(|_| Mode::Tracking),
        Mode::Tracking => {
            if inputs.target_lost {
                Some(Mode::Idle)
            } else if inputs.target_yaw.is_some()
                && inputs.has_distance_sensor
                && inputs.distance.is_some_and(|d| d <= follow)
            {
                Some(Mode::Following)
            } else {
                None
            }
        }
        Mode::Following => match inputs.distance {
            _ if inputs.target_lost => Some(Mode::Idle),
            Some(d) if d <= close => Some(Mode::Confronting),
            Some(d) if d <= follow + margin => None,
            _ => Some(Mode::Tracking),
        },
        Mode::Confronting => match inputs.distance {
            _ if inputs.target_lost => Some(Mode::Following),
            Some(d) if d < config.retreat_distance_cm => Some(Mode::Retreating),
            Some(d) if d <= close + margin => None,
            _ => Some(Mode::Following),
        },
        // backs away from anything too close, target or not
        Mode::Retreating => match inputs.distance {
            Some(d) if d <= close => None,
            _ => Some(Mode::Confronting),
        },
    }
}

/// A pursuit state bundled with its configuration
#[derive(Debug, Clone)]
pub struct PursuitMachine {
    config: PursuitConfig,
    state: PursuitState,
}

impl PursuitMachine {
    pub fn new(config: PursuitConfig) -> Self {
        Self {
            config,
            state: PursuitState::default(),
        }
    }

    pub fn mode(&self) -> Mode {
        self.state.mode
    }

    pub fn state(&self) -> &PursuitState {
        &self.state
    }

    pub fn config(&self) -> &PursuitConfig {
        &self.config
    }

    pub fn step(&mut self, obs: &Observation<'_>, now: Instant) -> StepOutcome {
        let (next, outcome) = self.state.step(&self.config, obs, now);
        self.state = next;
        outcome
    }
}
