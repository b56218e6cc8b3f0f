//! Command protocol and wire envelopes
//!
//! Commands flow from the dashboard (or the relay's own pursuit loop) to a
//! robot. Everything on the robot WebSocket is JSON tagged by `type`.

use base64::Engine;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::{Capabilities, DetectionResult, RelayError, TelemetryUpdate};

/// Locomotion actions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MoveAction {
    Forward,
    Backward,
    TurnLeft,
    TurnRight,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PostureAction {
    Stand,
    Sit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SoundEffect {
    Bark,
    Growl,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlMode {
    Auto,
    Manual,
}

/// Parameters for a movement command
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MovementParams {
    pub action: MoveAction,
    #[serde(default = "default_speed")]
    pub speed: u32,
    /// Gait steps to take; robot default when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub steps: Option<u32>,
}

fn default_speed() -> u32 {
    90
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostureParams {
    pub action: PostureAction,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SoundParams {
    pub sound: SoundEffect,
    #[serde(default = "default_volume")]
    pub volume: u32,
}

fn default_volume() -> u32 {
    80
}

/// Parameters for the RGB strip
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LightParams {
    /// Animation mode (`breath`, `boom`, `bark`, `off`, ...)
    #[serde(default = "default_light_mode")]
    pub mode: String,
    #[serde(default = "default_light_color")]
    pub color: String,
    /// Animation delay in seconds
    #[serde(default = "default_light_delay")]
    pub delay: f32,
}

fn default_light_mode() -> String {
    "breath".to_string()
}

fn default_light_color() -> String {
    "blue".to_string()
}

fn default_light_delay() -> f32 {
    0.1
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModeSwitchParams {
    pub mode: ControlMode,
}

/// Head/camera aim in degrees
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HeadParams {
    pub yaw: f32,
    #[serde(default)]
    pub pitch: f32,
    #[serde(default = "default_speed")]
    pub speed: u32,
}

/// All supported commands.
///
/// Serialized adjacently tagged: `{"command_type": "...", "payload": {...}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "command_type", content = "payload", rename_all = "snake_case")]
pub enum Command {
    Movement(MovementParams),
    Posture(PostureParams),
    Sound(SoundParams),
    Light(LightParams),
    #[serde(alias = "mode-switch")]
    ModeSwitch(ModeSwitchParams),
    Head(HeadParams),
}

impl Command {
    pub fn kind(&self) -> CommandKind {
        match self {
            Command::Movement(_) => CommandKind::Movement,
            Command::Posture(_) => CommandKind::Posture,
            Command::Sound(_) => CommandKind::Sound,
            Command::Light(_) => CommandKind::Light,
            Command::ModeSwitch(_) => CommandKind::ModeSwitch,
            Command::Head(_) => CommandKind::Head,
        }
    }

    /// Capability a command needs on the robot, if any
    pub fn required_capability(&self, caps: &Capabilities) -> Option<&'static str> {
        match self {
            Command::Light(_) if !caps.has_rgb => Some("rgb"),
            Command::Head(_) if !caps.has_camera => Some("camera"),
            _ => None,
        }
    }

    pub fn movement(action: MoveAction, speed: u32) -> Self {
        Command::Movement(MovementParams {
            action,
            speed,
            steps: None,
        })
    }
}

/// Discriminant of [`Command`], for logging and acknowledgements
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandKind {
    Movement,
    Posture,
    Sound,
    Light,
    ModeSwitch,
    Head,
}

impl fmt::Display for CommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CommandKind::Movement => "movement",
            CommandKind::Posture => "posture",
            CommandKind::Sound => "sound",
            CommandKind::Light => "light",
            CommandKind::ModeSwitch => "mode_switch",
            CommandKind::Head => "head",
        };
        f.write_str(s)
    }
}

/// Dashboard request body for `POST /client/{id}/command`
#[derive(Debug, Clone, Deserialize)]
pub struct DashboardCommand {
    #[serde(default)]
    pub client_id: Option<String>,
    pub command_type: String,
    #[serde(default)]
    pub data: serde_json::Value,
}

impl DashboardCommand {
    /// Parse `command_type` + `data` into a typed [`Command`]
    pub fn into_command(self) -> Result<Command, RelayError> {
        let data = match self.data {
            serde_json::Value::Null => serde_json::Value::Object(Default::default()),
            other => other,
        };
        let envelope = serde_json::json!({
            "command_type": self.command_type,
            "payload": data,
        });
        serde_json::from_value(envelope).map_err(|e| {
            RelayError::MalformedMessage(format!("invalid {} command: {}", self.command_type, e))
        })
    }
}

/// Response body for dashboard commands
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandReply {
    pub status: ReplyStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplyStatus {
    Success,
    Error,
}

impl CommandReply {
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            status: ReplyStatus::Success,
            message: Some(message.into()),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: ReplyStatus::Error,
            message: Some(message.into()),
        }
    }
}

/// Telemetry as it appears on the wire (frame base64-encoded)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TelemetryMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frame: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detections: Option<DetectionResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub distance_cm: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capabilities: Option<Capabilities>,
    /// Robot-side capture time (unix seconds), informational
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<f64>,
}

impl TelemetryMessage {
    /// Encode a frame for the wire
    pub fn encode_frame(frame: &[u8]) -> String {
        base64::engine::general_purpose::STANDARD.encode(frame)
    }

    /// Size of the frame once decoded, read from the base64 length and padding
    pub fn frame_len(&self) -> Option<usize> {
        self.frame
            .as_deref()
            .map(|encoded| encoded.trim_end_matches('=').len() * 3 / 4)
    }

    /// Decode and validate into a [`TelemetryUpdate`].
    ///
    /// A frame larger than `max_frame_bytes` is dropped; the rest of the
    /// message still applies.
    pub fn into_update(self, max_frame_bytes: usize) -> Result<TelemetryUpdate, RelayError> {
        let frame = match self.frame {
            Some(encoded) => {
                let bytes = base64::engine::general_purpose::STANDARD
                    .decode(encoded.as_bytes())
                    .map_err(|e| RelayError::MalformedMessage(format!("frame is not base64: {}", e)))?;
                (bytes.len() <= max_frame_bytes).then(|| Bytes::from(bytes))
            }
            None => None,
        };

        if let Some(ref detections) = self.detections {
            detections.validate()?;
        }

        if let Some(distance) = self.distance_cm {
            if !distance.is_finite() || distance < 0.0 {
                return Err(RelayError::MalformedMessage(format!(
                    "distance {} is not a non-negative number",
                    distance
                )));
            }
        }

        Ok(TelemetryUpdate {
            frame,
            detections: self.detections,
            distance_cm: self.distance_cm,
            capabilities: self.capabilities,
        })
    }
}

/// Robot → relay messages
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RobotMessage {
    /// Sent on connect and in answer to `status_request`
    Hello {
        #[serde(default)]
        capabilities: Capabilities,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        ip_address: Option<String>,
    },
    Telemetry(TelemetryMessage),
    /// Execution report for a command
    Ack {
        command_type: CommandKind,
        success: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
}

/// Relay → robot messages
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RelayMessage {
    Command(Command),
    StatusRequest,
}
