//! Actuator seam: where relay commands meet the robot's motors, speaker and lights

use anyhow::{bail, Result};
use async_trait::async_trait;
use tracing::info;

use kennel_core::{Capabilities, Command, PostureAction, PostureParams, RobotMessage};

/// Executes one command on the robot hardware.
///
/// Returns a short human-readable result that is sent back in the ack.
#[async_trait]
pub trait Actuator: Send + Sync {
    async fn execute(&self, command: &Command) -> Result<String>;
}

/// Actuator for development machines without a robot attached
pub struct LoggingActuator {
    capabilities: Capabilities,
}

impl LoggingActuator {
    pub fn new(capabilities: Capabilities) -> Self {
        Self { capabilities }
    }
}

#[async_trait]
impl Actuator for LoggingActuator {
    async fn execute(&self, command: &Command) -> Result<String> {
        if let Some(missing) = command.required_capability(&self.capabilities) {
            bail!("no {} hardware on this robot", missing);
        }
        let message = match command {
            Command::Movement(p) => match p.steps {
                Some(steps) => format!("{:?} x{} at speed {}", p.action, steps, p.speed),
                None => format!("{:?} at speed {}", p.action, p.speed),
            },
            Command::Posture(p) => format!("{:?}", p.action),
            Command::Sound(p) => format!("played {:?} at volume {}", p.sound, p.volume),
            Command::Light(p) => format!("light {} {}", p.mode, p.color),
            Command::Head(p) => format!("head yaw {:.1} pitch {:.1}", p.yaw, p.pitch),
            Command::ModeSwitch(p) => format!("mode {:?}", p.mode),
        };
        info!(command = %command.kind(), "{}", message);
        Ok(message)
    }
}

/// Run a command and build its acknowledgement
pub async fn dispatch(actuator: &dyn Actuator, command: &Command) -> RobotMessage {
    let command_type = command.kind();
    match actuator.execute(command).await {
        Ok(message) => RobotMessage::Ack {
            command_type,
            success: true,
            message: Some(message),
        },
        Err(e) => RobotMessage::Ack {
            command_type,
            success: false,
            message: Some(format!("{:#}", e)),
        },
    }
}

pub fn posture(action: PostureAction) -> Command {
    Command::Posture(PostureParams { action })
}
