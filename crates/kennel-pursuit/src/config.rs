//! Pursuit tuning

use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error(
        "distance thresholds must satisfy retreat < close < follow < safe \
         (got {retreat} < {close} < {follow} < {safe})"
    )]
    ThresholdOrder {
        retreat: f32,
        close: f32,
        follow: f32,
        safe: f32,
    },
    #[error("detection confidence minimum {0} outside [0, 1]")]
    Confidence(f32),
    #[error("hysteresis margin {0} must be a non-negative number")]
    Hysteresis(f32),
    #[error("{0} must be greater than zero")]
    ZeroInterval(&'static str),
}

/// Thresholds and intervals driving the pursuit machine.
///
/// Entry into a closer mode uses the plain threshold; leaving it requires
/// moving `hysteresis_cm` past the threshold.
#[derive(Debug, Clone, PartialEq)]
pub struct PursuitConfig {
    /// At or below this distance the robot confronts
    pub close_distance_cm: f32,
    /// Upper bound for active pursuit
    pub follow_distance_cm: f32,
    /// Beyond this distance there is no reaction
    pub safe_distance_cm: f32,
    /// Below this distance while confronting, back away
    pub retreat_distance_cm: f32,
    pub hysteresis_cm: f32,
    /// Detections below this confidence are ignored
    pub detection_confidence_min: f32,
    /// Minimum time between consecutive actions in the same mode
    pub step_interval: Duration,
    /// Time between look-around scans while idle
    pub scan_interval: Duration,
    /// How long a target may be missing before giving up on it
    pub lost_dwell: Duration,
    /// Readings older than this are treated as absent
    pub sensor_freshness: Duration,
}

impl Default for PursuitConfig {
    fn default() -> Self {
        Self {
            close_distance_cm: 30.0,
            follow_distance_cm: 200.0,
            safe_distance_cm: 400.0,
            retreat_distance_cm: 15.0,
            hysteresis_cm: 10.0,
            detection_confidence_min: 0.5,
            step_interval: Duration::from_millis(1500),
            scan_interval: Duration::from_millis(3000),
            lost_dwell: Duration::from_millis(2000),
            sensor_freshness: Duration::from_millis(2000),
        }
    }
}

impl PursuitConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let ordered = self.retreat_distance_cm >= 0.0
            && self.retreat_distance_cm < self.close_distance_cm
            && self.close_distance_cm < self.follow_distance_cm
            && self.follow_distance_cm < self.safe_distance_cm;
        if !ordered {
            return Err(ConfigError::ThresholdOrder {
                retreat: self.retreat_distance_cm,
                close: self.close_distance_cm,
                follow: self.follow_distance_cm,
                safe: self.safe_distance_cm,
            });
        }
        if !(0.0..=1.0).contains(&self.detection_confidence_min) {
            return Err(ConfigError::Confidence(self.detection_confidence_min));
        }
        if !self.hysteresis_cm.is_finite() || self.hysteresis_cm < 0.0 {
            return Err(ConfigError::Hysteresis(self.hysteresis_cm));
        }
        for (name, d) in [
            ("step_interval", self.step_interval),
            ("scan_interval", self.scan_interval),
            ("sensor_freshness", self.sensor_freshness),
        ] {
            if d.is_zero() {
                return Err(ConfigError::ZeroInterval(name));
            }
        }
        Ok(())
    }
}
