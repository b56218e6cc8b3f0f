//! Telemetry value types
//!
//! A robot publishes frames, person detections and distance readings. The
//! relay keeps only the newest value of each field in a [`TelemetrySnapshot`];
//! the one exception is a short distance ring kept for dashboard charting.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::time::{Duration, Instant};

use crate::RelayError;

/// Hardware the robot reports having
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Capabilities {
    pub has_camera: bool,
    pub has_distance_sensor: bool,
    pub has_imu: bool,
    pub has_rgb: bool,
}

impl Capabilities {
    /// Everything present; what a fully equipped robot reports
    pub fn full() -> Self {
        Self {
            has_camera: true,
            has_distance_sensor: true,
            has_imu: true,
            has_rgb: true,
        }
    }
}

/// Axis-aligned box in image pixel coordinates.
///
/// Only the corners are read off the wire; width, height and center are
/// always recomputed so a robot cannot send inconsistent values.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "BoxCorners")]
pub struct BoundingBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
    pub width: f32,
    pub height: f32,
    pub center_x: f32,
    pub center_y: f32,
}

#[derive(Deserialize)]
struct BoxCorners {
    x1: f32,
    y1: f32,
    x2: f32,
    y2: f32,
}

impl From<BoxCorners> for BoundingBox {
    fn from(c: BoxCorners) -> Self {
        BoundingBox::from_corners(c.x1, c.y1, c.x2, c.y2)
    }
}

impl BoundingBox {
    pub fn from_corners(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        let (x1, x2) = if x1 <= x2 { (x1, x2) } else { (x2, x1) };
        let (y1, y2) = if y1 <= y2 { (y1, y2) } else { (y2, y1) };
        Self {
            x1,
            y1,
            x2,
            y2,
            width: x2 - x1,
            height: y2 - y1,
            center_x: (x1 + x2) / 2.0,
            center_y: (y1 + y2) / 2.0,
        }
    }

    pub fn area(&self) -> f32 {
        self.width * self.height
    }
}

/// One detected object
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    #[serde(alias = "class_name", default = "default_class_label")]
    pub class_label: String,
    /// Model confidence in `[0, 1]`
    pub confidence: f32,
    #[serde(alias = "bounding_box")]
    pub bbox: BoundingBox,
}

fn default_class_label() -> String {
    "person".to_string()
}

impl Detection {
    pub fn person(confidence: f32, bbox: BoundingBox) -> Self {
        Self {
            class_label: default_class_label(),
            confidence,
            bbox,
        }
    }
}

/// Source image dimensions a detection result refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageSize {
    pub width: u32,
    pub height: u32,
}

/// Output of one detector run over one frame
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DetectionResult {
    #[serde(default)]
    pub detections: Vec<Detection>,
    /// Inference latency in seconds
    #[serde(default)]
    pub inference_time: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_size: Option<ImageSize>,
}

impl DetectionResult {
    /// Reject confidences outside `[0, 1]` and non-finite coordinates
    pub fn validate(&self) -> Result<(), RelayError> {
        for (i, d) in self.detections.iter().enumerate() {
            if !(0.0..=1.0).contains(&d.confidence) {
                return Err(RelayError::MalformedMessage(format!(
                    "detection {} confidence {} outside [0, 1]",
                    i, d.confidence
                )));
            }
            let b = &d.bbox;
            if ![b.x1, b.y1, b.x2, b.y2].iter().all(|v| v.is_finite()) {
                return Err(RelayError::MalformedMessage(format!(
                    "detection {} has non-finite bounding box",
                    i
                )));
            }
        }
        if !self.inference_time.is_finite() || self.inference_time < 0.0 {
            return Err(RelayError::MalformedMessage(
                "inference_time must be a non-negative number".into(),
            ));
        }
        Ok(())
    }
}

/// A value together with the instant it was received
#[derive(Debug, Clone, PartialEq)]
pub struct Sample<T> {
    pub value: T,
    pub at: Instant,
}

impl<T> Sample<T> {
    pub fn new(value: T, at: Instant) -> Self {
        Self { value, at }
    }

    pub fn age(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.at)
    }

    /// The value if it is younger than `window`, `SensorStale` otherwise
    pub fn fresh(
        &self,
        now: Instant,
        window: Duration,
        sensor: &'static str,
    ) -> Result<&T, RelayError> {
        let age = self.age(now);
        if age > window {
            Err(RelayError::SensorStale {
                sensor,
                age_ms: age.as_millis() as u64,
            })
        } else {
            Ok(&self.value)
        }
    }
}

/// Fields carried by one inbound telemetry message (all optional)
#[derive(Debug, Clone, Default)]
pub struct TelemetryUpdate {
    pub frame: Option<Bytes>,
    pub detections: Option<DetectionResult>,
    pub distance_cm: Option<f32>,
    pub capabilities: Option<Capabilities>,
}

impl TelemetryUpdate {
    /// Whether this update should drive a pursuit step
    pub fn has_observation(&self) -> bool {
        self.distance_cm.is_some() || self.detections.is_some()
    }
}

/// One point of the distance chart
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct DistancePoint {
    pub unix_ms: u64,
    pub distance_cm: f32,
}

/// Latest telemetry for one client.
///
/// Overwritten field by field; `last_update_unix_ms` never decreases.
#[derive(Debug, Clone, Default)]
pub struct TelemetrySnapshot {
    pub frame: Option<Sample<Bytes>>,
    pub detections: Option<Sample<DetectionResult>>,
    /// Wall-clock receive time of `detections`, for dashboard display
    pub detections_unix_ms: u64,
    pub distance_cm: Option<Sample<f32>>,
    pub capabilities: Capabilities,
    pub ip_address: Option<String>,
    pub last_update: Option<Instant>,
    pub last_update_unix_ms: u64,
    pub distance_history: VecDeque<DistancePoint>,
}

impl TelemetrySnapshot {
    pub fn new(capabilities: Capabilities) -> Self {
        Self {
            capabilities,
            ..Default::default()
        }
    }

    /// Merge the provided fields and advance the update timestamps.
    ///
    /// Timestamps are clamped so they never move backwards, even when the
    /// caller's clock reading is older than the one already recorded.
    pub fn merge(&mut self, update: TelemetryUpdate, now: Instant, unix_ms: u64, history_len: usize) {
        let now = match self.last_update {
            Some(prev) if prev > now => prev,
            _ => now,
        };
        let unix_ms = unix_ms.max(self.last_update_unix_ms);

        if let Some(frame) = update.frame {
            self.frame = Some(Sample::new(frame, now));
        }
        if let Some(detections) = update.detections {
            self.detections = Some(Sample::new(detections, now));
            self.detections_unix_ms = unix_ms;
        }
        if let Some(distance) = update.distance_cm {
            self.distance_cm = Some(Sample::new(distance, now));
            if history_len > 0 {
                while self.distance_history.len() >= history_len {
                    self.distance_history.pop_front();
                }
                self.distance_history.push_back(DistancePoint {
                    unix_ms,
                    distance_cm: distance,
                });
            }
        }
        if let Some(capabilities) = update.capabilities {
            self.capabilities = capabilities;
        }

        self.last_update = Some(now);
        self.last_update_unix_ms = unix_ms;
    }

    /// Seconds since the last merged update, if any
    pub fn age(&self, now: Instant) -> Option<Duration> {
        self.last_update.map(|at| now.saturating_duration_since(at))
    }
}
