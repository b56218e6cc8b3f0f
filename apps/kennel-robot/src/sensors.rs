//! Sensor seams and the simulated scene used when no robot hardware is present

use std::f32::consts::TAU;
use std::time::{Duration, Instant};

use anyhow::Result;
use bytes::Bytes;

use kennel_core::{BoundingBox, Detection, DetectionResult, ImageSize};

pub const FRAME_WIDTH: u32 = 640;
pub const FRAME_HEIGHT: u32 = 480;

/// Source of JPEG frames
pub trait Camera: Send {
    /// The newest frame, `None` when the camera has nothing yet
    fn capture(&mut self) -> Option<Bytes>;
}

/// Person detector. Treated as a black box: frame in, detections out.
pub trait Detector: Send {
    fn detect(&mut self, frame: &[u8]) -> Result<Vec<Detection>>;
}

/// Forward-facing distance sensor
pub trait DistanceSensor: Send {
    /// Distance in centimeters, `None` on a failed reading
    fn read_cm(&mut self) -> Option<f32>;
}

/// Run the detector over one frame, timing it
pub fn run_detector(detector: &mut dyn Detector, frame: &[u8]) -> Result<DetectionResult> {
    let started = Instant::now();
    let detections = detector.detect(frame)?;
    Ok(DetectionResult {
        detections,
        inference_time: started.elapsed().as_secs_f64(),
        image_size: Some(ImageSize {
            width: FRAME_WIDTH,
            height: FRAME_HEIGHT,
        }),
    })
}

/// Camera that emits a tiny JPEG-framed test pattern
#[derive(Default)]
pub struct TestPattern {
    counter: u32,
}

impl TestPattern {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Camera for TestPattern {
    fn capture(&mut self) -> Option<Bytes> {
        self.counter = self.counter.wrapping_add(1);
        // SOI, COM segment carrying the frame counter, EOI
        let mut frame = vec![0xFF, 0xD8, 0xFF, 0xFE, 0x00, 0x06];
        frame.extend_from_slice(&self.counter.to_be_bytes());
        frame.extend_from_slice(&[0xFF, 0xD9]);
        Some(Bytes::from(frame))
    }
}

/// A person walking toward the robot and back, drifting side to side.
///
/// Cloned into both the detector and the distance sensor so the two agree.
#[derive(Clone)]
pub struct SimulatedScene {
    started: Instant,
    /// One approach-and-leave cycle
    period: Duration,
}

impl SimulatedScene {
    /// Farthest distance in the cycle
    const FAR_CM: f32 = 300.0;
    const NEAR_CM: f32 = 20.0;
    /// Beyond this the person is out of the camera's view
    const VISIBLE_CM: f32 = 250.0;

    pub fn new(period: Duration) -> Self {
        Self {
            started: Instant::now(),
            period,
        }
    }

    fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Triangle wave: far at the start of the cycle, nearest halfway
    pub fn distance_at(&self, elapsed: Duration) -> f32 {
        let period = self.period.as_secs_f32().max(f32::EPSILON);
        let phase = (elapsed.as_secs_f32() % period) / period;
        Self::NEAR_CM + (Self::FAR_CM - Self::NEAR_CM) * (2.0 * phase - 1.0).abs()
    }

    pub fn person_at(&self, elapsed: Duration) -> Option<Detection> {
        let distance = self.distance_at(elapsed);
        if distance > Self::VISIBLE_CM {
            return None;
        }
        let sway = (elapsed.as_secs_f32() * TAU / 7.0).sin();
        let cx = FRAME_WIDTH as f32 / 2.0 + sway * FRAME_WIDTH as f32 / 4.0;
        let cy = FRAME_HEIGHT as f32 / 2.0;
        let w = (8000.0 / distance).clamp(20.0, 400.0);
        let h = (w * 2.0).min(FRAME_HEIGHT as f32);
        Some(Detection::person(
            0.9,
            BoundingBox::from_corners(cx - w / 2.0, cy - h / 2.0, cx + w / 2.0, cy + h / 2.0),
        ))
    }
}

impl Detector for SimulatedScene {
    fn detect(&mut self, _frame: &[u8]) -> Result<Vec<Detection>> {
        Ok(self.person_at(self.elapsed()).into_iter().collect())
    }
}

impl DistanceSensor for SimulatedScene {
    fn read_cm(&mut self) -> Option<f32> {
        Some(self.distance_at(self.elapsed()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scene_approaches_then_leaves() {
        let scene = SimulatedScene::new(Duration::from_secs(20));
        assert_eq!(scene.distance_at(Duration::ZERO), 300.0);
        assert_eq!(scene.distance_at(Duration::from_secs(10)), 20.0);
        assert_eq!(scene.distance_at(Duration::from_secs(5)), 160.0);

        assert!(scene.person_at(Duration::ZERO).is_none());
        let person = scene.person_at(Duration::from_secs(10)).unwrap();
        assert_eq!(person.class_label, "person");
        assert!(person.bbox.area() > 0.0);
    }

    #[test]
    fn detector_reports_image_size() {
        let mut scene = SimulatedScene::new(Duration::from_secs(20));
        let mut camera = TestPattern::new();
        let frame = camera.capture().unwrap();
        assert_eq!(&frame[..2], &[0xFF, 0xD8]);

        let result = run_detector(&mut scene, &frame).unwrap();
        assert!(result.inference_time >= 0.0);
        assert_eq!(
            result.image_size,
            Some(ImageSize {
                width: FRAME_WIDTH,
                height: FRAME_HEIGHT
            })
        );
    }
}
