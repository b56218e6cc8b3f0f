//! Target selection among detections

use kennel_core::{Detection, DEFAULT_IMAGE_WIDTH};

/// Horizontal field of view mapped onto the image width, in degrees
const FIELD_OF_VIEW_DEG: f32 = 120.0;

/// Pick the person to react to.
///
/// Only `person` detections at or above `min_confidence` qualify. The
/// largest box wins (nearest-looking); ties go to the higher confidence,
/// then to the earlier index.
pub fn select_target(detections: &[Detection], min_confidence: f32) -> Option<(usize, &Detection)> {
    let mut best: Option<(usize, &Detection)> = None;
    for (i, d) in detections.iter().enumerate() {
        if d.confidence < min_confidence || !d.class_label.eq_ignore_ascii_case("person") {
            continue;
        }
        best = match best {
            None => Some((i, d)),
            Some((_, b)) => {
                let (area, best_area) = (d.bbox.area(), b.bbox.area());
                // strictly better only, so earlier indices win exact ties
                if area > best_area || (area == best_area && d.confidence > b.confidence) {
                    Some((i, d))
                } else {
                    best
                }
            }
        };
    }
    best
}

/// Angle of the target relative to the camera axis; positive is to the right.
pub fn yaw_offset(detection: &Detection, image_width: Option<u32>) -> f32 {
    let width = image_width.filter(|w| *w > 0).unwrap_or(DEFAULT_IMAGE_WIDTH) as f32;
    let x = (detection.bbox.center_x / width).clamp(0.0, 1.0);
    x * FIELD_OF_VIEW_DEG - FIELD_OF_VIEW_DEG / 2.0
}
