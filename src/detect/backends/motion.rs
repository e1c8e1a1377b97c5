use crate::detect::backend::Detector;
use crate::error::InferenceError;
use crate::frame::{BoundingBox, Detection, Frame};
use crate::motion::{MotionConfig, MotionGate};

pub const MOTION_CATEGORY: &str = "motion";

/// CPU backend that needs no model: reports the largest changed region between
/// consecutive frames as a single `"motion"` detection.
///
/// Confidence is the density of changed pixels inside the reported box.
pub struct MotionBackend {
    gate: MotionGate,
    min_region_pixels: u64,
}

impl MotionBackend {
    pub fn new(config: MotionConfig) -> Self {
        Self {
            gate: MotionGate::new(config),
            min_region_pixels: 16,
        }
    }

    /// Ignore regions with fewer changed pixels than this.
    pub fn with_min_region_pixels(mut self, pixels: u64) -> Self {
        self.min_region_pixels = pixels;
        self
    }
}

impl Default for MotionBackend {
    fn default() -> Self {
        Self::new(MotionConfig::default())
    }
}

impl Detector for MotionBackend {
    fn name(&self) -> &'static str {
        "motion"
    }

    fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>, InferenceError> {
        let region = self.gate.largest_region_with_count(frame);
        self.gate.evaluate(frame);

        let Some((changed, rect)) = region else {
            return Ok(Vec::new());
        };
        if changed < self.min_region_pixels || rect.area() == 0 {
            return Ok(Vec::new());
        }

        let invalid = |e: crate::error::DetectionError| InferenceError::InvalidOutput(e.to_string());
        let bbox = BoundingBox::from_rect(rect, frame.width(), frame.height()).map_err(invalid)?;
        let confidence = (changed as f32 / rect.area() as f32).clamp(0.0, 1.0);
        let detection = Detection::new(MOTION_CATEGORY, confidence, bbox).map_err(invalid)?;
        Ok(vec![detection])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame_with_square(lit: bool) -> Frame {
        let (w, h) = (32u32, 32u32);
        let mut pixels = vec![0u8; (w * h * 3) as usize];
        if lit {
            for y in 8..16 {
                for x in 8..16 {
                    let o = ((y * w + x) * 3) as usize;
                    pixels[o..o + 3].copy_from_slice(&[255; 3]);
                }
            }
        }
        Frame::from_rgb(pixels, w, h).unwrap()
    }

    #[test]
    fn motion_backend_reports_changed_square() {
        let mut backend = MotionBackend::default();
        assert!(backend.detect(&frame_with_square(false)).unwrap().is_empty());

        let detections = backend.detect(&frame_with_square(true)).unwrap();
        assert_eq!(detections.len(), 1);
        let det = &detections[0];
        assert_eq!(det.category(), MOTION_CATEGORY);
        assert_eq!(det.confidence(), 1.0);
        assert_eq!(det.bbox().x(), 0.25);
        assert_eq!(det.bbox().w(), 0.25);

        // Unchanged frame: nothing to report.
        assert!(backend.detect(&frame_with_square(true)).unwrap().is_empty());
    }
}
