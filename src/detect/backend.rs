use crate::error::InferenceError;
use crate::frame::{Detection, Frame};

/// Detector trait.
///
/// Implementations map one frame to a list of detections. Boxes must already be
/// in the normalized convention (see `BoundingBox::from_pixels` for pixel-space
/// backends).
pub trait Detector: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Run detection on a frame.
    ///
    /// Implementations must treat the frame as read-only and must not retain it.
    fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>, InferenceError>;

    /// Optional warm-up hook.
    fn warm_up(&mut self) -> Result<(), InferenceError> {
        Ok(())
    }
}
