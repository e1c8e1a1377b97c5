use anyhow::Result;

use crate::frame::{Detection, Frame};

/// Side channel notified after every processed frame (analytics, recording).
///
/// Receives the unannotated frame and the detections computed on that tick.
/// Errors are logged by the pipeline and never stop it.
pub trait TickObserver: Send {
    fn on_tick(&mut self, frame: &Frame, detections: &[Detection]) -> Result<()>;
}

impl<F> TickObserver for F
where
    F: FnMut(&Frame, &[Detection]) -> Result<()> + Send,
{
    fn on_tick(&mut self, frame: &Frame, detections: &[Detection]) -> Result<()> {
        self(frame, detections)
    }
}
