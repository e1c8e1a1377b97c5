//! Single-writer, many-reader hand-off of the latest pipeline output.
//!
//! The pipeline thread replaces the snapshot wholesale once per tick. Readers
//! clone the `Arc` and never block the writer for longer than a pointer swap.

use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::frame::{Detection, Frame};
use crate::health::SystemHealth;
use crate::history::DetectionRecord;

/// Acquisition state of the pipeline loop.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopState {
    Idle,
    Acquiring,
    Error,
    Stopped,
}

/// Everything a consumer sees for one tick.
#[derive(Debug)]
pub struct PipelineSnapshot {
    pub seq: u64,
    /// Annotated (or diagnostic) frame.
    pub frame: Frame,
    /// Detections computed on this tick. Empty when inference was skipped.
    pub detections: Vec<Detection>,
    pub recent: Vec<DetectionRecord>,
    pub health: Option<SystemHealth>,
    pub loop_state: LoopState,
}

/// Extra state published alongside a frame.
#[derive(Clone, Debug)]
pub struct PublishContext {
    pub recent: Vec<DetectionRecord>,
    pub loop_state: LoopState,
}

impl Default for PublishContext {
    fn default() -> Self {
        Self {
            recent: Vec::new(),
            loop_state: LoopState::Acquiring,
        }
    }
}

/// Result of `FrameHub::wait_newer`.
#[derive(Debug)]
pub enum HubWait {
    Fresh(Arc<PipelineSnapshot>),
    TimedOut,
    Closed,
}

#[derive(Default)]
struct HubState {
    current: Option<Arc<PipelineSnapshot>>,
    seq: u64,
    closed: bool,
}

#[derive(Default)]
pub struct FrameHub {
    state: Mutex<HubState>,
    published: Condvar,
}

impl FrameHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the current snapshot. Returns the new sequence number, or `None`
    /// when the frame is older than the one already published or the hub is closed.
    pub fn publish(
        &self,
        frame: Frame,
        detections: Vec<Detection>,
        health: Option<SystemHealth>,
        context: PublishContext,
    ) -> Option<u64> {
        let mut state = self.lock();
        if state.closed {
            return None;
        }
        if let Some(current) = &state.current {
            if frame.captured_at() < current.frame.captured_at() {
                log::warn!("FrameHub: dropping out-of-order frame (seq {})", state.seq + 1);
                return None;
            }
        }
        state.seq += 1;
        let seq = state.seq;
        state.current = Some(Arc::new(PipelineSnapshot {
            seq,
            frame,
            detections,
            recent: context.recent,
            health,
            loop_state: context.loop_state,
        }));
        drop(state);
        self.published.notify_all();
        Some(seq)
    }

    /// Latest snapshot, or `None` before the first publish.
    pub fn read(&self) -> Option<Arc<PipelineSnapshot>> {
        self.lock().current.clone()
    }

    /// Block until a snapshot newer than `after_seq` is published, the hub is
    /// closed, or `timeout` elapses.
    pub fn wait_newer(&self, after_seq: u64, timeout: Duration) -> HubWait {
        let deadline = Instant::now() + timeout;
        let mut state = self.lock();
        loop {
            if let Some(current) = state.current.as_ref().filter(|s| s.seq > after_seq) {
                return HubWait::Fresh(Arc::clone(current));
            }
            if state.closed {
                return HubWait::Closed;
            }
            let now = Instant::now();
            if now >= deadline {
                return HubWait::TimedOut;
            }
            state = match self.published.wait_timeout(state, deadline - now) {
                Ok((guard, _)) => guard,
                Err(poisoned) => poisoned.into_inner().0,
            };
        }
    }

    /// Mark the hub terminal. The last snapshot stays readable.
    pub fn close(&self) {
        self.lock().closed = true;
        self.published.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    fn lock(&self) -> MutexGuard<'_, HubState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
