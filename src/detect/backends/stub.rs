use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::detect::backend::Detector;
use crate::error::InferenceError;
use crate::frame::{Detection, Frame};

/// Scripted backend for tests and dry runs.
///
/// Queued responses are returned in order; once the queue is empty every call
/// returns the steady-state detections.
#[derive(Default)]
pub struct StubBackend {
    queued: VecDeque<Result<Vec<Detection>, String>>,
    steady: Vec<Detection>,
    calls: Arc<AtomicUsize>,
}

impl StubBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return `detections` on every call.
    pub fn always(detections: Vec<Detection>) -> Self {
        Self {
            steady: detections,
            ..Self::default()
        }
    }

    /// Queue one successful response.
    pub fn then(mut self, detections: Vec<Detection>) -> Self {
        self.queued.push_back(Ok(detections));
        self
    }

    /// Queue one failing response.
    pub fn then_fail(mut self, reason: &str) -> Self {
        self.queued.push_back(Err(reason.to_string()));
        self
    }

    /// Shared counter of `detect` invocations.
    pub fn call_counter(&self) -> Arc<AtomicUsize> {
        self.calls.clone()
    }
}

impl Detector for StubBackend {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn detect(&mut self, _frame: &Frame) -> Result<Vec<Detection>, InferenceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.queued.pop_front() {
            Some(Ok(detections)) => Ok(detections),
            Some(Err(reason)) => Err(InferenceError::Backend {
                backend: self.name().to_string(),
                reason,
            }),
            None => Ok(self.steady.clone()),
        }
    }
}
