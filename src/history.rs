use std::collections::VecDeque;
use std::time::SystemTime;

use serde::Serialize;

use crate::frame::{BoundingBox, Detection};
use crate::health::epoch_millis;

pub const DEFAULT_HISTORY_CAPACITY: usize = 20;

/// One remembered detection, as exposed by the query surface.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct DetectionRecord {
    pub category: String,
    pub confidence: f32,
    pub bbox: BoundingBox,
    /// Milliseconds since the Unix epoch.
    pub observed_at: u64,
}

impl DetectionRecord {
    pub fn new(detection: &Detection, observed_at: SystemTime) -> Self {
        Self {
            category: detection.category().to_string(),
            confidence: detection.confidence(),
            bbox: detection.bbox(),
            observed_at: epoch_millis(observed_at),
        }
    }
}

/// Bounded FIFO of recent detections. The oldest entry is evicted first.
#[derive(Clone, Debug)]
pub struct DetectionHistory {
    capacity: usize,
    entries: VecDeque<DetectionRecord>,
}

impl DetectionHistory {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            entries: VecDeque::with_capacity(capacity),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn record(&mut self, detections: &[Detection], observed_at: SystemTime) {
        for detection in detections {
            if self.entries.len() == self.capacity {
                self.entries.pop_front();
            }
            self.entries.push_back(DetectionRecord::new(detection, observed_at));
        }
    }

    /// Up to `limit` most recent records, oldest first.
    pub fn recent(&self, limit: usize) -> Vec<DetectionRecord> {
        let skip = self.entries.len().saturating_sub(limit);
        self.entries.iter().skip(skip).cloned().collect()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

impl Default for DetectionHistory {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_CAPACITY)
    }
}
