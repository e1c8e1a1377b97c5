use std::sync::{Arc, Mutex, MutexGuard};

use crate::alert::Recipient;
use crate::health::SystemHealth;
use crate::history::DetectionRecord;
use crate::hub::{FrameHub, LoopState, PipelineSnapshot};
use crate::ingest::SourceId;

/// Query and control surface shared between the pipeline thread and its
/// consumers (stream readers, an HTTP layer, the daemon).
pub struct PipelineState {
    hub: FrameHub,
    pending_source: Mutex<Option<SourceId>>,
    current_source: Mutex<Option<SourceId>>,
    recipient: Mutex<Option<Recipient>>,
    default_recipients: Vec<Recipient>,
    loop_state: Mutex<LoopState>,
}

impl PipelineState {
    pub fn new(default_recipients: Vec<Recipient>) -> Self {
        Self {
            hub: FrameHub::new(),
            pending_source: Mutex::new(None),
            current_source: Mutex::new(None),
            recipient: Mutex::new(None),
            default_recipients,
            loop_state: Mutex::new(LoopState::Idle),
        }
    }

    pub fn shared(default_recipients: Vec<Recipient>) -> Arc<Self> {
        Arc::new(Self::new(default_recipients))
    }

    pub fn hub(&self) -> &FrameHub {
        &self.hub
    }

    pub fn latest_snapshot(&self) -> Option<Arc<PipelineSnapshot>> {
        self.hub.read()
    }

    /// Up to `limit` most recent detections, oldest first.
    pub fn recent_detections(&self, limit: usize) -> Vec<DetectionRecord> {
        let Some(snapshot) = self.hub.read() else {
            return Vec::new();
        };
        let skip = snapshot.recent.len().saturating_sub(limit);
        snapshot.recent[skip..].to_vec()
    }

    pub fn system_health(&self) -> Option<SystemHealth> {
        self.hub.read().and_then(|snapshot| snapshot.health.clone())
    }

    /// Ask the loop to switch sources. Applied at the start of the next tick.
    pub fn select_source(&self, id: SourceId) {
        log::info!("source selection requested: {}", id);
        *lock(&self.pending_source) = Some(id);
    }

    /// Source the loop is currently working on (open or retrying).
    pub fn current_source(&self) -> Option<SourceId> {
        lock(&self.current_source).clone()
    }

    pub fn set_alert_recipient(&self, recipient: Recipient) {
        log::info!("alert recipient set to {}", recipient);
        *lock(&self.recipient) = Some(recipient);
    }

    pub fn clear_alert_recipient(&self) {
        *lock(&self.recipient) = None;
    }

    /// The runtime recipient if one was set, otherwise the configured defaults.
    pub fn active_recipients(&self) -> Vec<Recipient> {
        match lock(&self.recipient).as_ref() {
            Some(recipient) => vec![recipient.clone()],
            None => self.default_recipients.clone(),
        }
    }

    pub fn loop_state(&self) -> LoopState {
        *lock(&self.loop_state)
    }

    pub(crate) fn take_pending_source(&self) -> Option<SourceId> {
        lock(&self.pending_source).take()
    }

    pub(crate) fn set_current_source(&self, id: Option<SourceId>) {
        *lock(&self.current_source) = id;
    }

    pub(crate) fn set_loop_state(&self, state: LoopState) {
        let mut current = lock(&self.loop_state);
        if *current != state {
            log::info!("pipeline state {:?} -> {:?}", *current, state);
            *current = state;
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|p| p.into_inner())
}
