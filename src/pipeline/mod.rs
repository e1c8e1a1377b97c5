//! The real-time loop: acquire, gate, detect, alert, annotate, publish.
//!
//! One `PipelineLoop` owns the source handle, the motion gate, the detector and
//! the alert dispatcher. Everything consumers may touch lives in the shared
//! `PipelineState`. Per-tick failures are contained in the tick; only
//! cancellation (or the optional startup guard) ends the loop.

mod observer;
mod state;

pub use observer::TickObserver;
pub use state::PipelineState;

use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crate::alert::AlertDispatcher;
use crate::cancel::CancellationToken;
use crate::detect::Detector;
use crate::draw;
use crate::error::{PipelineError, SourceError};
use crate::frame::{DiagnosticKind, Detection, Frame, PixelRect};
use crate::health::{HealthMonitor, SystemHealth};
use crate::history::DetectionHistory;
use crate::hub::{LoopState, PublishContext};
use crate::ingest::{ReadOutcome, SourceAdapter, SourceHandle, SourceId};
use crate::motion::{MotionConfig, MotionGate};

const DIAGNOSTIC_WIDTH: u32 = 640;
const DIAGNOSTIC_HEIGHT: u32 = 480;

#[derive(Clone, Debug, PartialEq)]
pub struct PipelineSettings {
    /// Upper bound on ticks per second.
    pub max_fps: u32,
    /// Wait between attempts to reopen a failed source.
    pub retry_backoff: Duration,
    pub history_capacity: usize,
    /// Skip the detector on frames without motion.
    pub motion_gating: bool,
    /// Outline the largest moving region on published frames.
    pub draw_motion_region: bool,
    /// Give up when the first source never opens after this many attempts.
    pub startup_attempts: Option<u32>,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            max_fps: 30,
            retry_backoff: Duration::from_secs(1),
            history_capacity: crate::history::DEFAULT_HISTORY_CAPACITY,
            motion_gating: true,
            draw_motion_region: false,
            startup_attempts: None,
        }
    }
}

impl PipelineSettings {
    fn tick_budget(&self) -> Duration {
        Duration::from_secs(1) / self.max_fps.max(1)
    }
}

/// What a single tick did, used to pick the following sleep.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TickOutcome {
    /// A frame was read and published.
    Processed,
    /// No source selected; a placeholder was published.
    Idle,
    /// The source failed; the loop backs off before retrying.
    Backoff,
}

pub struct PipelineLoop {
    settings: PipelineSettings,
    state: Arc<PipelineState>,
    adapter: Box<dyn SourceAdapter>,
    detector: Box<dyn Detector>,
    dispatcher: AlertDispatcher,
    gate: MotionGate,
    history: DetectionHistory,
    health: Option<HealthMonitor>,
    observers: Vec<Box<dyn TickObserver>>,
    token: CancellationToken,
    source: Option<SourceHandle>,
    last_detections: Vec<Detection>,
    frame_size: (u32, u32),
    startup: StartupGuard,
    finished: bool,
}

/// Counts failed opens of the first source until a frame is read.
struct StartupGuard {
    limit: Option<u32>,
    failures: u32,
    satisfied: bool,
}

impl StartupGuard {
    fn record_failure(&mut self) -> Option<u32> {
        if self.satisfied {
            return None;
        }
        self.failures += 1;
        match self.limit {
            Some(limit) if self.failures >= limit => Some(self.failures),
            _ => None,
        }
    }
}

impl PipelineLoop {
    pub fn new(
        settings: PipelineSettings,
        state: Arc<PipelineState>,
        adapter: Box<dyn SourceAdapter>,
        detector: Box<dyn Detector>,
        dispatcher: AlertDispatcher,
    ) -> Self {
        let startup = StartupGuard {
            limit: settings.startup_attempts,
            failures: 0,
            satisfied: false,
        };
        Self {
            history: DetectionHistory::new(settings.history_capacity),
            settings,
            state,
            adapter,
            detector,
            dispatcher,
            gate: MotionGate::new(MotionConfig::default()),
            health: None,
            observers: Vec::new(),
            token: CancellationToken::new(),
            source: None,
            last_detections: Vec::new(),
            frame_size: (DIAGNOSTIC_WIDTH, DIAGNOSTIC_HEIGHT),
            startup,
            finished: false,
        }
    }

    pub fn with_motion(mut self, config: MotionConfig) -> Self {
        self.gate = MotionGate::new(config);
        self
    }

    pub fn with_health(mut self, monitor: HealthMonitor) -> Self {
        self.health = Some(monitor);
        self
    }

    pub fn with_observer(mut self, observer: Box<dyn TickObserver>) -> Self {
        self.observers.push(observer);
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.token = token;
        self
    }

    pub fn state(&self) -> Arc<PipelineState> {
        Arc::clone(&self.state)
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub fn dispatcher(&self) -> &AlertDispatcher {
        &self.dispatcher
    }

    /// Run ticks until cancelled. The source is released and the hub closed
    /// on every exit path.
    pub fn run(mut self) -> Result<(), PipelineError> {
        log::info!(
            "pipeline running: detector={} max_fps={} gating={}",
            self.detector.name(),
            self.settings.max_fps,
            self.settings.motion_gating
        );
        if let Err(e) = self.detector.warm_up() {
            log::warn!("detector warm-up failed: {}", e);
        }

        let budget = self.settings.tick_budget();
        let result = loop {
            if self.token.is_cancelled() {
                break Ok(());
            }
            let started = Instant::now();
            let wait = match self.tick() {
                Ok(TickOutcome::Backoff) => self.settings.retry_backoff,
                Ok(_) => budget.saturating_sub(started.elapsed()),
                Err(e) => break Err(e),
            };
            if self.token.wait_timeout(wait) {
                break Ok(());
            }
        };

        if let Err(e) = &result {
            log::error!("pipeline stopped: {}", e);
        }
        self.finish();
        result
    }

    /// Move the loop to its own thread.
    pub fn spawn(self) -> std::io::Result<PipelineHandle> {
        let token = self.cancellation_token();
        let state = self.state();
        let thread = std::thread::Builder::new()
            .name("wildwatch-pipeline".to_string())
            .spawn(move || self.run())?;
        Ok(PipelineHandle {
            token,
            state,
            thread: Some(thread),
        })
    }

    /// One pass of the loop body, without the trailing sleep.
    pub fn tick(&mut self) -> Result<TickOutcome, PipelineError> {
        if let Some(id) = self.state.take_pending_source() {
            self.switch_source(id);
        }

        let Some(target) = self.state.current_source() else {
            self.state.set_loop_state(LoopState::Idle);
            self.publish_diagnostic(DiagnosticKind::NoSource, LoopState::Idle);
            return Ok(TickOutcome::Idle);
        };

        if self.source.is_none() {
            match self.adapter.open(&target) {
                Ok(reader) => {
                    log::info!("source {} opened", target);
                    self.source = Some(SourceHandle::new(target.clone(), reader));
                }
                Err(e) => return self.source_failed(&target, e),
            }
        }

        let outcome = match self.source.as_mut() {
            Some(handle) => handle.next_frame(),
            None => return Ok(TickOutcome::Backoff),
        };
        match outcome {
            Ok(ReadOutcome::Frame(frame)) => {
                self.startup.satisfied = true;
                self.state.set_loop_state(LoopState::Acquiring);
                self.process(frame);
                Ok(TickOutcome::Processed)
            }
            Ok(ReadOutcome::EndOfStream) => self.source_failed(
                &target,
                SourceError::Capture("source reached end of stream".to_string()),
            ),
            Err(e) => self.source_failed(&target, e),
        }
    }

    fn switch_source(&mut self, id: SourceId) {
        if let Some(mut old) = self.source.take() {
            log::info!("releasing source {}", old.id());
            old.release();
        }
        self.gate.reset();
        self.last_detections.clear();
        // The startup guard only covers the initially configured source.
        if self.state.current_source().is_some() {
            self.startup.satisfied = true;
        }
        self.state.set_current_source(Some(id));
    }

    fn source_failed(&mut self, id: &SourceId, err: SourceError) -> Result<TickOutcome, PipelineError> {
        log::warn!("source {}: {}", id, err);
        if let Some(mut handle) = self.source.take() {
            handle.release();
        }
        self.gate.reset();
        self.state.set_loop_state(LoopState::Error);
        self.publish_diagnostic(DiagnosticKind::SourceUnavailable, LoopState::Error);

        if let Some(attempts) = self.startup.record_failure() {
            return Err(PipelineError::SourceNeverAvailable {
                source_id: id.to_string(),
                attempts,
            });
        }
        Ok(TickOutcome::Backoff)
    }

    fn process(&mut self, frame: Frame) {
        self.frame_size = (frame.width(), frame.height());

        let (reading, region) = if self.settings.draw_motion_region {
            self.gate.evaluate_with_region(&frame)
        } else {
            (self.gate.evaluate(&frame), None)
        };
        log::trace!("motion score {:.3}", reading.score);

        let (fresh, drawn) = if !self.settings.motion_gating || reading.has_motion {
            match self.detector.detect(&frame) {
                Ok(detections) => {
                    self.last_detections = detections.clone();
                    (detections, self.last_detections.clone())
                }
                Err(e) => {
                    log::warn!("detector {} failed: {}", self.detector.name(), e);
                    self.last_detections.clear();
                    (Vec::new(), Vec::new())
                }
            }
        } else {
            (Vec::new(), self.last_detections.clone())
        };

        self.dispatch_alerts(&frame, &fresh);
        self.history.record(&fresh, frame.captured_wall());

        let annotated = self.annotate(&frame, &drawn, region);
        let health = self.poll_health();
        self.state.hub().publish(
            annotated,
            fresh.clone(),
            health,
            PublishContext {
                recent: self.history.recent(self.history.capacity()),
                loop_state: LoopState::Acquiring,
            },
        );

        for observer in &mut self.observers {
            if let Err(e) = observer.on_tick(&frame, &fresh) {
                log::warn!("tick observer failed: {:#}", e);
            }
        }
    }

    fn dispatch_alerts(&self, frame: &Frame, detections: &[Detection]) {
        let alerting: Vec<&Detection> = detections
            .iter()
            .filter(|d| self.dispatcher.meets_threshold(d))
            .collect();
        if alerting.is_empty() {
            return;
        }
        let recipients = self.state.active_recipients();
        if recipients.is_empty() {
            log::debug!("{} detections over threshold but no recipients", alerting.len());
            return;
        }
        for detection in alerting {
            for recipient in &recipients {
                let outcome =
                    self.dispatcher
                        .evaluate(recipient, Some(detection.category()), frame, detection);
                log::debug!(
                    "alert {} -> {}: {:?}",
                    detection.category(),
                    recipient,
                    outcome
                );
            }
        }
    }

    fn annotate(&self, frame: &Frame, detections: &[Detection], region: Option<PixelRect>) -> Frame {
        if detections.is_empty() && region.is_none() {
            return frame.clone();
        }
        draw::annotate(frame, detections, region).unwrap_or_else(|e| {
            log::warn!("annotation failed, publishing raw frame: {:#}", e);
            frame.clone()
        })
    }

    fn poll_health(&mut self) -> Option<SystemHealth> {
        self.health
            .as_mut()
            .and_then(|monitor| monitor.poll(Instant::now()))
    }

    fn publish_diagnostic(&mut self, kind: DiagnosticKind, loop_state: LoopState) {
        let (width, height) = self.frame_size;
        let frame = match draw::diagnostic_frame(kind, width, height) {
            Ok(frame) => frame,
            Err(e) => {
                log::warn!("failed to render diagnostic frame: {:#}", e);
                return;
            }
        };
        let health = self.poll_health();
        self.state.hub().publish(
            frame,
            Vec::new(),
            health,
            PublishContext {
                recent: self.history.recent(self.history.capacity()),
                loop_state,
            },
        );
    }

    fn finish(&mut self) {
        if self.finished {
            return;
        }
        self.finished = true;
        if let Some(mut handle) = self.source.take() {
            log::info!("releasing source {}", handle.id());
            handle.release();
        }
        self.state.set_loop_state(LoopState::Stopped);
        self.state.hub().close();
        self.dispatcher.shutdown();
    }
}

impl Drop for PipelineLoop {
    fn drop(&mut self) {
        self.finish();
    }
}

/// Handle to a loop running on its own thread.
pub struct PipelineHandle {
    token: CancellationToken,
    state: Arc<PipelineState>,
    thread: Option<JoinHandle<Result<(), PipelineError>>>,
}

impl PipelineHandle {
    pub fn state(&self) -> Arc<PipelineState> {
        Arc::clone(&self.state)
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Request a stop. The loop wakes from any sleep immediately.
    pub fn stop(&self) {
        self.token.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.thread.as_ref().map_or(true, |t| t.is_finished())
    }

    /// Wait for the loop thread to exit.
    pub fn join(mut self) -> Result<(), PipelineError> {
        match self.thread.take() {
            Some(thread) => thread.join().map_err(|_| PipelineError::ThreadPanicked)?,
            None => Ok(()),
        }
    }
}

impl Drop for PipelineHandle {
    fn drop(&mut self) {
        if let Some(thread) = self.thread.take() {
            self.token.cancel();
            let _ = thread.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alert::{AlertSettings, ManualClock};
    use crate::detect::StubBackend;
    use crate::ingest::{FrameReader, SourceStats};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FailingAdapter {
        opens: Arc<AtomicUsize>,
    }

    impl SourceAdapter for FailingAdapter {
        fn open(&mut self, id: &SourceId) -> Result<Box<dyn FrameReader>, SourceError> {
            self.opens.fetch_add(1, Ordering::SeqCst);
            Err(SourceError::Unavailable {
                source_id: id.to_string(),
                reason: "unplugged".to_string(),
            })
        }
    }

    struct EmptyReader;

    impl FrameReader for EmptyReader {
        fn read(&mut self) -> Result<ReadOutcome, SourceError> {
            Ok(ReadOutcome::EndOfStream)
        }
        fn release(&mut self) {}
        fn stats(&self) -> SourceStats {
            SourceStats::default()
        }
    }

    struct EmptyAdapter;

    impl SourceAdapter for EmptyAdapter {
        fn open(&mut self, _id: &SourceId) -> Result<Box<dyn FrameReader>, SourceError> {
            Ok(Box::new(EmptyReader))
        }
    }

    fn dispatcher() -> AlertDispatcher {
        AlertDispatcher::new(AlertSettings::default(), None, Arc::new(ManualClock::new()))
    }

    fn pipeline(settings: PipelineSettings, adapter: Box<dyn SourceAdapter>) -> PipelineLoop {
        PipelineLoop::new(
            settings,
            PipelineState::shared(Vec::new()),
            adapter,
            Box::new(StubBackend::always(Vec::new())),
            dispatcher(),
        )
    }

    #[test]
    fn no_source_publishes_placeholder() {
        let opens = Arc::new(AtomicUsize::new(0));
        let mut pipeline = pipeline(
            PipelineSettings::default(),
            Box::new(FailingAdapter { opens: Arc::clone(&opens) }),
        );
        assert_eq!(pipeline.tick().unwrap(), TickOutcome::Idle);
        let state = pipeline.state();
        let snapshot = state.latest_snapshot().unwrap();
        assert_eq!(snapshot.frame.diagnostic(), Some(DiagnosticKind::NoSource));
        assert_eq!(snapshot.loop_state, LoopState::Idle);
        assert_eq!(opens.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn startup_guard_gives_up() {
        let opens = Arc::new(AtomicUsize::new(0));
        let settings = PipelineSettings {
            startup_attempts: Some(3),
            ..PipelineSettings::default()
        };
        let mut pipeline = pipeline(settings, Box::new(FailingAdapter { opens: Arc::clone(&opens) }));
        pipeline.state().set_current_source(Some(SourceId::Device(0)));

        assert_eq!(pipeline.tick().unwrap(), TickOutcome::Backoff);
        assert_eq!(pipeline.tick().unwrap(), TickOutcome::Backoff);
        match pipeline.tick() {
            Err(PipelineError::SourceNeverAvailable { attempts, .. }) => assert_eq!(attempts, 3),
            other => panic!("expected startup failure, got {:?}", other),
        }
        assert_eq!(opens.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn live_end_of_stream_backs_off() {
        let mut pipeline = pipeline(PipelineSettings::default(), Box::new(EmptyAdapter));
        pipeline.state().select_source(SourceId::Synthetic("finite".into()));
        assert_eq!(pipeline.tick().unwrap(), TickOutcome::Backoff);
        assert_eq!(pipeline.state().loop_state(), LoopState::Error);
        assert!(pipeline.source.is_none());
    }

    #[test]
    fn finish_closes_hub_once() {
        let mut pipeline = pipeline(PipelineSettings::default(), Box::new(EmptyAdapter));
        let state = pipeline.state();
        pipeline.finish();
        pipeline.finish();
        assert!(state.hub().is_closed());
        assert_eq!(state.loop_state(), LoopState::Stopped);
    }

    #[test]
    fn tick_budget_follows_max_fps() {
        let settings = PipelineSettings {
            max_fps: 10,
            ..PipelineSettings::default()
        };
        assert_eq!(settings.tick_budget(), Duration::from_millis(100));
    }
}
