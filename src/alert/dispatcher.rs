use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, SyncSender, TrySendError};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use chrono::{DateTime, Local};

use super::limiter::{AlertKey, Clock, RateLimiter, DEFAULT_CATEGORY, DEFAULT_COOLDOWN};
use super::{AlertMessage, AlertTransport, Recipient};
use crate::error::TransportError;
use crate::frame::{Detection, Frame};

const JPEG_QUALITY: u8 = 85;
const DRAIN_POLL: Duration = Duration::from_millis(10);

#[derive(Clone, Debug, PartialEq)]
pub struct AlertSettings {
    /// Detections at or above this confidence raise alerts.
    pub confidence_threshold: f32,
    pub cooldown: Duration,
    pub location: Option<String>,
    pub include_timestamp: bool,
    pub workers: usize,
    pub queue_capacity: usize,
    /// How long `shutdown` waits for queued alerts before abandoning them.
    pub drain_timeout: Duration,
}

impl Default for AlertSettings {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.5,
            cooldown: DEFAULT_COOLDOWN,
            location: None,
            include_timestamp: true,
            workers: 1,
            queue_capacity: 16,
            drain_timeout: Duration::from_secs(5),
        }
    }
}

/// What `AlertDispatcher::evaluate` did with a detection.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AlertOutcome {
    /// Inside the cooldown window for this recipient and category.
    Suppressed,
    /// Handed to the delivery workers.
    Queued,
    /// No transport configured; the alert was only logged.
    LogOnly,
    /// Delivery queue full (or shut down); the alert was discarded.
    Dropped,
}

/// Delivery counters, shared with the worker threads.
#[derive(Debug, Default)]
pub struct AlertStats {
    pub queued: AtomicU64,
    pub delivered: AtomicU64,
    pub failed: AtomicU64,
    pub dropped: AtomicU64,
    pub suppressed: AtomicU64,
    /// Queued alerts left undelivered when shutdown gave up waiting.
    pub abandoned: AtomicU64,
}

impl AlertStats {
    fn settled(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed) + self.failed.load(Ordering::Relaxed)
    }
}

pub struct AlertDispatcher {
    settings: AlertSettings,
    limiter: RateLimiter,
    queue: Option<SyncSender<AlertMessage>>,
    workers: Vec<JoinHandle<()>>,
    abandon: Arc<AtomicBool>,
    stats: Arc<AlertStats>,
}

impl AlertDispatcher {
    /// Build a dispatcher. With `transport == None` alerts are logged, not sent.
    pub fn new(
        settings: AlertSettings,
        transport: Option<Arc<dyn AlertTransport>>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let limiter = RateLimiter::new(settings.cooldown, clock);
        let stats = Arc::new(AlertStats::default());
        let abandon = Arc::new(AtomicBool::new(false));
        let (queue, workers) = match transport {
            Some(transport) => {
                let (tx, rx) = mpsc::sync_channel(settings.queue_capacity.max(1));
                let rx = Arc::new(Mutex::new(rx));
                let workers = (0..settings.workers.max(1))
                    .filter_map(|id| {
                        let shared = WorkerShared {
                            rx: Arc::clone(&rx),
                            transport: Arc::clone(&transport),
                            abandon: Arc::clone(&abandon),
                            stats: Arc::clone(&stats),
                        };
                        spawn_worker(id, shared)
                            .map_err(|e| log::error!("failed to spawn alert worker {}: {}", id, e))
                            .ok()
                    })
                    .collect();
                (Some(tx), workers)
            }
            None => {
                log::warn!("no alert transport configured; alerts will only be logged");
                (None, Vec::new())
            }
        };
        Self {
            settings,
            limiter,
            queue,
            workers,
            abandon,
            stats,
        }
    }

    pub fn settings(&self) -> &AlertSettings {
        &self.settings
    }

    pub fn stats(&self) -> &AlertStats {
        &self.stats
    }

    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    pub fn meets_threshold(&self, detection: &Detection) -> bool {
        detection.confidence() >= self.settings.confidence_threshold
    }

    /// Rate-limit, format and enqueue one alert. Never blocks.
    pub fn evaluate(
        &self,
        recipient: &Recipient,
        category: Option<&str>,
        frame: &Frame,
        detection: &Detection,
    ) -> AlertOutcome {
        let key = AlertKey::new(recipient, category);
        if !self.limiter.allow(&key) {
            self.stats.suppressed.fetch_add(1, Ordering::Relaxed);
            log::info!(
                "alert for {} ({}) suppressed: cooldown active",
                key.recipient(),
                key.category()
            );
            return AlertOutcome::Suppressed;
        }

        let message = self.format(recipient, key.category(), frame, detection);
        let Some(queue) = &self.queue else {
            log::info!(
                "alert (not sent, no transport) to {}: {}\n{}",
                message.recipient,
                message.subject,
                message.body
            );
            return AlertOutcome::LogOnly;
        };

        match queue.try_send(message) {
            Ok(()) => {
                self.stats.queued.fetch_add(1, Ordering::Relaxed);
                AlertOutcome::Queued
            }
            Err(TrySendError::Full(message)) => {
                self.stats.dropped.fetch_add(1, Ordering::Relaxed);
                log::warn!(
                    "alert queue full; dropping alert to {} ({})",
                    message.recipient,
                    message.category
                );
                AlertOutcome::Dropped
            }
            Err(TrySendError::Disconnected(message)) => {
                self.stats.dropped.fetch_add(1, Ordering::Relaxed);
                log::warn!("alert workers gone; dropping alert to {}", message.recipient);
                AlertOutcome::Dropped
            }
        }
    }

    fn format(&self, recipient: &Recipient, category: &str, frame: &Frame, detection: &Detection) -> AlertMessage {
        let category = if category == DEFAULT_CATEGORY {
            detection.category()
        } else {
            category
        };
        let mut body = String::from("Wildlife was detected by your camera.\n\n");
        body.push_str(&format!("Species: {}\n", category));
        body.push_str(&format!("Confidence: {:.1}%\n", detection.confidence() * 100.0));
        if let Some(location) = self.settings.location.as_deref().filter(|l| !l.is_empty()) {
            body.push_str(&format!("Location: {}\n", location));
        }
        if self.settings.include_timestamp {
            let at: DateTime<Local> = frame.captured_wall().into();
            body.push_str(&format!("Time: {}\n", at.format("%Y-%m-%d %H:%M:%S")));
        }
        body.push_str("\n-- wildwatch\n");

        let image = match frame.to_jpeg(JPEG_QUALITY) {
            Ok(jpeg) => Some(jpeg),
            Err(e) => {
                log::warn!("alert snapshot encoding failed: {:#}", e);
                None
            }
        };

        AlertMessage {
            recipient: recipient.clone(),
            category: category.to_string(),
            confidence: detection.confidence(),
            subject: format!("Wildlife detected: {}", category),
            body,
            image,
        }
    }

    /// Stop accepting alerts and deliver what is queued, waiting at most
    /// `drain_timeout`. Workers still busy after that are detached and the
    /// alerts they had not settled are counted as abandoned.
    pub fn shutdown(&mut self) {
        if self.queue.take().is_none() && self.workers.is_empty() {
            return;
        }
        let deadline = Instant::now() + self.settings.drain_timeout;
        while self.workers.iter().any(|w| !w.is_finished()) && Instant::now() < deadline {
            std::thread::sleep(DRAIN_POLL);
        }

        let mut detached = 0;
        for worker in self.workers.drain(..) {
            if !worker.is_finished() {
                detached += 1;
                continue;
            }
            if worker.join().is_err() {
                log::error!("alert worker panicked");
            }
        }
        if detached > 0 {
            self.abandon.store(true, Ordering::SeqCst);
            let pending = self
                .stats
                .queued
                .load(Ordering::Relaxed)
                .saturating_sub(self.stats.settled());
            self.stats.abandoned.store(pending, Ordering::Relaxed);
            log::warn!(
                "alert delivery did not finish within {:?}; detached {} worker(s), abandoned {} alert(s)",
                self.settings.drain_timeout,
                detached,
                pending
            );
        }
        log::info!(
            "alert dispatcher stopped (delivered {}, failed {}, dropped {}, abandoned {})",
            self.stats.delivered.load(Ordering::Relaxed),
            self.stats.failed.load(Ordering::Relaxed),
            self.stats.dropped.load(Ordering::Relaxed),
            self.stats.abandoned.load(Ordering::Relaxed)
        );
    }
}

impl Drop for AlertDispatcher {
    fn drop(&mut self) {
        self.shutdown();
    }
}

struct WorkerShared {
    rx: Arc<Mutex<Receiver<AlertMessage>>>,
    transport: Arc<dyn AlertTransport>,
    abandon: Arc<AtomicBool>,
    stats: Arc<AlertStats>,
}

fn spawn_worker(id: usize, shared: WorkerShared) -> std::io::Result<JoinHandle<()>> {
    let WorkerShared {
        rx,
        transport,
        abandon,
        stats,
    } = shared;
    std::thread::Builder::new()
        .name(format!("alert-worker-{}", id))
        .spawn(move || loop {
            let next = rx.lock().unwrap_or_else(|p| p.into_inner()).recv();
            let Ok(message) = next else { break };
            if abandon.load(Ordering::SeqCst) {
                break;
            }
            match transport.send(&message) {
                Ok(()) => {
                    stats.delivered.fetch_add(1, Ordering::Relaxed);
                    log::info!("alert sent to {}: {}", message.recipient, message.subject);
                }
                Err(err) => {
                    stats.failed.fetch_add(1, Ordering::Relaxed);
                    match err {
                        TransportError::Auth(_) => {
                            log::error!("alert to {} rejected: {}", message.recipient, err)
                        }
                        TransportError::Transport(_) | TransportError::Unknown(_) => {
                            log::warn!("alert to {} not delivered: {}", message.recipient, err)
                        }
                    }
                }
            }
        })
}
