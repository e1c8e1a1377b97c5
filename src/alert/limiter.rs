use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use super::Recipient;

pub const DEFAULT_CATEGORY: &str = "default";
pub const DEFAULT_COOLDOWN: Duration = Duration::from_secs(300);

/// Monotonic time source, injectable for tests.
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    origin: Instant,
    offset: Mutex<Duration>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            offset: Mutex::new(Duration::ZERO),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut offset = self.offset.lock().unwrap_or_else(|p| p.into_inner());
        *offset += by;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.origin + *self.offset.lock().unwrap_or_else(|p| p.into_inner())
    }
}

/// Rate-limit key: one cooldown window per recipient and category.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct AlertKey {
    recipient: String,
    category: String,
}

impl AlertKey {
    /// A missing or blank category shares the `"default"` window.
    pub fn new(recipient: &Recipient, category: Option<&str>) -> Self {
        let category = category
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .unwrap_or(DEFAULT_CATEGORY);
        Self {
            recipient: recipient.as_str().to_string(),
            category: category.to_string(),
        }
    }

    pub fn recipient(&self) -> &str {
        &self.recipient
    }

    pub fn category(&self) -> &str {
        &self.category
    }
}

/// Per-key cooldown limiter.
///
/// The check and the timestamp update happen under one lock, so two threads
/// racing on the same key can never both be admitted inside a window.
pub struct RateLimiter {
    cooldown: Duration,
    clock: Arc<dyn Clock>,
    last_sent: Mutex<HashMap<AlertKey, Instant>>,
}

impl RateLimiter {
    pub fn new(cooldown: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            cooldown,
            clock,
            last_sent: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_system_clock(cooldown: Duration) -> Self {
        Self::new(cooldown, Arc::new(SystemClock))
    }

    pub fn cooldown(&self) -> Duration {
        self.cooldown
    }

    /// Admit `key` if its cooldown has elapsed, recording the attempt.
    /// Denied calls leave the record untouched.
    pub fn allow(&self, key: &AlertKey) -> bool {
        let now = self.clock.now();
        let mut last_sent = self.lock();
        match last_sent.get(key) {
            Some(&last) if now.saturating_duration_since(last) < self.cooldown => false,
            _ => {
                last_sent.insert(key.clone(), now);
                true
            }
        }
    }

    /// Number of keys ever admitted. Entries are never evicted.
    pub fn tracked_keys(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<AlertKey, Instant>> {
        self.last_sent.lock().unwrap_or_else(|p| p.into_inner())
    }
}
