//! Rate-limited alerting on high-confidence detections.
//!
//! `AlertDispatcher` decides whether an alert may go out (via `RateLimiter`),
//! formats it, and hands it to a bounded worker pool that delivers it through an
//! `AlertTransport`. Nothing in this module blocks the pipeline thread.

mod dispatcher;
mod limiter;

use std::fmt;
use std::str::FromStr;
use std::sync::Mutex;

use serde::Serialize;

use crate::error::TransportError;

pub use dispatcher::{AlertDispatcher, AlertOutcome, AlertSettings, AlertStats};
pub use limiter::{AlertKey, Clock, ManualClock, RateLimiter, SystemClock, DEFAULT_CATEGORY, DEFAULT_COOLDOWN};

/// Validated alert destination (`local@domain`).
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct Recipient(String);

impl Recipient {
    pub fn parse(raw: &str) -> Result<Self, InvalidRecipient> {
        let value = raw.trim();
        let invalid = || InvalidRecipient(raw.to_string());
        if value.chars().any(char::is_whitespace) {
            return Err(invalid());
        }
        let (local, domain) = value.split_once('@').ok_or_else(invalid)?;
        let domain_ok = !domain.contains('@')
            && domain.contains('.')
            && !domain.starts_with('.')
            && !domain.ends_with('.');
        if local.is_empty() || !domain_ok {
            return Err(invalid());
        }
        Ok(Self(value.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for Recipient {
    type Err = InvalidRecipient;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for Recipient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("invalid alert recipient '{0}' (expected local@domain)")]
pub struct InvalidRecipient(pub String);

/// A fully formatted alert, ready for delivery.
#[derive(Clone, Debug, PartialEq)]
pub struct AlertMessage {
    pub recipient: Recipient,
    pub category: String,
    pub confidence: f32,
    pub subject: String,
    pub body: String,
    /// JPEG-encoded frame, when encoding succeeded.
    pub image: Option<Vec<u8>>,
}

/// Outbound delivery of alerts (mail, SMS, MQTT...).
pub trait AlertTransport: Send + Sync {
    fn send(&self, message: &AlertMessage) -> Result<(), TransportError>;
}

/// Transport that keeps every message it is asked to send.
#[derive(Default)]
pub struct RecordingTransport {
    sent: Mutex<Vec<AlertMessage>>,
    fail_with: Mutex<Option<TransportError>>,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every following `send` fail with `error` (after recording it).
    pub fn fail_with(&self, error: TransportError) {
        *self.fail_with.lock().unwrap_or_else(|p| p.into_inner()) = Some(error);
    }

    pub fn sent(&self) -> Vec<AlertMessage> {
        self.sent.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }

    pub fn send_count(&self) -> usize {
        self.sent.lock().unwrap_or_else(|p| p.into_inner()).len()
    }
}

impl AlertTransport for RecordingTransport {
    fn send(&self, message: &AlertMessage) -> Result<(), TransportError> {
        self.sent
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push(message.clone());
        match self.fail_with.lock().unwrap_or_else(|p| p.into_inner()).as_ref() {
            Some(error) => Err(error.clone()),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recipient_validation() {
        assert_eq!(Recipient::parse(" ranger@park.org ").unwrap().as_str(), "ranger@park.org");
        for bad in ["", "ranger", "@park.org", "ranger@", "ranger@park", "a@b@c.org", "ran ger@park.org", "x@.org"] {
            assert!(Recipient::parse(bad).is_err(), "{bad:?} should be rejected");
        }
    }

    #[test]
    fn recording_transport_can_fail() {
        let transport = RecordingTransport::new();
        let message = AlertMessage {
            recipient: "a@b.co".parse().unwrap(),
            category: "fox".into(),
            confidence: 0.9,
            subject: "s".into(),
            body: "b".into(),
            image: None,
        };
        assert!(transport.send(&message).is_ok());
        transport.fail_with(TransportError::Auth("denied".into()));
        assert_eq!(transport.send(&message), Err(TransportError::Auth("denied".into())));
        assert_eq!(transport.send_count(), 2);
    }
}
