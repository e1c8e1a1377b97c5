//! wildwatch
//!
//! Motion-gated wildlife detection for edge cameras.
//!
//! # Architecture
//!
//! One producer thread runs the pipeline:
//!
//! 1. **Acquire**: read a frame from the selected source (device, file, synthetic).
//! 2. **Gate**: compare against the previous frame; skip inference when nothing moved.
//! 3. **Detect**: call the configured `Detector` backend.
//! 4. **Alert**: rate-limited, non-blocking dispatch of high-confidence detections.
//! 5. **Publish**: swap the annotated frame into the `FrameHub` for any number of readers.
//!
//! Failures inside a tick never stop the loop. A missing or broken source shows
//! up as a diagnostic frame on the hub and is retried after a backoff.
//!
//! # Module Structure
//!
//! - `frame`: frame buffers and validated detections
//! - `ingest`: source identifiers, adapters and readers
//! - `motion`: two-frame motion gate
//! - `detect`: detector trait, registry and backends
//! - `hub`: latest-snapshot hand-off to readers
//! - `alert` / `transport`: rate limiting, dispatch, MQTT delivery
//! - `pipeline`: the loop, its shared state and observers
//! - `stream`: MJPEG parts for live viewers

pub mod alert;
pub mod cancel;
pub mod config;
pub mod detect;
pub mod draw;
pub mod error;
pub mod frame;
pub mod health;
pub mod history;
pub mod hub;
pub mod ingest;
pub mod motion;
pub mod pipeline;
pub mod stream;
pub mod transport;

pub use alert::{
    AlertDispatcher, AlertMessage, AlertOutcome, AlertSettings, AlertTransport, Clock, ManualClock,
    RateLimiter, Recipient, RecordingTransport, SystemClock,
};
pub use cancel::CancellationToken;
pub use config::WildwatchConfig;
pub use detect::{Detector, DetectorRegistry, MotionBackend, StubBackend};
pub use error::{DetectionError, InferenceError, PipelineError, SourceError, TransportError};
pub use frame::{BoundingBox, Detection, DiagnosticKind, Frame, PixelRect};
pub use health::{HealthMonitor, ProcHealthProbe, SystemHealth};
pub use history::{DetectionHistory, DetectionRecord};
pub use hub::{FrameHub, HubWait, LoopState, PipelineSnapshot};
pub use ingest::{LocalSourceAdapter, SourceAdapter, SourceHandle, SourceId};
pub use motion::{MotionConfig, MotionGate, MotionReading};
pub use pipeline::{PipelineHandle, PipelineLoop, PipelineSettings, PipelineState, TickObserver};
