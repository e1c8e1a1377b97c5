//! Error taxonomy for the pipeline.
//!
//! Every per-tick failure is recoverable and contained within that tick. Only
//! `PipelineError` surfaces to the caller of the loop.

use thiserror::Error;

/// Source adapter failures. Always recoverable via retry/backoff.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("source '{source_id}' unavailable: {reason}")]
    Unavailable { source_id: String, reason: String },

    #[error("frame capture failed: {0}")]
    Capture(String),

    #[error("unsupported source '{0}'")]
    Unsupported(String),
}

/// Detector failures for a single tick.
#[derive(Debug, Error)]
pub enum InferenceError {
    #[error("detector backend '{backend}' failed: {reason}")]
    Backend { backend: String, reason: String },

    #[error("detector produced invalid output: {0}")]
    InvalidOutput(String),
}

/// Alert transport failures, typed so logging can tell them apart.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("transport authentication failed: {0}")]
    Auth(String),

    #[error("transport unavailable: {0}")]
    Transport(String),

    #[error("unknown transport failure: {0}")]
    Unknown(String),
}

/// Rejected `Detection` / `BoundingBox` construction.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum DetectionError {
    #[error("detection category must not be empty")]
    EmptyCategory,

    #[error("confidence {0} outside [0, 1]")]
    Confidence(f32),

    #[error("bounding box has non-finite coordinates")]
    NonFiniteBox,

    #[error("frame dimensions must be non-zero")]
    EmptyFrame,
}

/// Hard failures of the pipeline loop itself.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("source '{source_id}' never became available after {attempts} attempts")]
    SourceNeverAvailable { source_id: String, attempts: u32 },

    #[error("pipeline thread panicked")]
    ThreadPanicked,
}
