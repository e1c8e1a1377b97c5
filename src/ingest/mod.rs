//! Frame ingestion sources.
//!
//! This module provides the source adapter the pipeline reads frames through:
//! - Synthetic scenes (`stub://name`) for tests and dry runs
//! - Local image files or directories of stills (always available)
//! - Local video files (feature: ingest-file-ffmpeg)
//! - USB/V4L2 devices (feature: ingest-v4l2)
//!
//! A source is identified by a `SourceId`, opened through a `SourceAdapter`, and
//! read through the `FrameReader` it returns. The pipeline wraps readers in a
//! `SourceHandle` so the source is released on every exit path.

pub mod file;
#[cfg(feature = "ingest-file-ffmpeg")]
pub(crate) mod file_ffmpeg;
#[cfg(feature = "ingest-v4l2")]
mod normalize;
pub mod synthetic;
#[cfg(feature = "ingest-v4l2")]
pub mod v4l2;

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use crate::error::SourceError;
use crate::frame::Frame;

pub use file::ImageFileReader;
pub use synthetic::SyntheticReader;

/// Identifies a frame source.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SourceId {
    /// Live capture device index (`/dev/videoN`).
    Device(u32),
    /// Local video file, still image, or directory of stills.
    File(PathBuf),
    /// Generated scene (`stub://name`).
    Synthetic(String),
}

impl SourceId {
    /// File-backed sources replay from the start when they end.
    pub fn is_file_backed(&self) -> bool {
        matches!(self, SourceId::File(_))
    }
}

impl FromStr for SourceId {
    type Err = SourceError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let value = raw.trim();
        if value.is_empty() {
            return Err(SourceError::Unsupported("empty source identifier".to_string()));
        }
        if value.eq_ignore_ascii_case("webcam") {
            return Ok(SourceId::Device(0));
        }
        if let Some(name) = value.strip_prefix("stub://") {
            return Ok(SourceId::Synthetic(name.to_string()));
        }
        let device_index = value
            .strip_prefix("device:")
            .or_else(|| value.strip_prefix("/dev/video"));
        if let Some(index) = device_index {
            return index
                .parse()
                .map(SourceId::Device)
                .map_err(|_| SourceError::Unsupported(value.to_string()));
        }
        if value.contains("://") {
            // Local-only ingestion: no network URLs.
            return Err(SourceError::Unsupported(value.to_string()));
        }
        Ok(SourceId::File(PathBuf::from(value)))
    }
}

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceId::Device(index) => write!(f, "device:{}", index),
            SourceId::File(path) => write!(f, "{}", path.display()),
            SourceId::Synthetic(name) => write!(f, "stub://{}", name),
        }
    }
}

/// Result of one read.
#[derive(Debug)]
pub enum ReadOutcome {
    Frame(Frame),
    EndOfStream,
}

/// Statistics for an open source.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SourceStats {
    pub frames_captured: u64,
    pub rewinds: u64,
}

/// An opened source.
pub trait FrameReader: Send {
    /// Capture the next frame.
    fn read(&mut self) -> Result<ReadOutcome, SourceError>;

    /// Whether `rewind` can restart the stream.
    fn is_rewindable(&self) -> bool {
        false
    }

    /// Seek back to the first frame.
    fn rewind(&mut self) -> Result<(), SourceError> {
        Err(SourceError::Unsupported("source cannot rewind".to_string()))
    }

    /// Release the underlying resource. Calling this more than once is a no-op.
    fn release(&mut self);

    fn stats(&self) -> SourceStats;
}

/// Opens sources by identifier.
pub trait SourceAdapter: Send {
    fn open(&mut self, id: &SourceId) -> Result<Box<dyn FrameReader>, SourceError>;
}

/// Dimensions and rate requested from live and synthetic sources.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CaptureSettings {
    pub width: u32,
    pub height: u32,
    pub target_fps: u32,
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            width: 640,
            height: 480,
            target_fps: 30,
        }
    }
}

/// Adapter over the built-in source backends.
#[derive(Clone, Debug, Default)]
pub struct LocalSourceAdapter {
    settings: CaptureSettings,
}

impl LocalSourceAdapter {
    pub fn new(settings: CaptureSettings) -> Self {
        Self { settings }
    }
}

impl SourceAdapter for LocalSourceAdapter {
    fn open(&mut self, id: &SourceId) -> Result<Box<dyn FrameReader>, SourceError> {
        match id {
            SourceId::Synthetic(name) => Ok(Box::new(SyntheticReader::open(name, self.settings)?)),
            SourceId::File(path) => file::open(path),
            SourceId::Device(index) => open_device(*index, self.settings),
        }
    }
}

#[cfg(feature = "ingest-v4l2")]
fn open_device(index: u32, settings: CaptureSettings) -> Result<Box<dyn FrameReader>, SourceError> {
    Ok(Box::new(v4l2::V4l2Reader::open(index, settings)?))
}

#[cfg(not(feature = "ingest-v4l2"))]
fn open_device(index: u32, _settings: CaptureSettings) -> Result<Box<dyn FrameReader>, SourceError> {
    Err(SourceError::Unavailable {
        source_id: SourceId::Device(index).to_string(),
        reason: "device capture requires the ingest-v4l2 feature".to_string(),
    })
}

/// Owned, opened source. Releases the reader when dropped.
pub struct SourceHandle {
    id: SourceId,
    reader: Box<dyn FrameReader>,
}

impl SourceHandle {
    pub fn new(id: SourceId, reader: Box<dyn FrameReader>) -> Self {
        Self { id, reader }
    }

    pub fn id(&self) -> &SourceId {
        &self.id
    }

    /// Read a frame, rewinding once if a replayable source hit its end.
    pub fn next_frame(&mut self) -> Result<ReadOutcome, SourceError> {
        match self.reader.read()? {
            ReadOutcome::EndOfStream if self.id.is_file_backed() && self.reader.is_rewindable() => {
                log::debug!("source {} reached end of stream, replaying", self.id);
                self.reader.rewind()?;
                self.reader.read()
            }
            outcome => Ok(outcome),
        }
    }

    pub fn stats(&self) -> SourceStats {
        self.reader.stats()
    }

    pub fn release(&mut self) {
        self.reader.release();
    }
}

impl Drop for SourceHandle {
    fn drop(&mut self) {
        self.reader.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_source_identifiers() {
        assert_eq!("webcam".parse::<SourceId>().unwrap(), SourceId::Device(0));
        assert_eq!("device:2".parse::<SourceId>().unwrap(), SourceId::Device(2));
        assert_eq!("/dev/video1".parse::<SourceId>().unwrap(), SourceId::Device(1));
        assert_eq!(
            "stub://trail".parse::<SourceId>().unwrap(),
            SourceId::Synthetic("trail".to_string())
        );
        assert_eq!(
            "clips/deer.mp4".parse::<SourceId>().unwrap(),
            SourceId::File(PathBuf::from("clips/deer.mp4"))
        );
        assert!("rtsp://camera".parse::<SourceId>().is_err());
        assert!("device:x".parse::<SourceId>().is_err());
        assert!("  ".parse::<SourceId>().is_err());
    }

    #[test]
    fn display_round_trips() {
        for raw in ["device:3", "stub://pond", "/var/lib/wildwatch/clip.mp4"] {
            let id: SourceId = raw.parse().unwrap();
            assert_eq!(id.to_string(), raw);
        }
    }

    #[test]
    fn only_files_are_replayed() {
        assert!(SourceId::File(PathBuf::from("a.png")).is_file_backed());
        assert!(!SourceId::Device(0).is_file_backed());
        assert!(!SourceId::Synthetic("x".into()).is_file_backed());
    }

    #[cfg(not(feature = "ingest-v4l2"))]
    #[test]
    fn devices_need_the_v4l2_feature() {
        let mut adapter = LocalSourceAdapter::default();
        let err = adapter.open(&SourceId::Device(0)).err().expect("no device support");
        assert!(matches!(err, SourceError::Unavailable { .. }));
    }
}
