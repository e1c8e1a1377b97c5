//! Local file frame sources.
//!
//! Still images and directories of stills are decoded with the `image` crate and
//! are always available. Video files need the ingest-file-ffmpeg feature.
//!
//! File sources never fetch remote URLs and never write decoded frames back to
//! disk. Both kinds replay from the first frame when they run out.

use std::path::{Path, PathBuf};

use super::{FrameReader, ReadOutcome, SourceStats};
use crate::error::SourceError;
use crate::frame::Frame;

const STILL_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png"];

/// Open a local path as a frame source.
pub fn open(path: &Path) -> Result<Box<dyn FrameReader>, SourceError> {
    let unavailable = |reason: String| SourceError::Unavailable {
        source_id: path.display().to_string(),
        reason,
    };
    let metadata = std::fs::metadata(path).map_err(|e| unavailable(e.to_string()))?;

    if metadata.is_dir() {
        return Ok(Box::new(ImageFileReader::from_dir(path)?));
    }
    if is_still(path) {
        return Ok(Box::new(ImageFileReader::new(path.display().to_string(), vec![path.to_path_buf()])?));
    }
    open_video(path)
}

#[cfg(feature = "ingest-file-ffmpeg")]
fn open_video(path: &Path) -> Result<Box<dyn FrameReader>, SourceError> {
    let reader = super::file_ffmpeg::FfmpegFileReader::open(path).map_err(|e| SourceError::Unavailable {
        source_id: path.display().to_string(),
        reason: format!("{:#}", e),
    })?;
    Ok(Box::new(reader))
}

#[cfg(not(feature = "ingest-file-ffmpeg"))]
fn open_video(path: &Path) -> Result<Box<dyn FrameReader>, SourceError> {
    Err(SourceError::Unavailable {
        source_id: path.display().to_string(),
        reason: "video files require the ingest-file-ffmpeg feature".to_string(),
    })
}

fn is_still(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| STILL_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

/// Plays a fixed list of still images in order, one per read.
pub struct ImageFileReader {
    label: String,
    files: Vec<PathBuf>,
    position: usize,
    stats: SourceStats,
    released: bool,
}

impl ImageFileReader {
    pub fn new(label: String, files: Vec<PathBuf>) -> Result<Self, SourceError> {
        if files.is_empty() {
            return Err(SourceError::Unavailable {
                source_id: label,
                reason: "no images to play".to_string(),
            });
        }
        log::info!("ImageFileReader: opened {} ({} images)", label, files.len());
        Ok(Self {
            label,
            files,
            position: 0,
            stats: SourceStats::default(),
            released: false,
        })
    }

    /// All stills in `dir`, sorted by file name.
    pub fn from_dir(dir: &Path) -> Result<Self, SourceError> {
        let entries = std::fs::read_dir(dir).map_err(|e| SourceError::Unavailable {
            source_id: dir.display().to_string(),
            reason: e.to_string(),
        })?;
        let mut files = entries
            .filter_map(|entry| entry.ok().map(|entry| entry.path()))
            .filter(|path| path.is_file() && is_still(path))
            .collect::<Vec<_>>();
        files.sort();
        Self::new(dir.display().to_string(), files)
    }
}

impl FrameReader for ImageFileReader {
    fn read(&mut self) -> Result<ReadOutcome, SourceError> {
        if self.released {
            return Err(SourceError::Capture(format!("{} was released", self.label)));
        }
        let Some(path) = self.files.get(self.position) else {
            return Ok(ReadOutcome::EndOfStream);
        };
        let frame = Frame::from_image_file(path).map_err(|e| SourceError::Capture(format!("{:#}", e)))?;
        self.position += 1;
        self.stats.frames_captured += 1;
        Ok(ReadOutcome::Frame(frame))
    }

    fn is_rewindable(&self) -> bool {
        true
    }

    fn rewind(&mut self) -> Result<(), SourceError> {
        self.position = 0;
        self.stats.rewinds += 1;
        Ok(())
    }

    fn release(&mut self) {
        if !self.released {
            self.released = true;
            log::debug!("ImageFileReader: released {}", self.label);
        }
    }

    fn stats(&self) -> SourceStats {
        self.stats.clone()
    }
}
