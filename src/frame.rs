//! Frame and detection value types.
//!
//! - `Frame`: immutable RGB8 pixel buffer. Pixels live behind an `Arc`, so cloning a
//!   frame into the hub is cheap and nobody can mutate a buffer another thread reads.
//! - `BoundingBox`: normalized `[0, 1]` box, top-left origin. This is the only box
//!   convention detections carry; pixel boxes are converted at the detector boundary.
//! - `Detection`: validated, never mutated after construction.

use anyhow::{anyhow, Context, Result};
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use std::time::{Instant, SystemTime};

use crate::error::DetectionError;

/// Marker carried by synthesized placeholder frames.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum DiagnosticKind {
    /// No source has been selected yet.
    NoSource,
    /// The selected source could not be opened or read.
    SourceUnavailable,
}

impl DiagnosticKind {
    /// Text rendered into the placeholder frame.
    pub fn message(self) -> &'static str {
        match self {
            DiagnosticKind::NoSource => "SELECT A SOURCE",
            DiagnosticKind::SourceUnavailable => "SOURCE UNAVAILABLE",
        }
    }
}

// ----------------------------------------------------------------------------
// Frame
// ----------------------------------------------------------------------------

#[derive(Clone)]
pub struct Frame {
    pixels: Arc<[u8]>,
    width: u32,
    height: u32,
    captured_at: Instant,
    captured_wall: SystemTime,
    diagnostic: Option<DiagnosticKind>,
}

impl Frame {
    /// Wrap a packed RGB8 buffer captured now.
    pub fn from_rgb(pixels: Vec<u8>, width: u32, height: u32) -> Result<Self> {
        let expected = rgb_len(width, height)?;
        if pixels.len() != expected {
            return Err(anyhow!(
                "RGB frame length mismatch: expected {}, got {}",
                expected,
                pixels.len()
            ));
        }
        Ok(Self {
            pixels: pixels.into(),
            width,
            height,
            captured_at: Instant::now(),
            captured_wall: SystemTime::now(),
            diagnostic: None,
        })
    }

    /// Decode a still image (JPEG/PNG) from disk.
    pub fn from_image_file(path: &Path) -> Result<Self> {
        let image = image::open(path)
            .with_context(|| format!("decode image {}", path.display()))?
            .to_rgb8();
        let (width, height) = image.dimensions();
        Self::from_rgb(image.into_raw(), width, height)
    }

    pub(crate) fn into_diagnostic(mut self, kind: DiagnosticKind) -> Self {
        self.diagnostic = Some(kind);
        self
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    pub fn captured_at(&self) -> Instant {
        self.captured_at
    }

    pub fn captured_wall(&self) -> SystemTime {
        self.captured_wall
    }

    /// Set when this frame is a placeholder rather than captured content.
    pub fn diagnostic(&self) -> Option<DiagnosticKind> {
        self.diagnostic
    }

    /// Fresh mutable copy of the pixels, for drawing.
    pub fn to_owned_pixels(&self) -> Vec<u8> {
        self.pixels.to_vec()
    }

    /// A new frame with the same capture metadata and replaced pixels.
    pub fn with_pixels(&self, pixels: Vec<u8>) -> Result<Self> {
        if pixels.len() != self.pixels.len() {
            return Err(anyhow!(
                "replacement pixels have length {}, frame needs {}",
                pixels.len(),
                self.pixels.len()
            ));
        }
        Ok(Self {
            pixels: pixels.into(),
            ..self.clone()
        })
    }

    /// Single-channel intensity (ITU-R BT.601 luma, integer approximation).
    pub fn luma(&self) -> Vec<u8> {
        self.pixels
            .chunks_exact(3)
            .map(|px| {
                let weighted = 77 * px[0] as u32 + 150 * px[1] as u32 + 29 * px[2] as u32;
                (weighted >> 8) as u8
            })
            .collect()
    }

    /// Encode as baseline JPEG.
    pub fn to_jpeg(&self, quality: u8) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        image::codecs::jpeg::JpegEncoder::new_with_quality(&mut out, quality)
            .encode(
                &self.pixels,
                self.width,
                self.height,
                image::ExtendedColorType::Rgb8,
            )
            .context("encode frame as JPEG")?;
        Ok(out)
    }
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("diagnostic", &self.diagnostic)
            .finish_non_exhaustive()
    }
}

pub(crate) fn rgb_len(width: u32, height: u32) -> Result<usize> {
    (width as usize)
        .checked_mul(height as usize)
        .and_then(|v| v.checked_mul(3))
        .ok_or_else(|| anyhow!("frame dimensions overflow"))
}

// ----------------------------------------------------------------------------
// Boxes
// ----------------------------------------------------------------------------

/// Integer pixel rectangle, top-left origin.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct PixelRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl PixelRect {
    pub fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }
}

/// Normalized bounding box. All four values lie in `[0, 1]` and the box never
/// extends past the frame edge.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct BoundingBox {
    x: f32,
    y: f32,
    w: f32,
    h: f32,
}

impl BoundingBox {
    /// Build from normalized top-left coordinates, clamping into the unit square.
    pub fn new(x: f32, y: f32, w: f32, h: f32) -> Result<Self, DetectionError> {
        if ![x, y, w, h].iter().all(|v| v.is_finite()) {
            return Err(DetectionError::NonFiniteBox);
        }
        let x = x.clamp(0.0, 1.0);
        let y = y.clamp(0.0, 1.0);
        Ok(Self {
            x,
            y,
            w: w.clamp(0.0, 1.0 - x),
            h: h.clamp(0.0, 1.0 - y),
        })
    }

    /// Build from a normalized center point (YOLO-style output rows).
    pub fn from_center(cx: f32, cy: f32, w: f32, h: f32) -> Result<Self, DetectionError> {
        Self::new(cx - w / 2.0, cy - h / 2.0, w, h)
    }

    /// Convert a pixel-space box into the normalized convention.
    pub fn from_pixels(
        x: f32,
        y: f32,
        w: f32,
        h: f32,
        frame_width: u32,
        frame_height: u32,
    ) -> Result<Self, DetectionError> {
        if frame_width == 0 || frame_height == 0 {
            return Err(DetectionError::EmptyFrame);
        }
        let fw = frame_width as f32;
        let fh = frame_height as f32;
        Self::new(x / fw, y / fh, w / fw, h / fh)
    }

    pub fn from_rect(rect: PixelRect, frame_width: u32, frame_height: u32) -> Result<Self, DetectionError> {
        Self::from_pixels(
            rect.x as f32,
            rect.y as f32,
            rect.width as f32,
            rect.height as f32,
            frame_width,
            frame_height,
        )
    }

    /// Pixel rectangle for a frame of the given size.
    pub fn to_pixels(&self, frame_width: u32, frame_height: u32) -> PixelRect {
        let fw = frame_width as f32;
        let fh = frame_height as f32;
        let x = (self.x * fw).round() as u32;
        let y = (self.y * fh).round() as u32;
        PixelRect {
            x: x.min(frame_width.saturating_sub(1)),
            y: y.min(frame_height.saturating_sub(1)),
            width: ((self.w * fw).round() as u32).min(frame_width.saturating_sub(x)),
            height: ((self.h * fh).round() as u32).min(frame_height.saturating_sub(y)),
        }
    }

    pub fn x(&self) -> f32 {
        self.x
    }

    pub fn y(&self) -> f32 {
        self.y
    }

    pub fn w(&self) -> f32 {
        self.w
    }

    pub fn h(&self) -> f32 {
        self.h
    }
}

// ----------------------------------------------------------------------------
// Detection
// ----------------------------------------------------------------------------

/// One classified, localized object in a single frame.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Detection {
    category: String,
    confidence: f32,
    bbox: BoundingBox,
}

impl Detection {
    pub fn new(
        category: impl Into<String>,
        confidence: f32,
        bbox: BoundingBox,
    ) -> Result<Self, DetectionError> {
        let category = category.into();
        if category.trim().is_empty() {
            return Err(DetectionError::EmptyCategory);
        }
        if !confidence.is_finite() || !(0.0..=1.0).contains(&confidence) {
            return Err(DetectionError::Confidence(confidence));
        }
        Ok(Self {
            category,
            confidence,
            bbox,
        })
    }

    pub fn category(&self) -> &str {
        &self.category
    }

    pub fn confidence(&self) -> f32 {
        self.confidence
    }

    pub fn bbox(&self) -> BoundingBox {
        self.bbox
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_rejects_wrong_length() {
        assert!(Frame::from_rgb(vec![0u8; 10], 2, 2).is_err());
        assert!(Frame::from_rgb(vec![0u8; 12], 2, 2).is_ok());
    }

    #[test]
    fn luma_of_white_and_black() -> Result<()> {
        let frame = Frame::from_rgb(vec![255, 255, 255, 0, 0, 0], 2, 1)?;
        assert_eq!(frame.luma(), vec![255, 0]);
        Ok(())
    }

    #[test]
    fn with_pixels_keeps_capture_time() -> Result<()> {
        let frame = Frame::from_rgb(vec![0u8; 12], 2, 2)?;
        let drawn = frame.with_pixels(vec![9u8; 12])?;
        assert_eq!(drawn.captured_at(), frame.captured_at());
        assert_eq!(frame.pixels(), &[0u8; 12]);
        assert!(frame.with_pixels(vec![0u8; 3]).is_err());
        Ok(())
    }

    #[test]
    fn pixel_boxes_normalize_and_round_trip() {
        let bbox = BoundingBox::from_pixels(64.0, 48.0, 320.0, 240.0, 640, 480).unwrap();
        assert!((bbox.x() - 0.1).abs() < 1e-6);
        assert!((bbox.w() - 0.5).abs() < 1e-6);
        let rect = bbox.to_pixels(640, 480);
        assert_eq!(
            rect,
            PixelRect {
                x: 64,
                y: 48,
                width: 320,
                height: 240
            }
        );
    }

    #[test]
    fn boxes_are_clamped_to_frame() {
        let bbox = BoundingBox::new(0.8, -0.2, 0.5, 0.5).unwrap();
        assert_eq!(bbox.x(), 0.8);
        assert_eq!(bbox.y(), 0.0);
        assert!((bbox.w() - 0.2).abs() < 1e-6);
        assert!(BoundingBox::new(f32::NAN, 0.0, 0.1, 0.1).is_err());
        assert_eq!(
            BoundingBox::from_pixels(0.0, 0.0, 1.0, 1.0, 0, 10),
            Err(DetectionError::EmptyFrame)
        );
    }

    #[test]
    fn detection_validates_fields() {
        let bbox = BoundingBox::new(0.0, 0.0, 0.1, 0.1).unwrap();
        assert_eq!(
            Detection::new("", 0.5, bbox),
            Err(DetectionError::EmptyCategory)
        );
        assert_eq!(
            Detection::new("deer", 1.5, bbox),
            Err(DetectionError::Confidence(1.5))
        );
        let det = Detection::new("deer", 0.9, bbox).unwrap();
        assert_eq!(det.category(), "deer");
    }
}
