//! V4L2 capture devices (`/dev/videoN`).
//!
//! Frames are captured in memory through an mmap stream and normalized to packed
//! RGB24. Devices that only offer YUYV are converted on the fly.

use anyhow::{anyhow, Context, Result};
use ouroboros::self_referencing;

use super::normalize::{normalize_to_rgb, PixelFormat};
use super::{CaptureSettings, FrameReader, ReadOutcome, SourceStats};
use crate::error::SourceError;
use crate::frame::Frame;

pub struct V4l2Reader {
    device_path: String,
    state: Option<DeviceState>,
    format: PixelFormat,
    width: u32,
    height: u32,
    stats: SourceStats,
}

#[self_referencing]
struct DeviceState {
    device: v4l::Device,
    #[borrows(mut device)]
    #[covariant]
    stream: v4l::prelude::MmapStream<'this, v4l::Device>,
}

impl V4l2Reader {
    pub fn open(index: u32, settings: CaptureSettings) -> Result<Self, SourceError> {
        let device_path = format!("/dev/video{}", index);
        Self::connect(&device_path, settings).map_err(|e| SourceError::Unavailable {
            source_id: device_path.clone(),
            reason: format!("{:#}", e),
        })
    }

    fn connect(device_path: &str, settings: CaptureSettings) -> Result<Self> {
        use v4l::buffer::Type;
        use v4l::video::Capture;

        let device = v4l::Device::with_path(device_path)
            .with_context(|| format!("open v4l2 device {}", device_path))?;
        let mut requested = device.format().context("read v4l2 format")?;
        requested.width = settings.width;
        requested.height = settings.height;
        requested.fourcc = v4l::FourCC::new(b"RGB3");

        let negotiated = match device.set_format(&requested) {
            Ok(format) => format,
            Err(err) => {
                log::warn!("V4l2Reader: failed to set format on {}: {}", device_path, err);
                device
                    .format()
                    .context("read v4l2 format after set failure")?
            }
        };
        let format = PixelFormat::from_fourcc(&negotiated.fourcc.repr)
            .ok_or_else(|| anyhow!("unsupported pixel format {}", negotiated.fourcc))?;

        if settings.target_fps > 0 {
            let params = v4l::video::capture::Parameters::with_fps(settings.target_fps);
            if let Err(err) = device.set_params(&params) {
                log::warn!("V4l2Reader: failed to set fps on {}: {}", device_path, err);
            }
        }

        let state = DeviceStateTryBuilder {
            device,
            stream_builder: |device| {
                v4l::prelude::MmapStream::with_buffers(device, Type::VideoCapture, 4)
                    .map_err(|err| anyhow::Error::new(err).context("create v4l2 buffer stream"))
            },
        }
        .try_build()?;

        log::info!(
            "V4l2Reader: connected to {} ({}x{} {:?})",
            device_path,
            negotiated.width,
            negotiated.height,
            format
        );
        Ok(Self {
            device_path: device_path.to_string(),
            state: Some(state),
            format,
            width: negotiated.width,
            height: negotiated.height,
            stats: SourceStats::default(),
        })
    }
}

impl FrameReader for V4l2Reader {
    fn read(&mut self) -> Result<ReadOutcome, SourceError> {
        use v4l::io::traits::CaptureStream;

        let state = self
            .state
            .as_mut()
            .ok_or_else(|| SourceError::Capture(format!("{} was released", self.device_path)))?;
        let raw = state
            .with_mut(|fields| fields.stream.next().map(|(buf, _meta)| buf.to_vec()))
            .map_err(|err| SourceError::Capture(format!("capture v4l2 frame: {}", err)))?;

        let capture = |e: anyhow::Error| SourceError::Capture(format!("{:#}", e));
        let pixels = normalize_to_rgb(&raw, self.width, self.height, self.format).map_err(capture)?;
        let frame = Frame::from_rgb(pixels, self.width, self.height).map_err(capture)?;
        self.stats.frames_captured += 1;
        Ok(ReadOutcome::Frame(frame))
    }

    fn release(&mut self) {
        if self.state.take().is_some() {
            log::info!("V4l2Reader: released {}", self.device_path);
        }
    }

    fn stats(&self) -> SourceStats {
        self.stats.clone()
    }
}
