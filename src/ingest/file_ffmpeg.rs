//! Local video files decoded with FFmpeg.
//!
//! Frames are decoded in memory and converted to packed RGB24. End of stream is
//! reported once the demuxer and decoder are both drained; `rewind` seeks back to
//! the start so file sources loop.

use std::path::Path;

use anyhow::{Context, Result};
use ffmpeg_next as ffmpeg;

use super::{FrameReader, ReadOutcome, SourceStats};
use crate::error::SourceError;
use crate::frame::Frame;

pub(crate) struct FfmpegFileReader {
    label: String,
    state: Option<DecodeState>,
    stats: SourceStats,
}

struct DecodeState {
    input: ffmpeg::format::context::Input,
    stream_index: usize,
    decoder: ffmpeg::codec::decoder::Video,
    draining: bool,
}

impl FfmpegFileReader {
    pub(crate) fn open(path: &Path) -> Result<Self> {
        ffmpeg::init().context("initialize ffmpeg")?;
        let input = ffmpeg::format::input(&path)
            .with_context(|| format!("failed to open '{}' with ffmpeg", path.display()))?;
        let input_stream = input
            .streams()
            .best(ffmpeg::media::Type::Video)
            .ok_or_else(|| anyhow::anyhow!("file has no video track"))?;
        let stream_index = input_stream.index();
        let context = ffmpeg::codec::context::Context::from_parameters(input_stream.parameters())
            .context("load video decoder parameters")?;
        let decoder = context
            .decoder()
            .video()
            .context("open ffmpeg video decoder")?;

        let label = path.display().to_string();
        log::info!(
            "FfmpegFileReader: opened {} ({}x{})",
            label,
            decoder.width(),
            decoder.height()
        );
        Ok(Self {
            label,
            state: Some(DecodeState {
                input,
                stream_index,
                decoder,
                draining: false,
            }),
            stats: SourceStats::default(),
        })
    }
}

impl DecodeState {
    fn next_frame(&mut self) -> Result<Option<Frame>> {
        let mut decoded = ffmpeg::frame::Video::empty();

        if !self.draining {
            if self.decoder.receive_frame(&mut decoded).is_ok() {
                return self.convert(&decoded).map(Some);
            }
            let mut packets = self.input.packets();
            while let Some((stream, packet)) = packets.next() {
                if stream.index() != self.stream_index {
                    continue;
                }
                self.decoder
                    .send_packet(&packet)
                    .context("send packet to ffmpeg decoder")?;
                if self.decoder.receive_frame(&mut decoded).is_ok() {
                    drop(packets);
                    return self.convert(&decoded).map(Some);
                }
            }
            drop(packets);
            self.decoder.send_eof().context("flush ffmpeg decoder")?;
            self.draining = true;
        }

        if self.decoder.receive_frame(&mut decoded).is_ok() {
            return self.convert(&decoded).map(Some);
        }
        Ok(None)
    }

    // The scaler holds raw FFmpeg state that is not Send, so it lives per frame.
    fn convert(&self, decoded: &ffmpeg::frame::Video) -> Result<Frame> {
        let mut scaler = ffmpeg::software::scaling::context::Context::get(
            decoded.format(),
            decoded.width(),
            decoded.height(),
            ffmpeg::util::format::pixel::Pixel::RGB24,
            decoded.width(),
            decoded.height(),
            ffmpeg::software::scaling::flag::Flags::BILINEAR,
        )
        .context("create ffmpeg scaler")?;
        let mut rgb_frame = ffmpeg::frame::Video::empty();
        scaler
            .run(decoded, &mut rgb_frame)
            .context("scale frame to RGB")?;
        let (pixels, width, height) = frame_to_pixels(&rgb_frame)?;
        Frame::from_rgb(pixels, width, height)
    }

    fn rewind(&mut self) -> Result<()> {
        self.input.seek(0, ..).context("seek to start of file")?;
        self.decoder.flush();
        self.draining = false;
        Ok(())
    }
}

impl FrameReader for FfmpegFileReader {
    fn read(&mut self) -> Result<ReadOutcome, SourceError> {
        let state = self
            .state
            .as_mut()
            .ok_or_else(|| SourceError::Capture(format!("{} was released", self.label)))?;
        match state.next_frame() {
            Ok(Some(frame)) => {
                self.stats.frames_captured += 1;
                Ok(ReadOutcome::Frame(frame))
            }
            Ok(None) => Ok(ReadOutcome::EndOfStream),
            Err(e) => Err(SourceError::Capture(format!("{:#}", e))),
        }
    }

    fn is_rewindable(&self) -> bool {
        self.state.is_some()
    }

    fn rewind(&mut self) -> Result<(), SourceError> {
        let state = self
            .state
            .as_mut()
            .ok_or_else(|| SourceError::Capture(format!("{} was released", self.label)))?;
        state
            .rewind()
            .map_err(|e| SourceError::Capture(format!("{:#}", e)))?;
        self.stats.rewinds += 1;
        Ok(())
    }

    fn release(&mut self) {
        if self.state.take().is_some() {
            log::debug!("FfmpegFileReader: released {}", self.label);
        }
    }

    fn stats(&self) -> SourceStats {
        self.stats.clone()
    }
}

fn frame_to_pixels(frame: &ffmpeg::frame::Video) -> Result<(Vec<u8>, u32, u32)> {
    let width = frame.width();
    let height = frame.height();
    let row_bytes = (width as usize) * 3;
    let stride = frame.stride(0);
    let data = frame.data(0);

    if stride == row_bytes {
        let packed = data
            .get(..row_bytes * height as usize)
            .context("ffmpeg frame is shorter than its dimensions")?;
        return Ok((packed.to_vec(), width, height));
    }

    let mut pixels = Vec::with_capacity(row_bytes * height as usize);
    for row in 0..height as usize {
        let start = row * stride;
        let end = start + row_bytes;
        pixels.extend_from_slice(
            data.get(start..end)
                .context("ffmpeg frame row is out of bounds")?,
        );
    }

    Ok((pixels, width, height))
}
