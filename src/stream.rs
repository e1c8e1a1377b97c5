//! MJPEG stream consumer over the frame hub.
//!
//! Each part is a complete `multipart/x-mixed-replace` chunk, ready to be
//! written to an HTTP response body by whatever web layer hosts the stream.

use anyhow::Result;
use std::io::Write;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::frame::Frame;
use crate::hub::HubWait;
use crate::pipeline::PipelineState;

pub const BOUNDARY: &str = "frame";
pub const CONTENT_TYPE: &str = "multipart/x-mixed-replace; boundary=frame";

#[derive(Clone, Debug, PartialEq)]
pub struct StreamSettings {
    /// Upper bound on parts per second for one consumer.
    pub max_fps: u32,
    pub jpeg_quality: u8,
    /// How long a single wait on the hub may block before re-checking.
    pub poll_timeout: Duration,
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            max_fps: 15,
            jpeg_quality: 80,
            poll_timeout: Duration::from_millis(500),
        }
    }
}

/// Iterator of encoded MJPEG parts. Ends when the pipeline stops.
pub struct MjpegStream {
    state: Arc<PipelineState>,
    settings: StreamSettings,
    last_seq: u64,
    last_emit: Option<Instant>,
}

impl MjpegStream {
    pub fn new(state: Arc<PipelineState>, settings: StreamSettings) -> Self {
        Self {
            state,
            settings,
            last_seq: 0,
            last_emit: None,
        }
    }

    /// Sequence number of the last snapshot emitted.
    pub fn last_seq(&self) -> u64 {
        self.last_seq
    }

    fn interval(&self) -> Duration {
        Duration::from_secs(1) / self.settings.max_fps.max(1)
    }
}

impl Iterator for MjpegStream {
    type Item = Vec<u8>;

    fn next(&mut self) -> Option<Vec<u8>> {
        if let Some(at) = self.last_emit {
            let remaining = self.interval().saturating_sub(at.elapsed());
            if !remaining.is_zero() {
                std::thread::sleep(remaining);
            }
        }
        loop {
            match self
                .state
                .hub()
                .wait_newer(self.last_seq, self.settings.poll_timeout)
            {
                HubWait::Fresh(snapshot) => {
                    self.last_seq = snapshot.seq;
                    match encode_part(&snapshot.frame, self.settings.jpeg_quality) {
                        Ok(part) => {
                            self.last_emit = Some(Instant::now());
                            return Some(part);
                        }
                        Err(e) => log::warn!("stream: failed to encode frame {}: {:#}", snapshot.seq, e),
                    }
                }
                HubWait::TimedOut => continue,
                HubWait::Closed => return None,
            }
        }
    }
}

/// One multipart chunk: boundary, part headers, JPEG body.
pub fn encode_part(frame: &Frame, quality: u8) -> Result<Vec<u8>> {
    let jpeg = frame.to_jpeg(quality)?;
    let header = format!(
        "--{}\r\nContent-Type: image/jpeg\r\nContent-Length: {}\r\n\r\n",
        BOUNDARY,
        jpeg.len()
    );
    let mut part = Vec::with_capacity(header.len() + jpeg.len() + 2);
    part.extend_from_slice(header.as_bytes());
    part.extend_from_slice(&jpeg);
    part.extend_from_slice(b"\r\n");
    Ok(part)
}

/// Copy parts into `out` until the pipeline stops or the writer fails
/// (typically a disconnected client). Returns the number of parts written.
pub fn write_stream<W: Write>(stream: MjpegStream, out: &mut W) -> Result<u64> {
    let mut written = 0u64;
    for part in stream {
        out.write_all(&part)?;
        out.flush()?;
        written += 1;
    }
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hub::PublishContext;

    fn gray(value: u8) -> Frame {
        Frame::from_rgb(vec![value; 8 * 6 * 3], 8, 6).unwrap()
    }

    #[test]
    fn part_has_boundary_and_length() {
        let part = encode_part(&gray(90), 80).unwrap();
        let text = String::from_utf8_lossy(&part);
        assert!(text.starts_with("--frame\r\nContent-Type: image/jpeg\r\nContent-Length: "));
        assert!(part.ends_with(b"\r\n"));
        let header_end = part.windows(4).position(|w| w == b"\r\n\r\n").unwrap() + 4;
        // JPEG SOI marker
        assert_eq!(&part[header_end..header_end + 2], &[0xFF, 0xD8]);
    }

    #[test]
    fn stream_emits_latest_then_ends_on_close() {
        let state = PipelineState::shared(Vec::new());
        state
            .hub()
            .publish(gray(10), Vec::new(), None, PublishContext::default());
        state
            .hub()
            .publish(gray(20), Vec::new(), None, PublishContext::default());

        let mut stream = MjpegStream::new(
            Arc::clone(&state),
            StreamSettings {
                max_fps: 1000,
                ..StreamSettings::default()
            },
        );
        assert!(stream.next().is_some());
        assert_eq!(stream.last_seq(), 2);

        state.hub().close();
        assert!(stream.next().is_none());
    }

    #[test]
    fn write_stream_counts_parts() {
        let state = PipelineState::shared(Vec::new());
        state
            .hub()
            .publish(gray(10), Vec::new(), None, PublishContext::default());
        state.hub().close();

        let stream = MjpegStream::new(Arc::clone(&state), StreamSettings::default());
        let mut out = Vec::new();
        // The final snapshot is still delivered after close.
        assert_eq!(write_stream(stream, &mut out).unwrap(), 1);
        assert!(out.starts_with(b"--frame\r\n"));
    }
}
