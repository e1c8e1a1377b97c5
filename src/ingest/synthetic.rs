//! Synthetic frame source (`stub://name`) for tests and dry runs.
//!
//! Scene names:
//! - `static`: identical mid-gray frames, never any motion
//! - `offline`: refuses to open, like an unplugged camera
//! - anything else: a textured background with mild sensor noise and a bright
//!   "animal" block that walks through the scene for 10 of every 50 frames
//!
//! A `?frames=N` suffix ends the scene after N frames. Synthetic scenes are
//! treated as live, so that end is never replayed.

use rand::Rng;

use super::{CaptureSettings, FrameReader, ReadOutcome, SourceStats};
use crate::error::SourceError;
use crate::frame::Frame;

const VISIT_PERIOD: u64 = 50;
const VISIT_FRAMES: u64 = 10;
const NOISE_AMPLITUDE: i16 = 4;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Scene {
    Static,
    Trail,
}

pub struct SyntheticReader {
    name: String,
    scene: Scene,
    settings: CaptureSettings,
    frame_limit: Option<u64>,
    position: u64,
    stats: SourceStats,
    released: bool,
}

impl SyntheticReader {
    pub fn open(spec: &str, settings: CaptureSettings) -> Result<Self, SourceError> {
        let (name, query) = match spec.split_once('?') {
            Some((name, query)) => (name, Some(query)),
            None => (spec, None),
        };
        let frame_limit = match query {
            Some(query) => Some(parse_frame_limit(spec, query)?),
            None => None,
        };
        if settings.width == 0 || settings.height == 0 {
            return Err(SourceError::Unsupported(format!(
                "stub://{} requested with empty dimensions",
                spec
            )));
        }
        let scene = match name {
            "offline" => {
                return Err(SourceError::Unavailable {
                    source_id: format!("stub://{}", spec),
                    reason: "synthetic camera is offline".to_string(),
                })
            }
            "static" => Scene::Static,
            _ => Scene::Trail,
        };

        log::info!("SyntheticReader: opened stub://{}", spec);
        Ok(Self {
            name: name.to_string(),
            scene,
            settings,
            frame_limit,
            position: 0,
            stats: SourceStats::default(),
            released: false,
        })
    }

    fn render(&self) -> Vec<u8> {
        let (w, h) = (self.settings.width, self.settings.height);
        let mut pixels = vec![0u8; (w as usize) * (h as usize) * 3];
        match self.scene {
            Scene::Static => pixels.fill(128),
            Scene::Trail => {
                let mut rng = rand::thread_rng();
                for (i, px) in pixels.chunks_exact_mut(3).enumerate() {
                    let (x, y) = (i as u32 % w, i as u32 / w);
                    let base = 60 + ((x / 16 + y / 16) % 2) as i16 * 20;
                    let noise = rng.gen_range(-NOISE_AMPLITUDE..=NOISE_AMPLITUDE);
                    let value = (base + noise).clamp(0, 255) as u8;
                    px.copy_from_slice(&[value, value.saturating_add(10), value]);
                }
                if let Some(step) = self.visit_step() {
                    self.draw_visitor(&mut pixels, step);
                }
            }
        }
        pixels
    }

    fn visit_step(&self) -> Option<u64> {
        let phase = self.position % VISIT_PERIOD;
        let start = VISIT_PERIOD - VISIT_FRAMES;
        (phase >= start).then(|| phase - start)
    }

    fn draw_visitor(&self, pixels: &mut [u8], step: u64) {
        let (w, h) = (self.settings.width as u64, self.settings.height as u64);
        let size_x = (w / 3).max(1);
        let size_y = (h / 2).max(1);
        let travel = w.saturating_sub(size_x);
        let left = travel * step / VISIT_FRAMES.max(1);
        let top = (h - size_y) / 2;
        for y in top..top + size_y {
            for x in left..(left + size_x).min(w) {
                let o = ((y * w + x) * 3) as usize;
                pixels[o..o + 3].copy_from_slice(&[200, 150, 90]);
            }
        }
    }
}

impl FrameReader for SyntheticReader {
    fn read(&mut self) -> Result<ReadOutcome, SourceError> {
        if self.released {
            return Err(SourceError::Capture(format!("stub://{} was released", self.name)));
        }
        if self.frame_limit.is_some_and(|limit| self.position >= limit) {
            return Ok(ReadOutcome::EndOfStream);
        }
        let pixels = self.render();
        let frame = Frame::from_rgb(pixels, self.settings.width, self.settings.height)
            .map_err(|e| SourceError::Capture(e.to_string()))?;
        self.position += 1;
        self.stats.frames_captured += 1;
        Ok(ReadOutcome::Frame(frame))
    }

    fn release(&mut self) {
        if !self.released {
            self.released = true;
            log::debug!("SyntheticReader: released stub://{}", self.name);
        }
    }

    fn stats(&self) -> SourceStats {
        self.stats.clone()
    }
}

fn parse_frame_limit(spec: &str, query: &str) -> Result<u64, SourceError> {
    query
        .strip_prefix("frames=")
        .and_then(|value| value.parse().ok())
        .ok_or_else(|| SourceError::Unsupported(format!("stub://{}", spec)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::{SourceHandle, SourceId};
    use crate::motion::MotionGate;

    fn small() -> CaptureSettings {
        CaptureSettings {
            width: 48,
            height: 36,
            target_fps: 30,
        }
    }

    fn next(reader: &mut SyntheticReader) -> Frame {
        match reader.read().unwrap() {
            ReadOutcome::Frame(frame) => frame,
            ReadOutcome::EndOfStream => panic!("unexpected end of stream"),
        }
    }

    #[test]
    fn static_scene_has_no_motion() {
        let mut reader = SyntheticReader::open("static", small()).unwrap();
        let mut gate = MotionGate::default();
        for _ in 0..5 {
            assert!(!gate.evaluate(&next(&mut reader)).has_motion);
        }
    }

    #[test]
    fn trail_scene_has_a_visitor() {
        let mut reader = SyntheticReader::open("trail", small()).unwrap();
        let mut gate = MotionGate::default();
        let mut moved = 0;
        for _ in 0..VISIT_PERIOD {
            if gate.evaluate(&next(&mut reader)).has_motion {
                moved += 1;
            }
        }
        assert!(moved > 0);
        assert!(moved <= VISIT_FRAMES + 1);
    }

    #[test]
    fn offline_scene_refuses_to_open() {
        let err = SyntheticReader::open("offline", small()).err().expect("offline");
        assert!(matches!(err, SourceError::Unavailable { .. }));
    }

    #[test]
    fn finite_scene_ends_without_replay() {
        let id = SourceId::Synthetic("static?frames=2".into());
        let reader = SyntheticReader::open("static?frames=2", small()).unwrap();
        assert!(!reader.is_rewindable());
        let mut handle = SourceHandle::new(id, Box::new(reader));
        for _ in 0..2 {
            assert!(matches!(handle.next_frame(), Ok(ReadOutcome::Frame(_))));
        }
        assert!(matches!(handle.next_frame(), Ok(ReadOutcome::EndOfStream)));
        assert_eq!(handle.stats().frames_captured, 2);
        assert_eq!(handle.stats().rewinds, 0);
    }

    #[test]
    fn release_is_idempotent() {
        let mut reader = SyntheticReader::open("static", small()).unwrap();
        reader.release();
        reader.release();
        assert!(reader.read().is_err());
    }

    #[test]
    fn bad_query_is_rejected() {
        assert!(SyntheticReader::open("static?frames=lots", small()).is_err());
    }
}
