//! Two-frame motion gate.
//!
//! `MotionGate` keeps exactly one previous intensity frame. Every `evaluate` call
//! compares against it and then replaces it, so slow scene changes stop
//! triggering the gate after a frame or two.

use crate::frame::{Frame, PixelRect};

pub const DEFAULT_PIXEL_THRESHOLD: u8 = 25;
pub const DEFAULT_MIN_CHANGED_FRACTION: f32 = 0.1;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MotionConfig {
    /// A pixel counts as changed when its intensity moved by more than this.
    pub pixel_threshold: u8,
    /// Fraction of changed pixels above which the frame has motion.
    pub min_changed_fraction: f32,
}

impl Default for MotionConfig {
    fn default() -> Self {
        Self {
            pixel_threshold: DEFAULT_PIXEL_THRESHOLD,
            min_changed_fraction: DEFAULT_MIN_CHANGED_FRACTION,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MotionReading {
    pub has_motion: bool,
    /// Fraction of pixels whose intensity changed, in `[0, 1]`.
    pub score: f32,
}

impl MotionReading {
    const NONE: MotionReading = MotionReading {
        has_motion: false,
        score: 0.0,
    };
}

struct Baseline {
    luma: Vec<u8>,
    width: u32,
    height: u32,
}

pub struct MotionGate {
    config: MotionConfig,
    baseline: Option<Baseline>,
}

impl MotionGate {
    pub fn new(config: MotionConfig) -> Self {
        Self {
            config,
            baseline: None,
        }
    }

    pub fn config(&self) -> MotionConfig {
        self.config
    }

    /// Score `frame` against the stored baseline, then make it the new baseline.
    ///
    /// The first call (or the first call after a size change) never reports
    /// motion; it only captures the baseline.
    pub fn evaluate(&mut self, frame: &Frame) -> MotionReading {
        self.evaluate_inner(frame, false).0
    }

    /// `evaluate` plus the largest moving region, from a single difference pass.
    pub fn evaluate_with_region(&mut self, frame: &Frame) -> (MotionReading, Option<PixelRect>) {
        self.evaluate_inner(frame, true)
    }

    fn evaluate_inner(&mut self, frame: &Frame, with_region: bool) -> (MotionReading, Option<PixelRect>) {
        let luma = frame.luma();
        let (reading, region) = match self.changed_mask(frame, &luma) {
            Some(mask) if !mask.is_empty() => {
                let changed = mask.iter().filter(|&&c| c).count();
                let score = changed as f32 / mask.len() as f32;
                let region = if with_region {
                    largest_component(&mask, frame.width(), frame.height()).map(|(_, rect)| rect)
                } else {
                    None
                };
                let reading = MotionReading {
                    has_motion: score > self.config.min_changed_fraction,
                    score,
                };
                (reading, region)
            }
            _ => (MotionReading::NONE, None),
        };

        self.baseline = Some(Baseline {
            luma,
            width: frame.width(),
            height: frame.height(),
        });
        (reading, region)
    }

    /// Bounding rectangle of the largest 8-connected region of changed pixels
    /// against the current baseline. Does not touch the baseline.
    pub fn largest_motion_region(&self, frame: &Frame) -> Option<PixelRect> {
        self.largest_region_with_count(frame).map(|(_, rect)| rect)
    }

    /// Like `largest_motion_region`, also returning the region's changed-pixel count.
    pub(crate) fn largest_region_with_count(&self, frame: &Frame) -> Option<(u64, PixelRect)> {
        let luma = frame.luma();
        let mask = self.changed_mask(frame, &luma)?;
        largest_component(&mask, frame.width(), frame.height())
    }

    /// Forget the baseline. The next `evaluate` starts fresh.
    pub fn reset(&mut self) {
        self.baseline = None;
    }

    fn changed_mask(&self, frame: &Frame, luma: &[u8]) -> Option<Vec<bool>> {
        let baseline = self.baseline.as_ref()?;
        if baseline.width != frame.width() || baseline.height != frame.height() {
            return None;
        }
        let threshold = self.config.pixel_threshold;
        Some(
            luma.iter()
                .zip(&baseline.luma)
                .map(|(&cur, &prev)| cur.abs_diff(prev) > threshold)
                .collect(),
        )
    }
}

impl Default for MotionGate {
    fn default() -> Self {
        Self::new(MotionConfig::default())
    }
}

fn largest_component(mask: &[bool], width: u32, height: u32) -> Option<(u64, PixelRect)> {
    let w = width as usize;
    let h = height as usize;
    let mut visited = vec![false; mask.len()];
    let mut stack = Vec::new();
    let mut best: Option<(u64, PixelRect)> = None;

    for start in 0..mask.len() {
        if !mask[start] || visited[start] {
            continue;
        }
        visited[start] = true;
        stack.push(start);

        let (mut min_x, mut min_y) = (usize::MAX, usize::MAX);
        let (mut max_x, mut max_y) = (0usize, 0usize);
        let mut count = 0u64;

        while let Some(idx) = stack.pop() {
            let (x, y) = (idx % w, idx / w);
            count += 1;
            min_x = min_x.min(x);
            min_y = min_y.min(y);
            max_x = max_x.max(x);
            max_y = max_y.max(y);

            for ny in y.saturating_sub(1)..=(y + 1).min(h - 1) {
                for nx in x.saturating_sub(1)..=(x + 1).min(w - 1) {
                    let n = ny * w + nx;
                    if mask[n] && !visited[n] {
                        visited[n] = true;
                        stack.push(n);
                    }
                }
            }
        }

        if best.as_ref().map_or(true, |(c, _)| count > *c) {
            let rect = PixelRect {
                x: min_x as u32,
                y: min_y as u32,
                width: (max_x - min_x + 1) as u32,
                height: (max_y - min_y + 1) as u32,
            };
            best = Some((count, rect));
        }
    }

    best
}

#[cfg(test)]
mod tests {
    use super::*;

    fn solid(value: u8, width: u32, height: u32) -> Frame {
        Frame::from_rgb(vec![value; (width * height * 3) as usize], width, height).unwrap()
    }

    fn with_block(base: u8, block: u8, width: u32, height: u32, rect: PixelRect) -> Frame {
        let mut pixels = vec![base; (width * height * 3) as usize];
        for y in rect.y..rect.y + rect.height {
            for x in rect.x..rect.x + rect.width {
                let o = ((y * width + x) * 3) as usize;
                pixels[o..o + 3].copy_from_slice(&[block; 3]);
            }
        }
        Frame::from_rgb(pixels, width, height).unwrap()
    }

    #[test]
    fn first_evaluation_never_signals_motion() {
        let mut gate = MotionGate::default();
        let reading = gate.evaluate(&solid(200, 8, 8));
        assert_eq!(reading, MotionReading::NONE);
    }

    #[test]
    fn identical_frames_score_zero() {
        let mut gate = MotionGate::default();
        gate.evaluate(&solid(10, 8, 8));
        let reading = gate.evaluate(&solid(10, 8, 8));
        assert!(!reading.has_motion);
        assert_eq!(reading.score, 0.0);
    }

    #[test]
    fn full_change_scores_one() {
        let mut gate = MotionGate::default();
        gate.evaluate(&solid(0, 8, 8));
        let reading = gate.evaluate(&solid(255, 8, 8));
        assert!(reading.has_motion);
        assert_eq!(reading.score, 1.0);
    }

    #[test]
    fn small_intensity_changes_are_ignored() {
        let mut gate = MotionGate::default();
        gate.evaluate(&solid(100, 8, 8));
        let reading = gate.evaluate(&solid(120, 8, 8));
        assert_eq!(reading.score, 0.0);
    }

    #[test]
    fn baseline_is_replaced_every_call() {
        let mut gate = MotionGate::default();
        gate.evaluate(&solid(0, 8, 8));
        assert!(gate.evaluate(&solid(255, 8, 8)).has_motion);
        // Same content as the new baseline: no motion.
        assert!(!gate.evaluate(&solid(255, 8, 8)).has_motion);
    }

    #[test]
    fn score_must_exceed_threshold() {
        let mut gate = MotionGate::new(MotionConfig {
            pixel_threshold: 25,
            min_changed_fraction: 0.25,
        });
        let rect = PixelRect { x: 0, y: 0, width: 4, height: 4 };
        gate.evaluate(&solid(0, 8, 8));
        // 16 of 64 pixels changed: exactly 0.25, not above it.
        let reading = gate.evaluate(&with_block(0, 255, 8, 8, rect));
        assert_eq!(reading.score, 0.25);
        assert!(!reading.has_motion);
    }

    #[test]
    fn size_change_resets_baseline() {
        let mut gate = MotionGate::default();
        gate.evaluate(&solid(0, 8, 8));
        assert_eq!(gate.evaluate(&solid(255, 4, 4)), MotionReading::NONE);
        assert!(gate.evaluate(&solid(0, 4, 4)).has_motion);
    }

    #[test]
    fn largest_region_picks_biggest_blob() {
        let mut gate = MotionGate::default();
        gate.evaluate(&solid(0, 16, 16));

        let mut pixels = vec![0u8; 16 * 16 * 3];
        let mut light = |x: u32, y: u32| {
            let o = ((y * 16 + x) * 3) as usize;
            pixels[o..o + 3].copy_from_slice(&[255; 3]);
        };
        light(0, 0);
        for y in 8..12 {
            for x in 9..14 {
                light(x, y);
            }
        }
        let frame = Frame::from_rgb(pixels, 16, 16).unwrap();

        let region = gate.largest_motion_region(&frame).expect("region");
        assert_eq!(
            region,
            PixelRect {
                x: 9,
                y: 8,
                width: 5,
                height: 4
            }
        );
    }

    #[test]
    fn evaluate_with_region_matches_separate_calls() {
        let rect = PixelRect { x: 2, y: 3, width: 4, height: 2 };
        let moved = with_block(0, 255, 12, 10, rect);

        let mut separate = MotionGate::default();
        separate.evaluate(&solid(0, 12, 10));
        let region = separate.largest_motion_region(&moved);
        let reading = separate.evaluate(&moved);

        let mut combined = MotionGate::default();
        assert_eq!(combined.evaluate_with_region(&solid(0, 12, 10)), (MotionReading::NONE, None));
        assert_eq!(combined.evaluate_with_region(&moved), (reading, region));
        assert_eq!(region, Some(rect));
        // The combined call also advanced the baseline.
        assert!(!combined.evaluate(&moved).has_motion);
    }

    #[test]
    fn largest_region_none_without_changes_or_baseline() {
        let mut gate = MotionGate::default();
        assert!(gate.largest_motion_region(&solid(0, 8, 8)).is_none());
        gate.evaluate(&solid(0, 8, 8));
        assert!(gate.largest_motion_region(&solid(0, 8, 8)).is_none());
    }
}
