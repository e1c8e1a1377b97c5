//! In-place drawing on RGB8 buffers: boxes, labels and diagnostic placeholders.
//!
//! Text uses a built-in 3x5 bitmap font (uppercase, digits and a few symbols), so
//! placeholder frames carry readable text without a font dependency.

use anyhow::Result;

use crate::frame::{rgb_len, Detection, DiagnosticKind, Frame, PixelRect};

pub type Rgb = [u8; 3];

pub const BOX_COLOR: Rgb = [0, 255, 0];
pub const MOTION_COLOR: Rgb = [255, 200, 0];
pub const ERROR_COLOR: Rgb = [255, 0, 0];
pub const NOTICE_COLOR: Rgb = [255, 255, 255];

const GLYPH_W: u32 = 3;
const GLYPH_H: u32 = 5;

/// Rows are packed top to bottom, three bits each, most significant bit leftmost.
fn glyph(c: char) -> u16 {
    match c.to_ascii_uppercase() {
        ' ' => 0,
        'A' => 0b010_101_111_101_101,
        'B' => 0b110_101_110_101_110,
        'C' => 0b011_100_100_100_011,
        'D' => 0b110_101_101_101_110,
        'E' => 0b111_100_110_100_111,
        'F' => 0b111_100_110_100_100,
        'G' => 0b011_100_101_101_011,
        'H' => 0b101_101_111_101_101,
        'I' => 0b111_010_010_010_111,
        'J' => 0b001_001_001_101_010,
        'K' => 0b101_101_110_101_101,
        'L' => 0b100_100_100_100_111,
        'M' => 0b101_111_111_101_101,
        'N' => 0b110_101_101_101_101,
        'O' => 0b010_101_101_101_010,
        'P' => 0b110_101_110_100_100,
        'Q' => 0b010_101_101_110_011,
        'R' => 0b110_101_110_101_101,
        'S' => 0b011_100_010_001_110,
        'T' => 0b111_010_010_010_010,
        'U' => 0b101_101_101_101_111,
        'V' => 0b101_101_101_101_010,
        'W' => 0b101_101_111_111_101,
        'X' => 0b101_101_010_101_101,
        'Y' => 0b101_101_010_010_010,
        'Z' => 0b111_001_010_100_111,
        '0' => 0b111_101_101_101_111,
        '1' => 0b010_110_010_010_111,
        '2' => 0b110_001_010_100_111,
        '3' => 0b110_001_010_001_110,
        '4' => 0b101_101_111_001_001,
        '5' => 0b111_100_110_001_110,
        '6' => 0b011_100_111_101_111,
        '7' => 0b111_001_010_010_010,
        '8' => 0b111_101_111_101_111,
        '9' => 0b111_101_111_001_110,
        '%' => 0b101_001_010_100_101,
        '.' => 0b000_000_000_000_010,
        ':' => 0b000_010_000_010_000,
        '-' => 0b000_000_111_000_000,
        '_' => 0b000_000_000_000_111,
        '/' => 0b001_001_010_100_100,
        _ => 0b110_001_010_000_010,
    }
}

fn put_pixel(pixels: &mut [u8], width: u32, height: u32, x: u32, y: u32, color: Rgb) {
    if x >= width || y >= height {
        return;
    }
    let offset = (y as usize * width as usize + x as usize) * 3;
    if let Some(px) = pixels.get_mut(offset..offset + 3) {
        px.copy_from_slice(&color);
    }
}

fn fill_rect(pixels: &mut [u8], width: u32, height: u32, rect: PixelRect, color: Rgb) {
    let x_end = rect.x.saturating_add(rect.width).min(width);
    let y_end = rect.y.saturating_add(rect.height).min(height);
    for y in rect.y..y_end {
        for x in rect.x..x_end {
            put_pixel(pixels, width, height, x, y, color);
        }
    }
}

/// Outline `rect` with a border `thickness` pixels wide.
pub fn draw_rect(
    pixels: &mut [u8],
    width: u32,
    height: u32,
    rect: PixelRect,
    color: Rgb,
    thickness: u32,
) {
    let t = thickness.max(1);
    let right = rect.x.saturating_add(rect.width);
    let bottom = rect.y.saturating_add(rect.height);
    let edges = [
        PixelRect { x: rect.x, y: rect.y, width: rect.width, height: t },
        PixelRect { x: rect.x, y: bottom.saturating_sub(t), width: rect.width, height: t },
        PixelRect { x: rect.x, y: rect.y, width: t, height: rect.height },
        PixelRect { x: right.saturating_sub(t), y: rect.y, width: t, height: rect.height },
    ];
    for edge in edges {
        fill_rect(pixels, width, height, edge, color);
    }
}

/// Render `text` with its top-left corner at `(x, y)`. Each font pixel becomes a
/// `scale`x`scale` block.
#[allow(clippy::too_many_arguments)]
pub fn draw_text(
    pixels: &mut [u8],
    width: u32,
    height: u32,
    x: u32,
    y: u32,
    text: &str,
    scale: u32,
    color: Rgb,
) {
    let scale = scale.max(1);
    let advance = (GLYPH_W + 1) * scale;
    for (i, c) in text.chars().enumerate() {
        let bits = glyph(c);
        let origin_x = x.saturating_add(i as u32 * advance);
        for row in 0..GLYPH_H {
            for col in 0..GLYPH_W {
                let shift = (GLYPH_H - 1 - row) * GLYPH_W + (GLYPH_W - 1 - col);
                if (bits >> shift) & 1 == 1 {
                    let block = PixelRect {
                        x: origin_x + col * scale,
                        y: y + row * scale,
                        width: scale,
                        height: scale,
                    };
                    fill_rect(pixels, width, height, block, color);
                }
            }
        }
    }
}

/// Width in pixels of `text` rendered at `scale`.
pub fn text_width(text: &str, scale: u32) -> u32 {
    text.chars().count() as u32 * (GLYPH_W + 1) * scale.max(1)
}

/// Copy `frame` and draw every detection box with a `CATEGORY NN.N%` label,
/// plus the motion region when given.
pub fn annotate(frame: &Frame, detections: &[Detection], motion: Option<PixelRect>) -> Result<Frame> {
    let (width, height) = (frame.width(), frame.height());
    let mut pixels = frame.to_owned_pixels();
    let scale = (height / 240).max(1);

    if let Some(region) = motion {
        draw_rect(&mut pixels, width, height, region, MOTION_COLOR, 1);
    }

    for det in detections {
        let rect = det.bbox().to_pixels(width, height);
        draw_rect(&mut pixels, width, height, rect, BOX_COLOR, 2);
        let label = format!("{} {:.1}%", det.category(), det.confidence() * 100.0);
        let label_h = (GLYPH_H + 2) * scale;
        let label_y = if rect.y >= label_h { rect.y - label_h } else { rect.y + 3 };
        draw_text(&mut pixels, width, height, rect.x, label_y, &label, scale, BOX_COLOR);
    }

    frame.with_pixels(pixels)
}

/// Black placeholder frame with the diagnostic message written across it.
pub fn diagnostic_frame(kind: DiagnosticKind, width: u32, height: u32) -> Result<Frame> {
    let mut pixels = vec![0u8; rgb_len(width, height)?];
    let message = kind.message();
    let color = match kind {
        DiagnosticKind::NoSource => NOTICE_COLOR,
        DiagnosticKind::SourceUnavailable => ERROR_COLOR,
    };

    let margin = (width / 12).max(1);
    let fit = width.saturating_sub(2 * margin) / text_width(message, 1).max(1);
    let scale = fit.clamp(1, 4);
    let y = (height / 2).saturating_sub(GLYPH_H * scale / 2);
    draw_text(&mut pixels, width, height, margin, y, message, scale, color);

    Ok(Frame::from_rgb(pixels, width, height)?.into_diagnostic(kind))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::BoundingBox;

    fn count_color(pixels: &[u8], color: Rgb) -> usize {
        pixels.chunks_exact(3).filter(|px| *px == color).count()
    }

    #[test]
    fn draw_text_sets_glyph_pixels() {
        let mut pixels = vec![0u8; 4 * 5 * 3];
        draw_text(&mut pixels, 4, 5, 0, 0, "I", 1, NOTICE_COLOR);
        // 'I' = 3 + 1 + 1 + 1 + 3 lit pixels
        assert_eq!(count_color(&pixels, NOTICE_COLOR), 9);
    }

    #[test]
    fn draw_rect_clips_to_frame() {
        let mut pixels = vec![0u8; 10 * 10 * 3];
        let rect = PixelRect { x: 5, y: 5, width: 20, height: 20 };
        draw_rect(&mut pixels, 10, 10, rect, BOX_COLOR, 1);
        // Only the top and left edges fall inside the 10x10 frame.
        assert_eq!(count_color(&pixels, BOX_COLOR), 5 + 5 - 1);
    }

    #[test]
    fn annotate_draws_on_a_copy() -> Result<()> {
        let frame = Frame::from_rgb(vec![0u8; 64 * 48 * 3], 64, 48)?;
        let bbox = BoundingBox::new(0.25, 0.25, 0.5, 0.5)?;
        let det = Detection::new("deer", 0.9, bbox)?;
        let drawn = annotate(&frame, &[det], None)?;
        assert!(count_color(drawn.pixels(), BOX_COLOR) > 0);
        assert_eq!(count_color(frame.pixels(), BOX_COLOR), 0);
        Ok(())
    }

    #[test]
    fn diagnostic_frame_is_marked_and_readable() -> Result<()> {
        let frame = diagnostic_frame(DiagnosticKind::SourceUnavailable, 640, 480)?;
        assert_eq!(frame.diagnostic(), Some(DiagnosticKind::SourceUnavailable));
        assert!(count_color(frame.pixels(), ERROR_COLOR) > 100);
        // Only the message color and black background appear.
        let other = frame
            .pixels()
            .chunks_exact(3)
            .filter(|px| *px != ERROR_COLOR && *px != [0, 0, 0])
            .count();
        assert_eq!(other, 0);
        Ok(())
    }
}
