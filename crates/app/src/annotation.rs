//! Score overlay drawing and JPEG encoding for annotated frames.
//!
//! Drawing happens directly on the BGR frame buffer so the same annotated
//! frame can feed both the MJPEG publisher (after JPEG encoding) and the
//! batch result video writer.

use anyhow::{Result, anyhow};
use image::{ImageBuffer, Rgb, codecs::jpeg::JpegEncoder};
use video_ingest::Frame;

use crate::config::AnnotationConfig;

const SCORE_RED: [u8; 3] = [0, 0, 215];
const SCORE_GREEN: [u8; 3] = [0, 215, 0];

/// Draw the score (and, above the threshold, the warning prompt plus a frame
/// border) onto the frame in place.
pub fn annotate_frame(frame: &mut Frame, score: f32, options: &AnnotationConfig) {
    let width = frame.width;
    let height = frame.height;
    let anomalous = score > options.anomaly_threshold;

    let text = format!("{score:.2}");
    let color = if anomalous { SCORE_RED } else { SCORE_GREEN };
    draw_label(&mut frame.data, width, height, 30, 40, &text, color);

    if anomalous {
        draw_label(
            &mut frame.data,
            width,
            height,
            120,
            40,
            &options.anomaly_prompt,
            SCORE_RED,
        );
        draw_border(
            &mut frame.data,
            width,
            height,
            options.anomaly_border as i32,
            SCORE_RED,
        );
    }
}

/// Encode a BGR frame as JPEG at the given quality.
pub fn encode_jpeg(frame: &Frame, quality: u8) -> Result<Vec<u8>> {
    let width = frame.width as u32;
    let height = frame.height as u32;

    let mut rgb = Vec::with_capacity(frame.data.len());
    for pixel in frame.data.chunks_exact(3) {
        rgb.push(pixel[2]);
        rgb.push(pixel[1]);
        rgb.push(pixel[0]);
    }

    let image = ImageBuffer::<Rgb<u8>, Vec<u8>>::from_vec(width, height, rgb)
        .ok_or_else(|| anyhow!("failed to convert frame into image buffer"))?;

    let mut buffer = Vec::new();
    JpegEncoder::new_with_quality(&mut buffer, quality.clamp(1, 100))
        .encode_image(&image)
        .map_err(|err| anyhow!("JPEG encode failed: {err}"))?;
    Ok(buffer)
}

fn set_pixel(data: &mut [u8], width: i32, x: i32, y: i32, color: [u8; 3]) {
    let base = ((y * width + x) * 3) as usize;
    if let Some(pixel) = data.get_mut(base..base + 3) {
        pixel.copy_from_slice(&color);
    }
}

fn fill_rect(
    data: &mut [u8],
    width: i32,
    height: i32,
    left: i32,
    top: i32,
    right: i32,
    bottom: i32,
    color: [u8; 3],
) {
    let left = left.clamp(0, width.saturating_sub(1));
    let right = right.clamp(0, width.saturating_sub(1));
    let top = top.clamp(0, height.saturating_sub(1));
    let bottom = bottom.clamp(0, height.saturating_sub(1));

    for y in top..=bottom {
        for x in left..=right {
            set_pixel(data, width, x, y, color);
        }
    }
}

/// Paint a solid border of the given thickness along all four edges.
fn draw_border(data: &mut [u8], width: i32, height: i32, thickness: i32, color: [u8; 3]) {
    if thickness <= 0 || width <= 0 || height <= 0 {
        return;
    }
    let t = thickness.min(width / 2).min(height / 2).max(1);
    fill_rect(data, width, height, 0, 0, width - 1, t - 1, color);
    fill_rect(data, width, height, 0, height - t, width - 1, height - 1, color);
    fill_rect(data, width, height, 0, 0, t - 1, height - 1, color);
    fill_rect(data, width, height, width - t, 0, width - 1, height - 1, color);
}

fn draw_label(
    data: &mut [u8],
    width: i32,
    height: i32,
    mut x: i32,
    y: i32,
    text: &str,
    color: [u8; 3],
) {
    for ch in text.chars().flat_map(|c| c.to_uppercase()) {
        if let Some(glyph) = glyph_bits(ch) {
            for (row, pattern) in glyph.iter().enumerate() {
                let py = y + row as i32;
                if py < 0 || py >= height {
                    continue;
                }
                for col in 0..5 {
                    if (pattern >> (4 - col)) & 1 == 1 {
                        let px = x + col;
                        if px >= 0 && px < width {
                            set_pixel(data, width, px, py, color);
                        }
                    }
                }
            }
        }
        x += 6;
    }
}

fn glyph_bits(ch: char) -> Option<[u8; 7]> {
    match ch {
        'A' => Some([
            0b01110, 0b10001, 0b10001, 0b11111, 0b10001, 0b10001, 0b10001,
        ]),
        'L' => Some([
            0b10000, 0b10000, 0b10000, 0b10000, 0b10000, 0b10000, 0b11111,
        ]),
        'M' => Some([
            0b10001, 0b11011, 0b10101, 0b10101, 0b10001, 0b10001, 0b10001,
        ]),
        'N' => Some([
            0b10001, 0b11001, 0b10101, 0b10101, 0b10011, 0b10001, 0b10001,
        ]),
        'O' => Some([
            0b01110, 0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b01110,
        ]),
        'R' => Some([
            0b11110, 0b10001, 0b10001, 0b11110, 0b10100, 0b10010, 0b10001,
        ]),
        'W' => Some([
            0b10001, 0b10001, 0b10001, 0b10101, 0b10101, 0b10101, 0b01010,
        ]),
        'Y' => Some([
            0b10001, 0b10001, 0b01010, 0b00100, 0b00100, 0b00100, 0b00100,
        ]),
        '0' => Some([
            0b01110, 0b10001, 0b10011, 0b10101, 0b11001, 0b10001, 0b01110,
        ]),
        '1' => Some([
            0b00100, 0b01100, 0b00100, 0b00100, 0b00100, 0b00100, 0b01110,
        ]),
        '2' => Some([
            0b01110, 0b10001, 0b00001, 0b00010, 0b00100, 0b01000, 0b11111,
        ]),
        '3' => Some([
            0b11110, 0b00001, 0b00001, 0b01110, 0b00001, 0b00001, 0b11110,
        ]),
        '4' => Some([
            0b00010, 0b00110, 0b01010, 0b10010, 0b11111, 0b00010, 0b00010,
        ]),
        '5' => Some([
            0b11111, 0b10000, 0b11110, 0b00001, 0b00001, 0b10001, 0b01110,
        ]),
        '6' => Some([
            0b00110, 0b01000, 0b10000, 0b11110, 0b10001, 0b10001, 0b01110,
        ]),
        '7' => Some([
            0b11111, 0b00001, 0b00010, 0b00100, 0b01000, 0b01000, 0b01000,
        ]),
        '8' => Some([
            0b01110, 0b10001, 0b10001, 0b01110, 0b10001, 0b10001, 0b01110,
        ]),
        '9' => Some([
            0b01110, 0b10001, 0b10001, 0b01111, 0b00001, 0b00010, 0b01100,
        ]),
        '.' => Some([0, 0, 0, 0, 0, 0b00110, 0b00110]),
        ' ' => Some([0, 0, 0, 0, 0, 0, 0]),
        _ => None,
    }
}
