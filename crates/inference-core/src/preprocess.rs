//! Frame and score transforms surrounding the model sessions.

use image::{ImageBuffer, Rgb, imageops};
use video_ingest::{Frame, FrameFormat};

use crate::engine::EngineConfig;
use crate::types::{InferenceError, PreparedFrame};

/// Resize a captured BGR frame to the model geometry, apply the configured
/// center crop, and convert to RGB.
pub fn frame_preprocess(frame: &Frame, config: &EngineConfig) -> Result<PreparedFrame, InferenceError> {
    if frame.format != FrameFormat::Bgr8 {
        return Err(InferenceError::Preprocess("unsupported frame format".into()));
    }

    let width = frame.width as u32;
    let height = frame.height as u32;
    let expected = (width * height * 3) as usize;
    if frame.data.len() != expected {
        return Err(InferenceError::Preprocess(format!(
            "frame buffer holds {} bytes, expected {expected}",
            frame.data.len()
        )));
    }

    let mut rgb = Vec::with_capacity(frame.data.len());
    for pixel in frame.data.chunks_exact(3) {
        rgb.push(pixel[2]);
        rgb.push(pixel[1]);
        rgb.push(pixel[0]);
    }

    let image = ImageBuffer::<Rgb<u8>, Vec<u8>>::from_vec(width, height, rgb)
        .ok_or_else(|| InferenceError::Preprocess("frame buffer rejected by image".into()))?;

    let resized = imageops::resize(
        &image,
        config.segment_width,
        config.segment_height,
        imageops::FilterType::Triangle,
    );

    let (crop_w, crop_h) = config.crop_size();
    let cropped = imageops::crop_imm(&resized, config.crop_x1, config.crop_y1, crop_w, crop_h)
        .to_image();

    Ok(PreparedFrame {
        width: cropped.width(),
        height: cropped.height(),
        data: cropped.into_raw(),
    })
}

pub fn sigmoid(value: f32) -> f32 {
    1.0 / (1.0 + (-value).exp())
}

/// Moving-average smoothing equivalent to convolving with `ones(k) / k` in
/// "same" mode, rounded to two decimals.
pub fn smooth_scores(scores: &[f32], window: usize) -> Vec<f32> {
    if scores.is_empty() || window <= 1 {
        return scores.iter().map(|s| round_score(*s)).collect();
    }

    let len = scores.len() as isize;
    let k = window as isize;
    let offset = (k - 1) / 2;

    (0..len)
        .map(|i| {
            let hi = i + offset;
            let lo = hi - (k - 1);
            let mut sum = 0.0;
            for j in lo..=hi {
                if (0..len).contains(&j) {
                    sum += scores[j as usize];
                }
            }
            round_score(sum / window as f32)
        })
        .collect()
}

/// Repeat each per-segment score once per frame in that segment.
pub fn expand_scores(scores: &[f32], segment_length: usize) -> Vec<f32> {
    scores
        .iter()
        .flat_map(|score| std::iter::repeat(*score).take(segment_length))
        .collect()
}

fn round_score(value: f32) -> f32 {
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use video_ingest::{Frame, FrameFormat};

    fn bgr_frame(width: i32, height: i32) -> Frame {
        let mut data = Vec::with_capacity((width * height * 3) as usize);
        for _ in 0..(width * height) {
            data.extend_from_slice(&[10, 20, 30]);
        }
        Frame {
            data,
            width,
            height,
            timestamp_ms: 0,
            format: FrameFormat::Bgr8,
        }
    }

    #[test]
    fn preprocess_resizes_crops_and_swaps_channels() {
        let config = EngineConfig {
            segment_width: 16,
            segment_height: 12,
            crop_x1: 2,
            crop_x2: 14,
            crop_y1: 2,
            crop_y2: 10,
            ..EngineConfig::default()
        };
        let prepared = frame_preprocess(&bgr_frame(64, 48), &config).unwrap();
        assert_eq!(prepared.width, 12);
        assert_eq!(prepared.height, 8);
        assert_eq!(prepared.data.len(), 12 * 8 * 3);
        // Uniform input: channel swap must hold everywhere.
        assert_eq!(&prepared.data[..3], &[30, 20, 10]);
    }

    #[test]
    fn preprocess_rejects_short_buffers() {
        let mut frame = bgr_frame(8, 8);
        frame.data.truncate(10);
        assert!(frame_preprocess(&frame, &EngineConfig::default()).is_err());
    }

    #[test]
    fn smoothing_matches_same_mode_convolution() {
        let smoothed = smooth_scores(&[1.0, 2.0, 3.0, 4.0], 3);
        assert_eq!(smoothed, vec![1.0, 2.0, 3.0, 2.33]);
    }

    #[test]
    fn smoothing_with_unit_window_only_rounds() {
        let smoothed = smooth_scores(&[0.123, 0.456], 1);
        assert_eq!(smoothed, vec![0.12, 0.46]);
    }

    #[test]
    fn scores_expand_per_frame() {
        assert_eq!(expand_scores(&[0.1, 0.9], 3), vec![0.1, 0.1, 0.1, 0.9, 0.9, 0.9]);
    }

    #[test]
    fn sigmoid_is_centered() {
        assert!((sigmoid(0.0) - 0.5).abs() < 1e-6);
        assert!(sigmoid(10.0) > 0.99);
        assert!(sigmoid(-10.0) < 0.01);
    }
}
