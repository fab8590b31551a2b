//! OpenCV-backed frame source handles.
//!
//! A [`FrameSource`] is an exclusively-owned handle over an opened capture
//! device, file, or network stream. Reads are pull-based so callers control
//! the capture cadence; closing is idempotent and also happens on drop.

use chrono::Utc;
use opencv::{
    core::{self, MatTraitConstManual},
    prelude::*,
    videoio::{self, VideoCapture, VideoCaptureTrait},
};
use tracing::debug;

use crate::types::{CaptureError, Frame, FrameFormat, SourceKind};

/// Capture backends tried in order when opening a source; first success wins.
const CAPTURE_BACKENDS: [(i32, &str); 2] = [(videoio::CAP_V4L, "v4l"), (videoio::CAP_ANY, "any")];

/// A video source that yields frames on demand.
///
/// Implementations own the underlying device or stream handle exclusively.
/// `close` must be safe to call more than once.
pub trait FrameSource: Send {
    fn read_frame(&mut self) -> Result<Frame, CaptureError>;
    fn close(&mut self);
    fn descriptor(&self) -> &str;
}

/// OpenCV `VideoCapture` wrapper resizing every frame to a fixed target size.
pub struct VideoCaptureSource {
    capture: VideoCapture,
    descriptor: String,
    target_size: (i32, i32),
    frame: Mat,
    scratch: Mat,
    closed: bool,
}

/// Open `descriptor` (device index, file path, or stream URI) and return a
/// ready-to-read source producing BGR frames at `target_size`.
pub fn open_source(
    descriptor: &str,
    target_size: (i32, i32),
) -> Result<Box<dyn FrameSource>, CaptureError> {
    let mut capture = open_video_capture(descriptor)?;

    if SourceKind::from_descriptor(descriptor) == SourceKind::Device {
        configure_camera(&mut capture, target_size, 30.0);
    }

    Ok(Box::new(VideoCaptureSource {
        capture,
        descriptor: descriptor.to_string(),
        target_size,
        frame: Mat::default(),
        scratch: Mat::default(),
        closed: false,
    }))
}

impl FrameSource for VideoCaptureSource {
    fn read_frame(&mut self) -> Result<Frame, CaptureError> {
        let grabbed = self
            .capture
            .read(&mut self.frame)
            .map_err(|e| CaptureError::Other(e.into()))?;

        let size = self
            .frame
            .size()
            .map_err(|e| CaptureError::Other(e.into()))?;
        if !grabbed || size.width <= 0 {
            return Err(CaptureError::Read {
                uri: self.descriptor.clone(),
            });
        }

        let (target_w, target_h) = self.target_size;
        let working = if size.width != target_w || size.height != target_h {
            opencv::imgproc::resize(
                &self.frame,
                &mut self.scratch,
                core::Size {
                    width: target_w,
                    height: target_h,
                },
                0.0,
                0.0,
                opencv::imgproc::INTER_LINEAR,
            )
            .map_err(|e| CaptureError::Other(e.into()))?;
            &self.scratch
        } else {
            &self.frame
        };

        let data = working
            .data_bytes()
            .map_err(|e| CaptureError::Other(e.into()))?
            .to_vec();

        Ok(Frame {
            data,
            width: target_w,
            height: target_h,
            timestamp_ms: Utc::now().timestamp_millis(),
            format: FrameFormat::Bgr8,
        })
    }

    fn close(&mut self) {
        if !self.closed {
            let _ = self.capture.release();
            self.closed = true;
        }
    }

    fn descriptor(&self) -> &str {
        &self.descriptor
    }
}

impl Drop for VideoCaptureSource {
    fn drop(&mut self) {
        self.close();
    }
}

/// Parse a `/dev/videoX` style URI or bare integer and return the device index.
pub(crate) fn parse_device_index(uri: &str) -> Option<i32> {
    if let Ok(index) = uri.parse::<i32>() {
        return Some(index);
    }
    if let Some(stripped) = uri.strip_prefix("/dev/video") {
        if stripped.chars().all(|c| c.is_ascii_digit()) {
            if let Ok(index) = stripped.parse::<i32>() {
                return Some(index);
            }
        }
    }
    None
}

/// Attempt to open a capture handle either by device index or URI, walking the
/// backend strategy list until one opens.
fn open_video_capture(uri: &str) -> Result<VideoCapture, CaptureError> {
    if let Some(index) = parse_device_index(uri) {
        for (backend, name) in CAPTURE_BACKENDS {
            match VideoCapture::new(index, backend) {
                Ok(cap) => {
                    if cap.is_opened().map_err(|e| CaptureError::Other(e.into()))? {
                        return Ok(cap);
                    }
                }
                Err(err) => {
                    debug!("failed to open device #{index} with backend {name}: {err}");
                }
            }
        }
    }

    for (backend, name) in CAPTURE_BACKENDS {
        match VideoCapture::from_file(uri, backend) {
            Ok(cap) => {
                if cap.is_opened().map_err(|e| CaptureError::Other(e.into()))? {
                    return Ok(cap);
                }
            }
            Err(err) => {
                debug!("failed to open {uri} with backend {name}: {err}");
            }
        }
    }

    Err(CaptureError::Open {
        uri: uri.to_string(),
    })
}

/// Apply common capture settings (resolution, fps, preferred pixel format).
fn configure_camera(cap: &mut VideoCapture, target_size: (i32, i32), fps: f64) {
    if let Ok(fourcc) = videoio::VideoWriter::fourcc('M', 'J', 'P', 'G') {
        let _ = cap.set(videoio::CAP_PROP_FOURCC, fourcc as f64);
    }
    let _ = cap.set(videoio::CAP_PROP_FRAME_WIDTH, target_size.0 as f64);
    let _ = cap.set(videoio::CAP_PROP_FRAME_HEIGHT, target_size.1 as f64);
    let _ = cap.set(videoio::CAP_PROP_FPS, fps);
}

#[cfg(test)]
mod tests {
    use super::parse_device_index;

    #[test]
    fn device_index_parses_integers_and_dev_paths() {
        assert_eq!(parse_device_index("0"), Some(0));
        assert_eq!(parse_device_index("3"), Some(3));
        assert_eq!(parse_device_index("/dev/video2"), Some(2));
        assert_eq!(parse_device_index("/dev/videoX"), None);
        assert_eq!(parse_device_index("rtsp://cam/stream"), None);
        assert_eq!(parse_device_index("clips/lobby.mp4"), None);
    }
}
