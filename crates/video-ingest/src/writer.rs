//! OpenCV `VideoWriter` wrapper used by batch result rendering.

use opencv::{
    core,
    prelude::*,
    videoio::{VideoWriter, VideoWriterTrait},
};

use crate::types::{CaptureError, Frame};

/// Write handle producing an H.264 video file at a fixed frame size.
pub struct VideoSink {
    writer: VideoWriter,
    frame_size: (i32, i32),
    closed: bool,
}

impl VideoSink {
    pub fn create(path: &str, fps: f64, frame_size: (i32, i32)) -> Result<Self, CaptureError> {
        let fourcc = VideoWriter::fourcc('h', '2', '6', '4')
            .map_err(|e| CaptureError::Other(e.into()))?;
        let writer = VideoWriter::new(
            path,
            fourcc,
            fps,
            core::Size {
                width: frame_size.0,
                height: frame_size.1,
            },
            true,
        )
        .map_err(|e| CaptureError::Other(e.into()))?;

        if !writer
            .is_opened()
            .map_err(|e| CaptureError::Other(e.into()))?
        {
            return Err(CaptureError::Open {
                uri: path.to_string(),
            });
        }

        Ok(Self {
            writer,
            frame_size,
            closed: false,
        })
    }

    /// Append one BGR frame. The frame must match the sink's frame size.
    pub fn write_frame(&mut self, frame: &Frame) -> Result<(), CaptureError> {
        if (frame.width, frame.height) != self.frame_size {
            return Err(CaptureError::Other(anyhow::anyhow!(
                "frame size {}x{} does not match sink size {}x{}",
                frame.width,
                frame.height,
                self.frame_size.0,
                self.frame_size.1
            )));
        }

        let mat = Mat::from_slice(&frame.data).map_err(|e| CaptureError::Other(e.into()))?;
        let mat = mat
            .reshape(3, frame.height)
            .map_err(|e| CaptureError::Other(e.into()))?;
        self.writer
            .write(&mat)
            .map_err(|e| CaptureError::Other(e.into()))?;
        Ok(())
    }

    pub fn close(&mut self) {
        if !self.closed {
            let _ = self.writer.release();
            self.closed = true;
        }
    }
}

impl Drop for VideoSink {
    fn drop(&mut self) {
        self.close();
    }
}
