//! Video capture and writing built on OpenCV.
//!
//! - `capture`: pull-based [`FrameSource`] handles with backend fallback.
//! - `writer`: [`VideoSink`] for rendering batch result videos.
//! - `types`: frame value types and capture errors shared by both.

pub use capture::{FrameSource, VideoCaptureSource, open_source};
pub use types::{CaptureError, Frame, FrameFormat, SourceKind};
pub use writer::VideoSink;

mod capture;
mod types;
mod writer;
