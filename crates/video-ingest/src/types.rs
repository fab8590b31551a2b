use anyhow::Error;
use thiserror::Error;

/// Raw BGR frame captured from a video source.
#[derive(Clone)]
pub struct Frame {
    pub data: Vec<u8>,
    pub width: i32,
    pub height: i32,
    pub timestamp_ms: i64,
    pub format: FrameFormat,
}

#[derive(Clone, Copy, PartialEq, Eq)]
pub enum FrameFormat {
    Bgr8,
}

/// Classification of a source descriptor: capture device index, local file,
/// or network stream URI.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SourceKind {
    Device,
    File,
    Network,
}

impl SourceKind {
    pub fn from_descriptor(descriptor: &str) -> Self {
        if descriptor.parse::<i32>().is_ok() || descriptor.starts_with("/dev/video") {
            SourceKind::Device
        } else if descriptor.contains("://") {
            SourceKind::Network
        } else {
            SourceKind::File
        }
    }
}

#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("failed to open video source {uri:?}")]
    Open { uri: String },
    #[error("video source {uri:?} yielded no frame")]
    Read { uri: String },
    #[error(transparent)]
    Other(#[from] Error),
}

#[cfg(test)]
mod tests {
    use super::SourceKind;

    #[test]
    fn source_kinds_follow_descriptor_shape() {
        assert_eq!(SourceKind::from_descriptor("0"), SourceKind::Device);
        assert_eq!(SourceKind::from_descriptor("/dev/video1"), SourceKind::Device);
        assert_eq!(
            SourceKind::from_descriptor("rtsp://cam/main"),
            SourceKind::Network
        );
        assert_eq!(
            SourceKind::from_descriptor("storage/videos/source.1.mp4"),
            SourceKind::File
        );
    }
}
