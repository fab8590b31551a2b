use std::path::PathBuf;

use thiserror::Error;
use video_ingest::Frame;

/// One preprocessed RGB frame at the model's input geometry.
#[derive(Clone)]
pub struct PreparedFrame {
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

/// The extraction model's summary representation of one segment.
pub type FeatureVector = Vec<f32>;

/// Boundary to the anomaly-detection model pair.
///
/// Implementations are stateless from the caller's perspective: the same
/// inputs always produce the same outputs, and calls may come from any thread.
pub trait AnomalyEngine: Send + Sync {
    /// Geometry/color-space transform applied to every captured frame before
    /// it enters a segment.
    fn preprocess_frame(&self, frame: &Frame) -> Result<PreparedFrame, InferenceError>;

    /// Summarize one full segment of prepared frames into a feature vector.
    fn extract_features(&self, segment: &[PreparedFrame]) -> Result<FeatureVector, InferenceError>;

    /// Score a sequence of feature vectors, returning one score per time step.
    fn score_history(&self, history: &[FeatureVector]) -> Result<Vec<f32>, InferenceError>;
}

#[derive(Debug, Error)]
pub enum InferenceError {
    #[error("model not found at {}", .path.display())]
    ModelNotFound { path: PathBuf },
    #[error("failed to load model {}: {message}", .path.display())]
    ModelLoad { path: PathBuf, message: String },
    #[error("malformed input shape: {0}")]
    Shape(String),
    #[error("inference session failure: {0}")]
    Session(String),
    #[error("frame preprocessing failed: {0}")]
    Preprocess(String),
}
