//! Inference boundary for the anomaly-detection model pair.
//!
//! - `types`: the [`AnomalyEngine`] trait and the value types crossing it.
//! - `engine`: the ONNX Runtime implementation and its configuration.
//! - `preprocess`: frame geometry/color transforms and score post-processing.

pub use engine::{EngineConfig, OnnxEngine};
pub use preprocess::{expand_scores, frame_preprocess, sigmoid, smooth_scores};
pub use types::{AnomalyEngine, FeatureVector, InferenceError, PreparedFrame};

mod engine;
mod preprocess;
mod types;
