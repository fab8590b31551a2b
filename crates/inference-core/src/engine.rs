//! ONNX Runtime sessions for segment feature extraction and anomaly scoring.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use ndarray::{Array3, Array5};
use ort::session::{Session, builder::GraphOptimizationLevel};
use ort::value::Value;
use serde::Deserialize;
use tracing::info;
use video_ingest::{Frame, FrameSource};

use crate::preprocess::{frame_preprocess, sigmoid, smooth_scores};
use crate::types::{AnomalyEngine, FeatureVector, InferenceError, PreparedFrame};

/// Model paths and preprocessing constants for the extraction/detection pair.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct EngineConfig {
    pub detection_model_path: PathBuf,
    pub extraction_model_path: PathBuf,
    pub segment_width: u32,
    pub segment_height: u32,
    pub segment_length: usize,
    pub crop_x1: u32,
    pub crop_x2: u32,
    pub crop_y1: u32,
    pub crop_y2: u32,
    pub normalization_mean: f32,
    pub normalization_std: f32,
    pub smoothing_window: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            detection_model_path: PathBuf::from("models/detection.onnx"),
            extraction_model_path: PathBuf::from("models/extraction.onnx"),
            segment_width: 171,
            segment_height: 128,
            segment_length: 16,
            crop_x1: 29,
            crop_x2: 141,
            crop_y1: 8,
            crop_y2: 120,
            normalization_mean: 114.75,
            normalization_std: 57.375,
            smoothing_window: 5,
        }
    }
}

impl EngineConfig {
    /// Width and height of a prepared frame after the center crop.
    pub fn crop_size(&self) -> (u32, u32) {
        (
            self.crop_x2.saturating_sub(self.crop_x1),
            self.crop_y2.saturating_sub(self.crop_y1),
        )
    }
}

/// Stateless model pair: one session turning segments into feature vectors,
/// one session turning feature sequences into score sequences.
pub struct OnnxEngine {
    extraction: Mutex<Session>,
    detection: Mutex<Session>,
    config: EngineConfig,
}

impl OnnxEngine {
    pub fn load(config: EngineConfig) -> Result<Self, InferenceError> {
        let extraction = load_session(&config.extraction_model_path)?;
        let detection = load_session(&config.detection_model_path)?;
        info!(
            extraction = %config.extraction_model_path.display(),
            detection = %config.detection_model_path.display(),
            "loaded inference sessions"
        );
        Ok(Self {
            extraction: Mutex::new(extraction),
            detection: Mutex::new(detection),
            config,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Score an entire video file segment-by-segment, returning one smoothed
    /// score per full segment. Trailing frames short of a segment are dropped.
    pub fn score_video(&self, source: &mut dyn FrameSource) -> Result<Vec<f32>, InferenceError> {
        let mut features = Vec::new();

        while let Some(segment) = self.load_segment(source)? {
            features.push(self.extract_features(&segment)?);
        }

        if features.is_empty() {
            return Err(InferenceError::Shape(
                "video holds fewer frames than one segment".into(),
            ));
        }

        let scores = self.score_history(&features)?;
        Ok(smooth_scores(&scores, self.config.smoothing_window))
    }

    /// Read and preprocess the next full segment, or `None` at end of stream.
    fn load_segment(
        &self,
        source: &mut dyn FrameSource,
    ) -> Result<Option<Vec<PreparedFrame>>, InferenceError> {
        let mut segment = Vec::with_capacity(self.config.segment_length);
        while segment.len() < self.config.segment_length {
            match source.read_frame() {
                Ok(frame) => segment.push(self.preprocess_frame(&frame)?),
                Err(_) => return Ok(None),
            }
        }
        Ok(Some(segment))
    }
}

impl AnomalyEngine for OnnxEngine {
    fn preprocess_frame(&self, frame: &Frame) -> Result<PreparedFrame, InferenceError> {
        frame_preprocess(frame, &self.config)
    }

    fn extract_features(&self, segment: &[PreparedFrame]) -> Result<FeatureVector, InferenceError> {
        let length = self.config.segment_length;
        if segment.len() != length {
            return Err(InferenceError::Shape(format!(
                "segment holds {} frames, expected {length}",
                segment.len()
            )));
        }

        let (width, height) = self.config.crop_size();
        let (width, height) = (width as usize, height as usize);
        let mean = self.config.normalization_mean;
        let std = self.config.normalization_std;

        let mut input = Array5::<f32>::zeros((1, 3, length, height, width));
        for (t, frame) in segment.iter().enumerate() {
            if (frame.width as usize, frame.height as usize) != (width, height) {
                return Err(InferenceError::Shape(format!(
                    "prepared frame is {}x{}, expected {width}x{height}",
                    frame.width, frame.height
                )));
            }
            for y in 0..height {
                for x in 0..width {
                    let base = (y * width + x) * 3;
                    for c in 0..3 {
                        input[[0, c, t, y, x]] = (frame.data[base + c] as f32 - mean) / std;
                    }
                }
            }
        }

        let value = Value::from_array(input)
            .map_err(|e| InferenceError::Session(e.to_string()))?;
        run_session(&self.extraction, value)
    }

    fn score_history(&self, history: &[FeatureVector]) -> Result<Vec<f32>, InferenceError> {
        let steps = history.len();
        if steps == 0 {
            return Err(InferenceError::Shape("empty feature history".into()));
        }
        let dim = history[0].len();
        if dim == 0 || history.iter().any(|f| f.len() != dim) {
            return Err(InferenceError::Shape(
                "feature vectors are empty or unevenly sized".into(),
            ));
        }

        let mut flat = Vec::with_capacity(steps * dim);
        for feature in history {
            flat.extend_from_slice(feature);
        }
        let input = Array3::<f32>::from_shape_vec((1, steps, dim), flat)
            .map_err(|e| InferenceError::Shape(e.to_string()))?;

        let value = Value::from_array(input)
            .map_err(|e| InferenceError::Session(e.to_string()))?;
        let raw = run_session(&self.detection, value)?;
        if raw.len() < steps {
            return Err(InferenceError::Shape(format!(
                "scorer returned {} values for {steps} time steps",
                raw.len()
            )));
        }
        Ok(raw.into_iter().map(sigmoid).collect())
    }
}

fn load_session(path: &Path) -> Result<Session, InferenceError> {
    if !path.exists() {
        return Err(InferenceError::ModelNotFound {
            path: path.to_path_buf(),
        });
    }

    Session::builder()
        .and_then(|builder| builder.with_optimization_level(GraphOptimizationLevel::Level3))
        .and_then(|builder| builder.commit_from_file(path))
        .map_err(|e| InferenceError::ModelLoad {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
}

fn run_session(session: &Mutex<Session>, input: Value) -> Result<Vec<f32>, InferenceError> {
    let mut guard = session.lock().unwrap_or_else(|e| e.into_inner());

    let output_name = guard
        .outputs
        .first()
        .map(|o| o.name.clone())
        .ok_or_else(|| InferenceError::Session("model defines no outputs".into()))?;

    let outputs = guard
        .run(ort::inputs![input])
        .map_err(|e| InferenceError::Session(e.to_string()))?;

    let output = outputs
        .get(&output_name)
        .ok_or_else(|| InferenceError::Session(format!("missing output {output_name}")))?;

    let (_, data) = output
        .try_extract_tensor::<f32>()
        .map_err(|e| InferenceError::Session(e.to_string()))?;

    Ok(data.to_vec())
}
