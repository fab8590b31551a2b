//! TOML configuration for the service.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use inference_core::EngineConfig;
use serde::Deserialize;

use crate::realtime::{StageIntervals, WindowSizes};

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub pipeline: PipelineConfig,
    pub engine: EngineConfig,
    pub annotation: AnnotationConfig,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct ServerConfig {
    pub listen_addr: String,
    /// Cadence, in seconds, at which the MJPEG publisher polls a session.
    pub frames_interval: f64,
    /// Cadence, in seconds, of the artifact cleanup worker.
    pub remove_interval: f64,
    pub capture_width: i32,
    pub capture_height: i32,
    pub video_speed: f64,
    pub video_width: i32,
    pub video_height: i32,
    pub cover_width: i32,
    pub cover_height: i32,
    pub videos_dir: PathBuf,
    pub covers_dir: PathBuf,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:8080".into(),
            frames_interval: 0.04,
            remove_interval: 30.0,
            capture_width: 640,
            capture_height: 480,
            video_speed: 30.0,
            video_width: 640,
            video_height: 480,
            cover_width: 320,
            cover_height: 180,
            videos_dir: PathBuf::from("storage/videos"),
            covers_dir: PathBuf::from("storage/covers"),
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct PipelineConfig {
    pub capture_interval: f64,
    pub prepare_interval: f64,
    pub predict_interval: f64,
    pub history_length: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            capture_interval: 0.1,
            prepare_interval: 0.1,
            predict_interval: 1.0,
            history_length: 4,
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct AnnotationConfig {
    pub anomaly_threshold: f32,
    pub anomaly_prompt: String,
    pub anomaly_border: u32,
    pub jpeg_quality: u8,
}

impl Default for AnnotationConfig {
    fn default() -> Self {
        Self {
            anomaly_threshold: 0.5,
            anomaly_prompt: "ANOMALY".into(),
            anomaly_border: 8,
            jpeg_quality: 85,
        }
    }
}

impl AppConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        toml::from_str(&raw)
            .with_context(|| format!("failed to parse config file {}", path.display()))
    }

    pub fn intervals(&self) -> StageIntervals {
        StageIntervals {
            capture: seconds(self.pipeline.capture_interval),
            prepare: seconds(self.pipeline.prepare_interval),
            predict: seconds(self.pipeline.predict_interval),
        }
    }

    pub fn windows(&self) -> WindowSizes {
        WindowSizes {
            segment_length: self.engine.segment_length,
            history_length: self.pipeline.history_length,
        }
    }

    pub fn frames_interval(&self) -> Duration {
        seconds(self.server.frames_interval)
    }

    pub fn remove_interval(&self) -> Duration {
        seconds(self.server.remove_interval)
    }
}

fn seconds(value: f64) -> Duration {
    Duration::from_secs_f64(value.max(0.0))
}
