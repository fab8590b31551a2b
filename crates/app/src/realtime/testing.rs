//! Stub sources and engines shared by the realtime module tests.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use std::time::Duration;

use inference_core::{AnomalyEngine, FeatureVector, InferenceError, PreparedFrame};
use video_ingest::{CaptureError, Frame, FrameFormat, FrameSource};

use crate::realtime::pipeline::StageIntervals;

pub(crate) fn intervals_ms(capture: u64, prepare: u64, predict: u64) -> StageIntervals {
    StageIntervals {
        capture: Duration::from_millis(capture),
        prepare: Duration::from_millis(prepare),
        predict: Duration::from_millis(predict),
    }
}

/// In-memory frame source producing uniform 4x4 BGR frames with a
/// monotonically increasing timestamp, counting close calls exactly once.
pub(crate) struct StubSource {
    closes: Arc<AtomicUsize>,
    closed: AtomicBool,
    next_timestamp: AtomicI64,
    fail_reads: bool,
}

impl StubSource {
    pub(crate) fn endless(closes: Arc<AtomicUsize>) -> Self {
        Self {
            closes,
            closed: AtomicBool::new(false),
            next_timestamp: AtomicI64::new(0),
            fail_reads: false,
        }
    }

    pub(crate) fn failing(closes: Arc<AtomicUsize>) -> Self {
        Self {
            closes,
            closed: AtomicBool::new(false),
            next_timestamp: AtomicI64::new(0),
            fail_reads: true,
        }
    }
}

impl FrameSource for StubSource {
    fn read_frame(&mut self) -> Result<Frame, CaptureError> {
        if self.fail_reads {
            return Err(CaptureError::Read {
                uri: "stub".into(),
            });
        }
        let timestamp_ms = self.next_timestamp.fetch_add(1, Ordering::Relaxed);
        Ok(Frame {
            data: vec![100; 4 * 4 * 3],
            width: 4,
            height: 4,
            timestamp_ms,
            format: FrameFormat::Bgr8,
        })
    }

    fn close(&mut self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.closes.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn descriptor(&self) -> &str {
        "stub"
    }
}

/// Engine stub: features encode the segment length, scores average the first
/// component of every feature in the history.
#[derive(Default)]
pub(crate) struct StubEngine;

impl AnomalyEngine for StubEngine {
    fn preprocess_frame(&self, frame: &Frame) -> Result<PreparedFrame, InferenceError> {
        Ok(PreparedFrame {
            data: frame.data.clone(),
            width: frame.width as u32,
            height: frame.height as u32,
        })
    }

    fn extract_features(&self, segment: &[PreparedFrame]) -> Result<FeatureVector, InferenceError> {
        Ok(vec![segment.len() as f32])
    }

    fn score_history(&self, history: &[FeatureVector]) -> Result<Vec<f32>, InferenceError> {
        if history.is_empty() {
            return Err(InferenceError::Shape("empty feature history".into()));
        }
        let sum: f32 = history.iter().map(|f| f.first().copied().unwrap_or(0.0)).sum();
        Ok(vec![sum / (history.len() as f32 * 100.0)])
    }
}
