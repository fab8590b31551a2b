//! Shared state between a pipeline's stages and its external readers.

use std::sync::{Arc, Mutex};

use video_ingest::Frame;

/// Latest (frame, score) pair published by a pipeline.
///
/// Either component may lag the other: the frame appears before the first
/// score, and both update independently afterwards. Readers treat a missing
/// component as "not ready".
#[derive(Default)]
pub(crate) struct PublishedResult {
    pub(crate) frame: Option<Frame>,
    pub(crate) score: Option<f32>,
}

pub(crate) type SharedResult = Arc<Mutex<PublishedResult>>;

/// Snapshot handed to readers once both components exist.
#[derive(Clone)]
pub struct ScoredFrame {
    pub frame: Frame,
    pub score: f32,
}
