//! Batch (non-real-time) video analysis.
//!
//! A batch job stores the uploaded source file, extracts a cover image,
//! scores the whole video, renders the annotated result video, and hands the
//! source file to the cleanup queue. Result artifacts are only ever deleted
//! through that same queue.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use inference_core::{OnnxEngine, expand_scores};
use tracing::info;
use video_ingest::{FrameSource, VideoSink, open_source};

use crate::annotation;
use crate::config::{AnnotationConfig, ServerConfig};
use crate::realtime::CleanupQueue;

/// On-disk layout of one batch job's artifacts.
pub struct ArtifactPaths {
    pub source: PathBuf,
    pub video: PathBuf,
    pub cover: PathBuf,
}

impl ArtifactPaths {
    pub fn for_video(config: &ServerConfig, video_id: &str) -> Self {
        Self {
            source: config.videos_dir.join(format!("source.{video_id}.mp4")),
            video: config.videos_dir.join(format!("result.{video_id}.mp4")),
            cover: config.covers_dir.join(format!("result.{video_id}.jpg")),
        }
    }
}

/// Run one batch job over an uploaded payload, returning the per-segment
/// smoothed scores.
pub fn run_video_job(
    engine: &OnnxEngine,
    server: &ServerConfig,
    annotation: &AnnotationConfig,
    cleanup: &CleanupQueue,
    video_id: &str,
    payload: &[u8],
) -> Result<Vec<f32>> {
    let paths = ArtifactPaths::for_video(server, video_id);
    fs::create_dir_all(&server.videos_dir)
        .with_context(|| format!("failed to create {}", server.videos_dir.display()))?;
    fs::create_dir_all(&server.covers_dir)
        .with_context(|| format!("failed to create {}", server.covers_dir.display()))?;
    fs::write(&paths.source, payload)
        .with_context(|| format!("failed to store upload at {}", paths.source.display()))?;

    let result = analyze_stored_video(engine, server, annotation, &paths);

    // The source upload is disposable whether or not scoring succeeded.
    cleanup.enqueue(&paths.source);

    let scores = result?;
    info!(
        video = video_id,
        segments = scores.len(),
        "batch video scored"
    );
    Ok(scores)
}

fn analyze_stored_video(
    engine: &OnnxEngine,
    server: &ServerConfig,
    annotation: &AnnotationConfig,
    paths: &ArtifactPaths,
) -> Result<Vec<f32>> {
    let source_str = path_str(&paths.source)?;

    save_video_cover(&paths.source, &paths.cover, (server.cover_width, server.cover_height))?;

    let mut reader = open_source(source_str, (server.video_width, server.video_height))
        .with_context(|| "failed to reopen stored upload for scoring")?;
    let scores = engine
        .score_video(reader.as_mut())
        .map_err(|err| anyhow!("video scoring failed: {err}"))?;
    reader.close();

    render_result_video(server, annotation, paths, &scores, engine.config().segment_length)?;
    Ok(scores)
}

/// Grab the first frame of the source and store it as the cover image.
pub fn save_video_cover(source: &Path, cover: &Path, cover_size: (i32, i32)) -> Result<()> {
    let mut reader = open_source(path_str(source)?, cover_size)
        .with_context(|| "failed to open source for cover extraction")?;
    let frame = reader
        .read_frame()
        .with_context(|| "source yielded no cover frame")?;
    reader.close();

    let jpeg = annotation::encode_jpeg(&frame, 90)?;
    fs::write(cover, jpeg)
        .with_context(|| format!("failed to write cover {}", cover.display()))?;
    Ok(())
}

/// Re-read the source and write the annotated result video, one frame per
/// expanded score.
fn render_result_video(
    server: &ServerConfig,
    annotation_config: &AnnotationConfig,
    paths: &ArtifactPaths,
    scores: &[f32],
    segment_length: usize,
) -> Result<()> {
    let frame_size = (server.video_width, server.video_height);
    let mut reader = open_source(path_str(&paths.source)?, frame_size)
        .with_context(|| "failed to reopen stored upload for rendering")?;
    let mut sink = VideoSink::create(path_str(&paths.video)?, server.video_speed, frame_size)
        .with_context(|| format!("failed to create result video {}", paths.video.display()))?;

    for score in expand_scores(scores, segment_length) {
        match reader.read_frame() {
            Ok(mut frame) => {
                annotation::annotate_frame(&mut frame, score, annotation_config);
                sink.write_frame(&frame)
                    .with_context(|| "failed to append result frame")?;
            }
            // Scores were expanded from full segments; a short read only
            // drops the trailing partial segment.
            Err(_) => break,
        }
    }

    sink.close();
    reader.close();
    Ok(())
}

fn path_str(path: &Path) -> Result<&str> {
    path.to_str()
        .ok_or_else(|| anyhow!("artifact path {} is not valid UTF-8", path.display()))
}
