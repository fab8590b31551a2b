//! Per-session real-time pipeline: capture → windowing → inference.
//!
//! Each stage runs on its own thread at its own cadence and communicates only
//! through mutex-guarded slots: the shared current frame / score pair, the
//! segment window, and the feature window. Stages never block each other
//! beyond those short critical sections, so a slow scorer degrades score
//! freshness without stalling capture.

use std::sync::{
    Arc, Mutex, TryLockError,
    atomic::{AtomicBool, AtomicU8, AtomicU64, Ordering},
};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use inference_core::{AnomalyEngine, FeatureVector, PreparedFrame};
use thiserror::Error;
use tracing::{debug, warn};
use video_ingest::{CaptureError, FrameSource};

use crate::realtime::data::{PublishedResult, ScoredFrame, SharedResult};
use crate::realtime::timing::run_at_interval;
use crate::realtime::window::SlidingWindow;
use crate::telemetry;

/// Bounded wait for stage threads during release; stragglers are abandoned.
const RELEASE_JOIN_TIMEOUT: Duration = Duration::from_secs(5);

const LIFECYCLE_RUNNING: u8 = 0;
const LIFECYCLE_STOPPING: u8 = 1;
const LIFECYCLE_STOPPED: u8 = 2;

/// Stage cadences for one pipeline.
#[derive(Clone, Copy, Debug)]
pub struct StageIntervals {
    pub capture: Duration,
    pub prepare: Duration,
    pub predict: Duration,
}

/// Capacities of the segment and feature windows.
#[derive(Clone, Copy, Debug)]
pub struct WindowSizes {
    pub segment_length: usize,
    pub history_length: usize,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Lifecycle {
    Running,
    Stopping,
    Stopped,
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("source yielded no first frame")]
    FirstFrame(#[source] CaptureError),
    #[error("failed to spawn stage thread")]
    Spawn(#[source] std::io::Error),
}

/// One live real-time session: an owned frame source, three stage threads,
/// and the published (frame, score) pair external readers poll.
pub struct RealtimeSession {
    session_id: String,
    published: SharedResult,
    segment_window: Arc<Mutex<SlidingWindow<PreparedFrame>>>,
    feature_window: Arc<Mutex<SlidingWindow<FeatureVector>>>,
    source: Arc<Mutex<Box<dyn FrameSource>>>,
    running: Arc<AtomicBool>,
    state: AtomicU8,
    workers: Mutex<Vec<JoinHandle<()>>>,
    read_failures: Arc<AtomicU64>,
}

impl RealtimeSession {
    /// Start the three stage threads over an already-opened source.
    ///
    /// The source must yield a first frame before any thread is spawned;
    /// every failure path closes the source, so a failed start never leaves a
    /// partially-live pipeline behind.
    pub fn start(
        session_id: &str,
        mut source: Box<dyn FrameSource>,
        engine: Arc<dyn AnomalyEngine>,
        intervals: StageIntervals,
        windows: WindowSizes,
    ) -> Result<Arc<Self>, PipelineError> {
        let first_frame = match source.read_frame() {
            Ok(frame) => frame,
            Err(err) => {
                source.close();
                return Err(PipelineError::FirstFrame(err));
            }
        };

        let session = Arc::new(Self {
            session_id: session_id.to_string(),
            published: Arc::new(Mutex::new(PublishedResult {
                frame: Some(first_frame),
                score: None,
            })),
            segment_window: Arc::new(Mutex::new(SlidingWindow::new(windows.segment_length))),
            feature_window: Arc::new(Mutex::new(SlidingWindow::new(windows.history_length))),
            source: Arc::new(Mutex::new(source)),
            running: Arc::new(AtomicBool::new(true)),
            state: AtomicU8::new(LIFECYCLE_RUNNING),
            workers: Mutex::new(Vec::with_capacity(3)),
            read_failures: Arc::new(AtomicU64::new(0)),
        });

        if let Err(err) = session.spawn_stages(engine, intervals) {
            session.release();
            return Err(err);
        }

        Ok(session)
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn lifecycle(&self) -> Lifecycle {
        match self.state.load(Ordering::SeqCst) {
            LIFECYCLE_RUNNING => Lifecycle::Running,
            LIFECYCLE_STOPPING => Lifecycle::Stopping,
            _ => Lifecycle::Stopped,
        }
    }

    /// Non-blocking read of the published pair; `None` until both the first
    /// frame and the first score have arrived.
    pub fn result(&self) -> Option<ScoredFrame> {
        let slot = match self.published.lock() {
            Ok(guard) => guard,
            Err(_) => return None,
        };
        match (&slot.frame, slot.score) {
            (Some(frame), Some(score)) => Some(ScoredFrame {
                frame: frame.clone(),
                score,
            }),
            _ => None,
        }
    }

    /// Stop all stages, join them within a bounded window, and close the
    /// frame source. Idempotent and safe to call concurrently.
    pub fn release(&self) {
        let mut workers = self.workers.lock().unwrap_or_else(|e| e.into_inner());
        if self.state.load(Ordering::SeqCst) == LIFECYCLE_STOPPED {
            return;
        }

        self.state.store(LIFECYCLE_STOPPING, Ordering::SeqCst);
        self.running.store(false, Ordering::SeqCst);

        let deadline = Instant::now() + RELEASE_JOIN_TIMEOUT;
        for handle in workers.drain(..) {
            while !handle.is_finished() && Instant::now() < deadline {
                std::thread::sleep(Duration::from_millis(10));
            }
            if handle.is_finished() {
                let _ = handle.join();
            } else {
                warn!(
                    session = %self.session_id,
                    "stage thread did not exit within the release window; abandoning"
                );
            }
        }

        match self.source.try_lock() {
            Ok(mut source) => source.close(),
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner().close(),
            Err(TryLockError::WouldBlock) => {
                // An abandoned capture thread still holds the handle; it
                // closes on drop once that thread dies.
                warn!(
                    session = %self.session_id,
                    "frame source still held by an abandoned stage; deferring close"
                );
            }
        }

        self.state.store(LIFECYCLE_STOPPED, Ordering::SeqCst);
        debug!(session = %self.session_id, "pipeline released");
    }

    fn spawn_stages(
        self: &Arc<Self>,
        engine: Arc<dyn AnomalyEngine>,
        intervals: StageIntervals,
    ) -> Result<(), PipelineError> {
        let stages: [(&str, Duration, Box<dyn FnMut() + Send>); 3] = [
            (
                "capture",
                intervals.capture,
                Box::new(self.capture_body()),
            ),
            (
                "prepare",
                intervals.prepare,
                Box::new(self.prepare_body(engine.clone())),
            ),
            (
                "predict",
                intervals.predict,
                Box::new(self.predict_body(engine)),
            ),
        ];

        for (name, period, mut body) in stages {
            let running = self.running.clone();
            let thread_name = format!("{name}-{}", self.session_id);
            let handle = telemetry::spawn_thread(thread_name, move || {
                run_at_interval(&running, period, &mut *body);
            })
            .map_err(PipelineError::Spawn)?;

            self.workers
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .push(handle);
        }

        Ok(())
    }

    /// Read one frame and replace the shared current-frame slot. Read errors
    /// are counted and logged; the stage keeps polling so a transient fault
    /// or end-of-file never kills the loop.
    fn capture_body(&self) -> impl FnMut() + Send + 'static {
        let session_id = self.session_id.clone();
        let source = self.source.clone();
        let published = self.published.clone();
        let failures = self.read_failures.clone();

        move || {
            let started = Instant::now();
            let read = match source.lock() {
                Ok(mut guard) => guard.read_frame(),
                Err(_) => return,
            };

            match read {
                Ok(frame) => {
                    if let Ok(mut slot) = published.lock() {
                        slot.frame = Some(frame);
                    }
                    failures.store(0, Ordering::Relaxed);
                    metrics::counter!("realtime_frames_captured_total").increment(1);
                }
                Err(err) => {
                    let failed = failures.fetch_add(1, Ordering::Relaxed) + 1;
                    metrics::counter!("realtime_capture_failures_total").increment(1);
                    if failed == 1 || failed % 100 == 0 {
                        debug!(
                            session = %session_id,
                            consecutive = failed,
                            "frame read failed: {err}"
                        );
                    }
                }
            }

            metrics::histogram!("realtime_stage_seconds", "stage" => "capture")
                .record(started.elapsed().as_secs_f64());
        }
    }

    /// Preprocess the most recent frame into the segment window. The current
    /// frame may repeat or skip relative to the true capture sequence; the
    /// window trades completeness for bounded latency.
    fn prepare_body(&self, engine: Arc<dyn AnomalyEngine>) -> impl FnMut() + Send + 'static {
        let session_id = self.session_id.clone();
        let published = self.published.clone();
        let segment_window = self.segment_window.clone();

        move || {
            let started = Instant::now();
            let frame = match published.lock() {
                Ok(slot) => slot.frame.clone(),
                Err(_) => None,
            };

            if let Some(frame) = frame {
                match engine.preprocess_frame(&frame) {
                    Ok(prepared) => {
                        if let Ok(mut window) = segment_window.lock() {
                            window.push(prepared);
                        }
                    }
                    Err(err) => {
                        metrics::counter!("realtime_prepare_failures_total").increment(1);
                        warn!(session = %session_id, "frame preprocessing failed: {err}");
                    }
                }
            }

            metrics::histogram!("realtime_stage_seconds", "stage" => "prepare")
                .record(started.elapsed().as_secs_f64());
        }
    }

    /// When the segment window is full, take it as one segment, extract its
    /// feature vector, and rescore the whole feature history. An inference
    /// failure skips this tick's score update; the next full segment retries.
    fn predict_body(&self, engine: Arc<dyn AnomalyEngine>) -> impl FnMut() + Send + 'static {
        let session_id = self.session_id.clone();
        let published = self.published.clone();
        let segment_window = self.segment_window.clone();
        let feature_window = self.feature_window.clone();

        move || {
            let started = Instant::now();
            let segment = match segment_window.lock() {
                Ok(mut window) => window.take_full(),
                Err(_) => None,
            };
            let Some(segment) = segment else {
                return;
            };

            let features = match engine.extract_features(&segment) {
                Ok(features) => features,
                Err(err) => {
                    metrics::counter!("realtime_inference_failures_total").increment(1);
                    warn!(session = %session_id, "feature extraction failed: {err}");
                    return;
                }
            };

            let history = match feature_window.lock() {
                Ok(mut window) => {
                    window.push(features);
                    window.snapshot()
                }
                Err(_) => return,
            };

            match engine.score_history(&history) {
                Ok(scores) => {
                    if let Some(score) = scores.last().copied() {
                        if let Ok(mut slot) = published.lock() {
                            slot.score = Some(score);
                        }
                        metrics::histogram!("realtime_scores").record(score as f64);
                    }
                }
                Err(err) => {
                    metrics::counter!("realtime_inference_failures_total").increment(1);
                    warn!(session = %session_id, "scoring failed: {err}");
                }
            }

            metrics::histogram!("realtime_stage_seconds", "stage" => "predict")
                .record(started.elapsed().as_secs_f64());
        }
    }
}

impl Drop for RealtimeSession {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::realtime::testing::{StubEngine, StubSource, intervals_ms};
    use std::sync::atomic::AtomicUsize;
    use std::thread;

    fn windows(segment: usize, history: usize) -> WindowSizes {
        WindowSizes {
            segment_length: segment,
            history_length: history,
        }
    }

    #[test]
    fn construction_fails_when_no_first_frame_and_closes_the_source() {
        let closes = Arc::new(AtomicUsize::new(0));
        let source = StubSource::failing(closes.clone());

        let result = RealtimeSession::start(
            "s-broken",
            Box::new(source),
            Arc::new(StubEngine::default()),
            intervals_ms(1, 1, 5),
            windows(4, 2),
        );

        assert!(matches!(result, Err(PipelineError::FirstFrame(_))));
        assert_eq!(closes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn windows_stay_bounded_and_a_score_is_published() {
        let closes = Arc::new(AtomicUsize::new(0));
        let session = RealtimeSession::start(
            "s-scenario",
            Box::new(StubSource::endless(closes.clone())),
            Arc::new(StubEngine::default()),
            intervals_ms(1, 1, 5),
            windows(16, 4),
        )
        .unwrap();

        // Enough time for well over five full segments at the prepare rate.
        thread::sleep(Duration::from_millis(800));

        let segment_len = session
            .segment_window
            .lock()
            .map(|w| w.len())
            .unwrap_or(usize::MAX);
        let feature_len = session
            .feature_window
            .lock()
            .map(|w| w.len())
            .unwrap_or(usize::MAX);
        assert!(segment_len <= 16);
        assert_eq!(feature_len, 4);
        assert!(session.result().is_some());

        session.release();
        assert_eq!(closes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn result_is_not_ready_before_the_first_score() {
        let closes = Arc::new(AtomicUsize::new(0));
        let session = RealtimeSession::start(
            "s-cold",
            Box::new(StubSource::endless(closes.clone())),
            Arc::new(StubEngine::default()),
            intervals_ms(1, 1, 60_000),
            windows(4, 2),
        )
        .unwrap();

        assert!(session.result().is_none());
        session.release();
    }

    #[test]
    fn release_is_idempotent_and_closes_exactly_once() {
        let closes = Arc::new(AtomicUsize::new(0));
        let session = RealtimeSession::start(
            "s-release",
            Box::new(StubSource::endless(closes.clone())),
            Arc::new(StubEngine::default()),
            intervals_ms(1, 1, 5),
            windows(4, 2),
        )
        .unwrap();

        session.release();
        session.release();

        assert_eq!(session.lifecycle(), Lifecycle::Stopped);
        assert_eq!(closes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn published_pair_freezes_after_release() {
        let closes = Arc::new(AtomicUsize::new(0));
        let session = RealtimeSession::start(
            "s-quiesce",
            Box::new(StubSource::endless(closes.clone())),
            Arc::new(StubEngine::default()),
            intervals_ms(1, 1, 5),
            windows(4, 2),
        )
        .unwrap();

        thread::sleep(Duration::from_millis(100));
        session.release();

        let before = session
            .published
            .lock()
            .map(|slot| (slot.frame.as_ref().map(|f| f.timestamp_ms), slot.score))
            .unwrap();
        thread::sleep(Duration::from_millis(100));
        let after = session
            .published
            .lock()
            .map(|slot| (slot.frame.as_ref().map(|f| f.timestamp_ms), slot.score))
            .unwrap();

        assert_eq!(before, after);
    }

    #[test]
    fn readers_never_observe_a_torn_pair() {
        let closes = Arc::new(AtomicUsize::new(0));
        let session = RealtimeSession::start(
            "s-readers",
            Box::new(StubSource::endless(closes.clone())),
            Arc::new(StubEngine::default()),
            intervals_ms(1, 1, 2),
            windows(2, 2),
        )
        .unwrap();

        let mut readers = Vec::new();
        for _ in 0..4 {
            let reader_session = session.clone();
            readers.push(thread::spawn(move || {
                let deadline = Instant::now() + Duration::from_millis(300);
                while Instant::now() < deadline {
                    if let Some(scored) = reader_session.result() {
                        // The stub scores encode the segment frame count; a
                        // torn read would surface an impossible value.
                        assert!(scored.score.is_finite());
                        assert!(!scored.frame.data.is_empty());
                    }
                }
            }));
        }
        for reader in readers {
            reader.join().unwrap();
        }

        session.release();
    }
}
