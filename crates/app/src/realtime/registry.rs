//! Process-wide registry of live real-time sessions.
//!
//! The map is the single source of truth for which pipelines exist: removal
//! and teardown happen under the same write lock, so no observer can find a
//! stopped pipeline registered or a live one unregistered.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use inference_core::AnomalyEngine;
use serde::Deserialize;
use thiserror::Error;
use tracing::{info, warn};
use video_ingest::{CaptureError, FrameSource};

use crate::realtime::pipeline::{PipelineError, RealtimeSession, StageIntervals, WindowSizes};

/// Opens a frame source for a session descriptor.
pub type SourceOpener = dyn Fn(&str) -> Result<Box<dyn FrameSource>, CaptureError> + Send + Sync;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("session {0:?} is already registered")]
    AlreadyExists(String),
    #[error("session {0:?} is not registered")]
    NotFound(String),
    #[error(transparent)]
    Open(#[from] CaptureError),
    #[error(transparent)]
    Pipeline(#[from] PipelineError),
}

/// Persisted session record supplied by callers for `resync`.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRecord {
    pub session_id: String,
    pub source: String,
}

/// Result of a full-replace resynchronization.
pub struct ResyncOutcome {
    pub active: usize,
    pub failures: Vec<(String, RegistryError)>,
}

pub struct SessionRegistry {
    sessions: RwLock<HashMap<String, Arc<RealtimeSession>>>,
    engine: Arc<dyn AnomalyEngine>,
    intervals: StageIntervals,
    windows: WindowSizes,
    opener: Box<SourceOpener>,
}

impl SessionRegistry {
    pub fn new(
        engine: Arc<dyn AnomalyEngine>,
        intervals: StageIntervals,
        windows: WindowSizes,
        opener: Box<SourceOpener>,
    ) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            engine,
            intervals,
            windows,
            opener,
        }
    }

    /// Open and register a new pipeline under `session_id`.
    ///
    /// A duplicate identifier is rejected outright; replacing a running
    /// session must be an explicit delete followed by a create.
    pub fn create(
        &self,
        session_id: &str,
        source: &str,
    ) -> Result<Arc<RealtimeSession>, RegistryError> {
        let mut sessions = self.write_sessions();
        if sessions.contains_key(session_id) {
            return Err(RegistryError::AlreadyExists(session_id.to_string()));
        }

        let session = self.start_session(session_id, source)?;
        sessions.insert(session_id.to_string(), session.clone());
        metrics::gauge!("realtime_sessions_active").set(sessions.len() as f64);
        info!(session = session_id, source, "session created");
        Ok(session)
    }

    /// Read-only lookup.
    pub fn lookup(&self, session_id: &str) -> Option<Arc<RealtimeSession>> {
        self.read_sessions().get(session_id).cloned()
    }

    pub fn len(&self) -> usize {
        self.read_sessions().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read_sessions().is_empty()
    }

    /// Release and unregister the session as one operation.
    pub fn delete(&self, session_id: &str) -> Result<(), RegistryError> {
        let mut sessions = self.write_sessions();
        match sessions.remove(session_id) {
            Some(session) => {
                session.release();
                metrics::gauge!("realtime_sessions_active").set(sessions.len() as f64);
                info!(session = session_id, "session deleted");
                Ok(())
            }
            None => Err(RegistryError::NotFound(session_id.to_string())),
        }
    }

    /// Full-replace reconciliation against a persisted session list.
    ///
    /// Every currently registered pipeline is released and the registry is
    /// rebuilt from `records`. Entries that fail to start are skipped and
    /// reported; the rest of the rebuild proceeds. The write lock is held
    /// throughout, so no other operation can observe a partial rebuild.
    pub fn resync(&self, records: &[SessionRecord]) -> ResyncOutcome {
        let mut sessions = self.write_sessions();

        for (_, session) in sessions.drain() {
            session.release();
        }

        let mut failures = Vec::new();
        for record in records {
            if sessions.contains_key(&record.session_id) {
                failures.push((
                    record.session_id.clone(),
                    RegistryError::AlreadyExists(record.session_id.clone()),
                ));
                continue;
            }
            match self.start_session(&record.session_id, &record.source) {
                Ok(session) => {
                    sessions.insert(record.session_id.clone(), session);
                }
                Err(err) => {
                    warn!(
                        session = %record.session_id,
                        source = %record.source,
                        "resync entry skipped: {err}"
                    );
                    failures.push((record.session_id.clone(), err));
                }
            }
        }

        metrics::gauge!("realtime_sessions_active").set(sessions.len() as f64);
        info!(
            active = sessions.len(),
            skipped = failures.len(),
            "registry resynchronized"
        );
        ResyncOutcome {
            active: sessions.len(),
            failures,
        }
    }

    /// Release every session; used at process shutdown.
    pub fn shutdown(&self) {
        self.resync(&[]);
    }

    fn start_session(
        &self,
        session_id: &str,
        source: &str,
    ) -> Result<Arc<RealtimeSession>, RegistryError> {
        let handle = (self.opener)(source)?;
        let session = RealtimeSession::start(
            session_id,
            handle,
            self.engine.clone(),
            self.intervals,
            self.windows,
        )?;
        Ok(session)
    }

    fn read_sessions(&self) -> RwLockReadGuard<'_, HashMap<String, Arc<RealtimeSession>>> {
        self.sessions.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_sessions(&self) -> RwLockWriteGuard<'_, HashMap<String, Arc<RealtimeSession>>> {
        self.sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::realtime::pipeline::Lifecycle;
    use crate::realtime::testing::{StubEngine, StubSource, intervals_ms};
    use std::collections::HashMap as CloseCounters;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Fixture {
        registry: SessionRegistry,
        closes: Arc<Mutex<CloseCounters<String, Arc<AtomicUsize>>>>,
    }

    fn fixture() -> Fixture {
        let closes: Arc<Mutex<CloseCounters<String, Arc<AtomicUsize>>>> =
            Arc::new(Mutex::new(CloseCounters::new()));
        let opener_closes = closes.clone();

        let opener = Box::new(move |descriptor: &str| {
            if descriptor == "bad" {
                return Err(CaptureError::Open {
                    uri: descriptor.to_string(),
                });
            }
            let counter = opener_closes
                .lock()
                .unwrap()
                .entry(descriptor.to_string())
                .or_insert_with(|| Arc::new(AtomicUsize::new(0)))
                .clone();
            Ok(Box::new(StubSource::endless(counter)) as Box<dyn FrameSource>)
        });

        Fixture {
            registry: SessionRegistry::new(
                Arc::new(StubEngine::default()),
                intervals_ms(1, 1, 5),
                WindowSizes {
                    segment_length: 4,
                    history_length: 2,
                },
                opener,
            ),
            closes,
        }
    }

    fn close_count(fixture: &Fixture, descriptor: &str) -> usize {
        fixture
            .closes
            .lock()
            .unwrap()
            .get(descriptor)
            .map(|counter| counter.load(Ordering::SeqCst))
            .unwrap_or(0)
    }

    #[test]
    fn create_lookup_delete_round_trip() {
        let fixture = fixture();
        fixture.registry.create("s1", "cam-1").unwrap();

        let session = fixture.registry.lookup("s1").expect("registered");
        assert_eq!(session.lifecycle(), Lifecycle::Running);

        fixture.registry.delete("s1").unwrap();
        assert!(fixture.registry.lookup("s1").is_none());
        assert_eq!(close_count(&fixture, "cam-1"), 1);
    }

    #[test]
    fn duplicate_create_is_rejected() {
        let fixture = fixture();
        fixture.registry.create("s1", "cam-1").unwrap();

        let err = fixture.registry.create("s1", "cam-2").unwrap_err();
        assert!(matches!(err, RegistryError::AlreadyExists(_)));
        // The original pipeline is untouched and no second source was opened.
        assert_eq!(fixture.registry.len(), 1);
        assert!(!fixture.closes.lock().unwrap().contains_key("cam-2"));
    }

    #[test]
    fn delete_of_unknown_session_reports_not_found() {
        let fixture = fixture();
        let err = fixture.registry.delete("missing").unwrap_err();
        assert!(matches!(err, RegistryError::NotFound(_)));
    }

    #[test]
    fn failed_create_registers_nothing() {
        let fixture = fixture();
        assert!(fixture.registry.create("s1", "bad").is_err());
        assert!(fixture.registry.is_empty());
    }

    #[test]
    fn resync_replaces_the_full_set_and_releases_old_sessions() {
        let fixture = fixture();
        fixture.registry.create("old", "cam-old").unwrap();

        let outcome = fixture.registry.resync(&[]);
        assert_eq!(outcome.active, 0);
        assert_eq!(close_count(&fixture, "cam-old"), 1);

        let records = vec![
            SessionRecord {
                session_id: "a".into(),
                source: "cam-a".into(),
            },
            SessionRecord {
                session_id: "b".into(),
                source: "cam-b".into(),
            },
        ];
        let outcome = fixture.registry.resync(&records);
        assert_eq!(outcome.active, 2);
        assert!(outcome.failures.is_empty());
        assert!(fixture.registry.lookup("a").is_some());
        assert!(fixture.registry.lookup("b").is_some());
        assert_eq!(fixture.registry.len(), 2);
    }

    #[test]
    fn resync_skips_failing_entries_and_continues() {
        let fixture = fixture();
        let records = vec![
            SessionRecord {
                session_id: "good".into(),
                source: "cam-good".into(),
            },
            SessionRecord {
                session_id: "broken".into(),
                source: "bad".into(),
            },
            SessionRecord {
                session_id: "also-good".into(),
                source: "cam-also".into(),
            },
        ];

        let outcome = fixture.registry.resync(&records);
        assert_eq!(outcome.active, 2);
        assert_eq!(outcome.failures.len(), 1);
        assert_eq!(outcome.failures[0].0, "broken");
        assert!(fixture.registry.lookup("good").is_some());
        assert!(fixture.registry.lookup("also-good").is_some());
        assert!(fixture.registry.lookup("broken").is_none());
    }

    #[test]
    fn shutdown_releases_everything() {
        let fixture = fixture();
        fixture.registry.create("s1", "cam-1").unwrap();
        fixture.registry.create("s2", "cam-2").unwrap();

        fixture.registry.shutdown();
        assert!(fixture.registry.is_empty());
        assert_eq!(close_count(&fixture, "cam-1"), 1);
        assert_eq!(close_count(&fixture, "cam-2"), 1);
    }
}
