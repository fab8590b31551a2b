//! Real-time anomaly detection engine.
//!
//! The module is split into focused submodules:
//! - `pipeline`: the per-session capture → windowing → inference stage loops.
//! - `registry`: lifecycle of many pipelines keyed by session identifier.
//! - `cleanup`: deferred deletion of batch artifacts.
//! - `window`: the fixed-capacity sliding window the pipeline stages share.
//! - `timing`: fixed-rate scheduling used by stages and the cleanup worker.
//! - `data`: shared state passed between stages and external readers.

pub use cleanup::{CleanupQueue, CleanupWorker, DrainOutcome, spawn_cleanup_worker};
pub use data::ScoredFrame;
pub use pipeline::{Lifecycle, PipelineError, RealtimeSession, StageIntervals, WindowSizes};
pub use registry::{
    RegistryError, ResyncOutcome, SessionRecord, SessionRegistry, SourceOpener,
};

mod cleanup;
mod data;
mod pipeline;
mod registry;
mod timing;
mod window;

#[cfg(test)]
pub(crate) mod testing;
