//! The two-stage concurrent segment pipeline.
//!
//! The dispatcher reconciles the segment directory with the in-flight
//! sets and feeds the silence gate; the gate filters near-silent segments
//! and feeds the classifier workers. Queues are unbounded channels; the
//! real backpressure rings are the analysis backlog cap, the queue cap,
//! and the segment age cap.

mod analyzer;
mod dispatcher;
mod gate;

pub use analyzer::analyze_segment;
pub use dispatcher::run_dispatcher;

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use crossbeam_channel::{Receiver, Sender, unbounded};

/// Segments currently owned by a worker, both stages behind one lock.
#[derive(Debug, Default)]
pub struct Inflight {
    /// Segments queued for or being handled by the silence gate.
    pub gate: HashSet<PathBuf>,
    /// Segments queued for or being handled by a classifier worker.
    pub analysis: HashSet<PathBuf>,
}

/// Rate-limit cells for repeated drop events.
#[derive(Debug, Default)]
pub struct DropLog {
    /// Last "dropped due to backlog" event.
    pub backlog: Option<Instant>,
    /// Last "dropped stale segment" event.
    pub stale: Option<Instant>,
}

/// Queues and tracking state shared by the dispatcher and both pools.
pub struct PipelineShared {
    pub(crate) gate_tx: Sender<PathBuf>,
    pub(crate) gate_rx: Receiver<PathBuf>,
    pub(crate) analysis_tx: Sender<PathBuf>,
    pub(crate) analysis_rx: Receiver<PathBuf>,
    pub(crate) inflight: Mutex<Inflight>,
    pub(crate) drop_log: Mutex<DropLog>,
}

impl PipelineShared {
    /// Fresh pipeline plumbing.
    #[must_use]
    pub fn new() -> Arc<Self> {
        let (gate_tx, gate_rx) = unbounded();
        let (analysis_tx, analysis_rx) = unbounded();
        Arc::new(Self {
            gate_tx,
            gate_rx,
            analysis_tx,
            analysis_rx,
            inflight: Mutex::new(Inflight::default()),
            drop_log: Mutex::new(DropLog::default()),
        })
    }

    pub(crate) fn inflight(&self) -> MutexGuard<'_, Inflight> {
        self.inflight.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn drop_log(&self) -> MutexGuard<'_, DropLog> {
        self.drop_log.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Classifier backlog: queued plus in flight.
    #[must_use]
    pub fn analysis_backlog(&self) -> usize {
        self.analysis_rx.len() + self.inflight().analysis.len()
    }
}
