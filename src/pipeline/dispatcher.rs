//! Segment dispatcher: reconciles the segment directory with the worker
//! pools and keeps the pools themselves alive.

use std::path::PathBuf;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Instant, SystemTime};

use tracing::info;

use crate::constants::{
    ANALYSIS_WORKERS, DISPATCH_INTERVAL, DROP_LOG_INTERVAL, GATE_WORKERS, MAX_QUEUE_SEGMENTS,
    MAX_SEGMENT_AGE, WORKER_CHECK_INTERVAL,
};
use crate::pipeline::{PipelineShared, analyzer, gate};
use crate::segments::{is_file_ready, list_segment_files};
use crate::state::App;

fn spawn_gate_worker(
    app: &Arc<App>,
    shared: &Arc<PipelineShared>,
    worker_id: usize,
) -> JoinHandle<()> {
    let app = Arc::clone(app);
    let shared = Arc::clone(shared);
    std::thread::spawn(move || gate::gate_worker(&app, &shared, worker_id))
}

fn spawn_analysis_worker(
    app: &Arc<App>,
    shared: &Arc<PipelineShared>,
    worker_id: usize,
) -> JoinHandle<()> {
    let app = Arc::clone(app);
    let shared = Arc::clone(shared);
    std::thread::spawn(move || analyzer::analysis_worker(&app, &shared, worker_id))
}

/// Observable pipeline state; a change triggers one status event.
type StatusTuple = (usize, usize, usize, usize, usize, u64);

/// Run the dispatcher until a stop is requested.
///
/// Each tick evicts stale segments, enforces the queue cap, offers ready
/// untracked segments to the gate, restarts dead workers, and reports a
/// status event when the observable state changes.
pub fn run_dispatcher(app: &Arc<App>, shared: &Arc<PipelineShared>) {
    let mut gate_workers: Vec<JoinHandle<()>> = (1..=GATE_WORKERS)
        .map(|id| spawn_gate_worker(app, shared, id))
        .collect();
    let mut analysis_workers: Vec<JoinHandle<()>> = (1..=ANALYSIS_WORKERS)
        .map(|id| spawn_analysis_worker(app, shared, id))
        .collect();
    info!(
        "pipeline started: {GATE_WORKERS} gate worker(s), {ANALYSIS_WORKERS} analysis worker(s)"
    );

    let mut last_worker_check = Instant::now();
    let mut last_status_report: Option<Instant> = None;
    let mut last_status: Option<StatusTuple> = None;

    while !app.should_stop() {
        let now = SystemTime::now();
        let mut files = dispatch_tick_prune(app, shared, now);
        files.sort_by_key(|(_, mtime)| *mtime);

        if last_worker_check.elapsed() >= WORKER_CHECK_INTERVAL {
            for (index, handle) in gate_workers.iter_mut().enumerate() {
                if handle.is_finished() && !app.should_stop() {
                    app.store.log_event(
                        "error",
                        &format!("Gate worker {} stopped, restarting", index + 1),
                    );
                    *handle = spawn_gate_worker(app, shared, index + 1);
                }
            }
            for (index, handle) in analysis_workers.iter_mut().enumerate() {
                if handle.is_finished() && !app.should_stop() {
                    app.store.log_event(
                        "error",
                        &format!("Analysis worker {} stopped, restarting", index + 1),
                    );
                    *handle = spawn_analysis_worker(app, shared, index + 1);
                }
            }
            last_worker_check = Instant::now();
        }

        enforce_queue_cap(app, shared, &mut files);

        report_status(
            app,
            shared,
            &files,
            now,
            &mut last_status,
            &mut last_status_report,
        );

        for (path, _) in &files {
            if app.should_stop() {
                break;
            }
            if !is_file_ready(path) {
                continue;
            }
            let mut inflight = shared.inflight();
            if inflight.gate.contains(path) || inflight.analysis.contains(path) {
                continue;
            }
            inflight.gate.insert(path.clone());
            drop(inflight);
            if shared.gate_tx.send(path.clone()).is_err() {
                return;
            }
        }

        std::thread::sleep(DISPATCH_INTERVAL);
    }

    for handle in gate_workers.into_iter().chain(analysis_workers) {
        let _ = handle.join();
    }
}

/// Delete over-age segments that no worker owns; return the survivors.
fn dispatch_tick_prune(
    app: &Arc<App>,
    shared: &Arc<PipelineShared>,
    now: SystemTime,
) -> Vec<(PathBuf, SystemTime)> {
    let mut kept = Vec::new();
    for (path, mtime) in list_segment_files(&app.paths.tmp_dir) {
        let over_age = now
            .duration_since(mtime)
            .is_ok_and(|age| age > MAX_SEGMENT_AGE);
        if over_age {
            {
                let inflight = shared.inflight();
                if inflight.gate.contains(&path) || inflight.analysis.contains(&path) {
                    kept.push((path, mtime));
                    continue;
                }
            }
            let _ = std::fs::remove_file(&path);
            let mut drop_log = shared.drop_log();
            let should_log = drop_log
                .stale
                .is_none_or(|last| last.elapsed() > DROP_LOG_INTERVAL);
            if should_log {
                drop_log.stale = Some(Instant::now());
                drop(drop_log);
                app.store.log_event(
                    "analysis",
                    &format!(
                        "Dropped stale segment (> {}s old)",
                        MAX_SEGMENT_AGE.as_secs()
                    ),
                );
            }
            continue;
        }
        kept.push((path, mtime));
    }
    kept
}

/// Evict the oldest non-in-flight files beyond the queue cap.
fn enforce_queue_cap(
    app: &Arc<App>,
    shared: &Arc<PipelineShared>,
    files: &mut Vec<(PathBuf, SystemTime)>,
) {
    if files.len() <= MAX_QUEUE_SEGMENTS {
        return;
    }
    let excess = files.len() - MAX_QUEUE_SEGMENTS;
    let mut dropped = 0usize;
    for (path, _) in files.iter() {
        if dropped >= excess {
            break;
        }
        {
            let inflight = shared.inflight();
            if inflight.gate.contains(path) || inflight.analysis.contains(path) {
                continue;
            }
        }
        if std::fs::remove_file(path).is_ok() {
            dropped += 1;
        }
    }
    if dropped > 0 {
        app.store.log_event(
            "analysis",
            &format!("Dropped {dropped} queued segments to cap queue at {MAX_QUEUE_SEGMENTS}"),
        );
        files.retain(|(path, _)| path.exists());
    }
}

/// Emit one status event when the observable tuple changes, at most every
/// worker-check interval.
fn report_status(
    app: &Arc<App>,
    shared: &Arc<PipelineShared>,
    files: &[(PathBuf, SystemTime)],
    now: SystemTime,
    last_status: &mut Option<StatusTuple>,
    last_report: &mut Option<Instant>,
) {
    let (gate_pending, active_count) = {
        let inflight = shared.inflight();
        (inflight.gate.len(), inflight.analysis.len())
    };
    let gate_queue = shared.gate_rx.len();
    let analysis_queue = shared.analysis_rx.len();
    let oldest_age = files
        .first()
        .and_then(|(_, mtime)| now.duration_since(*mtime).ok())
        .map_or(0, |age| age.as_secs());
    let status: StatusTuple = (
        files.len(),
        gate_pending,
        gate_queue,
        analysis_queue,
        active_count,
        oldest_age,
    );
    if Some(status) == *last_status {
        return;
    }
    let due = last_report.is_none_or(|previous| previous.elapsed() >= WORKER_CHECK_INTERVAL);
    if !due {
        return;
    }
    app.store.log_event(
        "analysis",
        &format!(
            "Status: tmp {}, gate {}, analysis {}, active {}, oldest {}s",
            files.len(),
            gate_pending + gate_queue,
            analysis_queue,
            active_count,
            oldest_age
        ),
    );
    *last_report = Some(Instant::now());
    *last_status = Some(status);
}
