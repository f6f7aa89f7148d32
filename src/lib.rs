//! Featherfront - live bird-sound detection pipeline and overlay server.
//!
//! A capture child slices a live audio source into short wave segments; a
//! silence gate discards the quiet ones; classifier workers run an external
//! bird-sound classifier over the rest and persist detections, events, and
//! a per-species best-clip archive; an HTTP surface serves the results.

#![warn(missing_docs)]

pub mod audio;
pub mod auth;
pub mod capture;
pub mod classify;
pub mod clips;
pub mod config;
pub mod constants;
pub mod error;
pub mod paths;
pub mod pipeline;
pub mod segments;
pub mod server;
pub mod snapshot;
pub mod state;
pub mod store;
pub mod utils;

use std::path::PathBuf;
use std::sync::Arc;

use tracing::{info, warn};

use crate::pipeline::PipelineShared;
use crate::state::App;

pub use error::{Error, Result};

fn init_logging() {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    // Logs go to stderr; stdout stays clean for tooling.
    let _ = fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn project_root() -> PathBuf {
    std::env::args_os()
        .nth(1)
        .map(PathBuf::from)
        .or_else(|| std::env::var_os("FEATHERFRONT_ROOT").map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Main entry point: bring up the pipeline and serve until stopped.
pub fn run() -> Result<()> {
    init_logging();

    let root = project_root();
    info!("starting {} in {}", constants::APP_NAME, root.display());
    let app = App::open(&root)?;
    snapshot::ensure_latest_file(&app);

    {
        let app = Arc::clone(&app);
        if let Err(e) = ctrlc::set_handler(move || {
            info!("stop requested");
            app.request_stop();
        }) {
            warn!("failed to install signal handler: {e}");
        }
    }

    let capture_handle = {
        let app = Arc::clone(&app);
        std::thread::Builder::new()
            .name("capture".to_string())
            .spawn(move || capture::capture_loop(&app))?
    };
    let dispatcher_handle = {
        let app = Arc::clone(&app);
        let shared = PipelineShared::new();
        std::thread::Builder::new()
            .name("dispatcher".to_string())
            .spawn(move || pipeline::run_dispatcher(&app, &shared))?
    };

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    let serve_result = runtime.block_on(server::serve(Arc::clone(&app)));

    // The server only returns on shutdown (or bind failure); either way the
    // loops must wind down before we report.
    app.request_stop();
    let _ = capture_handle.join();
    let _ = dispatcher_handle.join();
    serve_result
}
