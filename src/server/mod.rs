//! HTTP surface over the pipeline state.

mod activity;
mod auth;
mod export;
mod routes;

pub use activity::build_activity_curve;
pub use auth::{is_authorized, requires_auth};
pub use export::build_log_csv;

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::http::{HeaderValue, header};
use axum::middleware;
use axum::response::Response;
use axum::routing::{get, post};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::error::{Error, Result};
use crate::state::App;

/// Every response is uncacheable; clients poll.
async fn no_store(request: axum::extract::Request, next: middleware::Next) -> Response {
    let mut response = next.run(request).await;
    response.headers_mut().insert(
        header::CACHE_CONTROL,
        HeaderValue::from_static("no-store, max-age=0"),
    );
    response
}

/// Build the API router.
#[must_use]
pub fn build_router(app: Arc<App>) -> Router {
    Router::new()
        .route("/api/status", get(routes::get_status))
        .route(
            "/api/settings",
            get(routes::get_settings).post(routes::post_settings),
        )
        .route("/api/inputs", get(routes::get_inputs))
        .route("/api/queue", get(routes::get_queue))
        .route("/api/log", get(routes::get_log))
        .route("/api/log/summary", get(routes::get_log_summary))
        .route("/api/log/activity", get(routes::get_log_activity))
        .route("/api/log/csv", get(routes::get_log_csv))
        .route("/api/log/add", post(routes::post_log_add))
        .route("/api/log/delete", post(routes::post_log_delete))
        .route("/api/events", get(routes::get_events))
        .route("/api/clip", get(routes::get_clip))
        .route("/api/restart", post(routes::post_restart))
        .route("/api/restart/server", post(routes::post_restart_server))
        .layer(middleware::from_fn_with_state(
            Arc::clone(&app),
            auth::require_auth,
        ))
        .layer(middleware::from_fn(no_store))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(app)
}

/// Serve the API until the process stop flag is raised.
pub async fn serve(app: Arc<App>) -> Result<()> {
    let port = app.config.snapshot().http_port;
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port))
        .await
        .map_err(|source| Error::HttpBind { port, source })?;
    info!("HTTP surface listening on port {port}");

    let stop_app = Arc::clone(&app);
    let shutdown = async move {
        while !stop_app.should_stop() {
            tokio::time::sleep(Duration::from_millis(200)).await;
        }
    };

    axum::serve(listener, build_router(app))
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}

/// Replace the current process image with a fresh copy of itself.
///
/// Sleeps briefly first so the in-flight HTTP response can flush.
pub fn restart_server_process() {
    std::thread::sleep(Duration::from_millis(200));
    let Ok(exe) = std::env::current_exe() else {
        error!("restart requested but current executable is unknown");
        return;
    };
    let args: Vec<std::ffi::OsString> = std::env::args_os().skip(1).collect();
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        let err = std::process::Command::new(&exe).args(&args).exec();
        error!("process re-exec failed: {err}");
    }
    #[cfg(not(unix))]
    {
        match std::process::Command::new(&exe).args(&args).spawn() {
            Ok(_) => std::process::exit(0),
            Err(e) => error!("process restart failed: {e}"),
        }
    }
}
