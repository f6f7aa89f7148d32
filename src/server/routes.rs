//! API route handlers.
//!
//! Handlers are thin: they parse and clamp inputs, hand the real work to
//! the store or config layers on a blocking task, and shape the JSON the
//! dashboard expects.

use std::collections::HashMap;
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::{Value, json};

use crate::constants::http::{DEFAULT_LIMIT, MAX_LIMIT};
use crate::segments::count_pending_segments;
use crate::server::activity::build_activity_curve;
use crate::server::export::build_log_csv;
use crate::snapshot::{read_latest, refresh_last_detection};
use crate::state::App;
use crate::store::LogEntry;
use crate::utils::text::normalize_confidence;
use crate::utils::time::normalize_timestamp;

/// Run a blocking closure off the async worker threads.
async fn blocking<T, F>(task: F) -> Result<T, StatusCode>
where
    T: Send + 'static,
    F: FnOnce() -> T + Send + 'static,
{
    tokio::task::spawn_blocking(task)
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)
}

fn bad_request(message: &str) -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(json!({"ok": false, "error": message})),
    )
        .into_response()
}

fn parse_json_object(body: &Bytes) -> Option<serde_json::Map<String, Value>> {
    match serde_json::from_slice::<Value>(body) {
        Ok(Value::Object(map)) => Some(map),
        _ => None,
    }
}

fn parse_limit(params: &HashMap<String, String>) -> usize {
    params
        .get("limit")
        .and_then(|raw| raw.trim().parse::<usize>().ok())
        .unwrap_or(DEFAULT_LIMIT)
        .min(MAX_LIMIT)
}

/// `GET /api/status`: raw snapshot passthrough.
pub async fn get_status(State(app): State<Arc<App>>) -> Json<Value> {
    Json(read_latest(&app))
}

/// `GET /api/settings`: config snapshot without secrets.
pub async fn get_settings(State(app): State<Arc<App>>) -> Json<Value> {
    Json(app.config.public_snapshot())
}

/// `POST /api/settings`: apply an allow-listed patch.
pub async fn post_settings(State(app): State<Arc<App>>, body: Bytes) -> Response {
    let Some(updates) = parse_json_object(&body) else {
        return bad_request("Invalid JSON");
    };
    let changed = app.config.apply_patch(&updates);
    Json(json!({"ok": true, "changed": changed})).into_response()
}

/// `GET /api/inputs`: enumerate device-mode audio inputs.
pub async fn get_inputs(State(_app): State<Arc<App>>) -> Result<Json<Value>, StatusCode> {
    let (devices, error) = blocking(crate::capture::list_audio_inputs).await?;
    Ok(Json(json!({"devices": devices, "error": error})))
}

/// `GET /api/queue`: segment files waiting in the working directory.
pub async fn get_queue(State(app): State<Arc<App>>) -> Json<Value> {
    Json(json!({"pending": count_pending_segments(&app.paths.tmp_dir)}))
}

/// `GET /api/log`: newest detections, oldest-first, clamped limit.
pub async fn get_log(
    State(app): State<Arc<App>>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Json<Value>, StatusCode> {
    let limit = parse_limit(&params);
    let entries = blocking(move || app.store.read_log(Some(limit))).await?;
    Ok(Json(json!({"entries": entries})))
}

/// `GET /api/log/summary`: materialized per-species aggregate.
pub async fn get_log_summary(State(app): State<Arc<App>>) -> Result<Json<Value>, StatusCode> {
    let summary = blocking(move || {
        let clip_index = app.clips.index_snapshot();
        app.store.summarize(&clip_index)
    })
    .await?;
    Ok(Json(summary))
}

/// `GET /api/log/activity`: half-hour histogram.
pub async fn get_log_activity(
    State(app): State<Arc<App>>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Json<Value>, StatusCode> {
    let days = params.get("days").cloned();
    let curve = blocking(move || build_activity_curve(&app.store, days.as_deref())).await?;
    Ok(Json(curve))
}

/// `GET /api/log/csv`: CSV export as an attachment.
pub async fn get_log_csv(State(app): State<Arc<App>>) -> Result<Response, StatusCode> {
    let csv = blocking(move || build_log_csv(&app.store.read_log(None))).await?;
    Ok((
        [
            (header::CONTENT_TYPE, "text/csv; charset=utf-8"),
            (
                header::CONTENT_DISPOSITION,
                "attachment; filename=\"birdnet_detections.csv\"",
            ),
        ],
        csv,
    )
        .into_response())
}

/// `GET /api/events`: newest events, oldest-first, clamped limit.
pub async fn get_events(
    State(app): State<Arc<App>>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Json<Value>, StatusCode> {
    let limit = parse_limit(&params);
    let entries = blocking(move || app.store.read_events(Some(limit))).await?;
    Ok(Json(json!({"entries": entries})))
}

/// `GET /api/clip`: stream a species' archived best clip.
pub async fn get_clip(
    State(app): State<Arc<App>>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let species = params
        .get("species")
        .map(|s| s.trim().to_string())
        .unwrap_or_default();
    if species.is_empty() {
        return (StatusCode::BAD_REQUEST, "Missing species").into_response();
    }
    let Some(entry) = app.clips.entry_for(&species).filter(|e| !e.filename.is_empty()) else {
        return (StatusCode::NOT_FOUND, "Clip not found").into_response();
    };
    let path = app.clips.clip_path(&entry);
    let Ok(body) = tokio::fs::read(&path).await else {
        return (StatusCode::NOT_FOUND, "Clip not found").into_response();
    };

    let mut response = ([(header::CONTENT_TYPE, "audio/wav")], body).into_response();
    let download = params.get("download").is_some_and(|d| d.trim() == "1");
    if download {
        if let Ok(value) =
            format!("attachment; filename=\"{}\"", entry.filename).parse()
        {
            response
                .headers_mut()
                .insert(header::CONTENT_DISPOSITION, value);
        }
    }
    response
}

/// `POST /api/log/add`: manual detection entry.
pub async fn post_log_add(State(app): State<Arc<App>>, body: Bytes) -> Response {
    let Some(data) = parse_json_object(&body) else {
        return bad_request("Invalid JSON");
    };
    let species = data
        .get("species")
        .and_then(Value::as_str)
        .map(str::trim)
        .unwrap_or_default()
        .to_string();
    if species.is_empty() {
        return bad_request("Species is required");
    }
    let scientific_name = data
        .get("scientific_name")
        .and_then(Value::as_str)
        .map(str::trim)
        .unwrap_or_default()
        .to_string();
    let confidence = normalize_confidence(data.get("confidence"));
    let timestamp = normalize_timestamp(
        data.get("timestamp").and_then(Value::as_str).unwrap_or(""),
    );
    let location = app.config.snapshot().location;

    let entry = LogEntry {
        id: uuid::Uuid::new_v4().simple().to_string(),
        timestamp,
        species: species.clone(),
        scientific_name: scientific_name.clone(),
        confidence,
        location,
        ..LogEntry::default()
    };

    let result = {
        let app = Arc::clone(&app);
        let entry = entry.clone();
        blocking(move || {
            let mut entries = vec![entry];
            let appended = app.store.append_detections(&mut entries);
            if appended.is_ok() {
                let mut extra = serde_json::Map::new();
                extra.insert("species".to_string(), json!(species));
                extra.insert("scientific_name".to_string(), json!(scientific_name));
                extra.insert("confidence".to_string(), json!(confidence));
                app.store
                    .log_event_with("manual", &format!("Manual entry {species}"), extra);
            }
            appended
        })
        .await
    };
    match result {
        Ok(Ok(())) => Json(json!({"ok": true, "entry": entry})).into_response(),
        _ => bad_request("Unable to store entry"),
    }
}

/// `POST /api/log/delete`: delete one detection by id.
pub async fn post_log_delete(State(app): State<Arc<App>>, body: Bytes) -> Response {
    let Some(data) = parse_json_object(&body) else {
        return bad_request("Invalid JSON");
    };
    let id = data
        .get("id")
        .and_then(Value::as_str)
        .map(str::trim)
        .unwrap_or_default()
        .to_string();
    if id.is_empty() {
        return bad_request("Missing id");
    }
    let removed = blocking(move || {
        let removed = app.store.delete_detection(&id);
        if removed {
            refresh_last_detection(&app);
        }
        removed
    })
    .await;
    match removed {
        Ok(removed) => Json(json!({"ok": removed})).into_response(),
        Err(status) => status.into_response(),
    }
}

/// `POST /api/restart`: restart the capture child only.
pub async fn post_restart(State(app): State<Arc<App>>) -> Json<Value> {
    app.config.signal_restart();
    app.store.log_event("server", "Capture restart requested");
    Json(json!({"ok": true}))
}

/// `POST /api/restart/server`: re-exec the whole process.
///
/// Responds first; the replacement happens after a short flush delay.
pub async fn post_restart_server(State(app): State<Arc<App>>) -> Json<Value> {
    app.store.log_event("server", "Server restart requested");
    std::thread::spawn(super::restart_server_process);
    Json(json!({"ok": true}))
}
