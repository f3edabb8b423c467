//! HTTP API (§6). JSON throughout except `/api/config/{mc}`, which
//! returns the DVR's XML payload as plain text.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use axum::extract::{Path as AxumPath, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde::Serialize;
use tokio::sync::Mutex;

use crate::config::Config;
use crate::discovery::Discovery;
use crate::supervisor::{read_upload_state, Hook, Recording, UploadState};

/// `{error, kind, detail}` error body (§7).
#[derive(Serialize)]
struct ApiError {
    error: bool,
    kind: &'static str,
    detail: String,
}

fn err_response(status: StatusCode, kind: &'static str, detail: impl Into<String>) -> Response {
    (status, Json(ApiError { error: true, kind, detail: detail.into() })).into_response()
}

/// Shared control-plane state. `cfg` is mutated in place by discovery
/// (§4.3.3: "updates the live configuration in-memory").
pub struct AppState {
    pub cfg: Mutex<Config>,
    pub dvr_reachable: AtomicBool,
    pub ingest_hooks: Mutex<HashMap<u8, tokio::sync::mpsc::Sender<Hook>>>,
    pub recorder_cmds: Mutex<HashMap<u8, tokio::sync::mpsc::Sender<crate::supervisor::RecorderCmd>>>,
    pub discovery: Discovery,
}

pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/status", get(get_status))
        .route("/api/config-types", get(get_config_types))
        .route("/api/config/:mc", get(get_config))
        .route("/api/recordings", get(get_recordings))
        .route("/api/recordings/status", get(get_recordings_status))
        .route("/api/recordings/start", post(post_recordings_start))
        .route("/api/recordings/stop", post(post_recordings_stop))
        .route("/api/recordings/:channel/:filename", delete(delete_recording))
        .route("/api/recordings/delete-all", post(delete_all_recordings))
        .route("/api/ingest/:channel/start", post(post_ingest_start))
        .route("/api/ingest/:channel/stop", post(post_ingest_stop))
        .with_state(state)
}

#[derive(Serialize)]
struct ChannelStatus {
    id: u8,
    streaming: bool,
}

#[derive(Serialize)]
struct RecorderStatus {
    armed: bool,
    channels: Vec<u8>,
}

#[derive(Serialize)]
struct StatusResponse {
    dvr_reachable: bool,
    channels: Vec<ChannelStatus>,
    recorder: RecorderStatus,
    rtsp_paths: Vec<String>,
}

async fn get_status(State(state): State<Arc<AppState>>) -> Response {
    let cfg = state.cfg.lock().await;
    let ingest = state.ingest_hooks.lock().await;
    let channels: Vec<ChannelStatus> =
        ingest.keys().map(|&id| ChannelStatus { id, streaming: true }).collect();
    let recorder = RecorderStatus {
        armed: cfg.record_enabled,
        channels: cfg.record_channels.clone(),
    };
    let rtsp_paths = ingest.keys().map(|id| format!("ch{id}")).collect();

    Json(StatusResponse {
        dvr_reachable: state.dvr_reachable.load(Ordering::Relaxed),
        channels,
        recorder,
        rtsp_paths,
    })
    .into_response()
}

#[derive(Serialize)]
struct ConfigType {
    main_cmd: i32,
    name: &'static str,
}

/// The DVR's `MainCmd` catalog is not pinned by the wire spec beyond
/// `GetCfg`/`GetCfgReply` (§4.2.1); this is the subset this bridge
/// exposes, named for operator convenience.
async fn get_config_types() -> Response {
    let types = [
        ConfigType { main_cmd: 0, name: "general" },
        ConfigType { main_cmd: 2, name: "network" },
        ConfigType { main_cmd: 3, name: "encode" },
        ConfigType { main_cmd: 6, name: "record" },
    ];
    Json(types).into_response()
}

async fn get_config(State(state): State<Arc<AppState>>, AxumPath(mc): AxumPath<i32>) -> Response {
    let cfg = state.cfg.lock().await.clone();
    let host = match &cfg.dvr_host {
        Some(h) => h.clone(),
        None => return err_response(StatusCode::SERVICE_UNAVAILABLE, "dvr_unreachable", "no DVR host configured"),
    };
    drop(cfg);

    match fetch_config(&host, state.clone(), mc).await {
        Ok(xml) => (StatusCode::OK, xml).into_response(),
        Err(e) => err_response(StatusCode::SERVICE_UNAVAILABLE, "dvr_unreachable", e.to_string()),
    }
}

async fn fetch_config(host: &str, state: Arc<AppState>, main_cmd: i32) -> dvrgate_core::Result<String> {
    let (cmd_port, username, password) = {
        let cfg = state.cfg.lock().await;
        (cfg.dvr_cmd_port, cfg.dvr_username.clone(), cfg.dvr_password.clone())
    };
    let conn = dvrgate_core::session::Connection::connect(host, cmd_port, &username, &password).await?;
    let xml = conn.get_config(main_cmd).await;
    conn.close().await;
    xml
}

async fn get_recordings(State(state): State<Arc<AppState>>) -> Response {
    let cfg = state.cfg.lock().await;
    let recordings = list_recordings_on_disk(&cfg).await;
    Json(recordings).into_response()
}

async fn list_recordings_on_disk(cfg: &Config) -> Vec<Recording> {
    let mut out = Vec::new();
    for &channel in &cfg.record_channels {
        let dir = cfg.record_dir.join(format!("ch{channel}"));
        let entries = match std::fs::read_dir(&dir) {
            Ok(e) => e,
            Err(_) => continue,
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) == Some("json") {
                continue;
            }
            let meta = match entry.metadata() {
                Ok(m) => m,
                Err(_) => continue,
            };
            let upload_state = read_upload_state(&path).await;
            out.push(Recording {
                channel,
                path: path.clone(),
                start_utc: path
                    .file_stem()
                    .and_then(|s| s.to_str())
                    .unwrap_or_default()
                    .to_string(),
                duration_s: 0,
                size_bytes: meta.len(),
                upload_state,
            });
        }
    }
    out
}

#[derive(Serialize)]
struct RecordingsStatus {
    armed: bool,
    segments_today: usize,
    upload_queue_len: usize,
    disk_free_mb: Option<u64>,
}

async fn get_recordings_status(State(state): State<Arc<AppState>>) -> Response {
    let cfg = state.cfg.lock().await;
    let recordings = list_recordings_on_disk(&cfg).await;
    let upload_queue_len = recordings
        .iter()
        .filter(|r| matches!(r.upload_state, UploadState::Pending | UploadState::InProgress))
        .count();
    Json(RecordingsStatus {
        armed: cfg.record_enabled,
        segments_today: recordings.len(),
        upload_queue_len,
        disk_free_mb: None,
    })
    .into_response()
}

async fn post_recordings_start(State(state): State<Arc<AppState>>) -> StatusCode {
    let recorders = state.recorder_cmds.lock().await;
    for tx in recorders.values() {
        let _ = tx.send(crate::supervisor::RecorderCmd::Start).await;
    }
    StatusCode::NO_CONTENT
}

async fn post_recordings_stop(State(state): State<Arc<AppState>>) -> StatusCode {
    let recorders = state.recorder_cmds.lock().await;
    for tx in recorders.values() {
        let _ = tx.send(crate::supervisor::RecorderCmd::Stop).await;
    }
    StatusCode::NO_CONTENT
}

async fn delete_recording(
    State(state): State<Arc<AppState>>,
    AxumPath((channel, filename)): AxumPath<(u8, String)>,
) -> Response {
    let cfg = state.cfg.lock().await;
    let path = cfg.record_dir.join(format!("ch{channel}")).join(&filename);
    match std::fs::remove_file(&path) {
        Ok(()) => {
            let sidecar = path.with_extension(format!(
                "{}.upload.json",
                path.extension().and_then(|e| e.to_str()).unwrap_or("")
            ));
            let _ = std::fs::remove_file(sidecar);
            StatusCode::NO_CONTENT.into_response()
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            err_response(StatusCode::NOT_FOUND, "not_found", "no such recording")
        }
        Err(e) => err_response(StatusCode::INTERNAL_SERVER_ERROR, "io_error", e.to_string()),
    }
}

/// Receives the RTSP server's on-demand callback (via `dvrgate-hook`,
/// §4.3.1) and forwards it to the channel's ingest supervisor.
async fn post_ingest_start(
    State(state): State<Arc<AppState>>,
    AxumPath(channel): AxumPath<u8>,
) -> Response {
    dispatch_hook(&state, channel, Hook::Start).await
}

async fn post_ingest_stop(
    State(state): State<Arc<AppState>>,
    AxumPath(channel): AxumPath<u8>,
) -> Response {
    dispatch_hook(&state, channel, Hook::Stop).await
}

async fn dispatch_hook(state: &Arc<AppState>, channel: u8, hook: Hook) -> Response {
    let hooks = state.ingest_hooks.lock().await;
    match hooks.get(&channel) {
        Some(tx) => {
            let _ = tx.send(hook).await;
            StatusCode::NO_CONTENT.into_response()
        }
        None => err_response(
            StatusCode::NOT_FOUND,
            "unknown_channel",
            format!("no ingest pipeline for channel {channel}"),
        ),
    }
}

#[derive(Serialize)]
struct DeletedCount {
    deleted: usize,
}

async fn delete_all_recordings(State(state): State<Arc<AppState>>) -> Response {
    let cfg = state.cfg.lock().await;
    let mut deleted = 0usize;
    for recording in list_recordings_on_disk(&cfg).await {
        if std::fs::remove_file(&recording.path).is_ok() {
            deleted += 1;
        }
    }
    Json(DeletedCount { deleted }).into_response()
}
