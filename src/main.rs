//! Entry point: loads and validates configuration, starts one ingest
//! supervisor per configured channel, the recorder (if enabled), the
//! embedded RTSP server, and the HTTP control API.

mod config;
mod control;
mod discovery;
mod process;
mod supervisor;

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use tokio::sync::Mutex;

use config::Config;
use control::{build_router, AppState};
use process::ManagedChild;
use supervisor::{IngestSupervisor, Recorder, RecorderEvent};

/// `time::UtcOffset::current_local_offset` can only be read soundly
/// before any other thread exists in the process, so it is captured
/// here, ahead of the tokio runtime's own worker threads, with the
/// runtime built by hand instead of via `#[tokio::main]`.
fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let local_offset = time::UtcOffset::current_local_offset().unwrap_or(time::UtcOffset::UTC);
    tokio::runtime::Runtime::new()?.block_on(run(local_offset))
}

async fn run(local_offset: time::UtcOffset) -> anyhow::Result<()> {
    let cfg = Config::from_env(local_offset)?;
    log::info!("dvrgate starting, web port {}", cfg.web_port);

    let channels = discover_channels(&cfg);

    let mut ingest_hooks = HashMap::new();
    for &channel in &channels {
        let stream_type = 0u8;
        let tx = IngestSupervisor::spawn(channel, stream_type, cfg.clone());
        ingest_hooks.insert(channel, tx);
    }

    let mut recorder_cmds = HashMap::new();
    if cfg.record_enabled {
        let (event_tx, mut event_rx) = tokio::sync::mpsc::channel::<RecorderEvent>(32);
        tokio::spawn(async move {
            while let Some(event) = event_rx.recv().await {
                log::warn!("recorder event: {event:?}");
            }
        });
        for &channel in &cfg.record_channels {
            let tx = Recorder::spawn(channel, cfg.clone(), event_tx.clone());
            recorder_cmds.insert(channel, tx);
        }
    }

    let rtsp_server = spawn_rtsp_server(&cfg, &channels)?;

    let state = Arc::new(AppState {
        cfg: Mutex::new(cfg.clone()),
        dvr_reachable: AtomicBool::new(cfg.dvr_host.is_some()),
        ingest_hooks: Mutex::new(ingest_hooks),
        recorder_cmds: Mutex::new(recorder_cmds),
        discovery: discovery::Discovery::new(),
    });

    if cfg.dvr_host.is_none() {
        tokio::spawn(discover_and_apply(state.clone()));
    }

    tokio::spawn(supervise_rtsp_server(rtsp_server));

    let app = build_router(state);
    let addr = format!("0.0.0.0:{}", cfg.web_port);
    log::info!("control API listening on {addr}");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// Resolves the channel set to run ingest supervisors for. Recording
/// channels and any explicitly configured channels are unioned; with
/// nothing configured, channel 0 is started so a fresh install has a
/// usable default.
fn discover_channels(cfg: &Config) -> Vec<u8> {
    let mut channels: Vec<u8> = cfg.record_channels.clone();
    if channels.is_empty() {
        channels.push(0);
    }
    channels.sort_unstable();
    channels.dedup();
    channels
}

fn spawn_rtsp_server(cfg: &Config, channels: &[u8]) -> anyhow::Result<ManagedChild> {
    let yaml = control::rtsp_config::render_rtsp_config(cfg, channels, "dvrgate-hook");
    let config_path = std::env::temp_dir().join("dvrgate-rtsp.yml");
    std::fs::write(&config_path, yaml)?;

    ManagedChild::spawn(
        "rtsp-server",
        "mediamtx",
        &[config_path.to_str().unwrap_or_default()],
        Stdio::null(),
        Stdio::null(),
    )
    .map_err(Into::into)
}

/// Probes the LAN for a responder on the DVR command port when no host
/// is configured, applying the first hit to the live config (§4.3.3;
/// persistence is explicitly out of core scope).
async fn discover_and_apply(state: Arc<AppState>) {
    if let Some(found) = state.discovery.scan().await {
        log::info!("discovered DVR at {found}");
        let mut cfg = state.cfg.lock().await;
        cfg.dvr_host = Some(found.to_string());
        state.dvr_reachable.store(true, std::sync::atomic::Ordering::Relaxed);
    } else {
        log::warn!("DVR auto-discovery found no responder");
    }
}

/// Restarts the embedded RTSP server on exit, the way every other
/// process-owning task in this bridge treats its resource.
async fn supervise_rtsp_server(mut server: ManagedChild) {
    loop {
        let reason = server.exited().await;
        log::warn!("rtsp server exited: {reason:?}, restarting");
        tokio::time::sleep(tokio::time::Duration::from_secs(1)).await;
        match ManagedChild::spawn(
            "rtsp-server",
            "mediamtx",
            &[std::env::temp_dir().join("dvrgate-rtsp.yml").to_str().unwrap_or_default()],
            Stdio::null(),
            Stdio::null(),
        ) {
            Ok(s) => server = s,
            Err(e) => {
                log::error!("failed to respawn rtsp server: {e}");
                tokio::time::sleep(tokio::time::Duration::from_secs(5)).await;
            }
        }
    }
}
