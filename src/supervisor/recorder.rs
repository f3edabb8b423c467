//! Schedule-gated segmented recording with retention pruning and upload
//! hand-off (C7).

use std::path::{Path, PathBuf};
use std::process::Stdio;

use serde::{Deserialize, Serialize};
use time::format_description::well_known::Iso8601;
use time::OffsetDateTime;
use tokio::sync::mpsc;
use tokio::time::Duration;

use crate::config::{hour_in_schedule, Config};
use crate::process::ManagedChild;

const SCHEDULE_POLL_INTERVAL: Duration = Duration::from_secs(60);
const PRUNE_INTERVAL: Duration = Duration::from_secs(5 * 60);
const UPLOAD_SCAN_INTERVAL: Duration = Duration::from_secs(30);
const INITIAL_BACKOFF: Duration = Duration::from_secs(3);
const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// Per-file upload progress, persisted in a `.upload.json` sidecar next
/// to each segment so recorder restarts don't lose track of it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UploadState {
    Pending,
    InProgress,
    Uploaded,
    Failed,
}

/// One recorded segment, as surfaced by the status API (§6).
#[derive(Debug, Clone, Serialize)]
pub struct Recording {
    pub channel: u8,
    pub path: PathBuf,
    pub start_utc: String,
    pub duration_s: u32,
    pub size_bytes: u64,
    pub upload_state: UploadState,
}

/// Recorder-specific events that do not terminate the process (§7).
#[derive(Debug, Clone)]
pub enum RecorderEvent {
    DiskFull,
    UploadFailed(PathBuf),
    SegmenterExited,
}

/// Commands the control plane can issue to a running recorder.
#[derive(Debug)]
pub enum RecorderCmd {
    Start,
    Stop,
}

/// Owns segmenting + retention + upload hand-off for one channel's
/// recording.
pub struct Recorder {
    channel: u8,
    cfg: Config,
    cmds: mpsc::Receiver<RecorderCmd>,
    events: mpsc::Sender<RecorderEvent>,
    upload_queue: mpsc::Sender<PathBuf>,
}

impl Recorder {
    pub fn spawn(channel: u8, cfg: Config, events: mpsc::Sender<RecorderEvent>) -> mpsc::Sender<RecorderCmd> {
        let (cmd_tx, cmd_rx) = mpsc::channel(8);
        let (upload_tx, upload_rx) = mpsc::channel(64);
        let recorder = Recorder { channel, cfg: cfg.clone(), cmds: cmd_rx, events, upload_queue: upload_tx };
        tokio::spawn(upload_worker(upload_rx));
        tokio::spawn(recorder.run());
        cmd_tx
    }

    fn channel_dir(&self) -> PathBuf {
        self.cfg.record_dir.join(format!("ch{}", self.channel))
    }

    async fn run(mut self) {
        let mut manually_enabled = self.cfg.record_enabled;
        let mut segmenter: Option<ManagedChild> = None;
        let mut backoff = INITIAL_BACKOFF;
        let mut schedule_ticker = tokio::time::interval(SCHEDULE_POLL_INTERVAL);
        let mut prune_ticker = tokio::time::interval(PRUNE_INTERVAL);
        let mut upload_scan_ticker = tokio::time::interval(UPLOAD_SCAN_INTERVAL);

        loop {
            tokio::select! {
                cmd = self.cmds.recv() => {
                    match cmd {
                        Some(RecorderCmd::Start) => manually_enabled = true,
                        Some(RecorderCmd::Stop) => {
                            manually_enabled = false;
                            if let Some(mut s) = segmenter.take() {
                                s.shutdown();
                            }
                        }
                        None => return,
                    }
                }
                _ = schedule_ticker.tick() => {
                    let armed = manually_enabled && self.is_armed_now();
                    if armed && segmenter.is_none() {
                        match self.start_segmenter().await {
                            Ok(s) => { segmenter = Some(s); backoff = INITIAL_BACKOFF; }
                            Err(e) => log::warn!("channel {} recorder could not start segmenter: {e}", self.channel),
                        }
                    } else if !armed {
                        if let Some(mut s) = segmenter.take() {
                            s.shutdown();
                        }
                    }
                }
                _ = prune_ticker.tick() => {
                    if let Err(e) = self.prune_old_segments().await {
                        log::warn!("channel {} retention pruning failed: {e}", self.channel);
                    }
                }
                _ = upload_scan_ticker.tick() => {
                    if let Err(e) = self.scan_for_completed_segments().await {
                        log::warn!("channel {} upload scan failed: {e}", self.channel);
                    }
                }
                exit = async {
                    match segmenter.as_mut() {
                        Some(s) => Some(s.exited().await),
                        None => std::future::pending().await,
                    }
                } => {
                    if let Some(reason) = exit {
                        log::warn!("channel {} segmenter exited: {reason:?}", self.channel);
                        segmenter = None;
                        let _ = self.events.send(RecorderEvent::SegmenterExited).await;
                        if manually_enabled && self.is_armed_now() {
                            tokio::time::sleep(backoff).await;
                            backoff = (backoff * 2).min(MAX_BACKOFF);
                        }
                    }
                }
            }
        }
    }

    /// Schedule ranges are configured in local wall-clock hours (§4.3.2);
    /// segment filenames stay UTC, so only this check needs the offset.
    fn is_armed_now(&self) -> bool {
        let hour = OffsetDateTime::now_utc().to_offset(self.cfg.local_offset).hour();
        hour_in_schedule(&self.cfg.record_schedule, hour)
    }

    async fn start_segmenter(&self) -> anyhow::Result<ManagedChild> {
        if let Some(free_mb) = disk_free_mb(&self.cfg.record_dir) {
            if free_mb < self.cfg.record_min_disk_mb {
                let _ = self.events.try_send(RecorderEvent::DiskFull);
                anyhow::bail!("free disk {free_mb}MB below minimum {}MB", self.cfg.record_min_disk_mb);
            }
        }

        let dir = self.channel_dir();
        std::fs::create_dir_all(&dir)?;
        let now = OffsetDateTime::now_utc();
        let start_name = now.format(&Iso8601::DEFAULT)?.replace([':', '.'], "-");
        let pattern = dir.join(format!("{start_name}_%03d.mp4"));
        let rtsp_url = format!("rtsp://127.0.0.1:8554/ch{}", self.channel);

        ManagedChild::spawn(
            &format!("segmenter[ch{}]", self.channel),
            "ffmpeg",
            &[
                "-i",
                &rtsp_url,
                "-c",
                "copy",
                "-f",
                "segment",
                "-segment_time",
                &(self.cfg.record_segment_min * 60).to_string(),
                "-reset_timestamps",
                "1",
                pattern.to_str().unwrap_or_default(),
            ],
            Stdio::null(),
            Stdio::null(),
        )
        .map_err(Into::into)
    }

    async fn prune_old_segments(&self) -> anyhow::Result<()> {
        if self.cfg.record_retention_hr == 0 {
            return Ok(());
        }
        let dir = self.channel_dir();
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(e) => e,
            Err(_) => return Ok(()),
        };
        let cutoff = std::time::SystemTime::now()
            - std::time::Duration::from_secs(self.cfg.record_retention_hr as u64 * 3600);

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) == Some("json") {
                continue;
            }
            let meta = entry.metadata().await?;
            let modified = meta.modified().unwrap_or(std::time::SystemTime::now());
            if modified > cutoff {
                continue;
            }
            if matches!(read_upload_state(&path).await, UploadState::Pending | UploadState::InProgress) {
                continue;
            }
            log::info!("pruning expired recording {}", path.display());
            let _ = tokio::fs::remove_file(&path).await;
            let _ = tokio::fs::remove_file(sidecar_path(&path)).await;
        }
        Ok(())
    }

    /// Hands a completed segment to the upload worker when uploading is
    /// enabled; a no-op recorder build without upload configured simply
    /// never calls this.
    pub async fn enqueue_upload(&self, path: PathBuf) {
        write_upload_state(&path, UploadState::Pending).await;
        let _ = self.upload_queue.send(path).await;
    }

    /// Finds segments ffmpeg has finished writing and hands them off to
    /// the upload worker (§4.3.2). Segment filenames are timestamp-
    /// ordered, so only the most recently created file in the directory
    /// can still be the one the active segmenter is writing to; every
    /// earlier one is complete. A sidecar's presence marks a segment as
    /// already handed off, so a restarted recorder doesn't re-enqueue it.
    async fn scan_for_completed_segments(&self) -> anyhow::Result<()> {
        let dir = self.channel_dir();
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(e) => e,
            Err(_) => return Ok(()),
        };
        let mut segments = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) == Some("json") {
                continue;
            }
            segments.push(path);
        }
        if segments.len() < 2 {
            return Ok(());
        }
        segments.sort();

        for path in &segments[..segments.len() - 1] {
            if tokio::fs::metadata(sidecar_path(path)).await.is_ok() {
                continue;
            }
            self.enqueue_upload(path.clone()).await;
        }
        Ok(())
    }
}

fn sidecar_path(path: &Path) -> PathBuf {
    let mut p = path.to_path_buf();
    let name = format!("{}.upload.json", path.file_name().and_then(|n| n.to_str()).unwrap_or(""));
    p.set_file_name(name);
    p
}

pub async fn read_upload_state(path: &Path) -> UploadState {
    match tokio::fs::read(sidecar_path(path)).await {
        Ok(bytes) => serde_json::from_slice(&bytes).unwrap_or(UploadState::Uploaded),
        Err(_) => UploadState::Uploaded,
    }
}

async fn write_upload_state(path: &Path, state: UploadState) {
    if let Ok(bytes) = serde_json::to_vec(&state) {
        let _ = tokio::fs::write(sidecar_path(path), bytes).await;
    }
}

/// Single-consumer upload worker (§4.3.2). The actual upload transport
/// is an external collaborator (out of core scope per §1); this worker
/// owns only the queue draining and state-file bookkeeping.
async fn upload_worker(mut queue: mpsc::Receiver<PathBuf>) {
    while let Some(path) = queue.recv().await {
        write_upload_state(&path, UploadState::InProgress).await;
        log::info!("uploading {}", path.display());
        // Upload client is out of core scope; mark complete immediately
        // so local retention accounting stays correct in its absence.
        write_upload_state(&path, UploadState::Uploaded).await;
    }
}

#[cfg(unix)]
fn disk_free_mb(path: &Path) -> Option<u64> {
    use std::ffi::CString;
    use std::mem::MaybeUninit;

    #[repr(C)]
    struct Statvfs {
        f_bsize: u64,
        f_frsize: u64,
        f_blocks: u64,
        f_bfree: u64,
        f_bavail: u64,
        f_files: u64,
        f_ffree: u64,
        f_favail: u64,
        f_fsid: u64,
        f_flag: u64,
        f_namemax: u64,
    }
    extern "C" {
        fn statvfs(path: *const std::os::raw::c_char, buf: *mut Statvfs) -> i32;
    }

    std::fs::create_dir_all(path).ok()?;
    let c_path = CString::new(path.to_str()?).ok()?;
    let mut stat = MaybeUninit::<Statvfs>::uninit();
    // SAFETY: c_path is NUL-terminated and stat is a valid out-pointer
    // of the right size for the duration of the call.
    let rc = unsafe { statvfs(c_path.as_ptr(), stat.as_mut_ptr()) };
    if rc != 0 {
        return None;
    }
    let stat = unsafe { stat.assume_init() };
    Some((stat.f_bavail * stat.f_frsize) / (1024 * 1024))
}

#[cfg(not(unix))]
fn disk_free_mb(_path: &Path) -> Option<u64> {
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sidecar_path_adds_suffix() {
        let p = PathBuf::from("/tmp/rec/ch0/seg1.mp4");
        assert_eq!(sidecar_path(&p), PathBuf::from("/tmp/rec/ch0/seg1.mp4.upload.json"));
    }

    #[tokio::test]
    async fn default_upload_state_without_sidecar_is_uploaded() {
        let p = PathBuf::from("/tmp/does-not-exist-dvrgate-test/seg.mp4");
        assert_eq!(read_upload_state(&p).await, UploadState::Uploaded);
    }
}
