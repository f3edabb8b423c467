//! Per-channel on-demand ingest pipeline (C6): feeder → transcoder →
//! RTSP server, restarted with exponential backoff. The restart policy
//! is a direct generalization of the protocol core's own session-restart
//! loop: fixed floor, doubling, capped ceiling, reset after a sustained
//! run.

use std::process::Stdio;
use std::time::Instant;

use tokio::sync::mpsc;
use tokio::time::Duration;

use crate::config::Config;
use crate::process::{ExitReason, ManagedChild};

const INITIAL_BACKOFF: Duration = Duration::from_secs(3);
const MAX_BACKOFF: Duration = Duration::from_secs(30);
const BACKOFF_RESET_UPTIME: Duration = Duration::from_secs(60);

/// Start/stop hook delivery from the RTSP server's on-demand callback.
#[derive(Debug)]
pub enum Hook {
    /// A subscriber connected to `ch<N>`.
    Start,
    /// The last subscriber left (after the server's own grace period).
    Stop,
}

/// Owns the feeder+transcoder pair for one channel and restarts it on
/// failure while a subscriber is present. Hooks are delivered over an
/// mpsc channel and are idempotent: two `Start`s in a row are a no-op,
/// as are two `Stop`s.
pub struct IngestSupervisor {
    channel: u8,
    stream_type: u8,
    cfg: Config,
    hooks: mpsc::Receiver<Hook>,
}

impl IngestSupervisor {
    pub fn spawn(channel: u8, stream_type: u8, cfg: Config) -> mpsc::Sender<Hook> {
        let (tx, rx) = mpsc::channel(8);
        let supervisor = IngestSupervisor { channel, stream_type, cfg, hooks: rx };
        tokio::spawn(supervisor.run());
        tx
    }

    async fn run(mut self) {
        let mut wanted = false;
        let mut backoff = INITIAL_BACKOFF;

        loop {
            if !wanted {
                match self.hooks.recv().await {
                    Some(Hook::Start) => wanted = true,
                    Some(Hook::Stop) => continue,
                    None => return,
                }
                continue;
            }

            let started_at = Instant::now();
            let outcome = tokio::select! {
                outcome = Self::run_pipeline_once(&self.cfg, self.channel, self.stream_type) => outcome,
                hook = self.hooks.recv() => {
                    match hook {
                        Some(Hook::Stop) => {
                            wanted = false;
                            continue;
                        }
                        Some(Hook::Start) => continue, // already running
                        None => return,
                    }
                }
            };

            if !wanted {
                continue;
            }

            match outcome {
                Ok(()) => {
                    log::info!("channel {} pipeline exited cleanly", self.channel);
                }
                Err(e) => {
                    log::warn!("channel {} pipeline failed: {e}", self.channel);
                }
            }

            if started_at.elapsed() >= BACKOFF_RESET_UPTIME {
                backoff = INITIAL_BACKOFF;
            }

            log::info!("channel {} restarting ingest pipeline in {:?}", self.channel, backoff);
            tokio::select! {
                _ = tokio::time::sleep(backoff) => {}
                hook = self.hooks.recv() => {
                    if matches!(hook, Some(Hook::Stop)) {
                        wanted = false;
                    }
                }
            }
            backoff = (backoff * 2).min(MAX_BACKOFF);
        }
    }

    /// Spawns feeder piped into the transcoder and waits for either to
    /// exit.
    async fn run_pipeline_once(cfg: &Config, channel: u8, stream_type: u8) -> anyhow::Result<()> {
        let host = cfg
            .dvr_host
            .clone()
            .ok_or_else(|| anyhow::anyhow!("no DVR host configured"))?;

        let (mut feeder, feeder_stdout) = ManagedChild::spawn_capturing_stdout(
            &format!("feeder[ch{}]", channel),
            "feeder",
            &[
                "--channel",
                &channel.to_string(),
                "--stream-type",
                &stream_type.to_string(),
                "--host",
                &host,
                "--username",
                &cfg.dvr_username,
                "--password",
                &cfg.dvr_password,
            ],
            Stdio::null(),
            Stdio::piped(),
        )?;
        let feeder_stdout = feeder_stdout.ok_or_else(|| anyhow::anyhow!("feeder stdout not piped"))?;
        let transcoder_stdin: Stdio = feeder_stdout
            .try_into()
            .map_err(|_| anyhow::anyhow!("failed to convert feeder stdout into transcoder stdin"))?;

        let rtsp_url = format!("rtsp://127.0.0.1:8554/ch{}", channel);
        let mut transcoder = ManagedChild::spawn(
            &format!("transcoder[ch{}]", channel),
            "ffmpeg",
            &[
                "-fflags", "+genpts", "-r", "25", "-f", "h264", "-i", "pipe:0", "-c", "copy", "-f",
                "rtsp", &rtsp_url,
            ],
            transcoder_stdin,
            Stdio::null(),
        )?;

        let reason = tokio::select! {
            r = feeder.exited() => r,
            r = transcoder.exited() => r,
        };

        feeder.shutdown();
        transcoder.shutdown();

        match reason {
            ExitReason::Clean => Ok(()),
            ExitReason::Failed => Err(anyhow::anyhow!("child exited unexpectedly")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> Config {
        Config {
            local_offset: time::UtcOffset::UTC,
            dvr_host: Some("127.0.0.1".to_string()),
            dvr_cmd_port: 5050,
            dvr_media_port: 6050,
            dvr_username: "admin".to_string(),
            dvr_password: "pw".to_string(),
            web_port: 8080,
            record_enabled: false,
            record_channels: vec![],
            record_segment_min: 15,
            record_stream_type: 0,
            record_dir: std::path::PathBuf::from("/tmp"),
            record_retention_hr: 0,
            record_schedule: vec![],
            record_min_disk_mb: 0,
        }
    }

    #[tokio::test]
    async fn double_stop_hook_is_idempotent() {
        let tx = IngestSupervisor::spawn(0, 0, test_config());
        tx.send(Hook::Stop).await.unwrap();
        tx.send(Hook::Stop).await.unwrap();
        // No panic, no pipeline spawned: the channel just drains.
        drop(tx);
    }
}
