//! Child process lifecycle: the transcoder and RTSP-server binaries are
//! owned exactly the way a DVR session owns its sockets in the protocol
//! core — one task owns the resource, and its death is delivered as an
//! event rather than discovered by polling.

use std::process::Stdio;

use tokio::process::Command;
use tokio::sync::{oneshot, watch};
use tokio::time::Duration;

const GRACEFUL_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// How a managed child stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    /// Exited with status 0.
    Clean,
    /// Exited non-zero, was killed, or couldn't be waited on.
    Failed,
}

/// A spawned child process. The process itself is owned by a background
/// task (so `shutdown`/SIGKILL and `wait()` never race each other); this
/// handle only holds the channels used to signal it and learn of exit.
pub struct ManagedChild {
    exit_rx: watch::Receiver<Option<ExitReason>>,
    shutdown_tx: Option<oneshot::Sender<()>>,
    label: String,
}

impl ManagedChild {
    /// Spawns `program args...` with caller-supplied stdin/stdout
    /// (the ingest pipeline pipes feeder's stdout into the transcoder's
    /// stdin; the recorder's segmenter just inherits stderr).
    pub fn spawn(
        label: &str,
        program: &str,
        args: &[&str],
        stdin: Stdio,
        stdout: Stdio,
    ) -> std::io::Result<Self> {
        let (managed, _stdout) = Self::spawn_capturing_stdout(label, program, args, stdin, stdout)?;
        Ok(managed)
    }

    /// Like [`Self::spawn`], but also hands back the child's stdout pipe
    /// (if `stdout` was [`Stdio::piped`]) before the child is moved into
    /// its watcher task — needed to chain it into the next process's
    /// stdin.
    pub fn spawn_capturing_stdout(
        label: &str,
        program: &str,
        args: &[&str],
        stdin: Stdio,
        stdout: Stdio,
    ) -> std::io::Result<(Self, Option<tokio::process::ChildStdout>)> {
        let mut child = Command::new(program)
            .args(args)
            .stdin(stdin)
            .stdout(stdout)
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()?;
        let captured_stdout = child.stdout.take();

        let (exit_tx, exit_rx) = watch::channel(None);
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();
        let label_owned = label.to_string();

        tokio::spawn(async move {
            tokio::select! {
                status = child.wait() => {
                    let reason = match status {
                        Ok(s) if s.success() => ExitReason::Clean,
                        Ok(s) => {
                            log::warn!("{label_owned} exited with {s}");
                            ExitReason::Failed
                        }
                        Err(e) => {
                            log::warn!("{label_owned} wait() failed: {e}");
                            ExitReason::Failed
                        }
                    };
                    let _ = exit_tx.send(Some(reason));
                }
                _ = &mut shutdown_rx => {
                    log::debug!("{label_owned} shutdown requested, sending SIGTERM");
                    #[cfg(unix)]
                    send_sigterm(&child);
                    let graceful = tokio::time::timeout(GRACEFUL_SHUTDOWN_TIMEOUT, child.wait()).await;
                    if graceful.is_err() {
                        log::warn!("{label_owned} did not exit within grace period, killing");
                        let _ = child.kill().await;
                    }
                    let _ = exit_tx.send(Some(ExitReason::Failed));
                }
            }
        });

        let managed = ManagedChild { exit_rx, shutdown_tx: Some(shutdown_tx), label: label.to_string() };
        Ok((managed, captured_stdout))
    }

    /// Resolves once the process has been reaped, however that happened.
    pub async fn exited(&mut self) -> ExitReason {
        loop {
            if let Some(reason) = *self.exit_rx.borrow() {
                return reason;
            }
            if self.exit_rx.changed().await.is_err() {
                return ExitReason::Failed;
            }
        }
    }

    /// Requests graceful shutdown (SIGTERM, then SIGKILL after 5s if
    /// still alive). Idempotent: a second call is a no-op.
    pub fn shutdown(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        } else {
            log::debug!("{} shutdown already requested", self.label);
        }
    }
}

#[cfg(unix)]
fn send_sigterm(child: &tokio::process::Child) {
    if let Some(pid) = child.id() {
        extern "C" {
            fn kill(pid: i32, sig: i32) -> i32;
        }
        // SAFETY: pid is our own child; SIGTERM (15) is always valid to send.
        unsafe {
            kill(pid as i32, 15);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn spawned_true_command_reports_clean_exit() {
        let mut managed =
            ManagedChild::spawn("test-true", "true", &[], Stdio::null(), Stdio::null()).unwrap();
        assert_eq!(managed.exited().await, ExitReason::Clean);
    }

    #[tokio::test]
    async fn spawned_false_command_reports_failed_exit() {
        let mut managed =
            ManagedChild::spawn("test-false", "false", &[], Stdio::null(), Stdio::null()).unwrap();
        assert_eq!(managed.exited().await, ExitReason::Failed);
    }

    #[tokio::test]
    async fn shutdown_on_long_lived_process_kills_it() {
        let mut managed =
            ManagedChild::spawn("test-sleep", "sleep", &["30"], Stdio::null(), Stdio::null()).unwrap();
        managed.shutdown();
        let reason = managed.exited().await;
        assert_eq!(reason, ExitReason::Failed);
    }
}
