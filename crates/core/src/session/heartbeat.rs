//! Heartbeat watchdog: fires when no command-channel bytes have arrived
//! within the tolerated gap (§4.2.2, 60 s default).

use std::sync::Mutex;
use std::time::Instant;

use tokio::sync::watch;
use tokio::time::Duration;

use crate::error::Error;

/// Shared last-receive clock plus the watchdog loop that polls it.
pub struct Watchdog {
    last_rx: Mutex<Instant>,
    gap: Duration,
}

impl Watchdog {
    pub fn new(gap: Duration) -> Self {
        Watchdog { last_rx: Mutex::new(Instant::now()), gap }
    }

    /// Called by the reader task on every inbound command-channel byte.
    pub fn touch(&self) {
        *self.last_rx.lock().unwrap() = Instant::now();
    }

    fn elapsed(&self) -> Duration {
        self.last_rx.lock().unwrap().elapsed()
    }

    /// Polls once a second until the gap is exceeded or `cancel` fires.
    /// Returns `Err(HeartbeatTimeout)` on expiry, `Ok(())` on cancel.
    pub async fn run(&self, mut cancel: watch::Receiver<bool>) -> Result<(), Error> {
        let mut ticker = tokio::time::interval(Duration::from_secs(1));
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if self.elapsed() > self.gap {
                        return Err(Error::HeartbeatTimeout);
                    }
                }
                _ = cancel.changed() => {
                    if *cancel.borrow() {
                        return Ok(());
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fires_after_gap_with_no_touch() {
        let wd = Watchdog::new(Duration::from_millis(50));
        let (_tx, rx) = watch::channel(false);
        let res = wd.run(rx).await;
        assert!(matches!(res, Err(Error::HeartbeatTimeout)));
    }

    #[tokio::test]
    async fn cancel_stops_watchdog_cleanly() {
        let wd = Watchdog::new(Duration::from_secs(60));
        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(async move { wd.run(rx).await });
        tx.send(true).unwrap();
        let res = handle.await.unwrap();
        assert!(res.is_ok());
    }
}
