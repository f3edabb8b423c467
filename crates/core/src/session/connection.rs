//! Public session operations (C4 §4.2.4): `Connect`, `OpenStream`,
//! `Frames`, `Close`, `GetConfig`.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use tokio::io::AsyncWriteExt;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{timeout, Duration};

use crate::error::{Error, Result};
use crate::media::Extractor;
use crate::wire::{decode_command_header, parse_reply, Command, Header, HEADER_LEN};

use super::heartbeat::Watchdog;
use super::mailbox::Mailbox;
use super::state::State;

const COMMAND_REPLY_TIMEOUT: Duration = Duration::from_secs(10);
const LOGIN_TOTAL_TIMEOUT: Duration = Duration::from_secs(15);
const MEDIA_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);
const HEARTBEAT_GAP: Duration = Duration::from_secs(60);

/// Serializes `txn_id` allocation and command-channel writes behind one
/// lock, per §5's shared-resource policy.
struct CmdWriter {
    txn: AtomicU32,
    write_half: tokio::sync::Mutex<OwnedWriteHalf>,
}

impl CmdWriter {
    fn next_txn(&self) -> u32 {
        self.txn.fetch_add(1, Ordering::SeqCst)
    }

    async fn send(&self, cmd: Command) -> Result<u32> {
        let txn_id = self.next_txn();
        self.send_with_txn(cmd, txn_id).await?;
        Ok(txn_id)
    }

    /// Sends `cmd` under a caller-chosen txn id instead of allocating a
    /// fresh one. Used for heartbeat replies, which must echo the
    /// notice's own txn id (§8).
    async fn send_with_txn(&self, cmd: Command, txn_id: u32) -> Result<()> {
        let body = cmd.to_body_bytes();
        let header = Header::command(txn_id, body.len() as u32);
        let mut guard = self.write_half.lock().await;
        guard.write_all(&header.to_bytes()).await.map_err(Error::Io)?;
        guard.write_all(&body).await.map_err(Error::Io)?;
        Ok(())
    }
}

/// A logged-in connection to a DVR's command channel. Streams are opened
/// per channel with [`Connection::open_stream`].
pub struct Connection {
    host: String,
    writer: Arc<CmdWriter>,
    mailbox: Arc<Mailbox>,
    watchdog: Arc<Watchdog>,
    cancel: watch::Sender<bool>,
    reader_task: JoinHandle<()>,
    watchdog_task: JoinHandle<Result<()>>,
    state: StdMutex<State>,
}

impl Connection {
    /// Opens the command channel and completes the login sequence
    /// (`LoginGetFlag` → compute token → `UserLogin`).
    pub async fn connect(host: &str, cmd_port: u16, username: &str, password: &str) -> Result<Self> {
        let addr = format!("{host}:{cmd_port}");
        let stream = TcpStream::connect(&addr)
            .await
            .map_err(|source| Error::DialFailed { addr: addr.clone(), source })?;
        let (read_half, write_half) = stream.into_split();

        let writer = Arc::new(CmdWriter {
            txn: AtomicU32::new(1),
            write_half: tokio::sync::Mutex::new(write_half),
        });
        let mailbox = Arc::new(Mailbox::new());
        let watchdog = Arc::new(Watchdog::new(HEARTBEAT_GAP));
        let (cancel_tx, cancel_rx) = watch::channel(false);

        let reader_task = tokio::spawn(reader_loop(
            read_half,
            mailbox.clone(),
            watchdog.clone(),
            writer.clone(),
        ));
        let watchdog_task = tokio::spawn({
            let watchdog = watchdog.clone();
            async move { watchdog.run(cancel_rx).await }
        });

        let conn = Connection {
            host: host.to_string(),
            writer,
            mailbox,
            watchdog,
            cancel: cancel_tx,
            reader_task,
            watchdog_task,
            state: StdMutex::new(State::CmdOpen),
        };

        timeout(LOGIN_TOTAL_TIMEOUT, conn.login(username, password))
            .await
            .map_err(|_| Error::Timeout("login sequence".to_string()))??;

        Ok(conn)
    }

    fn state(&self) -> State {
        *self.state.lock().unwrap()
    }

    /// Records a state-machine transition (§4.2.2). Logged at debug, not
    /// enforced by a panic: a caller that manages to violate ordering
    /// gets a `ProtocolError`, not a crashed process.
    fn set_state(&self, next: State) {
        let mut guard = self.state.lock().unwrap();
        log::debug!("connection {} state {:?} -> {:?}", self.host, *guard, next);
        *guard = next;
    }

    async fn login(&self, username: &str, password: &str) -> Result<()> {
        self.set_state(State::WaitFlag);
        self.writer.send(Command::login_get_flag()).await?;
        let flag_reply = self.mailbox.await_tag("LoginGetFlagReply", COMMAND_REPLY_TIMEOUT).await?;
        let nonce = flag_reply
            .child("LoginFlag")
            .ok_or_else(|| Error::ProtocolError("LoginGetFlagReply missing LoginFlag".to_string()))?;
        self.set_state(State::HaveNonce);

        let token = crate::cipher::login_token(nonce, password);

        self.set_state(State::WaitLogin);
        self.writer.send(Command::user_login(username, &token)).await?;
        let login_reply = self.mailbox.await_tag("UserLoginReply", COMMAND_REPLY_TIMEOUT).await?;
        match login_reply.attr("CmdReply") {
            Some("0") => {
                self.set_state(State::LoggedIn);
                Ok(())
            }
            Some(code) => Err(Error::AuthFailed { code: code.to_string() }),
            None => Err(Error::ProtocolError("UserLoginReply missing CmdReply".to_string())),
        }
    }

    /// Creates and starts a stream for `channel`/`stream_type`, completing
    /// the media-channel handshake, and returns a handle to read frames
    /// from it.
    pub async fn open_stream(&self, channel: u8, stream_type: u8, media_port: u16) -> Result<MediaStream> {
        if !self.state().is_logged_in_or_later() {
            return Err(Error::ProtocolError(
                "open_stream called before login completed".to_string(),
            ));
        }

        self.set_state(State::WaitSession);
        self.writer.send(Command::real_stream_create(channel, stream_type)).await?;
        let create_reply =
            self.mailbox.await_tag("RealStreamCreateReply", COMMAND_REPLY_TIMEOUT).await?;
        if matches!(create_reply.attr("CmdReply"), Some(code) if code != "0") {
            return Err(Error::StreamCreateFailed {
                channel,
                detail: create_reply.attr("CmdReply").unwrap_or("").to_string(),
            });
        }
        let media_session: u32 = create_reply
            .child("MediaSession")
            .or_else(|| create_reply.attr("MediaSession"))
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| Error::StreamCreateFailed {
                channel,
                detail: "reply missing MediaSession".to_string(),
            })?;
        self.set_state(State::HaveSession);

        let media_addr = format!("{}:{media_port}", self.host);
        let media_stream = TcpStream::connect(&media_addr)
            .await
            .map_err(|source| Error::DialFailed { addr: media_addr, source })?;
        let (mut media_read, mut media_write) = media_stream.into_split();

        self.set_state(State::MediaHandshake);
        let handshake = Header::media_handshake(media_session);
        timeout(MEDIA_HANDSHAKE_TIMEOUT, media_write.write_all(&handshake.to_bytes()))
            .await
            .map_err(|_| Error::Timeout("media handshake send".to_string()))?
            .map_err(Error::Io)?;

        let mut echo = [0u8; HEADER_LEN];
        timeout(MEDIA_HANDSHAKE_TIMEOUT, tokio::io::AsyncReadExt::read_exact(&mut media_read, &mut echo))
            .await
            .map_err(|_| Error::Timeout("media handshake echo".to_string()))?
            .map_err(Error::Io)?;
        self.set_state(State::MediaReady);

        self.set_state(State::WaitStart);
        self.writer.send(Command::real_stream_start(channel, media_session)).await?;
        let start_reply =
            self.mailbox.await_tag("RealStreamStartReply", COMMAND_REPLY_TIMEOUT).await?;
        if matches!(start_reply.attr("CmdReply"), Some(code) if code != "0") {
            return Err(Error::StreamStartFailed {
                channel,
                detail: start_reply.attr("CmdReply").unwrap_or("").to_string(),
            });
        }
        self.set_state(State::Streaming);

        Ok(MediaStream { extractor: Extractor::new(media_read) })
    }

    /// Fetches a configuration section's XML payload.
    pub async fn get_config(&self, main_cmd: i32) -> Result<String> {
        self.writer.send(Command::get_cfg(main_cmd)).await?;
        let reply = self.mailbox.await_tag("GetCfgReply", COMMAND_REPLY_TIMEOUT).await?;
        reply
            .child("#text")
            .map(str::to_string)
            .or_else(|| reply.attr("#text").map(str::to_string))
            .ok_or_else(|| Error::ProtocolError("GetCfgReply had no payload".to_string()))
    }

    /// Best-effort teardown: sends `Logout`, then cancels and joins the
    /// reader/watchdog tasks.
    pub async fn close(self) {
        self.set_state(State::Closing);
        let _ = self.writer.send(Command::logout()).await;
        let _ = self.cancel.send(true);
        self.mailbox.close_all();
        self.reader_task.abort();
        let _ = self.watchdog_task.await;
    }
}

/// A started media stream; yields H.264 NAL slices until the connection
/// closes or the media channel desyncs unrecoverably.
pub struct MediaStream {
    extractor: Extractor<tokio::net::tcp::OwnedReadHalf>,
}

impl MediaStream {
    /// Returns the next complete NAL slice, or `Ok(None)` on clean EOF.
    pub async fn next_frame(&mut self) -> Result<Option<Vec<u8>>> {
        self.extractor.next_nal().await
    }
}

/// Reads framed command-channel messages, touching the watchdog on every
/// message, replying to heartbeats inline, and filing everything else
/// into the mailbox (§4.2.2's demultiplexing design).
async fn reader_loop(
    mut read_half: tokio::net::tcp::OwnedReadHalf,
    mailbox: Arc<Mailbox>,
    watchdog: Arc<Watchdog>,
    writer: Arc<CmdWriter>,
) {
    loop {
        let mut header_buf = [0u8; HEADER_LEN];
        if tokio::io::AsyncReadExt::read_exact(&mut read_half, &mut header_buf).await.is_err() {
            log::debug!("command channel reader exiting: connection closed");
            mailbox.close_all();
            return;
        }
        let header = match decode_command_header(&header_buf) {
            Ok((_, h)) => h,
            Err(_) => {
                log::warn!("command channel header desync, dropping connection");
                mailbox.close_all();
                return;
            }
        };

        let mut body = vec![0u8; header.body_len as usize];
        if tokio::io::AsyncReadExt::read_exact(&mut read_half, &mut body).await.is_err() {
            mailbox.close_all();
            return;
        }
        watchdog.touch();

        let reply = match parse_reply(&body) {
            Ok(r) => r,
            Err(e) => {
                log::warn!("dropping unparseable command reply: {e}");
                continue;
            }
        };

        if reply.root_tag == "HeartBeatNotice" {
            // Echoes the notice's own txn id rather than allocating a
            // fresh one (§8: "matching reply's TxnID equals the issuing
            // request's").
            if let Err(e) = writer.send_with_txn(Command::heartbeat_reply(), header.txn_id).await {
                log::warn!("failed to send heartbeat reply: {e}");
            }
            continue;
        }

        mailbox.deliver(reply);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn dial_failure_reports_address() {
        // Port 0 on loopback never accepts a connection.
        let result = Connection::connect("127.0.0.1", 0, "admin", "pw").await;
        assert!(matches!(result, Err(Error::DialFailed { .. })));
    }
}
