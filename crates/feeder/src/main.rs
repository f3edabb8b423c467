//! Standalone CLI (C5): logs into one DVR channel and writes the raw
//! H.264 elementary stream to stdout. Exit codes per the external
//! interface: `0` clean shutdown, `1` auth/protocol failure, `2` network
//! failure, `64` usage error.

use std::process::ExitCode;

use clap::Parser;
use dvrgate_core::session::Connection;
use dvrgate_core::Error;
use tokio::io::AsyncWriteExt;

/// Logs into one DVR channel and streams raw H.264 to stdout.
#[derive(Parser, Debug)]
#[command(name = "feeder", version, about)]
struct Opt {
    /// Channel to request, 0-based.
    #[arg(long)]
    channel: u8,

    /// 0 = main (HD), 1 = sub (SD).
    #[arg(long = "stream-type", value_parser = stream_type_parse)]
    stream_type: u8,

    /// DVR host. Falls back to `DVR_HOST`.
    #[arg(long)]
    host: Option<String>,

    /// Command-channel port. Falls back to `DVR_CMD_PORT`, default 5050.
    #[arg(long = "cmd-port")]
    cmd_port: Option<u16>,

    /// Media-channel port. Falls back to `DVR_MEDIA_PORT`, default 6050.
    #[arg(long = "media-port")]
    media_port: Option<u16>,

    /// Falls back to `DVR_USERNAME`, default "admin".
    #[arg(long)]
    username: Option<String>,

    /// Falls back to `DVR_PASSWORD`.
    #[arg(long)]
    password: Option<String>,

    /// Verbose logging (debug level).
    #[arg(short = 'v', long)]
    verbose: bool,
}

fn stream_type_parse(src: &str) -> Result<u8, String> {
    match src {
        "0" => Ok(0),
        "1" => Ok(1),
        other => Err(format!("stream-type must be 0 or 1, got {other:?}")),
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let opt = Opt::parse();

    let default_filter = if opt.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .init();

    let host = match opt.host.or_else(|| std::env::var("DVR_HOST").ok()) {
        Some(h) => h,
        None => {
            eprintln!("feeder: --host or DVR_HOST is required");
            return ExitCode::from(64);
        }
    };
    let cmd_port = opt
        .cmd_port
        .or_else(|| std::env::var("DVR_CMD_PORT").ok().and_then(|s| s.parse().ok()))
        .unwrap_or(5050);
    let media_port = opt
        .media_port
        .or_else(|| std::env::var("DVR_MEDIA_PORT").ok().and_then(|s| s.parse().ok()))
        .unwrap_or(6050);
    let username = opt
        .username
        .or_else(|| std::env::var("DVR_USERNAME").ok())
        .unwrap_or_else(|| "admin".to_string());
    let password = match opt.password.or_else(|| std::env::var("DVR_PASSWORD").ok()) {
        Some(p) => p,
        None => {
            eprintln!("feeder: --password or DVR_PASSWORD is required");
            return ExitCode::from(64);
        }
    };

    match run(&host, cmd_port, media_port, opt.channel, opt.stream_type, &username, &password).await {
        Ok(()) => ExitCode::from(0),
        Err(Error::AuthFailed { .. }) | Err(Error::ProtocolError(_)) | Err(Error::NotLoggedIn) => {
            ExitCode::from(1)
        }
        Err(e) => {
            log::error!("feeder failed: {e}");
            ExitCode::from(2)
        }
    }
}

async fn run(
    host: &str,
    cmd_port: u16,
    media_port: u16,
    channel: u8,
    stream_type: u8,
    username: &str,
    password: &str,
) -> dvrgate_core::Result<()> {
    log::info!("connecting to {host}:{cmd_port} channel={channel} stream_type={stream_type}");
    let conn = Connection::connect(host, cmd_port, username, password).await?;
    let mut stream = conn.open_stream(channel, stream_type, media_port).await?;

    let mut stdout = tokio::io::stdout();
    let mut shutdown = std::pin::pin!(tokio::signal::ctrl_c());

    loop {
        tokio::select! {
            frame = stream.next_frame() => {
                match frame? {
                    Some(nal) => stdout.write_all(&nal).await.map_err(dvrgate_core::Error::Io)?,
                    None => {
                        log::info!("media channel closed cleanly");
                        break;
                    }
                }
            }
            _ = &mut shutdown => {
                log::info!("received shutdown signal");
                break;
            }
        }
    }

    conn.close().await;
    Ok(())
}
