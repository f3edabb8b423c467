//! Tiny CLI invoked by the embedded RTSP server's on-demand callbacks
//! (§4.3.1: `runOnDemand`/`runOnUnDemand`). Translates `start`/`stop
//! --channel N` into an HTTP call against this process's own control
//! API, which holds the actual `Hook` channel to the ingest supervisor.

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "dvrgate-hook")]
struct Opt {
    #[command(subcommand)]
    action: Action,
}

#[derive(Subcommand)]
enum Action {
    Start {
        #[arg(long)]
        channel: u8,
    },
    Stop {
        #[arg(long)]
        channel: u8,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let opt = Opt::parse();
    let base = std::env::var("DVRGATE_API_URL").unwrap_or_else(|_| "http://127.0.0.1:8080".to_string());
    let (verb, channel) = match opt.action {
        Action::Start { channel } => ("start", channel),
        Action::Stop { channel } => ("stop", channel),
    };
    let url = format!("{base}/api/ingest/{channel}/{verb}");

    let resp = reqwest::Client::new().post(&url).send().await?;
    if !resp.status().is_success() {
        anyhow::bail!("hook request to {url} failed: {}", resp.status());
    }
    Ok(())
}
