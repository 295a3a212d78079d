use std::{sync::Arc, time::Duration};

use anyhow::Result;
use clap::Parser;
use client_core::{ClientConfig, RpcClient, SessionApi};
use router::navigation_channel;
use shared::protocol::ProtocolVersion;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

mod render;
mod state;
mod views;

use render::TextRenderer;
use state::AppState;
use views::build_router;

/// Text front end for an email-login RPC service. Each input line is a
/// location fragment such as `#login?email=you@example.com`.
#[derive(Parser, Debug)]
struct Args {
    #[arg(long, env = "SHELL_ENDPOINT", default_value = "http://127.0.0.1:8443/spa-api")]
    endpoint: String,
    #[arg(long, env = "SHELL_TIMEOUT_SECS", default_value_t = 30)]
    timeout_secs: u64,
    /// Wire revision to speak (1 or 2).
    #[arg(long, default_value_t = 2, value_parser = clap::value_parser!(u8).range(1..=2))]
    protocol: u8,
    /// Fragment shown on start.
    #[arg(long, default_value = "")]
    route: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()))
        .with_writer(std::io::stderr)
        .init();
    let args = Args::parse();

    let mut config = ClientConfig::new(args.endpoint);
    config.timeout = Duration::from_secs(args.timeout_secs);
    config.version = ProtocolVersion::try_from(args.protocol).map_err(anyhow::Error::msg)?;
    let client = RpcClient::connect(config).await?;
    info!(methods = client.methods().len(), version = ?client.version(), "connected");

    let state = Arc::new(AppState::new(SessionApi::new(client)));
    if let Err(error) = state.refresh_session().await {
        warn!(%error, "could not fetch session status; starting signed out");
    }

    let (navigator, events) = navigation_channel(args.route);
    let router = Arc::new(build_router(
        state,
        Arc::new(TextRenderer::stdout()),
        navigator.clone(),
    ));
    let dispatcher = tokio::spawn(router.run(events));
    navigator.load();

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        match line.trim() {
            "" => continue,
            "quit" | "exit" => break,
            "refresh" => navigator.refresh(),
            fragment => {
                if !navigator.set_fragment(fragment) {
                    navigator.refresh();
                }
            }
        }
    }

    // The router holds a navigator of its own, so its event stream never
    // closes by itself.
    dispatcher.abort();
    Ok(())
}
