//! Switchboard Server
//!
//! Run with: cargo run --bin switchboard -- --config switchboard.toml
//!
//! # Configuration
//!
//! Settings come from the TOML file given with `--config` (or the default
//! locations), then `SWITCHBOARD_*` environment variables, then the flags
//! below. `RUST_LOG` overrides the configured log level.

use clap::Parser;
use std::path::PathBuf;

use switchboard::api::{serve, AppState};
use switchboard::config::Config;

#[derive(Parser)]
#[command(name = "switchboard")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Real-time channel server: WebSocket hub and push-stream fallback")]
struct Args {
    /// Path to a TOML config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Host to bind to
    #[arg(long)]
    host: Option<String>,

    /// Port to listen on
    #[arg(short, long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => Config::load_with_env(path)?,
        None => Config::load_default(),
    };
    if let Some(host) = args.host {
        config.server.host = host;
    }
    if let Some(port) = args.port {
        config.server.port = port;
    }

    config.logging.init();

    tracing::info!("Starting Switchboard v{}", env!("CARGO_PKG_VERSION"));
    if config.auth.required && config.auth.tokens.is_empty() {
        tracing::warn!("Authentication is required but no tokens are configured; every session will be rejected");
    }
    tracing::info!(
        max_connections = config.server.max_connections,
        push_heartbeat_ms = config.server.push_heartbeat_interval_ms,
        "Server limits"
    );

    let addr = config.server.addr();
    let state = AppState::new(&config);
    serve(state, &addr).await?;

    tracing::info!("Switchboard stopped");
    Ok(())
}
