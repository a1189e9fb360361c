//! Switchboard CLI
//!
//! Command-line client for a Switchboard server:
//! - Listen on channels
//! - Send targeted or channel messages
//! - Broadcast to a channel
//! - Publish server-side change events over HTTP

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use serde_json::Value;
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::broadcast;

use switchboard::api::dto::{PublishRequest, PublishResponse};
use switchboard::client::{ClientEvent, RealtimeClient, SessionCredentials};
use switchboard::config::{generate_default_config, ClientConfig, Config};
use switchboard::protocol::{codec, Channel};

const ACK_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Parser)]
#[command(name = "switchboard-cli")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Client for Switchboard real-time channels")]
#[command(long_about = "Connect to a Switchboard server, listen on channels, and send messages.\nCredentials can also be supplied with SWITCHBOARD_TOKEN.")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// WebSocket endpoint (overrides the config file)
    #[arg(long, global = true)]
    pub url: Option<String>,

    /// HTTP base URL for the publish API
    #[arg(long, default_value = "http://localhost:8090", global = true)]
    pub api_url: String,

    /// Session token
    #[arg(short, long, global = true)]
    pub token: Option<String>,

    /// User id claimed for the session
    #[arg(short, long, global = true)]
    pub user: Option<String>,

    /// Path to a TOML config file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Log connection activity (default: warnings only)
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Print every envelope received on the given channels
    Listen {
        /// Channels to subscribe to (default: all)
        channels: Vec<String>,
    },

    /// Send a message on a channel, optionally to one user
    Send {
        channel: String,
        /// JSON payload; plain text is sent as a string
        data: String,
        /// Deliver only to this user id
        #[arg(long)]
        to: Option<String>,
    },

    /// Broadcast to every subscriber of a channel
    Broadcast {
        channel: String,
        /// JSON payload; plain text is sent as a string
        data: String,
    },

    /// Publish a server-originated event over HTTP
    Publish {
        channel: String,
        /// JSON payload; plain text is sent as a string
        data: String,
        /// Event type for push streams (default: CHANGE)
        #[arg(short, long)]
        event: Option<String>,
    },

    /// Generate default config file
    InitConfig {
        /// Output path (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => Config::load_with_env(path)?,
        None => Config::from_env(),
    };
    if !cli.verbose {
        config.logging.level = "warn".to_string();
    }
    config.logging.init();

    match &cli.command {
        Commands::Listen { channels } => {
            let channels = if channels.is_empty() {
                Channel::ALL.to_vec()
            } else {
                parse_channels(channels)?
            };

            let client = open_client(&cli, config.client.clone())?;
            let _handles: Vec<_> = channels
                .iter()
                .map(|&channel| {
                    client.subscribe(channel, |envelope| {
                        println!("{}", codec::encode(envelope)?);
                        Ok(())
                    })
                })
                .collect();

            let mut events = client.events();
            client.connect().await?;
            eprintln!(
                "Listening on {} (Ctrl+C to stop)",
                channels.iter().map(Channel::to_string).collect::<Vec<_>>().join(", ")
            );

            loop {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => break,
                    event = events.recv() => match event {
                        Ok(ClientEvent::StateChanged(state)) => eprintln!("[{}]", state),
                        Ok(ClientEvent::AuthError { message }) => bail!("Authentication failed: {}", message),
                        Ok(ClientEvent::MaxReconnectExceeded { attempts }) => {
                            bail!("Gave up after {} reconnect attempts", attempts)
                        }
                        Ok(ClientEvent::ServerError { message }) => eprintln!("Server error: {}", message),
                        Ok(_) => {}
                        Err(broadcast::error::RecvError::Lagged(_)) => {}
                        Err(broadcast::error::RecvError::Closed) => break,
                    },
                }
            }

            client.disconnect().await;
        }

        Commands::Send { channel, data, to } => {
            let channel = parse_channel(channel)?;
            let client = open_client(&cli, config.client.clone())?;
            let mut events = client.events();
            client.connect().await?;

            client.send(channel, parse_data(data), to.as_deref());
            let reached = wait_for_ack(&mut events).await?;
            println!("Delivered to {} recipient(s) on {}", reached, channel);

            client.disconnect().await;
        }

        Commands::Broadcast { channel, data } => {
            let channel = parse_channel(channel)?;
            let client = open_client(&cli, config.client.clone())?;
            let mut events = client.events();
            client.connect().await?;

            client.broadcast(channel, parse_data(data));
            let reached = wait_for_ack(&mut events).await?;
            println!("Broadcast reached {} subscriber(s) on {}", reached, channel);

            client.disconnect().await;
        }

        Commands::Publish { channel, data, event } => {
            let request = PublishRequest {
                channel: channel.clone(),
                data: parse_data(data),
                event: event.clone(),
            };

            let response = reqwest::Client::new()
                .post(format!("{}/api/v1/publish", cli.api_url.trim_end_matches('/')))
                .json(&request)
                .send()
                .await
                .with_context(|| format!("Cannot reach Switchboard API at {}", cli.api_url))?;

            if response.status().is_success() {
                let published: PublishResponse = response.json().await?;
                println!(
                    "Published to {}: {} socket subscriber(s), {} push stream(s)",
                    published.channel, published.subscriber_count, published.push_streams
                );
            } else {
                let status = response.status();
                let text = response.text().await.unwrap_or_default();
                bail!("Publish failed ({}): {}", status, text);
            }
        }

        Commands::InitConfig { output } => {
            let content = generate_default_config();
            match output {
                Some(path) => {
                    std::fs::write(path, content)
                        .with_context(|| format!("Failed to write {:?}", path))?;
                    println!("Config written to {:?}", path);
                }
                None => print!("{}", content),
            }
        }
    }

    Ok(())
}

/// Build a client with credentials from flags or `SWITCHBOARD_TOKEN`
fn open_client(cli: &Cli, mut config: ClientConfig) -> anyhow::Result<RealtimeClient> {
    if let Some(url) = &cli.url {
        config.url = url.clone();
    }

    let token = cli
        .token
        .clone()
        .or_else(|| std::env::var("SWITCHBOARD_TOKEN").ok())
        .context("A session token is required (--token or SWITCHBOARD_TOKEN)")?;

    let mut credentials = SessionCredentials::new(token);
    if let Some(user) = &cli.user {
        credentials = credentials.user(user.as_str());
    }

    let client = RealtimeClient::new(config);
    client.set_credentials(credentials);
    Ok(client)
}

/// Wait for the server's `message_sent` / `broadcast_sent` acknowledgement
async fn wait_for_ack(events: &mut broadcast::Receiver<ClientEvent>) -> anyhow::Result<usize> {
    let ack = async {
        loop {
            match events.recv().await {
                Ok(ClientEvent::MessageSent { recipient_count, .. }) => return Ok(recipient_count),
                Ok(ClientEvent::BroadcastSent { subscriber_count, .. }) => return Ok(subscriber_count),
                Ok(ClientEvent::ServerError { message }) => bail!("Server error: {}", message),
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => bail!("Client shut down before acknowledgement"),
            }
        }
    };

    tokio::time::timeout(ACK_TIMEOUT, ack)
        .await
        .context("Timed out waiting for acknowledgement")?
}

fn parse_channel(name: &str) -> anyhow::Result<Channel> {
    Ok(name.parse::<Channel>()?)
}

fn parse_channels(names: &[String]) -> anyhow::Result<Vec<Channel>> {
    names
        .iter()
        .flat_map(|n| n.split(','))
        .map(|n| parse_channel(n.trim()))
        .collect()
}

/// Accept JSON, fall back to a plain string
fn parse_data(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}
