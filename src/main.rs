//! Hub Client CLI
//!
//! ## Usage
//!
//! ```bash
//! # Print the hubs described by a config file
//! hub-client --config hubs.toml structure
//!
//! # Call one server method and print the reply
//! hub-client --url ws://localhost:8888 call ChatHub send '"hello"' 42
//!
//! # Print every server push for the configured client functions
//! hub-client --config hubs.toml listen
//! ```
//!
//! Arguments to `call` are parsed as JSON; anything that fails to parse is
//! sent as a string.

use anyhow::Context;
use clap::{Parser, Subcommand};
use hub_client::hub::ClientHandler;
use hub_client::{ClientConfig, DisconnectPolicy, HubClient};
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "hub-client")]
#[command(about = "Call hub methods and watch server pushes over a WebSocket")]
struct Args {
    /// Path to config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Hub server WebSocket URL
    #[arg(long, env = "HUB_URL")]
    url: Option<String>,

    /// Per-call timeout in milliseconds
    #[arg(long)]
    timeout_ms: Option<u64>,

    /// Reconnect delay in seconds (-1 disables reconnection)
    #[arg(long, allow_negative_numbers = true)]
    reconnect_seconds: Option<i64>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the configured hubs as JSON
    Structure,

    /// Call a server method and print the reply
    Call {
        hub: String,
        function: String,
        /// Positional arguments (JSON, or bare strings)
        args: Vec<String>,
    },

    /// Print server pushes until Ctrl-C
    Listen,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("hub_client=info".parse()?))
        .init();

    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => ClientConfig::load(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => ClientConfig::default(),
    };

    // Apply CLI overrides
    if let Some(url) = args.url {
        config.url = url;
    }
    if let Some(ms) = args.timeout_ms {
        config.call_timeout_ms = ms;
    }
    if let Some(seconds) = args.reconnect_seconds {
        config.reconnect_timeout_seconds = seconds;
    }

    match args.command {
        Command::Structure => {
            let registry = config.registry()?;
            println!("{}", serde_json::to_string_pretty(&registry.structure())?);
        }
        Command::Call {
            hub,
            function,
            args: raw_args,
        } => {
            // A one-shot call should fail rather than wait out reconnects.
            config.reconnect_timeout_seconds = -1;
            config.disconnect_policy = DisconnectPolicy::FailFast;
            let client = HubClient::builder().config(config).build()?;
            client.open();

            let call_args = raw_args.iter().map(|raw| parse_arg(raw)).collect();
            info!(hub = %hub, function = %function, "Calling hub method");
            let outcome = client.call(&hub, &function, call_args).await;
            client.close().await;

            let reply = outcome.with_context(|| format!("{}.{} failed", hub, function))?;
            println!("{}", serde_json::to_string_pretty(&reply)?);
        }
        Command::Listen => {
            let client = HubClient::builder()
                .config(config)
                .on_reconnecting(|cause| warn!(cause = %cause, "Reconnecting"))
                .build()?;

            let mut slots = 0;
            for hub in client.structure() {
                for function in &hub.client_methods {
                    let (hub_name, function_name) = (hub.name.clone(), function.clone());
                    let printer: ClientHandler = Arc::new(move |args: Vec<Value>| {
                        println!("{}.{} {}", hub_name, function_name, Value::Array(args));
                        Ok(())
                    });
                    client.registry().set_handler(&hub.name, function, printer)?;
                    slots += 1;
                }
            }
            if slots == 0 {
                warn!("No client functions configured; every push will be reported as unhandled");
            }

            client.open();
            info!(url = %client.url(), slots = slots, "Listening for server pushes");

            tokio::signal::ctrl_c().await?;
            info!("Shutting down");
            tokio::time::timeout(Duration::from_secs(5), client.close())
                .await
                .context("Timed out closing connection")?;
        }
    }

    Ok(())
}

fn parse_arg(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}
