//! sse-listen - Command-line listener for server event streams
//!
//! Subscribes to one or more channels and prints every message until Ctrl+C.

mod config;
mod output;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use sse_client::{ClientConfig, CommandKind, ServerEventsClient};
use tracing::debug;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::config::Config;
use crate::output::{OutputContext, OutputFormat};

#[derive(Parser)]
#[command(name = "sse-listen")]
#[command(author, version, about = "Listen to a server event stream")]
struct Cli {
    /// Server URL [default: http://localhost:5000]
    #[arg(short, long, env = "SSE_SERVER")]
    server: Option<String>,

    /// Channels to subscribe to (comma separated) [default: home]
    #[arg(short = 'C', long, env = "SSE_CHANNELS", value_delimiter = ',')]
    channels: Vec<String>,

    /// Configuration file path
    #[arg(short, long, env = "SSE_CONFIG")]
    config: Option<PathBuf>,

    /// Output format [default: text]
    #[arg(short, long, value_enum)]
    output: Option<OutputFormat>,

    /// Disable colored output
    #[arg(long)]
    no_color: bool,

    /// Only print events
    #[arg(short, long)]
    quiet: bool,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Set up logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .with(filter)
        .init();

    // Load config file
    let config = if let Some(config_path) = &cli.config {
        Config::load_from(config_path)?
    } else {
        Config::load().unwrap_or_default()
    };

    // Merge CLI args with config
    let merged = config.merge_with_args(
        cli.server.as_deref(),
        Some(cli.channels.as_slice()),
        cli.output.map(|o| o.as_str()),
        cli.no_color,
    );
    let format = OutputFormat::from_name(&merged.output)
        .with_context(|| format!("Unknown output format '{}'", merged.output))?;

    let ctx = Arc::new(OutputContext::new(format, merged.no_color, cli.quiet));

    let client = create_client(&merged.server, &merged.channels)?;
    install_callbacks(&client, &ctx);

    ctx.info(&format!(
        "Listening on {} ({})",
        merged.server,
        merged.channels.join(",")
    ));
    ctx.info("Press Ctrl+C to stop");

    client.start().await;

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl+C")?;

    ctx.info("\nStopping...");
    client.stop().await;
    ctx.success("Disconnected");

    Ok(())
}

/// Create an event stream client for the given server URL
fn create_client(server: &str, channels: &[String]) -> Result<ServerEventsClient> {
    let config = ClientConfig::new(server, channels);
    ServerEventsClient::with_config(config).context("Failed to create event stream client")
}

fn install_callbacks(client: &ServerEventsClient, ctx: &Arc<OutputContext>) {
    let c = ctx.clone();
    client.on_connect(move |info| c.connected(info));

    let c = ctx.clone();
    client.on_message(move |msg| c.message(msg));

    let c = ctx.clone();
    client.on_command(move |command| {
        if command.kind == CommandKind::Heartbeat {
            debug!(event_id = ?command.message.event_id, "heartbeat");
        } else {
            c.command(command);
        }
    });

    let c = ctx.clone();
    client.on_exception(move |err| c.exception(err));
}
