//! Reference client node: measures round-trip times through a master node.
//!
//! Connects, subscribes to `{client_id}/test_rtt`, sends records on that
//! topic one at a time and prints min/max/avg of the round trips.
//!
//! Usage:
//!   tn-rtt-node --host master.local --messages 100
//!
//! Env vars:
//!   TN_CONFIG  path to the node TOML config (default: "node.toml")
//!   RUST_LOG   tracing filter (default: "info")

mod config;
mod probe;

use std::time::Duration;

use clap::Parser;
use tn_node_sdk::ClientNodeBuilder;
use tracing_subscriber::EnvFilter;

/// Round-trip-time probe for a topicnode master node.
#[derive(Debug, Parser)]
#[command(name = "tn-rtt-node", version, about)]
struct Cli {
    /// Config file (overrides TN_CONFIG).
    #[arg(long)]
    config: Option<String>,
    /// Master node host (overrides the config file).
    #[arg(long)]
    host: Option<String>,
    /// Master node service port (overrides the config file).
    #[arg(long)]
    port: Option<u16>,
    /// Number of round trips to measure.
    #[arg(long, default_value_t = 10)]
    messages: u32,
    /// How long to wait for each message to come back.
    #[arg(long, default_value_t = 2000)]
    timeout_ms: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let (mut cfg, config_path) = config::load_config(cli.config.as_deref())?;
    if let Some(host) = cli.host {
        cfg.master.host = host;
    }
    if let Some(port) = cli.port {
        cfg.master.service_port = port;
    }
    tracing::info!(
        config = %config_path,
        master = %cfg.master.service_base_url(),
        messages = cli.messages,
        "starting rtt probe"
    );

    let node = ClientNodeBuilder::new().config(cfg).build()?;
    node.connect().await?;
    node.wait_for_connection().await?;

    let result = probe::run_probe(&node, cli.messages, Duration::from_millis(cli.timeout_ms)).await;

    if let Err(e) = node.disconnect().await {
        tracing::warn!(error = %e, "disconnect failed");
    }

    let stats = result?;
    match (stats.min(), stats.max(), stats.avg()) {
        (Some(min), Some(max), Some(avg)) => println!(
            "{} round trips: min {:.3} ms, max {:.3} ms, avg {:.3} ms",
            stats.count(),
            min.as_secs_f64() * 1000.0,
            max.as_secs_f64() * 1000.0,
            avg.as_secs_f64() * 1000.0,
        ),
        _ => println!("no round trips measured"),
    }
    Ok(())
}
