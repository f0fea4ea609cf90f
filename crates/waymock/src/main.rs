use anyhow::Context;
use clap::Parser;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;
use waymock::config::{RelayConfig, UnhandledRequestPolicy};
use waymock::relay::RelayServer;
use waymock::transport::channel;

#[derive(Parser, Debug)]
#[command(name = "waymock-relay", about = "Relay server for shared HTTP mocking")]
struct Args {
    /// Host to bind the HTTP listener to.
    #[arg(long)]
    host: Option<String>,
    /// Port to bind (0 for an ephemeral port).
    #[arg(short, long)]
    port: Option<u16>,
    /// YAML config file; flags override its values.
    #[arg(short, long)]
    config: Option<String>,
    /// Timeout in milliseconds for each responses/create call.
    #[arg(long)]
    response_timeout_ms: Option<u64>,
    /// Policy for unmatched requests: ignore, warn, or error.
    #[arg(long, value_parser = parse_policy)]
    on_unhandled: Option<UnhandledRequestPolicy>,
}

fn parse_policy(value: &str) -> Result<UnhandledRequestPolicy, String> {
    match value {
        "ignore" => Ok(UnhandledRequestPolicy::Ignore),
        "warn" => Ok(UnhandledRequestPolicy::Warn),
        "error" => Ok(UnhandledRequestPolicy::Error),
        other => Err(format!("unknown policy '{other}'")),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => RelayConfig::from_file(path)
            .with_context(|| format!("failed to load config file {path}"))?,
        None => RelayConfig::default(),
    };
    if let Some(host) = args.host {
        config.host = host;
    }
    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(timeout) = args.response_timeout_ms {
        config.response_timeout_ms = timeout;
    }
    if let Some(policy) = args.on_unhandled {
        config.on_unhandled = policy;
    }

    // Workers join over the control channel; this binary wires the
    // in-process implementation, suitable for same-process workers.
    let (relay_channel, _connector) = channel::in_process();
    let relay = RelayServer::new(config, Arc::new(relay_channel));
    let running = relay.start().await?;

    tokio::signal::ctrl_c().await.ok();
    running.shutdown();
    Ok(())
}
