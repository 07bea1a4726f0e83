//! xcprobe tool server binary.
//!
//! Serves the capability catalog over newline-delimited JSON-RPC on
//! stdin/stdout. Logs go to stderr.
//!
//! # Environment Variables
//!
//! - `XCPROBE_MODE`  : capability profile: "minimal" (default) or "full"
//! - `XCPROBE_CONFIG`: path to a YAML config file
//! - `RUST_LOG`      : tracing filter (default: "info,xcprobe=debug")
//!
//! # Usage
//!
//! ```bash
//! xcprobe-server --mode full
//! xcprobe-server --config ~/.config/xcprobe.yaml
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;

use xcprobe::capabilities::ProfileId;
use xcprobe::catalog::builtin_registry;
use xcprobe::config::ServerConfig;
use xcprobe::dispatch::DispatchEngine;
use xcprobe::execution::ProcessAdapter;
use xcprobe::server::Server;
use xcprobe::transport::LineChannel;

#[derive(Debug, Parser)]
#[command(name = "xcprobe-server", version, about = "Local developer-tool server for coding agents")]
struct Cli {
    /// Capability profile to expose.
    #[arg(long, env = "XCPROBE_MODE")]
    mode: Option<ProfileId>,

    /// YAML configuration file.
    #[arg(long, env = "XCPROBE_CONFIG")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // stdout carries protocol messages; logs must stay on stderr.
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,xcprobe=debug".into()),
        )
        .init();

    let cli = Cli::parse();
    let mut config = ServerConfig::load(cli.config.as_deref()).context("loading configuration")?;
    if let Some(mode) = cli.mode {
        config = config.with_mode(mode);
    }

    let registry = builtin_registry(&config).context("building capability registry")?;
    let profile = registry.activate(config.mode);
    tracing::info!(
        version = xcprobe::VERSION,
        profile = %config.mode,
        capabilities = profile.len(),
        "xcprobe starting"
    );

    let engine = DispatchEngine::new(profile, Arc::new(ProcessAdapter::new()));
    let server = Server::new(engine);

    tokio::select! {
        served = server.run(LineChannel::stdio()) => served.context("serving stdio")?,
        _ = tokio::signal::ctrl_c() => tracing::info!("interrupted, shutting down"),
    }
    Ok(())
}
