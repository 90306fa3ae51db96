//! Foundry Gateway Binary
//!
//! # Usage
//! ```bash
//! foundry-gateway [--config foundry.toml] [--port 18789] [--host 127.0.0.1] [--verbose]
//! ```

use anyhow::Context;
use clap::Parser;
use foundry_gateway::{Gateway, GatewayConfig};
use foundry_sandbox::TransportKind;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Foundry Gateway - submit code generation jobs and stream their progress
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file (.toml or .json)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Port to listen on
    #[arg(short, long)]
    port: Option<u16>,

    /// Host to bind to
    #[arg(long)]
    host: Option<String>,

    /// SQLite database file
    #[arg(long)]
    database: Option<PathBuf>,

    /// Run builds in local temp directories instead of the remote sandbox
    #[arg(long)]
    local_sandbox: bool,

    /// Enable verbose debug logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();

    // RUST_LOG wins over --verbose
    let default_level = if args.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(args.verbose)
        .with_thread_ids(args.verbose)
        .init();

    let mut config = match &args.config {
        Some(path) => GatewayConfig::from_file(path)
            .with_context(|| format!("failed to load config from {}", path.display()))?,
        None => GatewayConfig::default(),
    }
    .apply_env();

    if let Some(host) = args.host {
        config.host = host;
    }
    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(database) = args.database {
        config.database_path = Some(database);
    }
    if args.local_sandbox {
        config.sandbox.transport = TransportKind::Local;
    }

    let gateway = Gateway::from_config(config).context("failed to initialise gateway")?;

    let resumed = gateway
        .orchestrator()
        .resume_incomplete()
        .await
        .context("failed to resume unfinished jobs")?;
    if resumed > 0 {
        tracing::info!(resumed, "Resumed unfinished jobs");
    }

    let server = gateway.start();
    tokio::pin!(server);
    tokio::select! {
        result = &mut server => result?,
        _ = tokio::signal::ctrl_c() => {
            gateway.shutdown();
            server.await?;
        }
    }

    Ok(())
}
