//! compile-box daemon
//!
//! MCP server that runs submitted code in throwaway containers.
//! Configuration is read from the optional `COMPILE_BOX_CONFIG` env var.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use compile_box::{backend::ContainerBackend, config::Config, mcp, orchestrator::Orchestrator};

#[derive(Parser, Debug)]
#[command(name = "compile-box")]
#[command(about = "MCP server for sandboxed code execution")]
struct Args {
    /// Run in stdio mode (for MCP clients)
    #[arg(long)]
    stdio: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging (stderr so stdout is free for MCP protocol)
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = Config::from_env().context("Failed to load configuration")?;

    info!(
        runtime = %config.runtime,
        image = %config.image,
        template = %config.template_dir.display(),
        timeout_seconds = config.timeout_seconds,
        "Loaded configuration"
    );

    let backend = ContainerBackend::new(&config);
    let orchestrator = Orchestrator::new(Arc::new(config), backend);

    if args.stdio {
        mcp::serve_stdio(orchestrator).await?;
    } else {
        anyhow::bail!("Only --stdio mode is currently supported");
    }

    Ok(())
}
