//! Ferry server
//!
//! Receives chunked uploads over gRPC into a single upload directory.

use anyhow::Context;
use clap::Parser;
use ferry_server::{FerryServer, ServerConfig};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Ferry - chunked file transfer server
#[derive(Parser)]
#[command(name = "ferry-server")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Enable debug output (implies --verbose)
    #[arg(short, long)]
    debug: bool,

    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Listen address (overrides server.listen_addr)
    #[arg(long)]
    listen: Option<String>,

    /// Upload directory (overrides storage.upload_dir)
    #[arg(long)]
    upload_dir: Option<PathBuf>,

    /// Idle-chunk timeout in seconds (overrides transfer.idle_chunk_timeout_secs)
    #[arg(long)]
    idle_timeout: Option<u64>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging; RUST_LOG wins when set
    let log_level = if cli.debug {
        "trace"
    } else if cli.verbose {
        "debug"
    } else {
        "info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let mut config = match &cli.config {
        Some(path) => ServerConfig::load(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => ServerConfig::default(),
    };

    if let Some(listen) = cli.listen {
        config.server.listen_addr = listen;
    }
    if let Some(upload_dir) = cli.upload_dir {
        config.storage.upload_dir = upload_dir;
    }
    if let Some(idle) = cli.idle_timeout {
        config.transfer.idle_chunk_timeout_secs = idle;
    }

    let server = FerryServer::new(config)
        .await
        .context("failed to start server")?;

    server
        .serve_with_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("Failed to listen for Ctrl-C: {}", e);
                std::future::pending::<()>().await;
            }
            tracing::info!("Shutting down...");
        })
        .await?;

    Ok(())
}
