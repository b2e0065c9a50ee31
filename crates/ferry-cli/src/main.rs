//! Ferry CLI
//!
//! Upload files to a Ferry server and check them against the server's copy.

use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use ferry_cli::client::remote_name_for;
use ferry_cli::progress::mib_per_sec;
use ferry_cli::{ClientConfig, FerryClient, TransferProgress, format_bytes};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

/// Ferry - chunked file transfer client
#[derive(Parser)]
#[command(name = "ferry")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Enable debug output (implies --verbose)
    #[arg(short, long, global = true)]
    debug: bool,

    /// Configuration file path (default: ~/.config/ferry/client.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Server endpoint, e.g. http://127.0.0.1:50051
    #[arg(short, long, global = true)]
    server: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Upload a file
    Send {
        /// File to send
        file: PathBuf,

        /// Name to store the file under (default: the file's own name)
        #[arg(short, long)]
        name: Option<String>,

        /// Payload bytes per chunk
        #[arg(long)]
        chunk_size: Option<usize>,

        /// Skip checksum verification after the upload
        #[arg(long)]
        no_verify: bool,
    },

    /// Show whether a file exists on the server, its size and checksum
    Info {
        /// Remote file name
        name: String,
    },

    /// Compare a local file with the server's copy
    Verify {
        /// Local file
        file: PathBuf,

        /// Remote name (default: the file's own name)
        #[arg(short, long)]
        name: Option<String>,
    },
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
        Some(path) => {
            ClientConfig::load(path).with_context(|| format!("loading {}", path.display()))?
        }
        None => ClientConfig::load_or_default()?,
    };
    if let Some(server) = cli.server {
        config.server.endpoint = server;
    }
    if let Commands::Send {
        chunk_size: Some(size),
        ..
    } = &cli.command
    {
        config.transfer.chunk_size = *size;
    }
    config.validate()?;

    let mut client = FerryClient::connect(&config)
        .await
        .with_context(|| format!("connecting to {}", config.server.endpoint))?;

    match cli.command {
        Commands::Send {
            file,
            name,
            no_verify,
            ..
        } => send(&mut client, &file, name, !no_verify).await,
        Commands::Info { name } => info(&mut client, &name).await,
        Commands::Verify { file, name } => verify(&mut client, &file, name).await,
    }
}

async fn send(
    client: &mut FerryClient,
    file: &Path,
    name: Option<String>,
    verify_after: bool,
) -> anyhow::Result<()> {
    let remote_name = match name {
        Some(name) => name,
        None => remote_name_for(file)?,
    };
    let size = tokio::fs::metadata(file)
        .await
        .with_context(|| format!("reading {}", file.display()))?
        .len();

    let progress = TransferProgress::new(size, &remote_name);
    let report = client.send_file(file, &remote_name, &progress).await;
    let report = match report {
        Ok(report) => report,
        Err(e) => {
            progress.abandon("failed");
            return Err(e.into());
        }
    };

    if !report.success {
        progress.abandon("rejected");
        tracing::error!("Transfer failed: {}", report.message);
        bail!(
            "server rejected {}: {} ({} of {} bytes received)",
            remote_name,
            report.message,
            report.bytes_received,
            report.bytes_sent
        );
    }
    progress.finish("done");

    println!("{}", report.message);
    println!(
        "  Sent:     {} in {} chunks",
        format_bytes(report.bytes_sent),
        report.total_chunks
    );
    println!(
        "  Time:     {:.2}s ({:.2} MiB/s)",
        report.elapsed.as_secs_f64(),
        mib_per_sec(report.bytes_sent, report.elapsed)
    );
    println!("  BLAKE3:   {}", report.local_checksum);

    if verify_after {
        let remote = client.file_info(&remote_name).await?;
        let size_ok = remote.file_size == report.bytes_sent as i64;
        if remote.exists && size_ok && remote.checksum == report.local_checksum {
            println!("  Verified: server checksum matches");
        } else {
            bail!(
                "verification failed for {}: server has exists={}, size={}, checksum={:?}",
                remote_name,
                remote.exists,
                remote.file_size,
                remote.checksum
            );
        }
    }

    Ok(())
}

async fn info(client: &mut FerryClient, name: &str) -> anyhow::Result<()> {
    let info = client.file_info(name).await?;
    if !info.exists {
        println!("{name}: not found");
        return Ok(());
    }
    println!("{name}");
    println!(
        "  Size:   {} ({} bytes)",
        format_bytes(u64::try_from(info.file_size).unwrap_or_default()),
        info.file_size
    );
    println!("  BLAKE3: {}", info.checksum);
    Ok(())
}

async fn verify(client: &mut FerryClient, file: &Path, name: Option<String>) -> anyhow::Result<()> {
    let remote_name = match name {
        Some(name) => name,
        None => remote_name_for(file)?,
    };

    let verification = client.verify(file, &remote_name).await?;
    println!("Local:  {} ({} bytes)", verification.local_checksum, verification.local_size);
    if verification.remote.exists {
        println!(
            "Remote: {} ({} bytes)",
            verification.remote.checksum, verification.remote.file_size
        );
    } else {
        println!("Remote: not found");
    }

    if !verification.matches() {
        bail!("{} does not match the server's {}", file.display(), remote_name);
    }
    println!("Checksums match");
    Ok(())
}
