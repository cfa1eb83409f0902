//! Skiff CLI
//!
//! Peer-to-peer file drop for devices sharing a network

mod config;
mod progress;

use anyhow::Context;
use clap::{Parser, Subcommand};
use console::style;
use skiff_core::{MemoryNetwork, Node, NodeConfig, PeerStatus};
use skiff_discovery::memory::MemoryDirectory;
use skiff_files::{OutgoingFile, ReceivedFile};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

use config::Config;
use progress::{TransferProgress, format_bytes};

/// Skiff - drop files onto nearby devices
#[derive(Parser)]
#[command(name = "skiff")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Configuration file path (defaults to ~/.config/skiff/config.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Send a file between two in-process devices over the loopback network
    Demo {
        /// File to send
        #[arg(required = true)]
        file: PathBuf,

        /// Directory the receiving device writes to
        #[arg(short, long, default_value = ".")]
        output: PathBuf,
    },

    /// Print the effective configuration
    Config,

    /// Write a default configuration file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config_path = cli.config.clone().unwrap_or_else(Config::default_path);
    let config = if cli.config.is_some() {
        Config::load(&config_path)
            .with_context(|| format!("Failed to load {}", config_path.display()))?
    } else {
        Config::load_or_default(&config_path)?
    };

    // Initialize logging
    let level = if cli.verbose {
        "debug".to_string()
    } else {
        config.logging.level.to_lowercase()
    };
    tracing_subscriber::fmt().with_env_filter(level).init();

    config.validate()?;

    match cli.command {
        Commands::Demo { file, output } => {
            run_demo(&file, &output, &config).await?;
        }
        Commands::Config => {
            show_config(&config_path, &config)?;
        }
        Commands::Init { force } => {
            init_config(&config_path, force)?;
        }
    }

    Ok(())
}

/// Join two devices to one in-memory directory and send `file` between them
async fn run_demo(file: &Path, output: &Path, config: &Config) -> anyhow::Result<()> {
    let outgoing = OutgoingFile::from_path(file)
        .await
        .with_context(|| format!("Cannot read {}", file.display()))?;

    tokio::fs::create_dir_all(output).await?;

    let directory = MemoryDirectory::new();
    let network = MemoryNetwork::new();

    let sender_config = config.node_config()?;
    let receiver_config = NodeConfig {
        device_name: skiff_core::config::generate_device_name(),
        ..sender_config.clone()
    };

    let (tx, mut rx) = mpsc::unbounded_channel::<ReceivedFile>();
    let receiver = Node::join(
        receiver_config,
        Arc::new(directory.clone()),
        Arc::new(directory.clone()),
        Arc::new(network.clone()),
        move |_, file| {
            let _ = tx.send(file);
        },
    )
    .await?;

    let sender = Node::join(
        sender_config,
        Arc::new(directory.clone()),
        Arc::new(directory.clone()),
        Arc::new(network.clone()),
        |_, _| {},
    )
    .await?;

    println!(
        "{} {} -> {}",
        style("Devices:").bold(),
        style(sender.name()).cyan(),
        style(receiver.name()).cyan()
    );
    println!("File: {}", file.display());
    println!("Size: {}", format_bytes(outgoing.size));
    println!("Type: {}", outgoing.mime_type);

    wait_for_peer(&sender, receiver.id(), sender.config().connect_timeout).await?;

    let progress = TransferProgress::new(outgoing.size, &outgoing.name);
    let report = sender.send_file(receiver.id(), &outgoing, &progress).await?;

    let received = tokio::time::timeout(Duration::from_secs(30), rx.recv())
        .await
        .context("Timed out waiting for the receiving device")?
        .context("Receiving device stopped")?;

    let target = received_path(output, &received.name)?;
    tokio::fs::write(&target, &received.payload)
        .await
        .with_context(|| format!("Cannot write {}", target.display()))?;
    tracing::debug!("Wrote {} bytes to {}", received.payload.len(), target.display());

    let stats = network.stats(sender.id(), receiver.id());
    println!(
        "{} {} ({}) received at {}",
        style("Done:").green().bold(),
        target.display(),
        format_bytes(received.size),
        received.received_at
    );
    println!(
        "Frames: {} ({} binary), {} on the wire, file id {}",
        stats.messages,
        stats.binary_frames,
        format_bytes(stats.bytes),
        report.file_id
    );

    sender.leave().await?;
    receiver.leave().await?;
    Ok(())
}

/// Where to store a received file. Only the final component of the sender's
/// name is used, so a name can never point outside `output`.
fn received_path(output: &Path, name: &str) -> anyhow::Result<PathBuf> {
    let file_name = Path::new(name)
        .file_name()
        .with_context(|| format!("Received file name {name:?} is not usable"))?;
    Ok(output.join(file_name))
}

/// Wait until `node` tracks `peer` and that peer is connected
async fn wait_for_peer(node: &Node, peer: &str, timeout: Duration) -> anyhow::Result<()> {
    tokio::time::timeout(timeout, async {
        let mut events = node.subscribe();
        while node.status(peer) != PeerStatus::Connected {
            let _ = tokio::time::timeout(Duration::from_millis(50), events.recv()).await;
        }
    })
    .await
    .with_context(|| format!("Device {peer} did not connect"))
}

/// Print the effective configuration
fn show_config(path: &Path, config: &Config) -> anyhow::Result<()> {
    println!("{} {}", style("Config file:").bold(), path.display());
    if !path.exists() {
        println!("(not present, showing defaults)");
    }
    println!();
    print!("{}", toml::to_string_pretty(config)?);
    Ok(())
}

/// Write a default configuration file
fn init_config(path: &Path, force: bool) -> anyhow::Result<()> {
    if path.exists() && !force {
        anyhow::bail!(
            "{} already exists (use --force to overwrite)",
            path.display()
        );
    }

    Config::default().save(path)?;
    println!("Wrote {}", path.display());
    Ok(())
}
