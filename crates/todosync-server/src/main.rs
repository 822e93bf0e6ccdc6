//! todosync command-line tool.
//!
//! # Usage
//!
//! ```bash
//! # Serve lists until Ctrl-C
//! todosync serve
//!
//! # Fetch and merge a peer's lists
//! todosync pull 192.168.1.20
//!
//! # Ask a peer to fetch ours
//! todosync push 192.168.1.20:5364
//! ```

use std::{io::Write, path::PathBuf};

use clap::{Parser, Subcommand};
use todosync_core::{SyncConfig, SyncError};
use todosync_server::SyncNode;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Encrypted peer-to-peer to-do list sync
#[derive(Parser, Debug)]
#[command(name = "todosync")]
#[command(about = "Encrypted peer-to-peer to-do list sync")]
#[command(version)]
struct Args {
    /// Data directory holding the configuration and lists (default ~/.todo)
    #[arg(long)]
    config_dir: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Override the configured listening address
    #[arg(long)]
    address: Option<String>,

    /// Override the configured listening port
    #[arg(long)]
    port: Option<u16>,

    /// Refuse pull requests regardless of the configuration
    #[arg(long)]
    no_pull: bool,

    /// Refuse push requests regardless of the configuration
    #[arg(long)]
    no_push: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the sync server until interrupted
    Serve,
    /// Pull lists from HOST[:PORT] and merge them
    Pull {
        /// Peer address
        host: String,
    },
    /// Invite HOST[:PORT] to pull our lists
    Push {
        /// Peer address
        host: String,
    },
    /// Show list and item counts
    Status,
    /// Write the default configuration if none exists
    InitConfig,
}

fn apply_overrides(config: &mut SyncConfig, args: &Args) {
    if let Some(address) = &args.address {
        config.server.address.clone_from(address);
    }
    if let Some(port) = args.port {
        config.server.port = port;
    }
    if args.no_pull {
        config.server.allow_pull = false;
    }
    if args.no_push {
        config.server.allow_push = false;
    }
    config.validate();
}

fn report(line: &str) -> std::io::Result<()> {
    writeln!(std::io::stdout().lock(), "{line}")
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::registry().with(fmt::layer()).with(filter).init();

    let data_dir = match &args.config_dir {
        Some(dir) => dir.clone(),
        None => SyncConfig::default_dir()?,
    };
    tracing::debug!(dir = %data_dir.display(), "using data directory");

    if matches!(args.command, Command::InitConfig) {
        SyncConfig::load_or_init(&data_dir)?;
        report(&format!("Configuration in {}", data_dir.display()))?;
        return Ok(());
    }

    let node = SyncNode::open_with(&data_dir, |config| apply_overrides(config, &args))?;

    match args.command {
        Command::Serve => {
            let addr = node.start_server().await?;
            tracing::info!("Serving lists on {}, Ctrl-C to stop", addr);
            tokio::signal::ctrl_c().await?;
            node.stop_server().await?;
        },
        Command::Pull { host } => {
            let status = node.sync_pull(&host).await.map_err(describe)?;
            report(&status.to_string())?;
        },
        Command::Push { host } => {
            node.start_server().await?;
            let result = node.sync_push(&host).await;
            node.stop_server().await?;
            report(&result.map_err(describe)?.to_string())?;
        },
        Command::Status => {
            let db = node.store().snapshot();
            report(&format!(
                "{} lists, {} to-dos, active list: {}",
                db.list_count,
                db.todo_total,
                db.active_list.as_deref().unwrap_or("-")
            ))?;
        },
        Command::InitConfig => {},
    }

    Ok(())
}

fn describe(error: SyncError) -> String {
    format!("{:?} error: {error}", error.category())
}
