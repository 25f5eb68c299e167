use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::prelude::*;

use chattr_sync::config::{self, CliOverrides, ClientConfig, FileConfig};

mod cli;

#[derive(Parser)]
#[command(name = "chattr")]
#[command(about = "Live-session client for an agentchattr server")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Directory holding config.toml (defaults to ~/.chattr)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Origin the session is served from, e.g. http://127.0.0.1:8300
    #[arg(long, global = true)]
    origin: Option<String>,

    /// Session credential passed to the server
    #[arg(long, global = true)]
    token: Option<String>,

    /// Username to assume until the server sends its settings
    #[arg(long, global = true)]
    username: Option<String>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Follow the session and print messages, roster and status changes
    Watch,

    /// Send one chat message and exit
    Send(SendArgs),
}

#[derive(Parser)]
struct SendArgs {
    /// Message text
    text: String,

    /// Seconds to wait for the connection before giving up
    #[arg(long, default_value = "10")]
    wait_secs: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_directive = if cli.debug {
        "chattr_sync=debug,chattr=debug"
    } else {
        "chattr_sync=info,chattr=info"
    };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_directive));
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(env_filter)
        .init();

    let data_dir = match cli.data_dir {
        Some(dir) => dir,
        None => config::default_data_dir().context("Could not find home directory")?,
    };
    let mut file_config: FileConfig = config::load_config(&data_dir)
        .extract()
        .with_context(|| format!("Failed to load config from {:?}", data_dir))?;
    CliOverrides {
        origin: cli.origin,
        token: cli.token,
        username: cli.username,
    }
    .apply(&mut file_config);
    let client_config =
        ClientConfig::from_file(&file_config).context("Invalid connection settings")?;

    match cli.command {
        Commands::Watch => cli::watch_command(client_config).await,
        Commands::Send(args) => cli::send_command(client_config, &args.text, args.wait_secs).await,
    }
}
