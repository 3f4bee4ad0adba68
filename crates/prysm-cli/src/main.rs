#![deny(unsafe_code)]

//! prysm CLI: runs the supervisor and drives it over the control socket.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use prysm_config::AppConfig;
use prysm_core::ipc::{IpcClient, socket_path_from_config};
use prysm_core::storage::ServicePaths;
use prysm_core::torrc::{TorrcDocument, TorrcSettings};
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Supervises a local onion-routing daemon and its hidden service.
#[derive(Parser)]
#[command(name = "prysm", version, about, long_about = None)]
struct Cli {
    /// Path to configuration file.
    #[arg(short, long, default_value = "prysm.toml")]
    config: PathBuf,

    /// Increase log verbosity (-v, -vv).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the supervisor in the foreground.
    Run,

    /// Start the onion-routing daemon and wait until it is bound.
    Start,

    /// Stop the onion-routing daemon.
    Stop,

    /// Print the published onion address, waiting for it if necessary.
    Identity,

    /// Show supervisor and daemon status.
    Status {
        /// Print the raw JSON response.
        #[arg(long)]
        json: bool,
    },

    /// Ask the supervisor to exit.
    Shutdown,

    /// Validate and display configuration.
    Config {
        /// Show the resolved configuration.
        #[arg(long)]
        show: bool,
    },

    /// Print the daemon config that `start` would write.
    Torrc,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(&cli.config).await?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(log_filter(cli.verbose, &config))),
        )
        .init();

    match cli.command {
        Commands::Run => cmd_run(config).await?,
        Commands::Start => cmd_start(&config).await?,
        Commands::Stop => cmd_stop(&config).await?,
        Commands::Identity => cmd_identity(&config).await?,
        Commands::Status { json } => cmd_status(&config, json).await?,
        Commands::Shutdown => cmd_shutdown(&config).await?,
        Commands::Config { show } => cmd_config(&cli.config, &config, show)?,
        Commands::Torrc => print!("{}", render_torrc(&config)?),
    }

    Ok(())
}

/// `-v` flags win over the configured level.
fn log_filter(verbose: u8, config: &AppConfig) -> &str {
    match verbose {
        0 => config.logging.level.as_str(),
        1 => "debug",
        _ => "trace",
    }
}

async fn cmd_run(config: AppConfig) -> Result<()> {
    info!(version = %prysm_core::build_info::version_string(), "Starting prysm supervisor");
    let daemon = prysm_core::Daemon::new(config)?;
    daemon.run().await?;
    Ok(())
}

fn client(config: &AppConfig) -> IpcClient {
    IpcClient::new(socket_path_from_config(config))
}

async fn cmd_start(config: &AppConfig) -> Result<()> {
    let started = client(config).start().await?;
    match started.daemon_pid {
        Some(pid) => println!("Onion-routing daemon bound (pid {pid})."),
        None => println!("Onion-routing daemon bound."),
    }
    Ok(())
}

async fn cmd_stop(config: &AppConfig) -> Result<()> {
    let stopped = client(config).stop().await?;
    println!("Stopped (was {}).", stopped.previous_state);
    Ok(())
}

async fn cmd_identity(config: &AppConfig) -> Result<()> {
    let identity = client(config).identity().await?;
    println!("{}", identity.address);
    Ok(())
}

async fn cmd_status(config: &AppConfig, json: bool) -> Result<()> {
    let status = client(config).status().await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&status)?);
        return Ok(());
    }
    println!("state:        {}", status.state);
    println!("epoch:        {}", status.epoch);
    if let Some(pid) = status.daemon_pid {
        println!("daemon pid:   {pid}");
    }
    if let Some(cause) = &status.last_stop_cause {
        println!("last stop:    {cause}");
    }
    println!("working dir:  {}", status.working_dir);
    println!("service dir:  {}", status.hidden_service_dir);
    println!(
        "supervisor:   pid {} up {}s ({} {})",
        status.pid, status.uptime_secs, status.version, status.git_hash
    );
    Ok(())
}

async fn cmd_shutdown(config: &AppConfig) -> Result<()> {
    let ack = client(config).shutdown().await?;
    println!("{}", ack.message);
    Ok(())
}

fn cmd_config(config_path: &Path, config: &AppConfig, show: bool) -> Result<()> {
    if show {
        let toml_str = toml::to_string_pretty(config).context("failed to render configuration")?;
        println!("{toml_str}");
    } else {
        println!("Configuration at '{}' is valid.", config_path.display());
    }
    Ok(())
}

fn render_torrc(config: &AppConfig) -> Result<String> {
    let paths = ServicePaths::from_config(config)?;
    Ok(TorrcDocument::build(&paths, &TorrcSettings::from_config(config)).render())
}

/// Load and validate `path`, or fall back to defaults when it does not exist.
async fn load_config(path: &Path) -> Result<AppConfig> {
    if !path.exists() {
        return Ok(AppConfig::default());
    }
    AppConfig::load(path)
        .await
        .with_context(|| format!("failed to load configuration from '{}'", path.display()))
}
