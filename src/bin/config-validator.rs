//! # Dispatcher Configuration Validator
//!
//! Command-line tool that loads dispatcher configuration the same way the
//! library does and reports problems before a dispatcher starts.

use std::path::PathBuf;
use std::process;

use actions_core::config::ConfigManager;
use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser)]
#[command(name = "config-validator")]
#[command(about = "Validate action dispatcher configuration")]
#[command(version = env!("CARGO_PKG_VERSION"))]
pub struct Cli {
    /// Environment whose override file is layered on top (development, test, production)
    #[arg(short, long)]
    environment: Option<String>,

    /// Configuration directory (default: config)
    #[arg(short, long)]
    config_dir: Option<PathBuf>,

    /// Verbose output level (use multiple times for more verbosity)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Load and validate configuration
    Validate,

    /// Print the merged configuration with secrets masked
    Show,
}

fn main() {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };

    let _subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .try_init();

    let result = match cli.command {
        Some(Commands::Show) => show_config(&cli),
        Some(Commands::Validate) | None => validate_config(&cli),
    };

    match result {
        Ok(()) => {
            info!("Configuration validation completed successfully");
        }
        Err(e) => {
            error!("Configuration validation failed: {e:#}");
            eprintln!("Configuration invalid: {e:#}");
            process::exit(1);
        }
    }
}

fn load(cli: &Cli) -> anyhow::Result<std::sync::Arc<ConfigManager>> {
    let environment = cli
        .environment
        .clone()
        .unwrap_or_else(ConfigManager::detect_environment);

    ConfigManager::load_from_directory_with_env(cli.config_dir.clone(), &environment)
        .with_context(|| format!("loading configuration for environment '{environment}'"))
}

fn validate_config(cli: &Cli) -> anyhow::Result<()> {
    let manager = load(cli)?;
    let config = manager.config();

    println!("Environment:      {}", manager.environment());
    println!("Config directory: {}", manager.config_directory().display());
    println!("Instance:         {}", config.instance_id);
    println!(
        "Database pool:    {}..{} connections",
        config.database.min_connections, config.database.max_connections
    );
    println!(
        "Pagination:       default {} / max {}",
        config.pagination.default_limit, config.pagination.max_limit
    );
    println!("Configuration is valid");
    Ok(())
}

fn show_config(cli: &Cli) -> anyhow::Result<()> {
    let manager = load(cli)?;
    let dump = serde_json::to_string_pretty(&manager.debug_config())
        .context("serializing configuration")?;
    println!("{dump}");
    Ok(())
}
