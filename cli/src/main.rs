// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! # Hive Mind CLI
//!
//! The `hive-mind` binary spawns and supervises agent swarms led by a queen.
//!
//! ## Commands
//!
//! - `hive-mind init` - Write `.hive-mind/config.yaml` and create the database
//! - `hive-mind spawn <objective>` - Start a swarm and run it in the foreground
//! - `hive-mind status|metrics|memory|consensus` - Inspect a swarm
//! - `hive-mind sessions|resume` - Manage paused sessions
//!
//! Every command accepts the global swarm options (`--queen-type`,
//! `--max-workers`, `--consensus`, `--memory-size`, `--auto-scale`,
//! `--encryption`, `--monitor`).

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::PathBuf;

use hive_mind::commands::{
    self, ConsensusArgs, InitArgs, MemoryArgs, MetricsArgs, ResumeArgs, SessionsArgs, SpawnArgs, StatusArgs,
};
use hive_mind::context::HiveMindContext;
use hive_mind_core::domain::config::HiveMindConfig;
use hive_mind::options::HiveOptions;

/// Hive Mind - queen-led agent swarms with collective memory and consensus
#[derive(Parser)]
#[command(name = "hive-mind")]
#[command(version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Path to configuration file (overrides discovery)
    #[arg(
        short,
        long,
        global = true,
        env = "HIVE_MIND_CONFIG_PATH",
        value_name = "FILE"
    )]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error); overrides observability.log_level
    #[arg(long, global = true, value_name = "LEVEL")]
    log_level: Option<String>,

    /// Log format (compact, json); overrides observability.log_format
    #[arg(long, global = true, value_name = "FORMAT")]
    log_format: Option<String>,

    #[command(flatten)]
    options: HiveOptions,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize configuration and storage
    Init(InitArgs),

    /// Spawn a swarm for an objective
    Spawn(SpawnArgs),

    /// Show swarm status
    Status(StatusArgs),

    /// List sessions
    Sessions(SessionsArgs),

    /// Resume a paused session
    Resume(ResumeArgs),

    /// Inspect or propose consensus decisions
    Consensus(ConsensusArgs),

    /// Inspect and maintain collective memory
    Memory(MemoryArgs),

    /// Per-agent performance metrics
    Metrics(MetricsArgs),
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    if let Err(err) = run(cli).await {
        eprintln!("{} {err:#}", "error:".red().bold());
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let mut config = HiveMindConfig::load_or_default(cli.config).context("Failed to load configuration")?;
    if let Some(level) = cli.log_level {
        config.observability.log_level = level;
    }
    if let Some(format) = cli.log_format {
        config.observability.log_format = format;
    }
    cli.options.apply(&mut config);
    config.validate().context("Configuration validation failed")?;
    init_logging(&config.observability.log_level, &config.observability.log_format)?;

    if let Commands::Init(args) = cli.command {
        return commands::init::execute(args, &cli.options).await;
    }

    let ctx = HiveMindContext::from_config(config, cli.options).await?;
    match cli.command {
        Commands::Init(_) => Ok(()),
        Commands::Spawn(args) => commands::spawn::execute(args, &ctx).await,
        Commands::Status(args) => commands::status::execute(args, &ctx).await,
        Commands::Sessions(args) => commands::sessions::execute(args, &ctx).await,
        Commands::Resume(args) => commands::resume::execute(args, &ctx).await,
        Commands::Consensus(args) => commands::consensus::execute(args, &ctx).await,
        Commands::Memory(args) => commands::memory::execute(args, &ctx).await,
        Commands::Metrics(args) => commands::metrics::execute(args, &ctx).await,
    }
}

/// Initialize tracing subscriber for logging. Logs go to stderr; stdout
/// carries command output.
fn init_logging(level: &str, format: &str) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(level))
        .context("Failed to create log filter")?;

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false);

    match format {
        "json" => builder.json().init(),
        _ => builder.compact().init(),
    }

    Ok(())
}
