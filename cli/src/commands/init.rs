// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! `hive-mind init`: write a starter configuration and create the database.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::Args;
use colored::Colorize;
use tracing::info;

use hive_mind_core::application::repository_factory::create_store;
use hive_mind_core::domain::config::{DatabaseBackend, HiveMindConfig, CONFIG_DIR, CONFIG_FILE};

use crate::options::HiveOptions;

#[derive(Args, Debug)]
pub struct InitArgs {
    /// Overwrite an existing configuration
    #[arg(long)]
    pub force: bool,

    /// Directory holding the configuration and database
    #[arg(long, default_value = CONFIG_DIR)]
    pub dir: PathBuf,
}

pub async fn execute(args: InitArgs, options: &HiveOptions) -> Result<()> {
    let config_path = initialize(&args.dir, args.force, options).await?;

    println!("{} Hive mind initialized", "✓".green());
    println!("  Config:    {}", config_path.display());
    println!("  Database:  {}", database_url(&args.dir));
    println!();
    println!("Next: {}", "hive-mind spawn \"<objective>\"".bold());
    Ok(())
}

/// Writes the config file and runs migrations. Returns the config path.
pub async fn initialize(dir: &Path, force: bool, options: &HiveOptions) -> Result<PathBuf> {
    let config_path = dir.join(CONFIG_FILE);
    if config_path.exists() && !force {
        bail!(
            "{} already exists; pass --force to overwrite it",
            config_path.display()
        );
    }

    std::fs::create_dir_all(dir).with_context(|| format!("Failed to create {}", dir.display()))?;

    let mut config = HiveMindConfig::default();
    config.database.backend = DatabaseBackend::Sqlite;
    config.database.url = database_url(dir);
    options.apply(&mut config);
    config.validate().context("Configuration validation failed")?;
    config
        .to_yaml_file(&config_path)
        .with_context(|| format!("Failed to write {}", config_path.display()))?;

    create_store(&config.storage_backend())
        .await
        .context("Failed to create the hive mind database")?;
    info!(path = %config_path.display(), "Hive mind initialized");
    Ok(config_path)
}

fn database_url(dir: &Path) -> String {
    format!("sqlite://{}/hive.db", dir.display())
}
