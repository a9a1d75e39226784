// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! `hive-mind spawn`: create a swarm for an objective and run it.

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;

use hive_mind_core::domain::swarm::Topology;
use hive_mind_swarm::application::queen::{QueenCoordinator, SpawnRequest};
use hive_mind_swarm::application::session::SessionManager;

use crate::commands::{drive, status};
use crate::context::HiveMindContext;

#[derive(Args, Debug)]
pub struct SpawnArgs {
    /// What the swarm should achieve
    pub objective: String,

    /// Swarm name (default: derived from the objective)
    #[arg(long)]
    pub name: Option<String>,

    /// Communication topology (mesh, hierarchical, ring, star, hybrid)
    #[arg(long, value_name = "TOPOLOGY")]
    pub topology: Option<Topology>,

    /// Start with no tasks instead of the standard phase breakdown
    #[arg(long)]
    pub no_decompose: bool,

    /// Checkpoint and pause right after spawning instead of running
    #[arg(long)]
    pub detach: bool,
}

pub async fn execute(args: SpawnArgs, ctx: &HiveMindContext) -> Result<()> {
    let mut request = SpawnRequest::from_defaults(args.objective, &ctx.config.swarm);
    request.name = args.name;
    request.decompose = !args.no_decompose;
    if let Some(topology) = args.topology {
        request.topology = topology;
    }

    let queen = QueenCoordinator::spawn_swarm(ctx.swarm_context(), request)
        .await
        .context("Failed to spawn swarm")?;

    println!("{}", "🐝 Swarm spawned".green().bold());
    status::print_report(&queen.status().await?);
    println!();

    if args.detach {
        let session = SessionManager::new(ctx.swarm_context()).pause(queen.swarm_id()).await?;
        println!("Swarm paused. Resume with: hive-mind resume {}", session.id);
        return Ok(());
    }

    drive(ctx, queen).await
}
