// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! `hive-mind resume`: continue a paused (or interrupted) session.

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;

use hive_mind_swarm::application::session::SessionManager;

use crate::commands::{drive, status};
use crate::context::HiveMindContext;

#[derive(Args, Debug)]
pub struct ResumeArgs {
    /// Session id, or the id or name of its swarm
    pub session: String,
}

pub async fn execute(args: ResumeArgs, ctx: &HiveMindContext) -> Result<()> {
    let session = ctx.resolve_session(&args.session).await?;
    let queen = SessionManager::new(ctx.swarm_context())
        .resume(session.id)
        .await
        .with_context(|| format!("Failed to resume session {}", session.id))?;

    println!("{}", "▶ Session resumed".green().bold());
    status::print_report(&queen.status().await?);
    println!();

    drive(ctx, queen).await
}
