// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! `hive-mind sessions`: list sessions, optionally with their recent log.

use anyhow::Result;
use clap::Args;
use colored::Colorize;

use hive_mind_core::domain::session::{LogLevel, SessionStatus};

use crate::commands::status::truncate;
use crate::context::HiveMindContext;

#[derive(Args, Debug)]
pub struct SessionsArgs {
    /// Also print the last N log entries of each session
    #[arg(long, value_name = "N")]
    pub logs: Option<usize>,

    /// Print sessions as JSON
    #[arg(long)]
    pub json: bool,
}

pub async fn execute(args: SessionsArgs, ctx: &HiveMindContext) -> Result<()> {
    let sessions = ctx.store.list_sessions().await?;
    if args.json {
        println!("{}", serde_json::to_string_pretty(&sessions)?);
        return Ok(());
    }
    if sessions.is_empty() {
        println!("{}", "No sessions yet.".dimmed());
        return Ok(());
    }

    for session in sessions {
        let swarm_name = ctx
            .store
            .get_swarm(session.swarm_id)
            .await?
            .map(|s| s.name)
            .unwrap_or_else(|| "(deleted)".to_string());
        let status = match session.status {
            SessionStatus::Active => session.status.as_str().green(),
            SessionStatus::Paused => session.status.as_str().yellow(),
            SessionStatus::Completed => session.status.as_str().blue(),
        };

        println!(
            "{}  {:<24}  {:<9}  {:>3}%  {} agents  {}/{} tasks  {}",
            session.id,
            truncate(&swarm_name, 24),
            status,
            session.completion_percentage,
            session.agent_count,
            session.completed_task_count,
            session.task_count,
            session.updated_at.format("%Y-%m-%d %H:%M").to_string().dimmed()
        );

        if let Some(limit) = args.logs {
            for entry in ctx.store.session_log_tail(session.id, limit).await? {
                let level = match entry.level {
                    LogLevel::Info => entry.level.as_str().dimmed(),
                    LogLevel::Warn => entry.level.as_str().yellow(),
                    LogLevel::Error => entry.level.as_str().red(),
                };
                println!(
                    "    {} {:<5} {}",
                    entry.timestamp.format("%H:%M:%S").to_string().dimmed(),
                    level,
                    entry.message
                );
            }
        }
    }
    Ok(())
}
