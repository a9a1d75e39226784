// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! `hive-mind status`: swarm overview, agents and task progress.

use anyhow::Result;
use clap::Args;
use colored::Colorize;

use hive_mind_core::application::collective_memory::compute_stats;
use hive_mind_core::domain::agent::{Agent, AgentRole, AgentStatus};
use hive_mind_core::domain::swarm::{Swarm, SwarmStatus};
use hive_mind_core::domain::task::{Task, TaskStatus};
use hive_mind_swarm::domain::report::SwarmReport;

use crate::context::HiveMindContext;

#[derive(Args, Debug)]
pub struct StatusArgs {
    /// Swarm id or name (default: most recent active swarm)
    pub swarm: Option<String>,

    /// List every swarm instead of one report
    #[arg(long)]
    pub all: bool,

    /// Print the report as JSON
    #[arg(long)]
    pub json: bool,
}

pub async fn execute(args: StatusArgs, ctx: &HiveMindContext) -> Result<()> {
    if args.all {
        return list_swarms(ctx, args.json).await;
    }

    let swarm = ctx.resolve_swarm(args.swarm.as_deref()).await?;
    let agents = ctx.store.list_agents(swarm.id).await?;
    let tasks = ctx.store.list_tasks(swarm.id).await?;
    let report = load_report(ctx, swarm).await?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    print_report(&report);
    print_agents(&agents);
    print_tasks(&tasks);
    Ok(())
}

/// Builds a report straight from the store, without attaching a coordinator.
pub async fn load_report(ctx: &HiveMindContext, swarm: Swarm) -> Result<SwarmReport> {
    let agents = ctx.store.list_agents(swarm.id).await?;
    let tasks = ctx.store.list_tasks(swarm.id).await?;
    let decisions = ctx.store.list_consensus_decisions(swarm.id).await?;
    let memory = ctx.store.list_memory_entries(swarm.id, None).await?;

    Ok(SwarmReport::build(swarm, &agents, &tasks)
        .with_decisions(&decisions)
        .with_memory(compute_stats(&memory)))
}

async fn list_swarms(ctx: &HiveMindContext, json: bool) -> Result<()> {
    let swarms = ctx.store.list_swarms().await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&swarms)?);
        return Ok(());
    }
    if swarms.is_empty() {
        println!("{}", "No swarms yet.".dimmed());
        return Ok(());
    }

    println!(
        "{:<36}  {:<24}  {:<10}  {:<10}  {}",
        "ID".bold(),
        "NAME".bold(),
        "STATUS".bold(),
        "QUEEN".bold(),
        "CREATED".bold()
    );
    for swarm in swarms {
        println!(
            "{:<36}  {:<24}  {:<10}  {:<10}  {}",
            swarm.id,
            truncate(&swarm.name, 24),
            colored_swarm_status(swarm.status),
            swarm.queen_type,
            swarm.created_at.format("%Y-%m-%d %H:%M")
        );
    }
    Ok(())
}

pub fn print_report(report: &SwarmReport) {
    let swarm = &report.swarm;
    println!("{} {}", "Swarm:".bold(), swarm.name);
    println!("  ID:         {}", swarm.id);
    println!("  Objective:  {}", swarm.objective);
    println!("  Status:     {}", colored_swarm_status(swarm.status));
    println!(
        "  Queen:      {} | topology {} | consensus {}",
        swarm.queen_type, swarm.topology, swarm.consensus
    );
    println!(
        "  Workers:    {} live (max {})",
        report.live_workers, swarm.max_workers
    );
    println!(
        "  Progress:   {} {}% ({}/{} tasks)",
        progress_bar(report.completion_percentage),
        report.completion_percentage,
        report.completed_tasks,
        report.total_tasks
    );
    if let Some(avg) = report.average_task_duration_ms {
        println!("  Avg task:   {avg} ms");
    }
    println!(
        "  Consensus:  {} decided, {} aborted",
        report.decisions_made, report.decisions_aborted
    );
    if let Some(memory) = &report.memory {
        println!(
            "  Memory:     {} entries, {} bytes, {} compressed",
            memory.total_entries, memory.total_size, memory.compressed_entries
        );
    }
}

fn print_agents(agents: &[Agent]) {
    println!();
    println!("{}", "Agents:".bold());
    for agent in agents {
        let role = match agent.role {
            AgentRole::Queen => "👑".to_string(),
            AgentRole::Worker => " ".to_string(),
        };
        println!(
            "  {} {:<16} {:<12} {}",
            role,
            truncate(&agent.name, 16),
            agent.agent_type,
            colored_agent_status(agent.status)
        );
    }
}

fn print_tasks(tasks: &[Task]) {
    if tasks.is_empty() {
        return;
    }
    println!();
    println!("{}", "Tasks:".bold());
    let mut sorted: Vec<&Task> = tasks.iter().collect();
    sorted.sort_by_key(|t| (std::cmp::Reverse(t.priority), t.created_at));
    for task in sorted {
        let marker = match task.status {
            TaskStatus::Completed => "✓".green(),
            TaskStatus::InProgress => "▶".cyan(),
            TaskStatus::Failed => "✗".red(),
            TaskStatus::Pending => "·".dimmed(),
        };
        let retries = if task.retry_count > 0 {
            format!(" (retry {}/{})", task.retry_count, task.max_retries)
        } else {
            String::new()
        };
        println!("  {} [{:>3}] {}{}", marker, task.priority, task.description, retries.yellow());
    }
}

pub(crate) fn colored_swarm_status(status: SwarmStatus) -> colored::ColoredString {
    match status {
        SwarmStatus::Active => status.as_str().green(),
        SwarmStatus::Paused => status.as_str().yellow(),
        SwarmStatus::Completed => status.as_str().blue(),
        SwarmStatus::Failed => status.as_str().red(),
    }
}

fn colored_agent_status(status: AgentStatus) -> colored::ColoredString {
    match status {
        AgentStatus::Idle => status.as_str().dimmed(),
        AgentStatus::Active => status.as_str().cyan(),
        AgentStatus::Busy => status.as_str().green(),
        AgentStatus::Failed => status.as_str().red(),
        AgentStatus::Terminated => status.as_str().strikethrough(),
    }
}

fn progress_bar(percentage: u8) -> String {
    let filled = (percentage as usize).min(100) / 5;
    format!("[{}{}]", "#".repeat(filled), "-".repeat(20 - filled))
}

pub(crate) fn truncate(text: &str, width: usize) -> String {
    if text.chars().count() <= width {
        return text.to_string();
    }
    let mut cut: String = text.chars().take(width.saturating_sub(1)).collect();
    cut.push('…');
    cut
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_progress_bar_bounds() {
        assert_eq!(progress_bar(0), format!("[{}]", "-".repeat(20)));
        assert_eq!(progress_bar(100), format!("[{}]", "#".repeat(20)));
        assert_eq!(progress_bar(50).matches('#').count(), 10);
    }

    #[test]
    fn test_truncate_keeps_width() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("a-very-long-swarm-name", 8).chars().count(), 8);
    }
}
