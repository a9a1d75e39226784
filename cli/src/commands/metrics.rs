// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! `hive-mind metrics`: per-agent performance for one swarm.

use anyhow::Result;
use clap::Args;
use colored::Colorize;
use serde::Serialize;

use hive_mind_core::domain::agent::{Agent, AgentId};
use hive_mind_core::domain::task::{Task, TaskStatus};
use hive_mind_swarm::domain::report::SwarmReport;

use crate::commands::status::{load_report, print_report, truncate};
use crate::context::HiveMindContext;

#[derive(Args, Debug)]
pub struct MetricsArgs {
    /// Swarm id or name (default: most recent active swarm)
    pub swarm: Option<String>,

    /// Print metrics as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AgentMetrics {
    pub agent_id: AgentId,
    pub name: String,
    pub agent_type: String,
    pub status: String,
    pub completed_tasks: usize,
    pub in_progress_tasks: usize,
    pub retries: u32,
    pub average_task_duration_ms: Option<u64>,
}

#[derive(Debug, Serialize)]
struct MetricsOutput {
    report: SwarmReport,
    agents: Vec<AgentMetrics>,
}

pub async fn execute(args: MetricsArgs, ctx: &HiveMindContext) -> Result<()> {
    let swarm = ctx.resolve_swarm(args.swarm.as_deref()).await?;
    let agents = ctx.store.list_agents(swarm.id).await?;
    let tasks = ctx.store.list_tasks(swarm.id).await?;
    let report = load_report(ctx, swarm).await?;
    let per_agent = agent_metrics(&agents, &tasks);

    if args.json {
        let output = MetricsOutput {
            report,
            agents: per_agent,
        };
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    print_report(&report);
    println!(
        "  Failures:   {} tasks failed permanently",
        report.tasks_in(TaskStatus::Failed)
    );
    println!();
    println!(
        "{:<16}  {:<12}  {:<10}  {:>5}  {:>7}  {:>7}  {:>10}",
        "AGENT".bold(),
        "TYPE".bold(),
        "STATUS".bold(),
        "DONE".bold(),
        "RUNNING".bold(),
        "RETRIES".bold(),
        "AVG (ms)".bold()
    );
    for metrics in &per_agent {
        println!(
            "{:<16}  {:<12}  {:<10}  {:>5}  {:>7}  {:>7}  {:>10}",
            truncate(&metrics.name, 16),
            metrics.agent_type,
            metrics.status,
            metrics.completed_tasks,
            metrics.in_progress_tasks,
            metrics.retries,
            metrics
                .average_task_duration_ms
                .map(|ms| ms.to_string())
                .unwrap_or_else(|| "-".to_string())
        );
    }
    Ok(())
}

/// Folds task history into one row per agent, queen first.
///
/// A failed attempt clears the task's owner, so failures only show up
/// swarm-wide; retries count against the agent that finally held the task.
pub fn agent_metrics(agents: &[Agent], tasks: &[Task]) -> Vec<AgentMetrics> {
    let mut sorted: Vec<&Agent> = agents.iter().collect();
    sorted.sort_by_key(|a| (!a.is_queen(), a.created_at));

    sorted
        .into_iter()
        .map(|agent| {
            let owned: Vec<&Task> = tasks.iter().filter(|t| t.agent_id == Some(agent.id)).collect();
            let durations: Vec<i64> = owned
                .iter()
                .filter(|t| t.status == TaskStatus::Completed)
                .filter_map(|t| t.duration())
                .map(|d| d.num_milliseconds().max(0))
                .collect();
            let average_task_duration_ms = if durations.is_empty() {
                None
            } else {
                Some((durations.iter().sum::<i64>() / durations.len() as i64) as u64)
            };

            AgentMetrics {
                agent_id: agent.id,
                name: agent.name.clone(),
                agent_type: agent.agent_type.as_str().to_string(),
                status: agent.status.as_str().to_string(),
                completed_tasks: count(&owned, TaskStatus::Completed),
                in_progress_tasks: count(&owned, TaskStatus::InProgress),
                retries: owned.iter().map(|t| t.retry_count).sum(),
                average_task_duration_ms,
            }
        })
        .collect()
}

fn count(tasks: &[&Task], status: TaskStatus) -> usize {
    tasks.iter().filter(|t| t.status == status).count()
}
