// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Dispatch Planning
//!
//! Matches pending tasks to idle workers. Pure: the coordinator loads rows,
//! calls [`plan_assignments`], then commits each assignment on its own.

use std::collections::HashSet;

use hive_mind_core::domain::agent::{Agent, AgentId, AgentRole, AgentStatus};
use hive_mind_core::domain::task::{Task, TaskId, TaskStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Assignment {
    pub task_id: TaskId,
    pub agent_id: AgentId,
}

/// Pending tasks in dispatch order: `priority desc, created_at asc`.
pub fn dispatch_order(tasks: &[Task]) -> Vec<&Task> {
    let mut pending: Vec<&Task> = tasks.iter().filter(|t| t.status == TaskStatus::Pending).collect();
    pending.sort_by(|a, b| {
        b.priority
            .cmp(&a.priority)
            .then_with(|| a.created_at.cmp(&b.created_at))
            .then_with(|| a.id.0.cmp(&b.id.0))
    });
    pending
}

/// Ids of completed tasks, used to resolve dependencies.
pub fn completed_ids(tasks: &[Task]) -> HashSet<TaskId> {
    tasks
        .iter()
        .filter(|t| t.status == TaskStatus::Completed)
        .map(|t| t.id)
        .collect()
}

pub fn dependencies_met(task: &Task, completed: &HashSet<TaskId>) -> bool {
    task.dependencies.iter().all(|d| completed.contains(d))
}

/// Walks pending tasks from most to least urgent and gives each to the
/// longest-standing idle worker whose capabilities cover it.
///
/// `workers` are candidates only; anything that is not an idle worker is
/// skipped. Tasks that find no worker are left out of the plan.
pub fn plan_assignments(tasks: &[Task], workers: &[Agent]) -> Vec<Assignment> {
    let completed = completed_ids(tasks);
    let mut free: Vec<&Agent> = workers
        .iter()
        .filter(|a| a.role == AgentRole::Worker && a.status == AgentStatus::Idle)
        .collect();
    free.sort_by_key(|a| (a.created_at, a.id.0));

    let mut plan = Vec::new();
    for task in dispatch_order(tasks) {
        if free.is_empty() {
            break;
        }
        if !dependencies_met(task, &completed) {
            continue;
        }
        if let Some(pos) = free.iter().position(|a| a.satisfies(&task.required_capabilities)) {
            let agent = free.remove(pos);
            plan.push(Assignment {
                task_id: task.id,
                agent_id: agent.id,
            });
        }
    }
    plan
}

/// Pending tasks whose dependencies are met but that no worker took.
pub fn ready_backlog(tasks: &[Task], plan: &[Assignment]) -> usize {
    let completed = completed_ids(tasks);
    let planned: HashSet<TaskId> = plan.iter().map(|a| a.task_id).collect();
    dispatch_order(tasks)
        .into_iter()
        .filter(|t| !planned.contains(&t.id) && dependencies_met(t, &completed))
        .count()
}
