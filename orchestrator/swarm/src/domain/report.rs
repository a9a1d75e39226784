// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Swarm Report
//!
//! Point-in-time figures for one swarm, built from store rows. Backs the
//! coordinator's `status()` and the CLI `status` and `metrics` commands.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use hive_mind_core::domain::agent::{Agent, AgentRole, AgentStatus};
use hive_mind_core::domain::consensus::{ConsensusDecision, DecisionStatus};
use hive_mind_core::domain::memory::MemoryStats;
use hive_mind_core::domain::session::completion_percentage;
use hive_mind_core::domain::swarm::Swarm;
use hive_mind_core::domain::task::{Task, TaskStatus};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SwarmReport {
    pub swarm: Swarm,
    pub agents_by_status: BTreeMap<String, usize>,
    pub tasks_by_status: BTreeMap<String, usize>,
    /// Workers that are not terminated.
    pub live_workers: usize,
    pub total_tasks: usize,
    pub completed_tasks: usize,
    pub completion_percentage: u8,
    /// Mean wall time of completed tasks.
    pub average_task_duration_ms: Option<u64>,
    pub decisions_made: usize,
    pub decisions_aborted: usize,
    pub memory: Option<MemoryStats>,
}

impl SwarmReport {
    pub fn build(swarm: Swarm, agents: &[Agent], tasks: &[Task]) -> Self {
        let mut agents_by_status = BTreeMap::new();
        for agent in agents {
            *agents_by_status.entry(agent.status.as_str().to_string()).or_insert(0) += 1;
        }
        let mut tasks_by_status = BTreeMap::new();
        for task in tasks {
            *tasks_by_status.entry(task.status.as_str().to_string()).or_insert(0) += 1;
        }

        let durations: Vec<i64> = tasks
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

        Self {
            swarm,
            agents_by_status,
            tasks_by_status,
            live_workers: agents
                .iter()
                .filter(|a| a.role == AgentRole::Worker && a.status != AgentStatus::Terminated)
                .count(),
            total_tasks: tasks.len(),
            completed_tasks: tasks.iter().filter(|t| t.status == TaskStatus::Completed).count(),
            completion_percentage: completion_percentage(tasks),
            average_task_duration_ms,
            decisions_made: 0,
            decisions_aborted: 0,
            memory: None,
        }
    }

    pub fn with_decisions(mut self, decisions: &[ConsensusDecision]) -> Self {
        self.decisions_made = decisions.iter().filter(|d| d.status == DecisionStatus::Decided).count();
        self.decisions_aborted = decisions.len() - self.decisions_made;
        self
    }

    pub fn with_memory(mut self, stats: MemoryStats) -> Self {
        self.memory = Some(stats);
        self
    }

    pub fn agents_in(&self, status: AgentStatus) -> usize {
        self.agents_by_status.get(status.as_str()).copied().unwrap_or(0)
    }

    pub fn tasks_in(&self, status: TaskStatus) -> usize {
        self.tasks_by_status.get(status.as_str()).copied().unwrap_or(0)
    }
}
