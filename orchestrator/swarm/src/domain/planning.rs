// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Swarm Planning
//!
//! How a queen staffs a new swarm and breaks its objective into tasks.
//!
//! Decomposed tasks form a chain of phases; each phase depends on the one
//! before it, and documentation and review both wait for testing. Decomposed
//! tasks carry no capability requirements so any worker mix can make
//! progress; callers that need specialists submit tasks with explicit
//! capabilities.

use hive_mind_core::domain::agent::AgentType;
use hive_mind_core::domain::swarm::{QueenType, SwarmId};
use hive_mind_core::domain::task::{Task, TaskId};

const STRATEGIC_MIX: [AgentType; 8] = [
    AgentType::Researcher,
    AgentType::Architect,
    AgentType::Analyst,
    AgentType::Coder,
    AgentType::Tester,
    AgentType::Reviewer,
    AgentType::Documenter,
    AgentType::Optimizer,
];

const TACTICAL_MIX: [AgentType; 8] = [
    AgentType::Coder,
    AgentType::Tester,
    AgentType::Coder,
    AgentType::Reviewer,
    AgentType::Analyst,
    AgentType::Optimizer,
    AgentType::Researcher,
    AgentType::Documenter,
];

const ADAPTIVE_MIX: [AgentType; 8] = [
    AgentType::Researcher,
    AgentType::Coder,
    AgentType::Analyst,
    AgentType::Tester,
    AgentType::Architect,
    AgentType::Reviewer,
    AgentType::Optimizer,
    AgentType::Documenter,
];

/// Worker type for the `index`-th worker of a swarm led by `queen_type`.
pub fn worker_type_at(queen_type: QueenType, index: usize) -> AgentType {
    let mix = match queen_type {
        QueenType::Strategic => &STRATEGIC_MIX,
        QueenType::Tactical => &TACTICAL_MIX,
        QueenType::Adaptive => &ADAPTIVE_MIX,
    };
    mix[index % mix.len()]
}

/// Types of the first `count` workers.
pub fn worker_mix(queen_type: QueenType, count: usize) -> Vec<AgentType> {
    (0..count).map(|i| worker_type_at(queen_type, i)).collect()
}

struct Phase {
    label: &'static str,
    priority: i32,
    /// Indices of earlier phases this one waits for.
    after: &'static [usize],
}

const PHASES: [Phase; 6] = [
    Phase { label: "Analyze requirements", priority: 10, after: &[] },
    Phase { label: "Design the solution", priority: 8, after: &[0] },
    Phase { label: "Implement", priority: 6, after: &[1] },
    Phase { label: "Test", priority: 4, after: &[2] },
    Phase { label: "Document", priority: 2, after: &[3] },
    Phase { label: "Review", priority: 2, after: &[3] },
];

/// Breaks `objective` into the standard phase chain.
pub fn decompose_objective(swarm_id: SwarmId, objective: &str, max_retries: u32) -> Vec<Task> {
    let objective = objective.trim();
    let mut ids: Vec<TaskId> = Vec::with_capacity(PHASES.len());
    let mut tasks = Vec::with_capacity(PHASES.len());

    for phase in &PHASES {
        let task = Task::new(swarm_id, format!("{}: {objective}", phase.label), phase.priority)
            .with_dependencies(phase.after.iter().map(|i| ids[*i]).collect())
            .with_max_retries(max_retries);
        ids.push(task.id);
        tasks.push(task);
    }
    tasks
}
