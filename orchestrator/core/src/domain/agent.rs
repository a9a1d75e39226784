// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::domain::swarm::SwarmId;
use crate::domain::ParseEnumError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AgentId(pub Uuid);

impl AgentId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_string(s: &str) -> Result<Self, uuid::Error> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

impl Default for AgentId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentType {
    Researcher,
    Coder,
    Analyst,
    Tester,
    Architect,
    Reviewer,
    Optimizer,
    Documenter,
    Coordinator,
}

impl AgentType {
    pub const ALL: [AgentType; 9] = [
        AgentType::Researcher,
        AgentType::Coder,
        AgentType::Analyst,
        AgentType::Tester,
        AgentType::Architect,
        AgentType::Reviewer,
        AgentType::Optimizer,
        AgentType::Documenter,
        AgentType::Coordinator,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AgentType::Researcher => "researcher",
            AgentType::Coder => "coder",
            AgentType::Analyst => "analyst",
            AgentType::Tester => "tester",
            AgentType::Architect => "architect",
            AgentType::Reviewer => "reviewer",
            AgentType::Optimizer => "optimizer",
            AgentType::Documenter => "documenter",
            AgentType::Coordinator => "coordinator",
        }
    }

    /// Capabilities every agent of this type starts with.
    pub fn default_capabilities(&self) -> &'static [&'static str] {
        match self {
            AgentType::Researcher => &["research", "analysis", "web-search", "synthesis"],
            AgentType::Coder => &["code-generation", "implementation", "refactoring", "debugging"],
            AgentType::Analyst => &["analysis", "data-analysis", "pattern-recognition", "reporting"],
            AgentType::Tester => &["testing", "test-generation", "validation", "quality-assurance"],
            AgentType::Architect => &["system-design", "architecture", "planning", "api-design"],
            AgentType::Reviewer => &["code-review", "quality-assurance", "standards", "feedback"],
            AgentType::Optimizer => &["performance-optimization", "profiling", "bottleneck-analysis"],
            AgentType::Documenter => &["documentation", "technical-writing", "api-docs"],
            AgentType::Coordinator => &["coordination", "task-management", "planning", "monitoring"],
        }
    }
}

impl FromStr for AgentType {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        AgentType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| ParseEnumError::new("agent type", s))
    }
}

impl fmt::Display for AgentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentRole {
    Queen,
    Worker,
}

impl AgentRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentRole::Queen => "queen",
            AgentRole::Worker => "worker",
        }
    }
}

impl FromStr for AgentRole {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queen" => Ok(AgentRole::Queen),
            "worker" => Ok(AgentRole::Worker),
            other => Err(ParseEnumError::new("agent role", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    Idle,
    Active,
    Busy,
    Failed,
    Terminated,
}

impl AgentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentStatus::Idle => "idle",
            AgentStatus::Active => "active",
            AgentStatus::Busy => "busy",
            AgentStatus::Failed => "failed",
            AgentStatus::Terminated => "terminated",
        }
    }

    /// Agent holds (or may hold) a task in this status.
    pub fn is_engaged(&self) -> bool {
        matches!(self, AgentStatus::Active | AgentStatus::Busy)
    }

    fn can_transition_to(&self, next: AgentStatus) -> bool {
        use AgentStatus::*;
        match (self, next) {
            (Terminated, _) => false,
            (_, Terminated) => true,
            (Idle, Active) | (Active, Busy) | (Busy, Idle) | (Active, Idle) => true,
            (Idle | Active | Busy, Failed) => true,
            (Failed, Idle) => true,
            _ => false,
        }
    }
}

impl FromStr for AgentStatus {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "idle" => Ok(AgentStatus::Idle),
            "active" => Ok(AgentStatus::Active),
            "busy" => Ok(AgentStatus::Busy),
            "failed" => Ok(AgentStatus::Failed),
            "terminated" => Ok(AgentStatus::Terminated),
            other => Err(ParseEnumError::new("agent status", other)),
        }
    }
}

impl fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AgentError {
    #[error("agent {agent_id} cannot move from {from} to {to}")]
    InvalidTransition {
        agent_id: AgentId,
        from: AgentStatus,
        to: AgentStatus,
    },
}

/// A queen or worker participating in a swarm.
///
/// Agents are never deleted. Terminated agents stay in the store as an audit trail.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Agent {
    pub id: AgentId,
    pub swarm_id: SwarmId,
    pub name: String,
    pub agent_type: AgentType,
    pub role: AgentRole,
    pub status: AgentStatus,
    pub capabilities: BTreeSet<String>,
    pub created_at: DateTime<Utc>,
}

impl Agent {
    pub fn worker(swarm_id: SwarmId, name: impl Into<String>, agent_type: AgentType) -> Self {
        Self::new(swarm_id, name, agent_type, AgentRole::Worker)
    }

    pub fn queen(swarm_id: SwarmId, name: impl Into<String>) -> Self {
        Self::new(swarm_id, name, AgentType::Coordinator, AgentRole::Queen)
    }

    fn new(swarm_id: SwarmId, name: impl Into<String>, agent_type: AgentType, role: AgentRole) -> Self {
        Self {
            id: AgentId::new(),
            swarm_id,
            name: name.into(),
            agent_type,
            role,
            status: AgentStatus::Idle,
            capabilities: agent_type
                .default_capabilities()
                .iter()
                .map(|c| c.to_string())
                .collect(),
            created_at: Utc::now(),
        }
    }

    pub fn is_queen(&self) -> bool {
        self.role == AgentRole::Queen
    }

    pub fn is_terminated(&self) -> bool {
        self.status == AgentStatus::Terminated
    }

    /// True when every capability in `required` is present on this agent.
    pub fn satisfies(&self, required: &BTreeSet<String>) -> bool {
        required.is_subset(&self.capabilities)
    }

    pub fn transition_to(&mut self, next: AgentStatus) -> Result<(), AgentError> {
        if self.status == next {
            return Ok(());
        }
        if !self.status.can_transition_to(next) {
            return Err(AgentError::InvalidTransition {
                agent_id: self.id,
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_worker_lifecycle() {
        let mut agent = Agent::worker(SwarmId::new(), "coder-1", AgentType::Coder);
        assert_eq!(agent.status, AgentStatus::Idle);

        agent.transition_to(AgentStatus::Active).unwrap();
        agent.transition_to(AgentStatus::Busy).unwrap();
        agent.transition_to(AgentStatus::Idle).unwrap();
        agent.transition_to(AgentStatus::Terminated).unwrap();

        let err = agent.transition_to(AgentStatus::Idle).unwrap_err();
        assert!(matches!(err, AgentError::InvalidTransition { from: AgentStatus::Terminated, .. }));
    }

    #[test]
    fn test_idle_cannot_jump_to_busy() {
        let mut agent = Agent::worker(SwarmId::new(), "tester-1", AgentType::Tester);
        assert!(agent.transition_to(AgentStatus::Busy).is_err());
        assert_eq!(agent.status, AgentStatus::Idle);
    }

    #[test]
    fn test_failed_agent_recovers_to_idle() {
        let mut agent = Agent::worker(SwarmId::new(), "analyst-1", AgentType::Analyst);
        agent.transition_to(AgentStatus::Failed).unwrap();
        assert!(agent.transition_to(AgentStatus::Active).is_err());
        agent.transition_to(AgentStatus::Idle).unwrap();
    }

    #[test]
    fn test_capability_subset_matching() {
        let agent = Agent::worker(SwarmId::new(), "coder-1", AgentType::Coder);
        let mut required = BTreeSet::new();
        assert!(agent.satisfies(&required));

        required.insert("implementation".to_string());
        assert!(agent.satisfies(&required));

        required.insert("testing".to_string());
        assert!(!agent.satisfies(&required));
    }

    #[test]
    fn test_queen_is_coordinator() {
        let queen = Agent::queen(SwarmId::new(), "queen");
        assert!(queen.is_queen());
        assert_eq!(queen.agent_type, AgentType::Coordinator);
        assert!(queen.capabilities.contains("coordination"));
    }

    #[test]
    fn test_agent_type_parsing() {
        for agent_type in AgentType::ALL {
            assert_eq!(agent_type.as_str().parse::<AgentType>().unwrap(), agent_type);
        }
        assert!("wizard".parse::<AgentType>().is_err());
    }
}
