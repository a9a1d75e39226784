// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Swarm Aggregate
//!
//! Defines the root of the coordination model:
//!
//! - [`Swarm`]: a named group of agents working one objective.
//! - [`SwarmId`]: unique identifier (UUID newtype).
//! - [`Topology`]: logical connectivity pattern and its direct-message fan-out rules.
//! - [`QueenType`]: coordination style of the swarm's queen.
//!
//! A swarm is owned by the process that created it and mutated only by the
//! queen coordinator and the session manager. It is destroyed on explicit
//! delete, never on process exit.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::agent::{Agent, AgentRole};
use crate::domain::consensus::ConsensusAlgorithm;
use crate::domain::ParseEnumError;

/// Unique identifier for a [`Swarm`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SwarmId(pub Uuid);

impl SwarmId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_string(s: &str) -> Result<Self, uuid::Error> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

impl Default for SwarmId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SwarmId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SwarmStatus {
    Active,
    Paused,
    Completed,
    Failed,
}

impl SwarmStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SwarmStatus::Active => "active",
            SwarmStatus::Paused => "paused",
            SwarmStatus::Completed => "completed",
            SwarmStatus::Failed => "failed",
        }
    }
}

impl FromStr for SwarmStatus {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(SwarmStatus::Active),
            "paused" => Ok(SwarmStatus::Paused),
            "completed" => Ok(SwarmStatus::Completed),
            "failed" => Ok(SwarmStatus::Failed),
            other => Err(ParseEnumError::new("swarm status", other)),
        }
    }
}

impl fmt::Display for SwarmStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Coordination style of the queen.
///
/// Drives the initial worker mix and how the objective is decomposed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueenType {
    #[default]
    Strategic,
    Tactical,
    Adaptive,
}

impl QueenType {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueenType::Strategic => "strategic",
            QueenType::Tactical => "tactical",
            QueenType::Adaptive => "adaptive",
        }
    }
}

impl FromStr for QueenType {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "strategic" => Ok(QueenType::Strategic),
            "tactical" => Ok(QueenType::Tactical),
            "adaptive" => Ok(QueenType::Adaptive),
            other => Err(ParseEnumError::new("queen type", other)),
        }
    }
}

impl fmt::Display for QueenType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Logical connectivity pattern governing direct agent-to-agent messaging.
///
/// | Topology | Worker may message directly |
/// |----------|-----------------------------|
/// | `mesh` | every other agent |
/// | `star` | the queen only |
/// | `hierarchical` | the queen and workers of the same agent type |
/// | `ring` | its predecessor and successor in creation order |
/// | `hybrid` | the queen and its ring neighbours among workers |
///
/// The queen may always message every agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Topology {
    Mesh,
    #[default]
    Hierarchical,
    Ring,
    Star,
    Hybrid,
}

impl Topology {
    pub fn as_str(&self) -> &'static str {
        match self {
            Topology::Mesh => "mesh",
            Topology::Hierarchical => "hierarchical",
            Topology::Ring => "ring",
            Topology::Star => "star",
            Topology::Hybrid => "hybrid",
        }
    }

    /// Whether `from` may message `to` directly.
    ///
    /// `roster` is the swarm's non-terminated agents; ring neighbours are
    /// resolved from its creation order.
    pub fn allows(&self, from: &Agent, to: &Agent, roster: &[Agent]) -> bool {
        if from.id == to.id {
            return false;
        }
        if from.role == AgentRole::Queen {
            return true;
        }

        match self {
            Topology::Mesh => true,
            Topology::Star => to.role == AgentRole::Queen,
            Topology::Hierarchical => {
                to.role == AgentRole::Queen || to.agent_type == from.agent_type
            }
            Topology::Ring => ring_neighbours(from, roster, false).contains(&to.id),
            Topology::Hybrid => {
                to.role == AgentRole::Queen || ring_neighbours(from, roster, true).contains(&to.id)
            }
        }
    }
}

fn ring_neighbours(agent: &Agent, roster: &[Agent], workers_only: bool) -> Vec<crate::domain::agent::AgentId> {
    let mut ring: Vec<&Agent> = roster
        .iter()
        .filter(|a| !workers_only || a.role == AgentRole::Worker)
        .collect();
    ring.sort_by_key(|a| (a.created_at, a.id.0));

    let Some(pos) = ring.iter().position(|a| a.id == agent.id) else {
        return Vec::new();
    };
    if ring.len() < 2 {
        return Vec::new();
    }

    let next = ring[(pos + 1) % ring.len()].id;
    let prev = ring[(pos + ring.len() - 1) % ring.len()].id;
    vec![prev, next]
}

impl FromStr for Topology {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "mesh" => Ok(Topology::Mesh),
            "hierarchical" => Ok(Topology::Hierarchical),
            "ring" => Ok(Topology::Ring),
            "star" => Ok(Topology::Star),
            "hybrid" => Ok(Topology::Hybrid),
            other => Err(ParseEnumError::new("topology", other)),
        }
    }
}

impl fmt::Display for Topology {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Aggregate root for a group of coordinated agents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Swarm {
    pub id: SwarmId,
    pub name: String,
    pub objective: String,
    pub status: SwarmStatus,
    pub queen_type: QueenType,
    pub topology: Topology,
    /// Algorithm used for every consensus proposal in this swarm.
    pub consensus: ConsensusAlgorithm,
    /// Upper bound on worker agents (the queen is not counted).
    pub max_workers: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Swarm {
    pub fn new(
        name: impl Into<String>,
        objective: impl Into<String>,
        queen_type: QueenType,
        topology: Topology,
        consensus: ConsensusAlgorithm,
        max_workers: u32,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: SwarmId::new(),
            name: name.into(),
            objective: objective.into(),
            status: SwarmStatus::Active,
            queen_type,
            topology,
            consensus,
            max_workers,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == SwarmStatus::Active
    }

    pub fn set_status(&mut self, status: SwarmStatus) {
        self.status = status;
        self.updated_at = Utc::now();
    }

    pub fn set_topology(&mut self, topology: Topology) {
        self.topology = topology;
        self.updated_at = Utc::now();
    }
}
