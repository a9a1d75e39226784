// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Messages exchanged over the swarm bus.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::agent::AgentId;
use crate::domain::swarm::SwarmId;
use crate::domain::ParseEnumError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MessageId(pub Uuid);

impl MessageId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    Task,
    Status,
    Result,
    Consensus,
    Memory,
    Heartbeat,
}

impl MessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::Task => "task",
            MessageType::Status => "status",
            MessageType::Result => "result",
            MessageType::Consensus => "consensus",
            MessageType::Memory => "memory",
            MessageType::Heartbeat => "heartbeat",
        }
    }
}

impl FromStr for MessageType {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "task" => Ok(MessageType::Task),
            "status" => Ok(MessageType::Status),
            "result" => Ok(MessageType::Result),
            "consensus" => Ok(MessageType::Consensus),
            "memory" => Ok(MessageType::Memory),
            "heartbeat" => Ok(MessageType::Heartbeat),
            other => Err(ParseEnumError::new("message type", other)),
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Well-known topic names.
pub mod topics {
    use crate::domain::agent::AgentId;
    use crate::domain::swarm::SwarmId;

    pub fn tasks(swarm_id: SwarmId) -> String {
        format!("swarm.{swarm_id}.tasks")
    }

    pub fn results(swarm_id: SwarmId) -> String {
        format!("swarm.{swarm_id}.results")
    }

    pub fn status(swarm_id: SwarmId) -> String {
        format!("swarm.{swarm_id}.status")
    }

    pub fn heartbeat(swarm_id: SwarmId) -> String {
        format!("swarm.{swarm_id}.heartbeat")
    }

    pub fn consensus(swarm_id: SwarmId) -> String {
        format!("swarm.{swarm_id}.consensus")
    }

    pub fn memory(swarm_id: SwarmId) -> String {
        format!("swarm.{swarm_id}.memory")
    }

    /// Per-agent inbox used for direct messages and task assignment.
    pub fn agent(agent_id: AgentId) -> String {
        format!("agent.{agent_id}")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SwarmMessage {
    pub id: MessageId,
    pub swarm_id: SwarmId,
    pub sender_id: Option<AgentId>,
    pub message_type: MessageType,
    pub topic: String,
    pub payload: serde_json::Value,
    pub timestamp: DateTime<Utc>,
    /// Set when the swarm runs with encryption enabled. The bus is in-process
    /// and carries the flag for downstream sinks only.
    pub encrypted: bool,
}

impl SwarmMessage {
    pub fn new(
        swarm_id: SwarmId,
        sender_id: Option<AgentId>,
        message_type: MessageType,
        topic: impl Into<String>,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            id: MessageId::new(),
            swarm_id,
            sender_id,
            message_type,
            topic: topic.into(),
            payload,
            timestamp: Utc::now(),
            encrypted: false,
        }
    }

    pub fn encrypted(mut self, encrypted: bool) -> Self {
        self.encrypted = encrypted;
        self
    }
}
