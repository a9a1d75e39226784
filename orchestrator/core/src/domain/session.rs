// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Sessions, checkpoints and the session log.
//!
//! A session wraps exactly one swarm. Checkpoints are append-only snapshots;
//! the latest one is what `resume` restores from.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::agent::Agent;
use crate::domain::swarm::{Swarm, SwarmId};
use crate::domain::task::{Task, TaskStatus};
use crate::domain::ParseEnumError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SessionId(pub Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_string(s: &str) -> Result<Self, uuid::Error> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CheckpointId(pub Uuid);

impl CheckpointId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for CheckpointId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CheckpointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Active,
    Paused,
    Completed,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Active => "active",
            SessionStatus::Paused => "paused",
            SessionStatus::Completed => "completed",
        }
    }
}

impl FromStr for SessionStatus {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(SessionStatus::Active),
            "paused" => Ok(SessionStatus::Paused),
            "completed" => Ok(SessionStatus::Completed),
            other => Err(ParseEnumError::new("session status", other)),
        }
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: SessionId,
    pub swarm_id: SwarmId,
    pub status: SessionStatus,
    /// Whole percent, `0..=100`.
    pub completion_percentage: u8,
    pub agent_count: u32,
    pub task_count: u32,
    pub completed_task_count: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub paused_at: Option<DateTime<Utc>>,
    pub resumed_at: Option<DateTime<Utc>>,
}

impl Session {
    pub fn new(swarm_id: SwarmId) -> Self {
        let now = Utc::now();
        Self {
            id: SessionId::new(),
            swarm_id,
            status: SessionStatus::Active,
            completion_percentage: 0,
            agent_count: 0,
            task_count: 0,
            completed_task_count: 0,
            created_at: now,
            updated_at: now,
            paused_at: None,
            resumed_at: None,
        }
    }

    /// Refreshes the progress counters from a snapshot.
    pub fn record_progress(&mut self, payload: &CheckpointPayload) {
        self.agent_count = payload.agents.iter().filter(|a| !a.is_terminated()).count() as u32;
        self.task_count = payload.tasks.len() as u32;
        self.completed_task_count = payload
            .tasks
            .iter()
            .filter(|t| t.status == TaskStatus::Completed)
            .count() as u32;
        self.completion_percentage = completion_percentage(&payload.tasks);
        self.updated_at = Utc::now();
    }

    pub fn pause(&mut self) {
        let now = Utc::now();
        self.status = SessionStatus::Paused;
        self.paused_at = Some(now);
        self.updated_at = now;
    }

    pub fn resume(&mut self) {
        let now = Utc::now();
        self.status = SessionStatus::Active;
        self.resumed_at = Some(now);
        self.updated_at = now;
    }

    pub fn complete(&mut self) {
        self.status = SessionStatus::Completed;
        self.completion_percentage = 100;
        self.updated_at = Utc::now();
    }
}

/// Snapshot of everything needed to rebuild a swarm.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointPayload {
    pub swarm: Swarm,
    pub agents: Vec<Agent>,
    pub tasks: Vec<Task>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub id: CheckpointId,
    pub session_id: SessionId,
    pub created_at: DateTime<Utc>,
    pub completion_percentage: u8,
    pub payload: CheckpointPayload,
}

impl Checkpoint {
    pub fn capture(session_id: SessionId, payload: CheckpointPayload) -> Self {
        Self {
            id: CheckpointId::new(),
            session_id,
            created_at: Utc::now(),
            completion_percentage: completion_percentage(&payload.tasks),
            payload,
        }
    }
}

/// `completed * 100 / total`, floored; zero when there are no tasks.
pub fn completion_percentage(tasks: &[Task]) -> u8 {
    if tasks.is_empty() {
        return 0;
    }
    let completed = tasks.iter().filter(|t| t.status == TaskStatus::Completed).count();
    (completed * 100 / tasks.len()) as u8
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

impl FromStr for LogLevel {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "info" => Ok(LogLevel::Info),
            "warn" => Ok(LogLevel::Warn),
            "error" => Ok(LogLevel::Error),
            other => Err(ParseEnumError::new("log level", other)),
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionLogEntry {
    pub session_id: SessionId,
    pub level: LogLevel,
    pub message: String,
    pub data: Option<serde_json::Value>,
    pub timestamp: DateTime<Utc>,
}

impl SessionLogEntry {
    pub fn new(session_id: SessionId, level: LogLevel, message: impl Into<String>) -> Self {
        Self {
            session_id,
            level,
            message: message.into(),
            data: None,
            timestamp: Utc::now(),
        }
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::agent::AgentId;

    #[test]
    fn test_completion_percentage_floors() {
        let swarm_id = SwarmId::new();
        let mut tasks: Vec<Task> = (0..3).map(|i| Task::new(swarm_id, format!("t{i}"), 1)).collect();
        assert_eq!(completion_percentage(&tasks), 0);

        tasks[0].start(AgentId::new(), true).unwrap();
        tasks[0].complete(serde_json::Value::Null).unwrap();
        assert_eq!(completion_percentage(&tasks), 33);

        assert_eq!(completion_percentage(&[]), 0);
    }

    #[test]
    fn test_session_pause_resume_timestamps() {
        let mut session = Session::new(SwarmId::new());
        session.pause();
        assert_eq!(session.status, SessionStatus::Paused);
        assert!(session.paused_at.is_some());

        session.resume();
        assert_eq!(session.status, SessionStatus::Active);
        assert!(session.resumed_at.is_some());
    }
}
