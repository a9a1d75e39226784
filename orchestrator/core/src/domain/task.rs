// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::domain::agent::AgentId;
use crate::domain::swarm::SwarmId;
use crate::domain::ParseEnumError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TaskId(pub Uuid);

impl TaskId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_string(s: &str) -> Result<Self, uuid::Error> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }
}

impl FromStr for TaskStatus {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(TaskStatus::Pending),
            "in_progress" => Ok(TaskStatus::InProgress),
            "completed" => Ok(TaskStatus::Completed),
            "failed" => Ok(TaskStatus::Failed),
            other => Err(ParseEnumError::new("task status", other)),
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TaskError {
    #[error("task {task_id} cannot move from {from} to {to}")]
    InvalidTransition {
        task_id: TaskId,
        from: TaskStatus,
        to: TaskStatus,
    },

    #[error("task {0} has unmet dependencies")]
    DependenciesUnmet(TaskId),

    #[error("task {0} is already completed")]
    AlreadyCompleted(TaskId),
}

/// Outcome of a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureDisposition {
    /// Task went back to `pending` with an incremented retry counter.
    Requeued { retry_count: u32 },
    /// Retry budget exhausted; task stays `failed`.
    Exhausted,
}

/// A unit of work decomposed from a swarm objective.
///
/// Tasks reference their owner and dependencies by id only; resolution goes
/// through the persistent store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub swarm_id: SwarmId,
    pub agent_id: Option<AgentId>,
    pub description: String,
    pub status: TaskStatus,
    /// Higher is more urgent.
    pub priority: i32,
    #[serde(default)]
    pub dependencies: Vec<TaskId>,
    #[serde(default)]
    pub required_capabilities: BTreeSet<String>,
    pub result: Option<serde_json::Value>,
    pub error: Option<String>,
    pub retry_count: u32,
    pub max_retries: u32,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Task {
    pub fn new(swarm_id: SwarmId, description: impl Into<String>, priority: i32) -> Self {
        Self {
            id: TaskId::new(),
            swarm_id,
            agent_id: None,
            description: description.into(),
            status: TaskStatus::Pending,
            priority,
            dependencies: Vec::new(),
            required_capabilities: BTreeSet::new(),
            result: None,
            error: None,
            retry_count: 0,
            max_retries: 2,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }

    pub fn with_dependencies(mut self, dependencies: Vec<TaskId>) -> Self {
        self.dependencies = dependencies;
        self
    }

    pub fn with_capabilities<I, S>(mut self, capabilities: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.required_capabilities = capabilities.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// `pending -> in_progress`. `dependencies_met` is resolved by the caller
    /// against the store.
    pub fn start(&mut self, agent_id: AgentId, dependencies_met: bool) -> Result<(), TaskError> {
        if self.status != TaskStatus::Pending {
            return Err(self.invalid(TaskStatus::InProgress));
        }
        if !dependencies_met {
            return Err(TaskError::DependenciesUnmet(self.id));
        }
        self.status = TaskStatus::InProgress;
        self.agent_id = Some(agent_id);
        self.started_at = Some(Utc::now());
        Ok(())
    }

    pub fn complete(&mut self, result: serde_json::Value) -> Result<(), TaskError> {
        if self.status != TaskStatus::InProgress {
            return Err(self.invalid(TaskStatus::Completed));
        }
        self.status = TaskStatus::Completed;
        self.result = Some(result);
        self.error = None;
        self.completed_at = Some(Utc::now());
        Ok(())
    }

    /// Records a failed attempt and requeues the task while retry budget remains.
    ///
    /// The owning agent is always cleared.
    pub fn fail(&mut self, error: impl Into<String>) -> Result<FailureDisposition, TaskError> {
        if self.status != TaskStatus::InProgress {
            return Err(self.invalid(TaskStatus::Failed));
        }
        self.error = Some(error.into());
        self.agent_id = None;
        self.started_at = None;

        if self.retry_count < self.max_retries {
            self.retry_count += 1;
            self.status = TaskStatus::Pending;
            Ok(FailureDisposition::Requeued {
                retry_count: self.retry_count,
            })
        } else {
            self.status = TaskStatus::Failed;
            self.completed_at = Some(Utc::now());
            Ok(FailureDisposition::Exhausted)
        }
    }

    /// Returns an in-flight task to `pending` without consuming retry budget.
    pub fn release(&mut self) {
        if self.status == TaskStatus::InProgress {
            self.status = TaskStatus::Pending;
            self.agent_id = None;
            self.started_at = None;
        }
    }

    /// Makes a non-completed task eligible for assignment again.
    pub fn reopen(&mut self) -> Result<(), TaskError> {
        match self.status {
            TaskStatus::Completed => Err(TaskError::AlreadyCompleted(self.id)),
            TaskStatus::Failed => {
                self.status = TaskStatus::Pending;
                self.completed_at = None;
                Ok(())
            }
            TaskStatus::InProgress => {
                self.release();
                Ok(())
            }
            TaskStatus::Pending => Ok(()),
        }
    }

    pub fn duration(&self) -> Option<chrono::Duration> {
        match (self.started_at, self.completed_at) {
            (Some(start), Some(end)) => Some(end - start),
            _ => None,
        }
    }

    fn invalid(&self, to: TaskStatus) -> TaskError {
        TaskError::InvalidTransition {
            task_id: self.id,
            from: self.status,
            to,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_start_requires_dependencies() {
        let mut task = Task::new(SwarmId::new(), "implement parser", 5);
        let err = task.start(AgentId::new(), false).unwrap_err();
        assert_eq!(err, TaskError::DependenciesUnmet(task.id));
        assert_eq!(task.status, TaskStatus::Pending);
        assert!(task.agent_id.is_none());
    }

    #[test]
    fn test_complete_records_result() {
        let agent = AgentId::new();
        let mut task = Task::new(SwarmId::new(), "write tests", 1);
        task.start(agent, true).unwrap();
        assert_eq!(task.agent_id, Some(agent));

        task.complete(serde_json::json!({"passed": 12})).unwrap();
        assert_eq!(task.status, TaskStatus::Completed);
        assert_eq!(task.result, Some(serde_json::json!({"passed": 12})));
        assert!(task.completed_at.is_some());
    }

    #[test]
    fn test_fail_requeues_until_budget_exhausted() {
        let mut task = Task::new(SwarmId::new(), "flaky", 1).with_max_retries(1);

        task.start(AgentId::new(), true).unwrap();
        assert_eq!(task.fail("boom").unwrap(), FailureDisposition::Requeued { retry_count: 1 });
        assert_eq!(task.status, TaskStatus::Pending);
        assert!(task.agent_id.is_none());

        task.start(AgentId::new(), true).unwrap();
        assert_eq!(task.fail("boom again").unwrap(), FailureDisposition::Exhausted);
        assert_eq!(task.status, TaskStatus::Failed);
        assert_eq!(task.error.as_deref(), Some("boom again"));
    }

    #[test]
    fn test_completed_task_cannot_reopen() {
        let mut task = Task::new(SwarmId::new(), "done", 1);
        task.start(AgentId::new(), true).unwrap();
        task.complete(serde_json::Value::Null).unwrap();
        assert_eq!(task.reopen().unwrap_err(), TaskError::AlreadyCompleted(task.id));
    }

    #[test]
    fn test_release_keeps_retry_budget() {
        let mut task = Task::new(SwarmId::new(), "in flight", 1);
        task.start(AgentId::new(), true).unwrap();
        task.release();
        assert_eq!(task.status, TaskStatus::Pending);
        assert_eq!(task.retry_count, 0);
        assert!(task.agent_id.is_none());
    }
}
