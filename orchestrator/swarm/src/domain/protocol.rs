// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Queen/Worker Message Payloads
//!
//! Typed bodies carried in [`SwarmMessage::payload`]. The queen publishes
//! [`TaskAssignment`] on the swarm task topic; workers answer with
//! [`WorkerStatus`], [`TaskReport`] and [`Heartbeat`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use hive_mind_core::domain::agent::AgentId;
use hive_mind_core::domain::message::{topics, MessageType, SwarmMessage};
use hive_mind_core::domain::task::{Task, TaskId};

/// Addressed to one worker; every other worker ignores it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskAssignment {
    pub agent_id: AgentId,
    pub task: Task,
    pub objective: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerState {
    Busy,
    Idle,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerStatus {
    pub task_id: Option<TaskId>,
    pub state: WorkerState,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum TaskOutcome {
    Completed { result: serde_json::Value },
    Failed { error: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskReport {
    pub task_id: TaskId,
    #[serde(flatten)]
    pub outcome: TaskOutcome,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Heartbeat {
    pub agent_id: AgentId,
    pub at: DateTime<Utc>,
}

impl TaskAssignment {
    pub fn into_message(self) -> SwarmMessage {
        let swarm_id = self.task.swarm_id;
        SwarmMessage::new(
            swarm_id,
            None,
            MessageType::Task,
            topics::tasks(swarm_id),
            serde_json::to_value(&self).unwrap_or_default(),
        )
    }
}

/// Decodes a message payload, `None` when it has a different shape.
pub fn decode<T: serde::de::DeserializeOwned>(message: &SwarmMessage) -> Option<T> {
    serde_json::from_value(message.payload.clone()).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use hive_mind_core::domain::swarm::SwarmId;

    #[test]
    fn test_report_payload_shape() {
        let report = TaskReport {
            task_id: TaskId::new(),
            outcome: TaskOutcome::Failed { error: "exit 1".into() },
            duration_ms: 12,
        };
        let value = serde_json::to_value(&report).unwrap();
        assert_eq!(value["outcome"], "failed");
        assert_eq!(value["error"], "exit 1");
    }

    #[test]
    fn test_assignment_travels_on_task_topic() {
        let task = Task::new(SwarmId::new(), "t", 1);
        let assignment = TaskAssignment {
            agent_id: AgentId::new(),
            task: task.clone(),
            objective: "o".into(),
        };
        let message = assignment.clone().into_message();
        assert_eq!(message.topic, topics::tasks(task.swarm_id));
        assert_eq!(message.message_type, MessageType::Task);
        assert_eq!(decode::<TaskAssignment>(&message), Some(assignment));
        assert_eq!(decode::<Heartbeat>(&message), None);
    }
}
