// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Worker Runtime - Application Layer
//!
//! One background task per connected worker agent. The runtime listens on the
//! swarm task topic for assignments addressed to its agent, runs them through
//! the [`TaskExecutor`] one at a time and reports back on the status, result
//! and heartbeat topics. Heartbeats keep flowing while a task executes.
//!
//! # Architecture
//!
//! - **Layer:** Application Layer
//! - **Purpose:** Execute assigned tasks and keep the queen informed

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use metrics::counter;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use hive_mind_core::domain::agent::{Agent, AgentId};
use hive_mind_core::domain::message::{topics, MessageType, SwarmMessage};
use hive_mind_core::infrastructure::swarm_bus::{BusError, SubscriptionId, SwarmBus};

use crate::application::executor::{ExecutionRequest, TaskExecutor};
use crate::domain::protocol::{
    decode, Heartbeat, TaskAssignment, TaskOutcome, TaskReport, WorkerState, WorkerStatus,
};

pub struct WorkerRuntime {
    agent: Agent,
    objective: String,
    bus: SwarmBus,
    executor: Arc<dyn TaskExecutor>,
    heartbeat_interval: Duration,
    encrypted: bool,
}

/// Live connection of one worker. Dropping it stops the runtime.
pub struct WorkerHandle {
    agent_id: AgentId,
    bus: SwarmBus,
    subscription: SubscriptionId,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl WorkerHandle {
    pub fn agent_id(&self) -> AgentId {
        self.agent_id
    }

    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }
}

impl Drop for WorkerHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
        self.bus.unsubscribe(self.subscription);
    }
}

impl WorkerRuntime {
    pub fn new(
        agent: Agent,
        objective: impl Into<String>,
        bus: SwarmBus,
        executor: Arc<dyn TaskExecutor>,
        heartbeat_interval: Duration,
    ) -> Self {
        Self {
            agent,
            objective: objective.into(),
            bus,
            executor,
            heartbeat_interval,
            encrypted: false,
        }
    }

    pub fn with_encryption(mut self, encrypted: bool) -> Self {
        self.encrypted = encrypted;
        self
    }

    /// Subscribes to the swarm task topic and starts the runtime loop.
    ///
    /// Must be called from within a tokio runtime.
    pub fn connect(self) -> WorkerHandle {
        let (tx, rx) = mpsc::unbounded_channel::<TaskAssignment>();
        let agent_id = self.agent.id;

        let subscription = self.bus.subscribe(topics::tasks(self.agent.swarm_id), move |message| {
            let Some(assignment) = decode::<TaskAssignment>(message) else {
                return Ok(());
            };
            if assignment.agent_id != agent_id {
                return Ok(());
            }
            tx.send(assignment).map_err(|_| BusError::Closed)
        });

        let cancel = CancellationToken::new();
        let bus = self.bus.clone();
        let token = cancel.clone();
        debug!(agent_id = %agent_id, "Worker connected");
        let task = tokio::spawn(async move { self.run(rx, token).await });

        WorkerHandle {
            agent_id,
            bus,
            subscription,
            cancel,
            task,
        }
    }

    async fn run(self, mut inbox: mpsc::UnboundedReceiver<TaskAssignment>, cancel: CancellationToken) {
        let mut ticker = interval(self.heartbeat_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => self.heartbeat(),
                assignment = inbox.recv() => match assignment {
                    Some(assignment) => {
                        if !self.execute(assignment, &mut ticker, &cancel).await {
                            break;
                        }
                    }
                    None => break,
                },
            }
        }
        debug!(agent_id = %self.agent.id, "Worker stopped");
    }

    /// Returns `false` when cancelled mid-task; nothing is reported then.
    async fn execute(&self, assignment: TaskAssignment, ticker: &mut Interval, cancel: &CancellationToken) -> bool {
        let task_id = assignment.task.id;
        info!(agent_id = %self.agent.id, task_id = %task_id, "Worker executing task");
        self.publish(
            MessageType::Status,
            topics::status(self.agent.swarm_id),
            &WorkerStatus {
                task_id: Some(task_id),
                state: WorkerState::Busy,
            },
        );

        let started = Instant::now();
        let request = ExecutionRequest {
            agent: self.agent.clone(),
            task: assignment.task,
            objective: assignment.objective,
        };
        let work = self.executor.execute(request);
        tokio::pin!(work);

        let result = loop {
            tokio::select! {
                result = &mut work => break result,
                _ = ticker.tick() => self.heartbeat(),
                _ = cancel.cancelled() => {
                    warn!(agent_id = %self.agent.id, task_id = %task_id, "Worker stopped mid-task");
                    return false;
                }
            }
        };

        let outcome = match result {
            Ok(result) => TaskOutcome::Completed { result },
            Err(e) => {
                warn!(agent_id = %self.agent.id, task_id = %task_id, error = %e, "Task execution failed");
                TaskOutcome::Failed { error: e.to_string() }
            }
        };
        let label = match outcome {
            TaskOutcome::Completed { .. } => "completed",
            TaskOutcome::Failed { .. } => "failed",
        };
        counter!("hive_mind_worker_tasks_total", "outcome" => label).increment(1);

        self.publish(
            MessageType::Result,
            topics::results(self.agent.swarm_id),
            &TaskReport {
                task_id,
                outcome,
                duration_ms: started.elapsed().as_millis() as u64,
            },
        );
        true
    }

    fn heartbeat(&self) {
        self.publish(
            MessageType::Heartbeat,
            topics::heartbeat(self.agent.swarm_id),
            &Heartbeat {
                agent_id: self.agent.id,
                at: Utc::now(),
            },
        );
    }

    fn publish<T: Serialize>(&self, message_type: MessageType, topic: String, body: &T) {
        let payload = match serde_json::to_value(body) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(agent_id = %self.agent.id, error = %e, "Dropping unserializable worker message");
                return;
            }
        };
        let message = SwarmMessage::new(self.agent.swarm_id, Some(self.agent.id), message_type, topic, payload)
            .encrypted(self.encrypted);
        self.bus.publish(message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::executor::{EchoExecutor, ExecutorError};
    use async_trait::async_trait;
    use hive_mind_core::domain::agent::AgentType;
    use hive_mind_core::domain::swarm::SwarmId;
    use hive_mind_core::domain::task::Task;

    struct Broken;

    #[async_trait]
    impl TaskExecutor for Broken {
        async fn execute(&self, _request: ExecutionRequest) -> Result<serde_json::Value, ExecutorError> {
            Err(ExecutorError::Failed("no model".into()))
        }
    }

    async fn run_one(executor: Arc<dyn TaskExecutor>) -> (Vec<SwarmMessage>, TaskReport) {
        let bus = SwarmBus::new(64);
        let swarm_id = SwarmId::new();
        let agent = Agent::worker(swarm_id, "w", AgentType::Coder);
        let mut observer = bus.observe();
        let _handle = WorkerRuntime::new(agent.clone(), "obj", bus.clone(), executor, Duration::from_secs(60)).connect();

        let task = Task::new(swarm_id, "t", 1);
        bus.publish(
            TaskAssignment {
                agent_id: AgentId::new(),
                task: Task::new(swarm_id, "someone else's", 1),
                objective: "obj".into(),
            }
            .into_message(),
        );
        bus.publish(
            TaskAssignment {
                agent_id: agent.id,
                task: task.clone(),
                objective: "obj".into(),
            }
            .into_message(),
        );

        let mut seen = Vec::new();
        let report = tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let message = observer.recv().await.unwrap();
                seen.push(message.clone());
                if message.message_type == MessageType::Result {
                    return decode::<TaskReport>(&message).unwrap();
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(report.task_id, task.id);
        (seen, report)
    }

    #[tokio::test]
    async fn test_worker_reports_busy_then_result() {
        let (seen, report) = run_one(Arc::new(EchoExecutor)).await;
        assert!(matches!(report.outcome, TaskOutcome::Completed { ref result } if result["task"] == "t"));

        let statuses: Vec<WorkerStatus> = seen
            .iter()
            .filter(|m| m.message_type == MessageType::Status)
            .filter_map(decode)
            .collect();
        assert_eq!(statuses.len(), 1);
        assert_eq!(statuses[0].state, WorkerState::Busy);
    }

    #[tokio::test]
    async fn test_executor_failure_is_reported() {
        let (_, report) = run_one(Arc::new(Broken)).await;
        assert_eq!(
            report.outcome,
            TaskOutcome::Failed {
                error: "execution failed: no model".into()
            }
        );
    }

    #[tokio::test]
    async fn test_dropping_handle_unsubscribes() {
        let bus = SwarmBus::new(8);
        let agent = Agent::worker(SwarmId::new(), "w", AgentType::Tester);
        let handle = WorkerRuntime::new(agent, "o", bus.clone(), Arc::new(EchoExecutor), Duration::from_secs(60)).connect();
        assert_eq!(bus.subscriber_count(), 1);
        drop(handle);
        assert_eq!(bus.subscriber_count(), 0);
    }
}
