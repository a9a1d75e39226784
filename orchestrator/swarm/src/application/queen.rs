// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Queen Coordinator - Application Layer
//!
//! The control loop of one swarm. The queen owns the worker connections,
//! assigns pending tasks, folds worker reports back into the store and
//! watches heartbeats. Every coordination decision runs under one async
//! mutex, so task and agent transitions of a swarm are totally ordered.
//!
//! The store is the only source of truth: rows are re-read for every
//! decision and each transition is committed as one [`WriteBatch`]. The
//! coordinator itself keeps only worker handles and heartbeat timestamps.
//!
//! # Architecture
//!
//! - **Layer:** Application Layer
//! - **Purpose:** Spawn, dispatch, result handling, scaling, topology and
//!   failure detection for one swarm

use std::collections::{BTreeSet, HashMap, HashSet};
use std::time::Instant;

use chrono::Utc;
use metrics::{counter, gauge};
use parking_lot::Mutex;
use serde_json::json;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time::{interval, interval_at, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use hive_mind_core::application::collective_memory::{CollectiveMemory, MemoryError};
use hive_mind_core::application::consensus_engine::ConsensusEngine;
use hive_mind_core::domain::agent::{Agent, AgentError, AgentId, AgentRole, AgentStatus, AgentType};
use hive_mind_core::domain::config::SwarmDefaults;
use hive_mind_core::domain::consensus::{ConsensusAlgorithm, ConsensusDecision, ConsensusError};
use hive_mind_core::domain::memory::MemoryType;
use hive_mind_core::domain::message::{topics, MessageType, SwarmMessage};
use hive_mind_core::domain::repository::{retry_once, StorageError, WriteBatch};
use hive_mind_core::domain::session::{LogLevel, Session, SessionLogEntry};
use hive_mind_core::domain::swarm::{QueenType, Swarm, SwarmId, SwarmStatus, Topology};
use hive_mind_core::domain::task::{FailureDisposition, Task, TaskError, TaskId, TaskStatus};
use hive_mind_core::infrastructure::swarm_bus::{BusError, DeliveryReport, SubscriptionId};

use crate::application::context::SwarmContext;
use crate::application::session::{SessionError, SessionManager};
use crate::application::worker::{WorkerHandle, WorkerRuntime};
use crate::domain::dispatch::{completed_ids, dependencies_met, plan_assignments, ready_backlog, Assignment};
use crate::domain::planning::{decompose_objective, worker_type_at};
use crate::domain::protocol::{decode, TaskAssignment, TaskOutcome, TaskReport, WorkerState, WorkerStatus};
use crate::domain::report::SwarmReport;

/// Namespace under which completed task results are remembered.
pub const RESULTS_NAMESPACE: &str = "results";

/// A worker stopped responding or was terminated while holding work.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("agent {agent_id} failed: {reason}")]
pub struct AgentFailureError {
    pub agent_id: AgentId,
    pub task_id: Option<TaskId>,
    pub reason: String,
}

#[derive(Debug, Error)]
pub enum CoordinatorError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("swarm {0} not found")]
    SwarmNotFound(SwarmId),

    #[error("swarm {0} has no queen")]
    QueenNotFound(SwarmId),

    #[error("agent {0} not found in this swarm")]
    AgentNotFound(AgentId),

    #[error("task {0} not found in this swarm")]
    TaskNotFound(TaskId),

    #[error("dependency {0} does not exist in this swarm")]
    UnknownDependency(TaskId),

    #[error("swarm is {0}; no new work is accepted")]
    SwarmClosed(SwarmStatus),

    #[error("swarm already runs its maximum of {0} workers")]
    CapacityReached(u32),

    #[error("the queen cannot be terminated")]
    QueenCannotBeTerminated,

    #[error("agent {0} is not a worker")]
    NotAWorker(AgentId),

    #[error("agent {agent_id} is {status} and cannot take work")]
    AgentUnavailable { agent_id: AgentId, status: AgentStatus },

    #[error("{topology} topology does not let {from} message {to}")]
    TopologyViolation {
        topology: Topology,
        from: AgentId,
        to: AgentId,
    },

    #[error(transparent)]
    AgentFailure(#[from] AgentFailureError),

    #[error(transparent)]
    Agent(#[from] AgentError),

    #[error(transparent)]
    Task(#[from] TaskError),

    #[error(transparent)]
    Consensus(#[from] ConsensusError),

    #[error(transparent)]
    Memory(#[from] MemoryError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Session(Box<SessionError>),
}

impl From<SessionError> for CoordinatorError {
    fn from(err: SessionError) -> Self {
        CoordinatorError::Session(Box::new(err))
    }
}

impl CoordinatorError {
    /// Failures that end the control loop; anything else concerns one task,
    /// agent or vote and is logged.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            CoordinatorError::Storage(_)
                | CoordinatorError::SwarmNotFound(_)
                | CoordinatorError::QueenNotFound(_)
                | CoordinatorError::Session(_)
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SpawnRequest {
    pub name: Option<String>,
    pub objective: String,
    pub queen_type: QueenType,
    pub topology: Topology,
    pub consensus: ConsensusAlgorithm,
    pub max_workers: u32,
    /// Break the objective into the standard phase chain.
    pub decompose: bool,
}

impl SpawnRequest {
    pub fn new(objective: impl Into<String>) -> Self {
        Self::from_defaults(objective, &SwarmDefaults::default())
    }

    pub fn from_defaults(objective: impl Into<String>, defaults: &SwarmDefaults) -> Self {
        Self {
            name: None,
            objective: objective.into(),
            queen_type: defaults.queen_type,
            topology: defaults.topology,
            consensus: defaults.consensus,
            max_workers: defaults.max_workers,
            decompose: true,
        }
    }

    fn swarm_name(&self) -> String {
        match &self.name {
            Some(name) if !name.trim().is_empty() => name.trim().to_string(),
            _ => {
                let words: Vec<&str> = self.objective.split_whitespace().take(4).collect();
                format!("hive-{}", words.join("-").to_lowercase())
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct NewTask {
    pub description: String,
    pub priority: i32,
    pub dependencies: Vec<TaskId>,
    pub capabilities: BTreeSet<String>,
}

impl NewTask {
    pub fn new(description: impl Into<String>, priority: i32) -> Self {
        Self {
            description: description.into(),
            priority,
            ..Self::default()
        }
    }

    pub fn after(mut self, dependency: TaskId) -> Self {
        self.dependencies.push(dependency);
        self
    }

    pub fn requiring(mut self, capability: impl Into<String>) -> Self {
        self.capabilities.insert(capability.into());
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DispatchReport {
    pub assigned: Vec<Assignment>,
    /// Ready tasks still waiting for a worker.
    pub backlog: usize,
    /// Workers added by auto-scaling during this pass.
    pub spawned: Vec<AgentId>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScaleReport {
    pub spawned: Vec<AgentId>,
    pub terminated: Vec<AgentId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    Completed,
    Failed,
    Cancelled,
}

pub struct QueenCoordinator {
    ctx: SwarmContext,
    swarm_id: SwarmId,
    queen_id: AgentId,
    consensus: ConsensusEngine,
    memory: CollectiveMemory,
    sessions: SessionManager,
    coordination: tokio::sync::Mutex<()>,
    workers: Mutex<HashMap<AgentId, WorkerHandle>>,
    heartbeats: Mutex<HashMap<AgentId, Instant>>,
    inbox: Mutex<mpsc::UnboundedReceiver<SwarmMessage>>,
    subscriptions: Vec<SubscriptionId>,
}

impl QueenCoordinator {
    /// Creates the swarm, its queen, the initial workers and the decomposed
    /// tasks in one transaction, opens its session and attaches a coordinator.
    pub async fn spawn_swarm(ctx: SwarmContext, request: SpawnRequest) -> Result<Self, CoordinatorError> {
        let objective = request.objective.trim();
        if objective.is_empty() {
            return Err(CoordinatorError::InvalidRequest("objective cannot be empty".to_string()));
        }
        if request.max_workers == 0 {
            return Err(CoordinatorError::InvalidRequest("max_workers must be at least 1".to_string()));
        }

        let swarm = Swarm::new(
            request.swarm_name(),
            objective,
            request.queen_type,
            request.topology,
            request.consensus,
            request.max_workers,
        );
        let mut queen = Agent::queen(swarm.id, "queen");
        queen.transition_to(AgentStatus::Active)?;

        let workers: Vec<Agent> = (0..request.max_workers as usize)
            .map(|i| {
                let agent_type = worker_type_at(request.queen_type, i);
                Agent::worker(swarm.id, format!("{agent_type}-{}", i + 1), agent_type)
            })
            .collect();
        let tasks = if request.decompose {
            decompose_objective(swarm.id, objective, ctx.settings.task_max_retries)
        } else {
            Vec::new()
        };

        let batch = WriteBatch::new()
            .swarm(swarm.clone())
            .agent(queen)
            .agents(workers)
            .tasks(tasks);
        retry_once("commit", || ctx.store.commit(batch.clone())).await?;

        let session = Session::new(swarm.id);
        retry_once("create_session", || ctx.store.create_session(&session)).await?;
        let entry = SessionLogEntry::new(session.id, LogLevel::Info, "Swarm spawned").with_data(json!({
            "objective": swarm.objective,
            "queen_type": swarm.queen_type.as_str(),
            "topology": swarm.topology.as_str(),
            "max_workers": swarm.max_workers,
        }));
        retry_once("append_session_log", || ctx.store.append_session_log(&entry)).await?;
        SessionManager::new(ctx.clone()).checkpoint(swarm.id).await?;

        counter!("hive_mind_swarms_spawned_total").increment(1);
        info!(
            swarm_id = %swarm.id,
            session_id = %session.id,
            name = %swarm.name,
            workers = request.max_workers,
            "Swarm spawned"
        );

        Self::attach(ctx, swarm.id).await
    }

    /// Takes over an existing swarm: subscribes to its topics and connects
    /// every live worker.
    pub async fn attach(ctx: SwarmContext, swarm_id: SwarmId) -> Result<Self, CoordinatorError> {
        let swarm = retry_once("get_swarm", || ctx.store.get_swarm(swarm_id))
            .await?
            .ok_or(CoordinatorError::SwarmNotFound(swarm_id))?;
        let agents = retry_once("list_agents", || ctx.store.list_agents(swarm_id)).await?;
        let queen_id = agents
            .iter()
            .find(|a| a.role == AgentRole::Queen)
            .map(|a| a.id)
            .ok_or(CoordinatorError::QueenNotFound(swarm_id))?;

        let consensus = ConsensusEngine::new(ctx.store.clone(), ctx.bus.clone(), swarm_id, swarm.consensus)
            .with_voting_timeout(ctx.settings.voting_timeout)
            .with_quorum_fraction(ctx.settings.quorum_fraction);
        let memory = CollectiveMemory::new(ctx.store.clone(), ctx.bus.clone(), swarm_id)
            .with_namespace(ctx.settings.memory_namespace.clone())
            .with_author(queen_id)
            .with_compression_threshold(ctx.settings.compression_threshold)
            .with_encryption(ctx.settings.encryption);

        let (tx, rx) = mpsc::unbounded_channel();
        let subscriptions = [topics::status(swarm_id), topics::results(swarm_id), topics::heartbeat(swarm_id)]
            .into_iter()
            .map(|topic| {
                let tx = tx.clone();
                ctx.bus
                    .subscribe(topic, move |message| tx.send(message.clone()).map_err(|_| BusError::Closed))
            })
            .collect();

        let queen = Self {
            sessions: SessionManager::new(ctx.clone()),
            ctx,
            swarm_id,
            queen_id,
            consensus,
            memory,
            coordination: tokio::sync::Mutex::new(()),
            workers: Mutex::new(HashMap::new()),
            heartbeats: Mutex::new(HashMap::new()),
            inbox: Mutex::new(rx),
            subscriptions,
        };

        for agent in agents.iter().filter(|a| is_live_worker(a)) {
            queen.connect(agent, &swarm);
        }
        queen.update_worker_gauge(&agents);
        info!(swarm_id = %swarm_id, workers = queen.connected_workers().len(), "Queen attached");
        Ok(queen)
    }

    pub fn swarm_id(&self) -> SwarmId {
        self.swarm_id
    }

    pub fn queen_id(&self) -> AgentId {
        self.queen_id
    }

    pub fn consensus(&self) -> &ConsensusEngine {
        &self.consensus
    }

    pub fn memory(&self) -> &CollectiveMemory {
        &self.memory
    }

    pub fn connected_workers(&self) -> Vec<AgentId> {
        self.workers.lock().keys().copied().collect()
    }

    /// Adds a worker. Without an explicit type the next type of the queen's
    /// mix is used.
    pub async fn spawn_agent(&self, agent_type: Option<AgentType>) -> Result<Agent, CoordinatorError> {
        let _guard = self.coordination.lock().await;
        let swarm = self.load_swarm().await?;
        self.spawn_worker(&swarm, agent_type).await
    }

    pub async fn submit_task(&self, new_task: NewTask) -> Result<Task, CoordinatorError> {
        let _guard = self.coordination.lock().await;
        let swarm = self.load_swarm().await?;
        if matches!(swarm.status, SwarmStatus::Completed | SwarmStatus::Failed) {
            return Err(CoordinatorError::SwarmClosed(swarm.status));
        }
        if new_task.description.trim().is_empty() {
            return Err(CoordinatorError::InvalidRequest("task description cannot be empty".to_string()));
        }

        for dependency in &new_task.dependencies {
            let known = retry_once("get_task", || self.ctx.store.get_task(*dependency))
                .await?
                .is_some_and(|t| t.swarm_id == self.swarm_id);
            if !known {
                return Err(CoordinatorError::UnknownDependency(*dependency));
            }
        }

        let task = Task::new(self.swarm_id, new_task.description.trim(), new_task.priority)
            .with_dependencies(new_task.dependencies)
            .with_capabilities(new_task.capabilities)
            .with_max_retries(self.ctx.settings.task_max_retries);
        retry_once("upsert_task", || self.ctx.store.upsert_task(&task)).await?;

        counter!("hive_mind_tasks_submitted_total").increment(1);
        info!(swarm_id = %self.swarm_id, task_id = %task.id, priority = task.priority, "Task submitted");
        Ok(task)
    }

    /// Assigns ready tasks to idle connected workers, most urgent first.
    ///
    /// Each assignment is committed on its own; tasks without a suitable
    /// worker stay pending. Paused swarms do not dispatch.
    pub async fn dispatch_pending(&self) -> Result<DispatchReport, CoordinatorError> {
        let _guard = self.coordination.lock().await;

        let swarm = self.load_swarm().await?;
        if !swarm.is_active() {
            debug!(swarm_id = %self.swarm_id, status = %swarm.status, "Swarm not active, skipping dispatch");
            return Ok(DispatchReport::default());
        }

        let agents = self.list_agents().await?;
        let tasks = self.list_tasks().await?;
        let connected: HashSet<AgentId> = self.workers.lock().keys().copied().collect();
        let candidates: Vec<Agent> = agents.iter().filter(|a| connected.contains(&a.id)).cloned().collect();

        let plan = plan_assignments(&tasks, &candidates);
        let mut report = DispatchReport {
            backlog: ready_backlog(&tasks, &plan),
            ..DispatchReport::default()
        };

        for assignment in plan {
            let (Some(task), Some(agent)) = (
                tasks.iter().find(|t| t.id == assignment.task_id),
                candidates.iter().find(|a| a.id == assignment.agent_id),
            ) else {
                continue;
            };
            let (mut task, mut agent) = (task.clone(), agent.clone());
            task.start(agent.id, true)?;
            agent.transition_to(AgentStatus::Active)?;
            self.commit(WriteBatch::new().task(task.clone()).agent(agent.clone())).await?;

            self.heartbeats.lock().insert(agent.id, Instant::now());
            self.publish_assignment(&swarm, agent.id, task.clone());

            counter!("hive_mind_tasks_dispatched_total").increment(1);
            info!(
                swarm_id = %self.swarm_id,
                task_id = %task.id,
                agent_id = %agent.id,
                priority = task.priority,
                "Task dispatched"
            );
            report.assigned.push(assignment);
        }

        if self.ctx.settings.auto_scale && report.backlog > 0 {
            let live = agents.iter().filter(|a| is_live_worker(a)).count() as u32;
            let room = swarm.max_workers.saturating_sub(live);
            let wanted = (report.backlog as u32).min(room);
            for _ in 0..wanted {
                let agent = self.spawn_worker(&swarm, None).await?;
                report.spawned.push(agent.id);
            }
            if wanted > 0 {
                info!(swarm_id = %self.swarm_id, spawned = wanted, backlog = report.backlog, "Auto-scaled workers");
            }
        }

        gauge!("hive_mind_ready_backlog", "swarm_id" => self.swarm_id.to_string()).set(report.backlog as f64);
        Ok(report)
    }

    /// Applies a worker's report. Stale reports (task no longer held by the
    /// reporting agent) are ignored and return `false`.
    pub async fn handle_result(&self, agent_id: AgentId, report: TaskReport) -> Result<bool, CoordinatorError> {
        let _guard = self.coordination.lock().await;
        self.apply_result(agent_id, report).await
    }

    /// Drains messages forwarded from the bus and applies them in arrival
    /// order. Returns how many were handled.
    pub async fn process_inbox(&self) -> Result<usize, CoordinatorError> {
        let _guard = self.coordination.lock().await;

        let messages: Vec<SwarmMessage> = {
            let mut inbox = self.inbox.lock();
            std::iter::from_fn(|| inbox.try_recv().ok()).collect()
        };

        let mut handled = 0;
        for message in messages {
            let Some(sender) = message.sender_id else { continue };
            if sender == self.queen_id {
                continue;
            }

            let outcome = match message.message_type {
                MessageType::Heartbeat => {
                    let mut heartbeats = self.heartbeats.lock();
                    if let Some(seen) = heartbeats.get_mut(&sender) {
                        *seen = Instant::now();
                    }
                    Ok(())
                }
                MessageType::Status => match decode::<WorkerStatus>(&message) {
                    Some(status) => self.apply_status(sender, status).await,
                    None => Ok(()),
                },
                MessageType::Result => match decode::<TaskReport>(&message) {
                    Some(report) => self.apply_result(sender, report).await.map(|_| ()),
                    None => Ok(()),
                },
                _ => Ok(()),
            };

            match outcome {
                Ok(()) => handled += 1,
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => warn!(swarm_id = %self.swarm_id, agent_id = %sender, error = %e, "Ignoring worker message"),
            }
        }
        Ok(handled)
    }

    /// Marks engaged workers whose heartbeats stopped as failed and requeues
    /// their tasks within the retry budget.
    pub async fn detect_stalled_agents(&self) -> Result<Vec<AgentFailureError>, CoordinatorError> {
        let _guard = self.coordination.lock().await;

        let timeout = self.ctx.settings.heartbeat_timeout;
        let silent: Vec<(AgentId, std::time::Duration)> = self
            .heartbeats
            .lock()
            .iter()
            .map(|(id, seen)| (*id, seen.elapsed()))
            .filter(|(_, quiet)| *quiet > timeout)
            .collect();
        if silent.is_empty() {
            return Ok(Vec::new());
        }

        let mut tasks = self.list_tasks().await?;
        let mut failures = Vec::new();
        for (agent_id, quiet) in silent {
            let mut agent = self.load_agent(agent_id).await?;
            if !agent.status.is_engaged() {
                continue;
            }
            agent.transition_to(AgentStatus::Failed)?;

            let reason = format!("no heartbeat for {}s", quiet.as_secs());
            let held = self.release_held_tasks(&mut tasks, agent_id, &reason)?;
            self.commit(WriteBatch::new().agent(agent).tasks(held.iter().cloned())).await?;
            self.disconnect(agent_id);

            let failure = AgentFailureError {
                agent_id,
                task_id: held.first().map(|t| t.id),
                reason,
            };
            counter!("hive_mind_agent_failures_total").increment(1);
            warn!(swarm_id = %self.swarm_id, error = %failure, "Worker stalled");
            self.journal(LogLevel::Error, &failure.to_string(), json!({ "agent_id": agent_id })).await;
            failures.push(failure);
        }
        Ok(failures)
    }

    /// Moves a task to another idle worker. The previous holder is released.
    pub async fn reassign_task(&self, task_id: TaskId, agent_id: AgentId) -> Result<Task, CoordinatorError> {
        let _guard = self.coordination.lock().await;

        let swarm = self.load_swarm().await?;
        let mut task = self.load_task(task_id).await?;
        if task.status == TaskStatus::Completed {
            return Err(TaskError::AlreadyCompleted(task_id).into());
        }

        let mut agent = self.load_agent(agent_id).await?;
        if agent.role != AgentRole::Worker {
            return Err(CoordinatorError::NotAWorker(agent_id));
        }
        if agent.status != AgentStatus::Idle || !self.workers.lock().contains_key(&agent_id) {
            return Err(CoordinatorError::AgentUnavailable {
                agent_id,
                status: agent.status,
            });
        }

        let mut batch = WriteBatch::new();
        if let Some(previous) = task.agent_id.filter(|id| *id != agent_id) {
            let mut previous = self.load_agent(previous).await?;
            if previous.status.is_engaged() {
                previous.transition_to(AgentStatus::Idle)?;
                batch = batch.agent(previous);
            }
        }

        let completed = completed_ids(&self.list_tasks().await?);
        let ready = dependencies_met(&task, &completed);
        task.reopen()?;
        task.start(agent_id, ready)?;
        agent.transition_to(AgentStatus::Active)?;
        self.commit(batch.task(task.clone()).agent(agent)).await?;

        self.heartbeats.lock().insert(agent_id, Instant::now());
        self.publish_assignment(&swarm, agent_id, task.clone());
        info!(swarm_id = %self.swarm_id, task_id = %task_id, agent_id = %agent_id, "Task reassigned");
        Ok(task)
    }

    /// Spawns or terminates workers toward `target` (clamped to
    /// `max_workers`). Only idle workers are terminated.
    pub async fn scale_swarm(&self, target: u32) -> Result<ScaleReport, CoordinatorError> {
        let _guard = self.coordination.lock().await;

        let swarm = self.load_swarm().await?;
        let target = target.min(swarm.max_workers) as usize;
        let agents = self.list_agents().await?;
        let live: Vec<&Agent> = agents.iter().filter(|a| is_live_worker(a)).collect();

        let mut report = ScaleReport::default();
        if target > live.len() {
            for _ in live.len()..target {
                report.spawned.push(self.spawn_worker(&swarm, None).await?.id);
            }
        } else {
            let mut idle: Vec<&Agent> = live.iter().copied().filter(|a| a.status == AgentStatus::Idle).collect();
            idle.sort_by_key(|a| std::cmp::Reverse((a.created_at, a.id.0)));
            for agent in idle.into_iter().take(live.len() - target) {
                self.terminate_locked(agent.id).await?;
                report.terminated.push(agent.id);
            }
        }

        info!(
            swarm_id = %self.swarm_id,
            target,
            spawned = report.spawned.len(),
            terminated = report.terminated.len(),
            "Swarm scaled"
        );
        Ok(report)
    }

    /// Persists the new topology; direct messages follow it from now on.
    pub async fn update_topology(&self, topology: Topology) -> Result<Swarm, CoordinatorError> {
        let _guard = self.coordination.lock().await;

        let mut swarm = self.load_swarm().await?;
        let previous = swarm.topology;
        swarm.set_topology(topology);
        retry_once("update_swarm", || self.ctx.store.update_swarm(&swarm)).await?;

        self.publish(
            MessageType::Status,
            topics::status(self.swarm_id),
            json!({ "event": "topology_changed", "from": previous.as_str(), "to": topology.as_str() }),
        );
        info!(swarm_id = %self.swarm_id, from = %previous, to = %topology, "Topology updated");
        self.journal(
            LogLevel::Info,
            "Topology updated",
            json!({ "from": previous.as_str(), "to": topology.as_str() }),
        )
        .await;
        Ok(swarm)
    }

    /// Puts a topology change to a vote. The queen votes for the change and
    /// every live worker votes through the executor; the topology is only
    /// switched when the change wins.
    pub async fn propose_topology_change(&self, topology: Topology) -> Result<ConsensusDecision, CoordinatorError> {
        let swarm = self.load_swarm().await?;
        if swarm.topology == topology {
            return Err(CoordinatorError::InvalidRequest(format!("swarm already uses {topology} topology")));
        }

        let topic = format!("topology:{}->{}", swarm.topology, topology);
        let options = vec![topology.as_str().to_string(), swarm.topology.as_str().to_string()];
        let proposal = self.consensus.propose(&topic, options.clone(), Some(self.queen_id)).await?;

        self.consensus
            .vote(self.queen_id, proposal, topology.as_str(), Some("proposed by queen".to_string()))
            .await?;

        for agent in self.list_agents().await?.iter().filter(|a| is_live_worker(a)) {
            let Some(choice) = self.ctx.executor.vote(agent, &topic, &options).await else {
                continue;
            };
            match self.consensus.vote(agent.id, proposal, &choice, None).await {
                Ok(Some(_)) => break,
                Ok(None) => {}
                Err(ConsensusError::InvalidVote(e)) => {
                    warn!(swarm_id = %self.swarm_id, error = %e, "Discarding worker vote");
                }
                Err(e) => return Err(e.into()),
            }
        }

        let decision = self.consensus.await_decision(proposal).await?;
        if decision.decision.as_deref() == Some(topology.as_str()) {
            self.update_topology(topology).await?;
        }
        Ok(decision)
    }

    /// Sends `payload` from one agent to another if the topology allows it.
    pub async fn send_direct(
        &self,
        from: AgentId,
        to: AgentId,
        payload: serde_json::Value,
    ) -> Result<DeliveryReport, CoordinatorError> {
        let swarm = self.load_swarm().await?;
        let roster: Vec<Agent> = self
            .list_agents()
            .await?
            .into_iter()
            .filter(|a| !a.is_terminated())
            .collect();
        let sender = roster.iter().find(|a| a.id == from).ok_or(CoordinatorError::AgentNotFound(from))?;
        let recipient = roster.iter().find(|a| a.id == to).ok_or(CoordinatorError::AgentNotFound(to))?;

        if !swarm.topology.allows(sender, recipient, &roster) {
            return Err(CoordinatorError::TopologyViolation {
                topology: swarm.topology,
                from,
                to,
            });
        }

        let message = SwarmMessage::new(self.swarm_id, Some(from), MessageType::Status, topics::agent(to), payload)
            .encrypted(self.ctx.settings.encryption);
        Ok(self.ctx.bus.publish(message))
    }

    /// Marks a worker terminated. A task it held is failed and requeued
    /// within its retry budget.
    pub async fn terminate_agent(&self, agent_id: AgentId) -> Result<Agent, CoordinatorError> {
        let _guard = self.coordination.lock().await;
        self.terminate_locked(agent_id).await
    }

    pub async fn status(&self) -> Result<SwarmReport, CoordinatorError> {
        let swarm = self.load_swarm().await?;
        let agents = self.list_agents().await?;
        let tasks = self.list_tasks().await?;
        let decisions = retry_once("list_consensus_decisions", || {
            self.ctx.store.list_consensus_decisions(self.swarm_id)
        })
        .await?;
        let memory = self.memory.get_stats().await?;

        Ok(SwarmReport::build(swarm, &agents, &tasks)
            .with_decisions(&decisions)
            .with_memory(memory))
    }

    /// Control loop: drain the inbox, detect stalls, expire votes and
    /// dispatch, once per dispatch interval, until the swarm completes or
    /// fails or `cancel` fires. The swarm is checkpointed every checkpoint
    /// interval so a crashed process can be resumed. Non-fatal errors are
    /// logged and the loop carries on.
    pub async fn run(&self, cancel: CancellationToken) -> Result<RunOutcome, CoordinatorError> {
        let mut tick = interval(self.ctx.settings.dispatch_interval);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let period = self.ctx.settings.checkpoint_interval;
        let mut checkpoints = interval_at(tokio::time::Instant::now() + period, period);
        checkpoints.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(swarm_id = %self.swarm_id, "Queen control loop started");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!(swarm_id = %self.swarm_id, "Queen control loop cancelled");
                    return Ok(RunOutcome::Cancelled);
                }
                _ = checkpoints.tick() => {
                    if let Err(e) = self.save_checkpoint().await {
                        warn!(swarm_id = %self.swarm_id, error = %e, "Periodic checkpoint failed");
                    }
                    continue;
                }
                _ = tick.tick() => {}
            }

            match self.cycle().await {
                Ok(Some(outcome)) => {
                    info!(swarm_id = %self.swarm_id, ?outcome, "Queen control loop finished");
                    return Ok(outcome);
                }
                Ok(None) => {}
                Err(e) if e.is_fatal() => {
                    self.journal(LogLevel::Error, &format!("Coordinator stopped: {e}"), json!(null)).await;
                    return Err(e);
                }
                Err(e) => warn!(swarm_id = %self.swarm_id, error = %e, "Coordination cycle failed"),
            }
        }
    }

    /// Checkpoints the swarm between coordination cycles.
    async fn save_checkpoint(&self) -> Result<(), CoordinatorError> {
        let _guard = self.coordination.lock().await;
        let checkpoint = self.sessions.checkpoint(self.swarm_id).await?;
        debug!(swarm_id = %self.swarm_id, checkpoint_id = %checkpoint.id, "Periodic checkpoint");
        Ok(())
    }

    async fn cycle(&self) -> Result<Option<RunOutcome>, CoordinatorError> {
        self.process_inbox().await?;
        self.detect_stalled_agents().await?;
        for timeout in self.consensus.expire_overdue(Utc::now()).await? {
            self.journal(LogLevel::Warn, &timeout.to_string(), json!({ "proposal_id": timeout.proposal_id }))
                .await;
        }

        match self.load_swarm().await?.status {
            SwarmStatus::Completed => return Ok(Some(RunOutcome::Completed)),
            SwarmStatus::Failed => return Ok(Some(RunOutcome::Failed)),
            SwarmStatus::Active | SwarmStatus::Paused => {}
        }
        self.dispatch_pending().await?;
        Ok(None)
    }

    async fn apply_status(&self, agent_id: AgentId, status: WorkerStatus) -> Result<(), CoordinatorError> {
        let (WorkerState::Busy, Some(task_id)) = (status.state, status.task_id) else {
            return Ok(());
        };
        let mut agent = self.load_agent(agent_id).await?;
        let task = self.load_task(task_id).await?;
        if agent.status != AgentStatus::Active
            || task.status != TaskStatus::InProgress
            || task.agent_id != Some(agent_id)
        {
            return Ok(());
        }
        agent.transition_to(AgentStatus::Busy)?;
        retry_once("upsert_agent", || self.ctx.store.upsert_agent(&agent)).await?;
        Ok(())
    }

    async fn apply_result(&self, agent_id: AgentId, report: TaskReport) -> Result<bool, CoordinatorError> {
        let Some(mut task) = retry_once("get_task", || self.ctx.store.get_task(report.task_id))
            .await?
            .filter(|t| t.swarm_id == self.swarm_id)
        else {
            warn!(swarm_id = %self.swarm_id, task_id = %report.task_id, "Result for unknown task");
            return Ok(false);
        };
        if task.status != TaskStatus::InProgress || task.agent_id != Some(agent_id) {
            debug!(swarm_id = %self.swarm_id, task_id = %task.id, agent_id = %agent_id, "Ignoring stale result");
            return Ok(false);
        }
        let mut agent = self.load_agent(agent_id).await?;

        let disposition = match &report.outcome {
            TaskOutcome::Completed { result } => {
                task.complete(result.clone())?;
                None
            }
            TaskOutcome::Failed { error } => Some(task.fail(error.clone())?),
        };
        if agent.status.is_engaged() {
            agent.transition_to(AgentStatus::Idle)?;
        }
        self.commit(WriteBatch::new().task(task.clone()).agent(agent)).await?;

        match (disposition, &report.outcome) {
            (None, TaskOutcome::Completed { result }) => {
                counter!("hive_mind_tasks_completed_total").increment(1);
                info!(swarm_id = %self.swarm_id, task_id = %task.id, duration_ms = report.duration_ms, "Task completed");
                let remembered = self
                    .memory
                    .store_in(
                        RESULTS_NAMESPACE,
                        &format!("task/{}", task.id),
                        json!({ "description": task.description, "agent_id": agent_id, "result": result }),
                        MemoryType::Knowledge,
                        1.0,
                    )
                    .await;
                if let Err(e) = remembered {
                    warn!(swarm_id = %self.swarm_id, task_id = %task.id, error = %e, "Could not remember task result");
                }
                self.complete_if_done().await?;
            }
            (Some(FailureDisposition::Requeued { retry_count }), _) => {
                counter!("hive_mind_tasks_retried_total").increment(1);
                self.journal(
                    LogLevel::Warn,
                    "Task failed, requeued",
                    json!({ "task_id": task.id, "retry_count": retry_count, "error": task.error }),
                )
                .await;
            }
            (Some(FailureDisposition::Exhausted), _) => {
                counter!("hive_mind_tasks_failed_total").increment(1);
                self.journal(
                    LogLevel::Error,
                    "Task failed permanently",
                    json!({ "task_id": task.id, "retries": task.retry_count, "error": task.error }),
                )
                .await;
            }
            (None, TaskOutcome::Failed { .. }) => {}
        }
        Ok(true)
    }

    async fn complete_if_done(&self) -> Result<bool, CoordinatorError> {
        let tasks = self.list_tasks().await?;
        if tasks.is_empty() || tasks.iter().any(|t| t.status != TaskStatus::Completed) {
            return Ok(false);
        }
        self.sessions.complete(self.swarm_id).await?;
        info!(swarm_id = %self.swarm_id, tasks = tasks.len(), "All tasks completed");
        Ok(true)
    }

    async fn spawn_worker(&self, swarm: &Swarm, agent_type: Option<AgentType>) -> Result<Agent, CoordinatorError> {
        if matches!(swarm.status, SwarmStatus::Completed | SwarmStatus::Failed) {
            return Err(CoordinatorError::SwarmClosed(swarm.status));
        }
        let agents = self.list_agents().await?;
        let live = agents.iter().filter(|a| is_live_worker(a)).count() as u32;
        if live >= swarm.max_workers {
            return Err(CoordinatorError::CapacityReached(swarm.max_workers));
        }

        let ordinal = agents.iter().filter(|a| a.role == AgentRole::Worker).count();
        let agent_type = agent_type.unwrap_or_else(|| worker_type_at(swarm.queen_type, ordinal));
        let agent = Agent::worker(self.swarm_id, format!("{agent_type}-{}", ordinal + 1), agent_type);
        retry_once("upsert_agent", || self.ctx.store.upsert_agent(&agent)).await?;
        self.connect(&agent, swarm);

        counter!("hive_mind_agents_spawned_total").increment(1);
        info!(swarm_id = %self.swarm_id, agent_id = %agent.id, agent_type = %agent_type, "Worker spawned");
        Ok(agent)
    }

    async fn terminate_locked(&self, agent_id: AgentId) -> Result<Agent, CoordinatorError> {
        let mut agent = self.load_agent(agent_id).await?;
        if agent.role == AgentRole::Queen {
            return Err(CoordinatorError::QueenCannotBeTerminated);
        }
        if agent.is_terminated() {
            return Ok(agent);
        }

        let mut tasks = self.list_tasks().await?;
        let held = self.release_held_tasks(&mut tasks, agent_id, "agent terminated")?;
        agent.transition_to(AgentStatus::Terminated)?;
        self.commit(WriteBatch::new().agent(agent.clone()).tasks(held)).await?;
        self.disconnect(agent_id);

        counter!("hive_mind_agents_terminated_total").increment(1);
        info!(swarm_id = %self.swarm_id, agent_id = %agent_id, "Worker terminated");
        Ok(agent)
    }

    /// Fails every in-progress task held by `agent_id`; returns the changed
    /// rows.
    fn release_held_tasks(&self, tasks: &mut [Task], agent_id: AgentId, reason: &str) -> Result<Vec<Task>, CoordinatorError> {
        let mut held = Vec::new();
        for task in tasks
            .iter_mut()
            .filter(|t| t.status == TaskStatus::InProgress && t.agent_id == Some(agent_id))
        {
            let disposition = task.fail(reason)?;
            debug!(task_id = %task.id, ?disposition, "Released task of failed agent");
            held.push(task.clone());
        }
        Ok(held)
    }

    fn connect(&self, agent: &Agent, swarm: &Swarm) {
        let handle = WorkerRuntime::new(
            agent.clone(),
            swarm.objective.clone(),
            self.ctx.bus.clone(),
            self.ctx.executor.clone(),
            self.ctx.settings.heartbeat_interval,
        )
        .with_encryption(self.ctx.settings.encryption)
        .connect();
        self.workers.lock().insert(agent.id, handle);
        self.heartbeats.lock().insert(agent.id, Instant::now());
    }

    fn disconnect(&self, agent_id: AgentId) {
        self.workers.lock().remove(&agent_id);
        self.heartbeats.lock().remove(&agent_id);
    }

    fn publish_assignment(&self, swarm: &Swarm, agent_id: AgentId, task: Task) {
        let message = TaskAssignment {
            agent_id,
            task,
            objective: swarm.objective.clone(),
        }
        .into_message()
        .encrypted(self.ctx.settings.encryption);
        self.ctx.bus.publish(message);
    }

    fn publish(&self, message_type: MessageType, topic: String, payload: serde_json::Value) {
        let message = SwarmMessage::new(self.swarm_id, Some(self.queen_id), message_type, topic, payload)
            .encrypted(self.ctx.settings.encryption);
        self.ctx.bus.publish(message);
    }

    /// Best-effort write to the session log.
    async fn journal(&self, level: LogLevel, message: &str, data: serde_json::Value) {
        let data = (!data.is_null()).then_some(data);
        if let Err(e) = self.sessions.log(self.swarm_id, level, message, data).await {
            warn!(swarm_id = %self.swarm_id, error = %e, "Could not write session log");
        }
    }

    fn update_worker_gauge(&self, agents: &[Agent]) {
        let live = agents.iter().filter(|a| is_live_worker(a)).count();
        gauge!("hive_mind_live_workers", "swarm_id" => self.swarm_id.to_string()).set(live as f64);
    }

    async fn load_swarm(&self) -> Result<Swarm, CoordinatorError> {
        retry_once("get_swarm", || self.ctx.store.get_swarm(self.swarm_id))
            .await?
            .ok_or(CoordinatorError::SwarmNotFound(self.swarm_id))
    }

    async fn load_agent(&self, agent_id: AgentId) -> Result<Agent, CoordinatorError> {
        retry_once("get_agent", || self.ctx.store.get_agent(agent_id))
            .await?
            .filter(|a| a.swarm_id == self.swarm_id)
            .ok_or(CoordinatorError::AgentNotFound(agent_id))
    }

    async fn load_task(&self, task_id: TaskId) -> Result<Task, CoordinatorError> {
        retry_once("get_task", || self.ctx.store.get_task(task_id))
            .await?
            .filter(|t| t.swarm_id == self.swarm_id)
            .ok_or(CoordinatorError::TaskNotFound(task_id))
    }

    async fn list_agents(&self) -> Result<Vec<Agent>, CoordinatorError> {
        Ok(retry_once("list_agents", || self.ctx.store.list_agents(self.swarm_id)).await?)
    }

    async fn list_tasks(&self) -> Result<Vec<Task>, CoordinatorError> {
        Ok(retry_once("list_tasks", || self.ctx.store.list_tasks(self.swarm_id)).await?)
    }

    async fn commit(&self, batch: WriteBatch) -> Result<(), CoordinatorError> {
        retry_once("commit", || self.ctx.store.commit(batch.clone())).await?;
        Ok(())
    }
}

impl Drop for QueenCoordinator {
    fn drop(&mut self) {
        for subscription in &self.subscriptions {
            self.ctx.bus.unsubscribe(*subscription);
        }
        self.workers.lock().clear();
    }
}

fn is_live_worker(agent: &Agent) -> bool {
    agent.role == AgentRole::Worker && !matches!(agent.status, AgentStatus::Terminated | AgentStatus::Failed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    use crate::application::context::CoordinatorSettings;
    use crate::application::executor::EchoExecutor;
    use hive_mind_core::infrastructure::repositories::InMemoryStore;
    use hive_mind_core::infrastructure::swarm_bus::SwarmBus;

    fn context() -> SwarmContext {
        SwarmContext::new(Arc::new(InMemoryStore::new()), SwarmBus::new(256), Arc::new(EchoExecutor)).with_settings(
            CoordinatorSettings {
                heartbeat_interval: Duration::from_secs(60),
                ..CoordinatorSettings::default()
            },
        )
    }

    fn request(max_workers: u32) -> SpawnRequest {
        SpawnRequest {
            max_workers,
            decompose: false,
            ..SpawnRequest::new("build a compiler")
        }
    }

    #[tokio::test]
    async fn test_spawn_creates_queen_and_workers() {
        let ctx = context();
        let queen = QueenCoordinator::spawn_swarm(ctx.clone(), request(3)).await.unwrap();

        let agents = ctx.store.list_agents(queen.swarm_id()).await.unwrap();
        assert_eq!(agents.iter().filter(|a| a.role == AgentRole::Queen).count(), 1);
        let workers: Vec<&Agent> = agents.iter().filter(|a| a.role == AgentRole::Worker).collect();
        assert_eq!(workers.len(), 3);
        assert!(workers.iter().all(|a| a.status == AgentStatus::Idle));
        assert_eq!(queen.connected_workers().len(), 3);
        assert!(ctx.store.find_session_by_swarm(queen.swarm_id()).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_spawn_writes_initial_checkpoint() {
        let ctx = context();
        let queen = QueenCoordinator::spawn_swarm(ctx.clone(), request(2)).await.unwrap();

        let session = ctx.store.find_session_by_swarm(queen.swarm_id()).await.unwrap().unwrap();
        let checkpoint = ctx.store.latest_checkpoint(session.id).await.unwrap().unwrap();
        assert_eq!(checkpoint.payload.swarm.id, queen.swarm_id());
        assert_eq!(checkpoint.payload.agents.len(), 3);
        assert!(checkpoint.payload.tasks.is_empty());
    }

    #[tokio::test]
    async fn test_spawn_rejects_empty_objective() {
        let err = QueenCoordinator::spawn_swarm(context(), SpawnRequest::new("   ")).await.err().unwrap();
        assert!(matches!(err, CoordinatorError::InvalidRequest(_)));
    }

    #[tokio::test]
    async fn test_submit_task_validates_dependencies() {
        let queen = QueenCoordinator::spawn_swarm(context(), request(1)).await.unwrap();
        let err = queen.submit_task(NewTask::new("x", 1).after(TaskId::new())).await.unwrap_err();
        assert!(matches!(err, CoordinatorError::UnknownDependency(_)));

        let first = queen.submit_task(NewTask::new("first", 1)).await.unwrap();
        let second = queen.submit_task(NewTask::new("second", 1).after(first.id)).await.unwrap();
        assert_eq!(second.dependencies, vec![first.id]);
    }

    #[tokio::test]
    async fn test_spawn_agent_respects_max_workers() {
        let queen = QueenCoordinator::spawn_swarm(context(), request(2)).await.unwrap();
        let err = queen.spawn_agent(Some(AgentType::Coder)).await.unwrap_err();
        assert!(matches!(err, CoordinatorError::CapacityReached(2)));
    }

    #[tokio::test]
    async fn test_queen_cannot_be_terminated() {
        let queen = QueenCoordinator::spawn_swarm(context(), request(1)).await.unwrap();
        let err = queen.terminate_agent(queen.queen_id()).await.unwrap_err();
        assert!(matches!(err, CoordinatorError::QueenCannotBeTerminated));
    }

    #[tokio::test]
    async fn test_scale_down_terminates_idle_workers_only() {
        let ctx = context();
        let queen = QueenCoordinator::spawn_swarm(ctx.clone(), request(3)).await.unwrap();
        queen.submit_task(NewTask::new("work", 1)).await.unwrap();
        let dispatched = queen.dispatch_pending().await.unwrap();
        assert_eq!(dispatched.assigned.len(), 1);
        let busy = dispatched.assigned[0].agent_id;

        let report = queen.scale_swarm(0).await.unwrap();
        assert_eq!(report.terminated.len(), 2);
        assert!(!report.terminated.contains(&busy));

        let agent = ctx.store.get_agent(busy).await.unwrap().unwrap();
        assert_eq!(agent.status, AgentStatus::Active);

        let report = queen.scale_swarm(10).await.unwrap();
        assert_eq!(report.spawned.len(), 2);
    }

    #[tokio::test]
    async fn test_terminating_holder_requeues_task() {
        let ctx = context();
        let queen = QueenCoordinator::spawn_swarm(ctx.clone(), request(1)).await.unwrap();
        let task = queen.submit_task(NewTask::new("work", 1)).await.unwrap();
        let agent_id = queen.dispatch_pending().await.unwrap().assigned[0].agent_id;

        queen.terminate_agent(agent_id).await.unwrap();
        let task = ctx.store.get_task(task.id).await.unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Pending);
        assert_eq!(task.agent_id, None);
        assert_eq!(task.retry_count, 1);
        assert!(queen.connected_workers().is_empty());
    }

    #[tokio::test]
    async fn test_stale_result_is_ignored() {
        let ctx = context();
        let queen = QueenCoordinator::spawn_swarm(ctx.clone(), request(2)).await.unwrap();
        let task = queen.submit_task(NewTask::new("work", 1)).await.unwrap();
        let holder = queen.dispatch_pending().await.unwrap().assigned[0].agent_id;
        let other = queen.connected_workers().into_iter().find(|id| *id != holder).unwrap();

        let report = TaskReport {
            task_id: task.id,
            outcome: TaskOutcome::Completed { result: json!(1) },
            duration_ms: 1,
        };
        assert!(!queen.handle_result(other, report.clone()).await.unwrap());
        assert!(queen.handle_result(holder, report.clone()).await.unwrap());
        assert!(!queen.handle_result(holder, report).await.unwrap());

        let swarm = ctx.store.get_swarm(queen.swarm_id()).await.unwrap().unwrap();
        assert_eq!(swarm.status, SwarmStatus::Completed);
        let remembered = queen.memory().retrieve_in(RESULTS_NAMESPACE, &format!("task/{}", task.id)).await.unwrap();
        assert_eq!(remembered.unwrap().value["result"], json!(1));
    }

    #[tokio::test]
    async fn test_reassign_releases_previous_holder() {
        let ctx = context();
        let queen = QueenCoordinator::spawn_swarm(ctx.clone(), request(2)).await.unwrap();
        let task = queen.submit_task(NewTask::new("work", 1)).await.unwrap();
        let first = queen.dispatch_pending().await.unwrap().assigned[0].agent_id;
        let second = queen.connected_workers().into_iter().find(|id| *id != first).unwrap();

        let moved = queen.reassign_task(task.id, second).await.unwrap();
        assert_eq!(moved.agent_id, Some(second));
        assert_eq!(ctx.store.get_agent(first).await.unwrap().unwrap().status, AgentStatus::Idle);
        assert_eq!(ctx.store.get_agent(second).await.unwrap().unwrap().status, AgentStatus::Active);
    }

    #[tokio::test]
    async fn test_direct_messages_follow_topology() {
        let ctx = context();
        let queen = QueenCoordinator::spawn_swarm(
            ctx.clone(),
            SpawnRequest {
                topology: Topology::Star,
                ..request(2)
            },
        )
        .await
        .unwrap();
        let workers = queen.connected_workers();

        let err = queen.send_direct(workers[0], workers[1], json!("hi")).await.unwrap_err();
        assert!(matches!(err, CoordinatorError::TopologyViolation { .. }));
        queen.send_direct(workers[0], queen.queen_id(), json!("hi")).await.unwrap();

        queen.update_topology(Topology::Mesh).await.unwrap();
        queen.send_direct(workers[0], workers[1], json!("hi")).await.unwrap();
    }
}
