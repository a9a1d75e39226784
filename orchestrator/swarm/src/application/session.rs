// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Session Manager - Application Layer
//!
//! A session is the durable record of one swarm run: progress counters,
//! checkpoints and an append-only log. Pausing checkpoints the swarm;
//! resuming rehydrates it from the latest checkpoint and hands it to a new
//! [`QueenCoordinator`].
//!
//! # Architecture
//!
//! - **Layer:** Application Layer
//! - **Purpose:** Pause, checkpoint, resume and log swarm runs

use std::collections::HashMap;

use serde_json::json;
use thiserror::Error;
use tracing::{info, warn};

use hive_mind_core::domain::agent::{Agent, AgentRole, AgentStatus};
use hive_mind_core::domain::repository::{retry_once, StorageError, WriteBatch};
use hive_mind_core::domain::session::{
    Checkpoint, CheckpointPayload, LogLevel, Session, SessionId, SessionLogEntry, SessionStatus,
};
use hive_mind_core::domain::swarm::{SwarmId, SwarmStatus};
use hive_mind_core::domain::task::{Task, TaskStatus};

use crate::application::context::SwarmContext;
use crate::application::queen::{CoordinatorError, QueenCoordinator};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResumeFailure {
    NoCheckpoint,
    SwarmMissing,
    Completed,
    Corrupt(String),
}

impl std::fmt::Display for ResumeFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResumeFailure::NoCheckpoint => f.write_str("no checkpoint recorded"),
            ResumeFailure::SwarmMissing => f.write_str("swarm no longer exists"),
            ResumeFailure::Completed => f.write_str("session already completed"),
            ResumeFailure::Corrupt(reason) => write!(f, "checkpoint is corrupt: {reason}"),
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("cannot resume session {session_id}: {reason}")]
pub struct SessionResumeError {
    pub session_id: SessionId,
    pub reason: ResumeFailure,
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("swarm {0} has no session")]
    NoSession(SwarmId),

    #[error("session {0} not found")]
    NotFound(SessionId),

    #[error("swarm {0} not found")]
    SwarmNotFound(SwarmId),

    #[error("session {session_id} is {status}")]
    InvalidState {
        session_id: SessionId,
        status: SessionStatus,
    },

    #[error(transparent)]
    Resume(#[from] SessionResumeError),

    #[error(transparent)]
    Coordinator(#[from] CoordinatorError),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

#[derive(Clone)]
pub struct SessionManager {
    ctx: SwarmContext,
}

impl SessionManager {
    pub fn new(ctx: SwarmContext) -> Self {
        Self { ctx }
    }

    pub async fn session_for(&self, swarm_id: SwarmId) -> Result<Session, SessionError> {
        retry_once("find_session_by_swarm", || self.ctx.store.find_session_by_swarm(swarm_id))
            .await?
            .ok_or(SessionError::NoSession(swarm_id))
    }

    pub async fn get(&self, session_id: SessionId) -> Result<Session, SessionError> {
        retry_once("get_session", || self.ctx.store.get_session(session_id))
            .await?
            .ok_or(SessionError::NotFound(session_id))
    }

    /// Most recently updated first.
    pub async fn list_sessions(&self) -> Result<Vec<Session>, SessionError> {
        Ok(retry_once("list_sessions", || self.ctx.store.list_sessions()).await?)
    }

    pub async fn log_tail(&self, session_id: SessionId, limit: usize) -> Result<Vec<SessionLogEntry>, SessionError> {
        Ok(retry_once("session_log_tail", || self.ctx.store.session_log_tail(session_id, limit)).await?)
    }

    pub async fn log(
        &self,
        swarm_id: SwarmId,
        level: LogLevel,
        message: &str,
        data: Option<serde_json::Value>,
    ) -> Result<(), SessionError> {
        let session = self.session_for(swarm_id).await?;
        let mut entry = SessionLogEntry::new(session.id, level, message);
        if let Some(data) = data {
            entry = entry.with_data(data);
        }
        retry_once("append_session_log", || self.ctx.store.append_session_log(&entry)).await?;
        Ok(())
    }

    /// Snapshots the swarm, its agents and tasks. Checkpointing an unchanged
    /// swarm twice yields identical payloads.
    pub async fn checkpoint(&self, swarm_id: SwarmId) -> Result<Checkpoint, SessionError> {
        let mut session = self.session_for(swarm_id).await?;
        let payload = self.capture(swarm_id).await?;

        let checkpoint = Checkpoint::capture(session.id, payload);
        retry_once("append_checkpoint", || self.ctx.store.append_checkpoint(&checkpoint)).await?;
        session.record_progress(&checkpoint.payload);
        retry_once("update_session", || self.ctx.store.update_session(&session)).await?;

        info!(
            swarm_id = %swarm_id,
            session_id = %session.id,
            checkpoint_id = %checkpoint.id,
            completion = checkpoint.completion_percentage,
            "Checkpoint saved"
        );
        Ok(checkpoint)
    }

    /// Stops dispatch and records a checkpoint. In-flight work keeps its
    /// rows until resume.
    pub async fn pause(&self, swarm_id: SwarmId) -> Result<Session, SessionError> {
        let session = self.session_for(swarm_id).await?;
        if session.status != SessionStatus::Active {
            return Err(SessionError::InvalidState {
                session_id: session.id,
                status: session.status,
            });
        }

        let mut swarm = self.load_swarm(swarm_id).await?;
        swarm.set_status(SwarmStatus::Paused);
        retry_once("update_swarm", || self.ctx.store.update_swarm(&swarm)).await?;

        let checkpoint = self.checkpoint(swarm_id).await?;
        let mut session = self.session_for(swarm_id).await?;
        session.pause();
        retry_once("update_session", || self.ctx.store.update_session(&session)).await?;

        self.log(
            swarm_id,
            LogLevel::Info,
            "Session paused",
            Some(json!({ "checkpoint_id": checkpoint.id.to_string(), "completion": session.completion_percentage })),
        )
        .await?;
        info!(swarm_id = %swarm_id, session_id = %session.id, "Session paused");
        Ok(session)
    }

    /// Rehydrates the swarm from its latest checkpoint and attaches a new
    /// coordinator.
    ///
    /// Active sessions are resumable too, which covers a process that died
    /// without pausing. Workers come back idle and in-flight tasks go back to
    /// pending. A failed resume is logged and leaves the stored rows as they
    /// were.
    pub async fn resume(&self, session_id: SessionId) -> Result<QueenCoordinator, SessionError> {
        let mut session = self.get(session_id).await?;
        match self.restore(&session).await {
            Ok(()) => {}
            Err(SessionError::Resume(e)) => {
                warn!(session_id = %session_id, error = %e, "Resume failed");
                let entry = SessionLogEntry::new(session_id, LogLevel::Error, e.to_string());
                if let Err(log_err) = retry_once("append_session_log", || self.ctx.store.append_session_log(&entry)).await {
                    warn!(session_id = %session_id, error = %log_err, "Could not write session log");
                }
                return Err(e.into());
            }
            Err(e) => return Err(e),
        }

        session.resume();
        retry_once("update_session", || self.ctx.store.update_session(&session)).await?;
        self.log(session.swarm_id, LogLevel::Info, "Session resumed", None).await?;
        info!(session_id = %session_id, swarm_id = %session.swarm_id, "Session resumed");

        Ok(QueenCoordinator::attach(self.ctx.clone(), session.swarm_id).await?)
    }

    /// Marks the swarm and its session completed with a final checkpoint.
    pub async fn complete(&self, swarm_id: SwarmId) -> Result<Session, SessionError> {
        let mut swarm = self.load_swarm(swarm_id).await?;
        swarm.set_status(SwarmStatus::Completed);
        retry_once("update_swarm", || self.ctx.store.update_swarm(&swarm)).await?;

        self.checkpoint(swarm_id).await?;
        let mut session = self.session_for(swarm_id).await?;
        session.complete();
        retry_once("update_session", || self.ctx.store.update_session(&session)).await?;
        self.log(swarm_id, LogLevel::Info, "Session completed", None).await?;
        info!(swarm_id = %swarm_id, session_id = %session.id, "Session completed");
        Ok(session)
    }

    async fn restore(&self, session: &Session) -> Result<(), SessionError> {
        let fail = |reason| SessionResumeError {
            session_id: session.id,
            reason,
        };
        if session.status == SessionStatus::Completed {
            return Err(fail(ResumeFailure::Completed).into());
        }

        let checkpoint = match self.ctx.store.latest_checkpoint(session.id).await {
            Ok(Some(checkpoint)) => checkpoint,
            Ok(None) => return Err(fail(ResumeFailure::NoCheckpoint).into()),
            Err(StorageError::Serialization(reason)) => return Err(fail(ResumeFailure::Corrupt(reason)).into()),
            Err(e) => return Err(e.into()),
        };
        let payload = checkpoint.payload;
        if payload.swarm.id != session.swarm_id {
            return Err(fail(ResumeFailure::Corrupt("checkpoint belongs to another swarm".to_string())).into());
        }
        let queens = payload.agents.iter().filter(|a| a.role == AgentRole::Queen).count();
        if queens != 1 {
            return Err(fail(ResumeFailure::Corrupt(format!("checkpoint holds {queens} queens"))).into());
        }

        let Some(mut swarm) = retry_once("get_swarm", || self.ctx.store.get_swarm(session.swarm_id)).await? else {
            return Err(fail(ResumeFailure::SwarmMissing).into());
        };
        let agents = retry_once("list_agents", || self.ctx.store.list_agents(session.swarm_id)).await?;
        let tasks = retry_once("list_tasks", || self.ctx.store.list_tasks(session.swarm_id)).await?;

        let (agents, tasks) = rehydrate(&payload, &agents, &tasks);
        swarm.set_status(SwarmStatus::Active);
        let batch = WriteBatch::new().swarm(swarm).agents(agents).tasks(tasks);
        retry_once("commit", || self.ctx.store.commit(batch.clone())).await?;
        Ok(())
    }

    async fn capture(&self, swarm_id: SwarmId) -> Result<CheckpointPayload, SessionError> {
        let swarm = self.load_swarm(swarm_id).await?;
        let agents = retry_once("list_agents", || self.ctx.store.list_agents(swarm_id)).await?;
        let tasks = retry_once("list_tasks", || self.ctx.store.list_tasks(swarm_id)).await?;
        Ok(CheckpointPayload { swarm, agents, tasks })
    }

    async fn load_swarm(&self, swarm_id: SwarmId) -> Result<hive_mind_core::domain::swarm::Swarm, SessionError> {
        retry_once("get_swarm", || self.ctx.store.get_swarm(swarm_id))
            .await?
            .ok_or(SessionError::SwarmNotFound(swarm_id))
    }
}

/// Merges a checkpoint with the rows currently stored.
///
/// Rows written after the checkpoint win when they are final: a terminated
/// agent stays terminated, a completed or permanently failed task keeps its
/// outcome. A stored task that has used more retries than the checkpoint
/// knows of also wins, so resuming never refunds retry budget. Everything
/// else comes from the checkpoint, with workers reset to idle and in-flight
/// tasks released to pending. Rows unknown to the checkpoint are kept and
/// normalised the same way.
pub fn rehydrate(payload: &CheckpointPayload, agents: &[Agent], tasks: &[Task]) -> (Vec<Agent>, Vec<Task>) {
    let current_agents: HashMap<_, _> = agents.iter().map(|a| (a.id, a)).collect();
    let current_tasks: HashMap<_, _> = tasks.iter().map(|t| (t.id, t)).collect();

    let mut merged_agents: Vec<Agent> = payload
        .agents
        .iter()
        .map(|saved| match current_agents.get(&saved.id) {
            Some(current) if current.is_terminated() => (*current).clone(),
            _ => saved.clone(),
        })
        .collect();
    merged_agents.extend(
        agents
            .iter()
            .filter(|a| !payload.agents.iter().any(|saved| saved.id == a.id))
            .cloned(),
    );
    for agent in merged_agents.iter_mut().filter(|a| !a.is_terminated()) {
        agent.status = match agent.role {
            AgentRole::Queen => AgentStatus::Active,
            AgentRole::Worker => AgentStatus::Idle,
        };
    }

    let mut merged_tasks: Vec<Task> = payload
        .tasks
        .iter()
        .map(|saved| match current_tasks.get(&saved.id) {
            Some(current) if supersedes(current, saved) => (*current).clone(),
            _ => saved.clone(),
        })
        .collect();
    merged_tasks.extend(
        tasks
            .iter()
            .filter(|t| !payload.tasks.iter().any(|saved| saved.id == t.id))
            .cloned(),
    );
    for task in &mut merged_tasks {
        task.release();
    }

    (merged_agents, merged_tasks)
}

fn supersedes(current: &Task, saved: &Task) -> bool {
    current.status.is_terminal() || current.retry_count > saved.retry_count
}

#[cfg(test)]
mod tests {
    use super::*;
    use hive_mind_core::domain::agent::AgentType;
    use hive_mind_core::domain::consensus::ConsensusAlgorithm;
    use hive_mind_core::domain::swarm::{QueenType, Swarm, Topology};

    fn payload() -> CheckpointPayload {
        let swarm = Swarm::new("s", "o", QueenType::Strategic, Topology::Mesh, ConsensusAlgorithm::Majority, 2);
        let mut queen = Agent::queen(swarm.id, "queen");
        queen.status = AgentStatus::Active;
        let mut busy = Agent::worker(swarm.id, "coder-1", AgentType::Coder);
        busy.status = AgentStatus::Busy;
        let mut task = Task::new(swarm.id, "work", 5);
        task.start(busy.id, true).unwrap();
        CheckpointPayload {
            swarm,
            agents: vec![queen, busy],
            tasks: vec![task],
        }
    }

    #[test]
    fn test_rehydrate_releases_in_flight_work() {
        let payload = payload();
        let (agents, tasks) = rehydrate(&payload, &payload.agents, &payload.tasks);

        let worker = agents.iter().find(|a| a.role == AgentRole::Worker).unwrap();
        assert_eq!(worker.status, AgentStatus::Idle);
        let queen = agents.iter().find(|a| a.role == AgentRole::Queen).unwrap();
        assert_eq!(queen.status, AgentStatus::Active);
        assert_eq!(tasks[0].status, TaskStatus::Pending);
        assert_eq!(tasks[0].agent_id, None);
        assert_eq!(tasks[0].retry_count, 0);
    }

    #[test]
    fn test_rehydrate_keeps_final_rows() {
        let payload = payload();
        let mut agents = payload.agents.clone();
        agents[1].status = AgentStatus::Terminated;
        let mut tasks = payload.tasks.clone();
        tasks[0].complete(serde_json::json!("done")).unwrap();
        let late = Task::new(payload.swarm.id, "late", 1);
        tasks.push(late.clone());

        let (merged_agents, merged_tasks) = rehydrate(&payload, &agents, &tasks);
        assert_eq!(merged_agents[1].status, AgentStatus::Terminated);
        assert_eq!(merged_tasks[0].status, TaskStatus::Completed);
        assert!(merged_tasks.iter().any(|t| t.id == late.id));
    }

    #[test]
    fn test_rehydrate_keeps_permanent_failures() {
        let swarm = Swarm::new("s", "o", QueenType::Tactical, Topology::Mesh, ConsensusAlgorithm::Majority, 1);
        let queen = Agent::queen(swarm.id, "queen");
        let worker = Agent::worker(swarm.id, "coder-1", AgentType::Coder);
        let saved = Task::new(swarm.id, "fragile", 1).with_max_retries(0);
        let payload = CheckpointPayload {
            swarm,
            agents: vec![queen, worker.clone()],
            tasks: vec![saved.clone()],
        };

        let mut current = saved.clone();
        current.start(worker.id, true).unwrap();
        current.fail("executor crashed").unwrap();
        assert_eq!(current.status, TaskStatus::Failed);

        let (_, tasks) = rehydrate(&payload, &payload.agents, &[current]);
        assert_eq!(tasks[0].status, TaskStatus::Failed);
        assert_eq!(tasks[0].error.as_deref(), Some("executor crashed"));
    }

    #[test]
    fn test_rehydrate_never_refunds_retries() {
        let payload = payload();
        let mut current = payload.tasks[0].clone();
        current.fail("timeout").unwrap();
        assert_eq!(current.retry_count, 1);
        current.start(payload.agents[1].id, true).unwrap();

        let (_, tasks) = rehydrate(&payload, &payload.agents, &[current]);
        assert_eq!(tasks[0].status, TaskStatus::Pending);
        assert_eq!(tasks[0].retry_count, 1);
        assert_eq!(tasks[0].error.as_deref(), Some("timeout"));
        assert_eq!(tasks[0].agent_id, None);
    }
}
