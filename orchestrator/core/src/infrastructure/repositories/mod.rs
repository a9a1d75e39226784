// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Repository Implementations
//!
//! Infrastructure implementations of the [`PersistentStore`] contract defined
//! in the domain layer.
//!
//! # Architecture
//!
//! - **Layer:** Infrastructure
//! - **Purpose:** Persist and retrieve domain aggregates
//! - **Pattern:** Repository (DDD), Adapter (Hexagonal Architecture)
//!
//! # Available Implementations
//!
//! - **SqliteStore** - embedded SQLite file, used by the CLI
//! - **InMemoryStore** - one lock over every table; for tests and ephemeral runs
//!
//! Both stores enforce the same referential rules, so code tested against the
//! in-memory store behaves identically on SQLite.

pub mod sqlite;

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;

use crate::domain::agent::{Agent, AgentId};
use crate::domain::consensus::ConsensusDecision;
use crate::domain::memory::MemoryEntry;
use crate::domain::repository::{PersistentStore, StorageError, WriteBatch};
use crate::domain::session::{Checkpoint, Session, SessionId, SessionLogEntry};
use crate::domain::swarm::{Swarm, SwarmId};
use crate::domain::task::{Task, TaskId};

type MemoryKey = (SwarmId, String, String);

#[derive(Default)]
struct Tables {
    swarms: HashMap<SwarmId, Swarm>,
    agents: HashMap<AgentId, Agent>,
    tasks: HashMap<TaskId, Task>,
    memory: BTreeMap<MemoryKey, MemoryEntry>,
    decisions: Vec<ConsensusDecision>,
    sessions: HashMap<SessionId, Session>,
    checkpoints: HashMap<SessionId, Vec<Checkpoint>>,
    logs: HashMap<SessionId, Vec<SessionLogEntry>>,
}

impl Tables {
    fn require_swarm(&self, id: SwarmId) -> Result<(), StorageError> {
        if self.swarms.contains_key(&id) {
            Ok(())
        } else {
            Err(StorageError::not_found("swarm", id))
        }
    }

    fn require_session(&self, id: SessionId) -> Result<(), StorageError> {
        if self.sessions.contains_key(&id) {
            Ok(())
        } else {
            Err(StorageError::not_found("session", id))
        }
    }

    fn knows_swarm(&self, id: SwarmId, in_batch: Option<SwarmId>) -> bool {
        in_batch == Some(id) || self.swarms.contains_key(&id)
    }

    /// At most one queen per swarm, counting rows staged in the same batch.
    fn check_queen(&self, agent: &Agent, staged: &[Agent]) -> Result<(), StorageError> {
        if !agent.is_queen() {
            return Ok(());
        }
        let rival = self
            .agents
            .values()
            .chain(staged.iter())
            .any(|a| a.swarm_id == agent.swarm_id && a.is_queen() && a.id != agent.id);
        if rival {
            return Err(StorageError::Conflict(format!(
                "swarm {} already has a queen",
                agent.swarm_id
            )));
        }
        Ok(())
    }

    fn check_task(&self, task: &Task, staged: &[Agent], in_batch: Option<SwarmId>) -> Result<(), StorageError> {
        if !self.knows_swarm(task.swarm_id, in_batch) {
            return Err(StorageError::not_found("swarm", task.swarm_id));
        }
        if let Some(agent_id) = task.agent_id {
            let known = self.agents.contains_key(&agent_id) || staged.iter().any(|a| a.id == agent_id);
            if !known {
                return Err(StorageError::not_found("agent", agent_id));
            }
        }
        Ok(())
    }
}

/// In-memory [`PersistentStore`].
#[derive(Clone, Default)]
pub struct InMemoryStore {
    tables: Arc<RwLock<Tables>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PersistentStore for InMemoryStore {
    async fn create_swarm(&self, swarm: &Swarm) -> Result<(), StorageError> {
        let mut tables = self.tables.write();
        if tables.swarms.contains_key(&swarm.id) {
            return Err(StorageError::Conflict(format!("swarm {} already exists", swarm.id)));
        }
        tables.swarms.insert(swarm.id, swarm.clone());
        Ok(())
    }

    async fn get_swarm(&self, id: SwarmId) -> Result<Option<Swarm>, StorageError> {
        Ok(self.tables.read().swarms.get(&id).cloned())
    }

    async fn update_swarm(&self, swarm: &Swarm) -> Result<(), StorageError> {
        let mut tables = self.tables.write();
        match tables.swarms.get_mut(&swarm.id) {
            Some(existing) => {
                *existing = swarm.clone();
                Ok(())
            }
            None => Err(StorageError::not_found("swarm", swarm.id)),
        }
    }

    async fn list_swarms(&self) -> Result<Vec<Swarm>, StorageError> {
        let mut swarms: Vec<Swarm> = self.tables.read().swarms.values().cloned().collect();
        swarms.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(swarms)
    }

    async fn delete_swarm(&self, id: SwarmId) -> Result<(), StorageError> {
        let mut tables = self.tables.write();
        tables.swarms.remove(&id);
        tables.agents.retain(|_, a| a.swarm_id != id);
        tables.tasks.retain(|_, t| t.swarm_id != id);
        tables.memory.retain(|(swarm_id, _, _), _| *swarm_id != id);
        tables.decisions.retain(|d| d.swarm_id != id);

        let sessions: Vec<SessionId> = tables
            .sessions
            .values()
            .filter(|s| s.swarm_id == id)
            .map(|s| s.id)
            .collect();
        for session_id in sessions {
            tables.sessions.remove(&session_id);
            tables.checkpoints.remove(&session_id);
            tables.logs.remove(&session_id);
        }
        Ok(())
    }

    async fn upsert_agent(&self, agent: &Agent) -> Result<(), StorageError> {
        let mut tables = self.tables.write();
        tables.require_swarm(agent.swarm_id)?;
        tables.check_queen(agent, &[])?;
        tables.agents.insert(agent.id, agent.clone());
        Ok(())
    }

    async fn get_agent(&self, id: AgentId) -> Result<Option<Agent>, StorageError> {
        Ok(self.tables.read().agents.get(&id).cloned())
    }

    async fn list_agents(&self, swarm_id: SwarmId) -> Result<Vec<Agent>, StorageError> {
        let mut agents: Vec<Agent> = self
            .tables
            .read()
            .agents
            .values()
            .filter(|a| a.swarm_id == swarm_id)
            .cloned()
            .collect();
        agents.sort_by_key(|a| (a.created_at, a.id));
        Ok(agents)
    }

    async fn upsert_task(&self, task: &Task) -> Result<(), StorageError> {
        let mut tables = self.tables.write();
        tables.check_task(task, &[], None)?;
        tables.tasks.insert(task.id, task.clone());
        Ok(())
    }

    async fn get_task(&self, id: TaskId) -> Result<Option<Task>, StorageError> {
        Ok(self.tables.read().tasks.get(&id).cloned())
    }

    async fn list_tasks(&self, swarm_id: SwarmId) -> Result<Vec<Task>, StorageError> {
        let mut tasks: Vec<Task> = self
            .tables
            .read()
            .tasks
            .values()
            .filter(|t| t.swarm_id == swarm_id)
            .cloned()
            .collect();
        tasks.sort_by_key(|t| (t.created_at, t.id));
        Ok(tasks)
    }

    async fn commit(&self, batch: WriteBatch) -> Result<(), StorageError> {
        let mut tables = self.tables.write();

        // Validate everything before touching any table.
        let in_batch = batch.swarm.as_ref().map(|s| s.id);
        for (i, agent) in batch.agents.iter().enumerate() {
            if !tables.knows_swarm(agent.swarm_id, in_batch) {
                return Err(StorageError::not_found("swarm", agent.swarm_id));
            }
            tables.check_queen(agent, &batch.agents[..i])?;
        }
        for task in &batch.tasks {
            tables.check_task(task, &batch.agents, in_batch)?;
        }

        if let Some(swarm) = batch.swarm {
            tables.swarms.insert(swarm.id, swarm);
        }
        for agent in batch.agents {
            tables.agents.insert(agent.id, agent);
        }
        for task in batch.tasks {
            tables.tasks.insert(task.id, task);
        }
        Ok(())
    }

    async fn append_memory_entry(&self, entry: &MemoryEntry) -> Result<(), StorageError> {
        let mut tables = self.tables.write();
        tables.require_swarm(entry.swarm_id)?;
        let key = (entry.swarm_id, entry.namespace.clone(), entry.key.clone());
        let mut stored = entry.clone();
        if let Some(existing) = tables.memory.get(&key) {
            stored.id = existing.id;
            stored.created_at = existing.created_at;
            stored.created_by = existing.created_by;
        }
        tables.memory.insert(key, stored);
        Ok(())
    }

    async fn get_memory_entry(
        &self,
        swarm_id: SwarmId,
        namespace: &str,
        key: &str,
    ) -> Result<Option<MemoryEntry>, StorageError> {
        let key = (swarm_id, namespace.to_string(), key.to_string());
        Ok(self.tables.read().memory.get(&key).cloned())
    }

    async fn list_memory_entries(
        &self,
        swarm_id: SwarmId,
        namespace: Option<&str>,
    ) -> Result<Vec<MemoryEntry>, StorageError> {
        let mut entries: Vec<MemoryEntry> = self
            .tables
            .read()
            .memory
            .values()
            .filter(|e| e.swarm_id == swarm_id && namespace.is_none_or(|ns| e.namespace == ns))
            .cloned()
            .collect();
        entries.sort_by(|a, b| a.key.cmp(&b.key).then_with(|| a.namespace.cmp(&b.namespace)));
        Ok(entries)
    }

    async fn record_memory_access(
        &self,
        swarm_id: SwarmId,
        namespace: &str,
        key: &str,
    ) -> Result<Option<MemoryEntry>, StorageError> {
        let key = (swarm_id, namespace.to_string(), key.to_string());
        let mut tables = self.tables.write();
        Ok(tables.memory.get_mut(&key).map(|entry| {
            entry.access_count += 1;
            entry.accessed_at = Utc::now();
            entry.clone()
        }))
    }

    async fn delete_memory_entry(
        &self,
        swarm_id: SwarmId,
        namespace: &str,
        key: &str,
    ) -> Result<bool, StorageError> {
        let key = (swarm_id, namespace.to_string(), key.to_string());
        Ok(self.tables.write().memory.remove(&key).is_some())
    }

    async fn append_consensus_decision(&self, decision: &ConsensusDecision) -> Result<(), StorageError> {
        let mut tables = self.tables.write();
        tables.require_swarm(decision.swarm_id)?;
        if tables.decisions.iter().any(|d| d.id == decision.id) {
            return Err(StorageError::Conflict(format!("decision {} already recorded", decision.id)));
        }
        tables.decisions.push(decision.clone());
        Ok(())
    }

    async fn list_consensus_decisions(&self, swarm_id: SwarmId) -> Result<Vec<ConsensusDecision>, StorageError> {
        Ok(self
            .tables
            .read()
            .decisions
            .iter()
            .filter(|d| d.swarm_id == swarm_id)
            .cloned()
            .collect())
    }

    async fn create_session(&self, session: &Session) -> Result<(), StorageError> {
        let mut tables = self.tables.write();
        tables.require_swarm(session.swarm_id)?;
        if tables.sessions.contains_key(&session.id) {
            return Err(StorageError::Conflict(format!("session {} already exists", session.id)));
        }
        tables.sessions.insert(session.id, session.clone());
        Ok(())
    }

    async fn update_session(&self, session: &Session) -> Result<(), StorageError> {
        let mut tables = self.tables.write();
        match tables.sessions.get_mut(&session.id) {
            Some(existing) => {
                *existing = session.clone();
                Ok(())
            }
            None => Err(StorageError::not_found("session", session.id)),
        }
    }

    async fn get_session(&self, id: SessionId) -> Result<Option<Session>, StorageError> {
        Ok(self.tables.read().sessions.get(&id).cloned())
    }

    async fn find_session_by_swarm(&self, swarm_id: SwarmId) -> Result<Option<Session>, StorageError> {
        Ok(self
            .tables
            .read()
            .sessions
            .values()
            .filter(|s| s.swarm_id == swarm_id)
            .max_by_key(|s| s.created_at)
            .cloned())
    }

    async fn list_sessions(&self) -> Result<Vec<Session>, StorageError> {
        let mut sessions: Vec<Session> = self.tables.read().sessions.values().cloned().collect();
        sessions.sort_by(|a, b| b.updated_at.cmp(&a.updated_at).then_with(|| a.id.cmp(&b.id)));
        Ok(sessions)
    }

    async fn append_checkpoint(&self, checkpoint: &Checkpoint) -> Result<(), StorageError> {
        let mut tables = self.tables.write();
        tables.require_session(checkpoint.session_id)?;
        tables
            .checkpoints
            .entry(checkpoint.session_id)
            .or_default()
            .push(checkpoint.clone());
        Ok(())
    }

    async fn latest_checkpoint(&self, session_id: SessionId) -> Result<Option<Checkpoint>, StorageError> {
        Ok(self
            .tables
            .read()
            .checkpoints
            .get(&session_id)
            .and_then(|c| c.last())
            .cloned())
    }

    async fn append_session_log(&self, entry: &SessionLogEntry) -> Result<(), StorageError> {
        let mut tables = self.tables.write();
        tables.require_session(entry.session_id)?;
        tables.logs.entry(entry.session_id).or_default().push(entry.clone());
        Ok(())
    }

    async fn session_log_tail(
        &self,
        session_id: SessionId,
        limit: usize,
    ) -> Result<Vec<SessionLogEntry>, StorageError> {
        let tables = self.tables.read();
        let Some(logs) = tables.logs.get(&session_id) else {
            return Ok(Vec::new());
        };
        let start = logs.len().saturating_sub(limit);
        Ok(logs[start..].to_vec())
    }
}
