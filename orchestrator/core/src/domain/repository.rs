// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Persistent Store Contract
//!
//! Durable state for every aggregate of the hive mind: swarms, agents, tasks,
//! collective memory, consensus decisions, sessions, checkpoints and the
//! session log. The interface lives in the domain layer; implementations live
//! in `crate::infrastructure::repositories`.
//!
//! | Implementation | Backend | Used for |
//! |----------------|---------|----------|
//! | `InMemoryStore` | process memory | tests, ephemeral runs |
//! | `SqliteStore` | embedded SQLite file | the CLI |
//!
//! ## Atomicity
//!
//! [`PersistentStore::commit`] applies a [`WriteBatch`] in one transaction.
//! Coordination paths that change a task and its agent together (assignment,
//! completion, failure, reassignment) must go through it so a crash never
//! leaves a task `in_progress` against an agent that is not engaged.

use std::future::Future;

use async_trait::async_trait;
use thiserror::Error;
use tracing::warn;

use crate::domain::agent::{Agent, AgentId};
use crate::domain::consensus::ConsensusDecision;
use crate::domain::memory::MemoryEntry;
use crate::domain::session::{Checkpoint, Session, SessionId, SessionLogEntry};
use crate::domain::swarm::{Swarm, SwarmId};
use crate::domain::task::{Task, TaskId};

/// Storage backend for pluggable persistence
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageBackend {
    InMemory,
    Sqlite(SqliteConfig),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SqliteConfig {
    /// sqlx connection url, e.g. `sqlite://.hive-mind/hive.db`.
    pub url: String,
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    #[error("Database error: {0}")]
    Database(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Conflict: {0}")]
    Conflict(String),
}

impl StorageError {
    pub fn not_found(kind: &'static str, id: impl ToString) -> Self {
        StorageError::NotFound {
            kind,
            id: id.to_string(),
        }
    }

    /// Errors worth a single retry; everything else is permanent.
    pub fn is_transient(&self) -> bool {
        matches!(self, StorageError::Database(_))
    }
}

impl From<sqlx::Error> for StorageError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => StorageError::not_found("row", "query returned no rows"),
            sqlx::Error::Database(ref db) if db.is_unique_violation() => StorageError::Conflict(err.to_string()),
            sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) => {
                StorageError::Serialization(err.to_string())
            }
            _ => StorageError::Database(err.to_string()),
        }
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::Serialization(err.to_string())
    }
}

impl From<crate::domain::ParseEnumError> for StorageError {
    fn from(err: crate::domain::ParseEnumError) -> Self {
        StorageError::Serialization(err.to_string())
    }
}

impl From<uuid::Error> for StorageError {
    fn from(err: uuid::Error) -> Self {
        StorageError::Serialization(err.to_string())
    }
}

/// Rows written together in one transaction.
#[derive(Debug, Clone, Default)]
pub struct WriteBatch {
    pub swarm: Option<Swarm>,
    pub agents: Vec<Agent>,
    pub tasks: Vec<Task>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn swarm(mut self, swarm: Swarm) -> Self {
        self.swarm = Some(swarm);
        self
    }

    pub fn agent(mut self, agent: Agent) -> Self {
        self.agents.push(agent);
        self
    }

    pub fn agents(mut self, agents: impl IntoIterator<Item = Agent>) -> Self {
        self.agents.extend(agents);
        self
    }

    pub fn task(mut self, task: Task) -> Self {
        self.tasks.push(task);
        self
    }

    pub fn tasks(mut self, tasks: impl IntoIterator<Item = Task>) -> Self {
        self.tasks.extend(tasks);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.swarm.is_none() && self.agents.is_empty() && self.tasks.is_empty()
    }
}

/// Durable store shared by every coordination component.
///
/// Writes are upserts keyed by id unless stated otherwise. List operations
/// return rows in a stable order: agents and tasks by creation time, memory
/// entries by key, decisions and log entries oldest first.
#[async_trait]
pub trait PersistentStore: Send + Sync {
    // swarms
    async fn create_swarm(&self, swarm: &Swarm) -> Result<(), StorageError>;
    async fn get_swarm(&self, id: SwarmId) -> Result<Option<Swarm>, StorageError>;
    /// Fails with `NotFound` when the swarm does not exist.
    async fn update_swarm(&self, swarm: &Swarm) -> Result<(), StorageError>;
    /// Most recently created first.
    async fn list_swarms(&self) -> Result<Vec<Swarm>, StorageError>;
    /// Removes the swarm and everything that belongs to it.
    async fn delete_swarm(&self, id: SwarmId) -> Result<(), StorageError>;

    // agents
    async fn upsert_agent(&self, agent: &Agent) -> Result<(), StorageError>;
    async fn get_agent(&self, id: AgentId) -> Result<Option<Agent>, StorageError>;
    async fn list_agents(&self, swarm_id: SwarmId) -> Result<Vec<Agent>, StorageError>;

    // tasks
    async fn upsert_task(&self, task: &Task) -> Result<(), StorageError>;
    async fn get_task(&self, id: TaskId) -> Result<Option<Task>, StorageError>;
    async fn list_tasks(&self, swarm_id: SwarmId) -> Result<Vec<Task>, StorageError>;

    /// Applies every row of the batch or none of them.
    async fn commit(&self, batch: WriteBatch) -> Result<(), StorageError>;

    // collective memory
    /// Inserts or replaces the entry stored under `(swarm, namespace, key)`.
    async fn append_memory_entry(&self, entry: &MemoryEntry) -> Result<(), StorageError>;
    async fn get_memory_entry(
        &self,
        swarm_id: SwarmId,
        namespace: &str,
        key: &str,
    ) -> Result<Option<MemoryEntry>, StorageError>;
    /// All namespaces when `namespace` is `None`.
    async fn list_memory_entries(
        &self,
        swarm_id: SwarmId,
        namespace: Option<&str>,
    ) -> Result<Vec<MemoryEntry>, StorageError>;
    /// Bumps the access counter and timestamp, returning the updated entry.
    async fn record_memory_access(
        &self,
        swarm_id: SwarmId,
        namespace: &str,
        key: &str,
    ) -> Result<Option<MemoryEntry>, StorageError>;
    /// Returns whether an entry was removed.
    async fn delete_memory_entry(
        &self,
        swarm_id: SwarmId,
        namespace: &str,
        key: &str,
    ) -> Result<bool, StorageError>;

    // consensus
    async fn append_consensus_decision(&self, decision: &ConsensusDecision) -> Result<(), StorageError>;
    async fn list_consensus_decisions(&self, swarm_id: SwarmId) -> Result<Vec<ConsensusDecision>, StorageError>;

    // sessions
    async fn create_session(&self, session: &Session) -> Result<(), StorageError>;
    async fn update_session(&self, session: &Session) -> Result<(), StorageError>;
    async fn get_session(&self, id: SessionId) -> Result<Option<Session>, StorageError>;
    async fn find_session_by_swarm(&self, swarm_id: SwarmId) -> Result<Option<Session>, StorageError>;
    /// Most recently updated first.
    async fn list_sessions(&self) -> Result<Vec<Session>, StorageError>;
    async fn append_checkpoint(&self, checkpoint: &Checkpoint) -> Result<(), StorageError>;
    async fn latest_checkpoint(&self, session_id: SessionId) -> Result<Option<Checkpoint>, StorageError>;
    async fn append_session_log(&self, entry: &SessionLogEntry) -> Result<(), StorageError>;
    /// Last `limit` entries, oldest first.
    async fn session_log_tail(
        &self,
        session_id: SessionId,
        limit: usize,
    ) -> Result<Vec<SessionLogEntry>, StorageError>;
}

/// Runs `op`, retrying once on a transient error.
pub async fn retry_once<T, F, Fut>(operation: &str, mut op: F) -> Result<T, StorageError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, StorageError>>,
{
    match op().await {
        Err(err) if err.is_transient() => {
            warn!(operation, error = %err, "Transient storage error, retrying once");
            op().await
        }
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn test_retry_once_recovers_from_transient_error() {
        let attempts = AtomicU32::new(0);
        let counter = &attempts;
        let result = retry_once("test", || async move {
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(StorageError::Database("database is locked".into()))
            } else {
                Ok(7)
            }
        })
        .await;
        assert_eq!(result.unwrap(), 7);
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_retry_once_gives_up_after_second_failure() {
        let attempts = AtomicU32::new(0);
        let counter = &attempts;
        let result: Result<(), _> = retry_once("test", || async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Err(StorageError::Database("disk I/O error".into()))
        })
        .await;
        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_permanent_errors_are_not_retried() {
        let attempts = AtomicU32::new(0);
        let counter = &attempts;
        let result: Result<(), _> = retry_once("test", || async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Err(StorageError::Serialization("bad json".into()))
        })
        .await;
        assert!(matches!(result, Err(StorageError::Serialization(_))));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }
}
