// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # SQLite Persistent Store
//!
//! [`PersistentStore`] backed by the embedded schema in `migrations/`.
//! Identifiers are stored as their hyphenated text form, sets and lists as
//! JSON text, timestamps as RFC 3339 text.

use std::collections::BTreeSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{Sqlite, SqlitePool, SqliteRow};
use sqlx::{Executor, Row};

use crate::domain::agent::{Agent, AgentId};
use crate::domain::consensus::{ConsensusDecision, DecisionId, ProposalId};
use crate::domain::memory::{MemoryEntry, MemoryEntryId};
use crate::domain::repository::{PersistentStore, StorageError, WriteBatch};
use crate::domain::session::{
    Checkpoint, CheckpointId, Session, SessionId, SessionLogEntry,
};
use crate::domain::swarm::{Swarm, SwarmId};
use crate::domain::task::{Task, TaskId};
use crate::infrastructure::db::Database;

pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(database: &Database) -> Self {
        Self {
            pool: database.get_pool().clone(),
        }
    }
}

const SWARM_COLUMNS: &str =
    "id, name, objective, status, queen_type, topology, consensus, max_workers, created_at, updated_at";
const AGENT_COLUMNS: &str = "id, swarm_id, name, agent_type, role, status, capabilities, created_at";
const TASK_COLUMNS: &str = "id, swarm_id, agent_id, description, status, priority, dependencies, \
     required_capabilities, result, error, retry_count, max_retries, created_at, started_at, completed_at";
const MEMORY_COLUMNS: &str = "id, swarm_id, namespace, key, value, memory_type, confidence, created_by, \
     access_count, compressed, size, created_at, updated_at, accessed_at";
const DECISION_COLUMNS: &str = "id, swarm_id, proposal_id, topic, options, decision, status, abort_reason, \
     votes, algorithm, confidence, created_at";
const SESSION_COLUMNS: &str = "id, swarm_id, status, completion_percentage, agent_count, task_count, \
     completed_task_count, created_at, updated_at, paused_at, resumed_at";

// ---- row mapping -----------------------------------------------------------

fn swarm_from_row(row: &SqliteRow) -> Result<Swarm, StorageError> {
    Ok(Swarm {
        id: SwarmId::from_string(&row.try_get::<String, _>("id")?)?,
        name: row.try_get("name")?,
        objective: row.try_get("objective")?,
        status: row.try_get::<String, _>("status")?.parse()?,
        queen_type: row.try_get::<String, _>("queen_type")?.parse()?,
        topology: row.try_get::<String, _>("topology")?.parse()?,
        consensus: row.try_get::<String, _>("consensus")?.parse()?,
        max_workers: row.try_get::<i64, _>("max_workers")? as u32,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn agent_from_row(row: &SqliteRow) -> Result<Agent, StorageError> {
    let capabilities: BTreeSet<String> = serde_json::from_str(&row.try_get::<String, _>("capabilities")?)?;
    Ok(Agent {
        id: AgentId::from_string(&row.try_get::<String, _>("id")?)?,
        swarm_id: SwarmId::from_string(&row.try_get::<String, _>("swarm_id")?)?,
        name: row.try_get("name")?,
        agent_type: row.try_get::<String, _>("agent_type")?.parse()?,
        role: row.try_get::<String, _>("role")?.parse()?,
        status: row.try_get::<String, _>("status")?.parse()?,
        capabilities,
        created_at: row.try_get("created_at")?,
    })
}

fn task_from_row(row: &SqliteRow) -> Result<Task, StorageError> {
    let agent_id = row
        .try_get::<Option<String>, _>("agent_id")?
        .map(|id| AgentId::from_string(&id))
        .transpose()?;
    let result = row
        .try_get::<Option<String>, _>("result")?
        .map(|r| serde_json::from_str(&r))
        .transpose()?;

    Ok(Task {
        id: TaskId::from_string(&row.try_get::<String, _>("id")?)?,
        swarm_id: SwarmId::from_string(&row.try_get::<String, _>("swarm_id")?)?,
        agent_id,
        description: row.try_get("description")?,
        status: row.try_get::<String, _>("status")?.parse()?,
        priority: row.try_get::<i64, _>("priority")? as i32,
        dependencies: serde_json::from_str(&row.try_get::<String, _>("dependencies")?)?,
        required_capabilities: serde_json::from_str(&row.try_get::<String, _>("required_capabilities")?)?,
        result,
        error: row.try_get("error")?,
        retry_count: row.try_get::<i64, _>("retry_count")? as u32,
        max_retries: row.try_get::<i64, _>("max_retries")? as u32,
        created_at: row.try_get("created_at")?,
        started_at: row.try_get("started_at")?,
        completed_at: row.try_get("completed_at")?,
    })
}

fn memory_from_row(row: &SqliteRow) -> Result<MemoryEntry, StorageError> {
    let created_by = row
        .try_get::<Option<String>, _>("created_by")?
        .map(|id| AgentId::from_string(&id))
        .transpose()?;

    Ok(MemoryEntry {
        id: MemoryEntryId(uuid::Uuid::parse_str(&row.try_get::<String, _>("id")?)?),
        swarm_id: SwarmId::from_string(&row.try_get::<String, _>("swarm_id")?)?,
        namespace: row.try_get("namespace")?,
        key: row.try_get("key")?,
        value: serde_json::from_str(&row.try_get::<String, _>("value")?)?,
        memory_type: row.try_get::<String, _>("memory_type")?.parse()?,
        confidence: row.try_get("confidence")?,
        created_by,
        access_count: row.try_get::<i64, _>("access_count")? as u64,
        compressed: row.try_get("compressed")?,
        size: row.try_get::<i64, _>("size")? as u64,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
        accessed_at: row.try_get("accessed_at")?,
    })
}

fn decision_from_row(row: &SqliteRow) -> Result<ConsensusDecision, StorageError> {
    let abort_reason = row
        .try_get::<Option<String>, _>("abort_reason")?
        .map(|r| serde_json::from_str(&r))
        .transpose()?;

    Ok(ConsensusDecision {
        id: DecisionId(uuid::Uuid::parse_str(&row.try_get::<String, _>("id")?)?),
        swarm_id: SwarmId::from_string(&row.try_get::<String, _>("swarm_id")?)?,
        proposal_id: ProposalId(uuid::Uuid::parse_str(&row.try_get::<String, _>("proposal_id")?)?),
        topic: row.try_get("topic")?,
        options: serde_json::from_str(&row.try_get::<String, _>("options")?)?,
        decision: row.try_get("decision")?,
        status: row.try_get::<String, _>("status")?.parse()?,
        abort_reason,
        votes: serde_json::from_str(&row.try_get::<String, _>("votes")?)?,
        algorithm: row.try_get::<String, _>("algorithm")?.parse()?,
        confidence: row.try_get("confidence")?,
        created_at: row.try_get("created_at")?,
    })
}

fn session_from_row(row: &SqliteRow) -> Result<Session, StorageError> {
    Ok(Session {
        id: SessionId::from_string(&row.try_get::<String, _>("id")?)?,
        swarm_id: SwarmId::from_string(&row.try_get::<String, _>("swarm_id")?)?,
        status: row.try_get::<String, _>("status")?.parse()?,
        completion_percentage: row.try_get::<i64, _>("completion_percentage")?.clamp(0, 100) as u8,
        agent_count: row.try_get::<i64, _>("agent_count")? as u32,
        task_count: row.try_get::<i64, _>("task_count")? as u32,
        completed_task_count: row.try_get::<i64, _>("completed_task_count")? as u32,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
        paused_at: row.try_get("paused_at")?,
        resumed_at: row.try_get("resumed_at")?,
    })
}

// ---- writes shared by the pool and transactions -----------------------------

async fn write_swarm<'e, E>(exec: E, swarm: &Swarm) -> Result<(), StorageError>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query(
        r#"
        INSERT INTO swarms (id, name, objective, status, queen_type, topology, consensus, max_workers, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT (id) DO UPDATE SET
            name = excluded.name,
            objective = excluded.objective,
            status = excluded.status,
            queen_type = excluded.queen_type,
            topology = excluded.topology,
            consensus = excluded.consensus,
            max_workers = excluded.max_workers,
            updated_at = excluded.updated_at
        "#,
    )
    .bind(swarm.id.to_string())
    .bind(&swarm.name)
    .bind(&swarm.objective)
    .bind(swarm.status.as_str())
    .bind(swarm.queen_type.as_str())
    .bind(swarm.topology.as_str())
    .bind(swarm.consensus.as_str())
    .bind(swarm.max_workers as i64)
    .bind(swarm.created_at)
    .bind(swarm.updated_at)
    .execute(exec)
    .await?;
    Ok(())
}

async fn write_agent<'e, E>(exec: E, agent: &Agent) -> Result<(), StorageError>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query(
        r#"
        INSERT INTO agents (id, swarm_id, name, agent_type, role, status, capabilities, created_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT (id) DO UPDATE SET
            name = excluded.name,
            agent_type = excluded.agent_type,
            status = excluded.status,
            capabilities = excluded.capabilities
        "#,
    )
    .bind(agent.id.to_string())
    .bind(agent.swarm_id.to_string())
    .bind(&agent.name)
    .bind(agent.agent_type.as_str())
    .bind(agent.role.as_str())
    .bind(agent.status.as_str())
    .bind(serde_json::to_string(&agent.capabilities)?)
    .bind(agent.created_at)
    .execute(exec)
    .await?;
    Ok(())
}

async fn write_task<'e, E>(exec: E, task: &Task) -> Result<(), StorageError>
where
    E: Executor<'e, Database = Sqlite>,
{
    let result = task.result.as_ref().map(serde_json::to_string).transpose()?;

    sqlx::query(
        r#"
        INSERT INTO tasks (id, swarm_id, agent_id, description, status, priority, dependencies,
                           required_capabilities, result, error, retry_count, max_retries,
                           created_at, started_at, completed_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT (id) DO UPDATE SET
            agent_id = excluded.agent_id,
            description = excluded.description,
            status = excluded.status,
            priority = excluded.priority,
            dependencies = excluded.dependencies,
            required_capabilities = excluded.required_capabilities,
            result = excluded.result,
            error = excluded.error,
            retry_count = excluded.retry_count,
            max_retries = excluded.max_retries,
            started_at = excluded.started_at,
            completed_at = excluded.completed_at
        "#,
    )
    .bind(task.id.to_string())
    .bind(task.swarm_id.to_string())
    .bind(task.agent_id.map(|id| id.to_string()))
    .bind(&task.description)
    .bind(task.status.as_str())
    .bind(task.priority as i64)
    .bind(serde_json::to_string(&task.dependencies)?)
    .bind(serde_json::to_string(&task.required_capabilities)?)
    .bind(result)
    .bind(&task.error)
    .bind(task.retry_count as i64)
    .bind(task.max_retries as i64)
    .bind(task.created_at)
    .bind(task.started_at)
    .bind(task.completed_at)
    .execute(exec)
    .await?;
    Ok(())
}

async fn fetch_memory_entry<'e, E>(
    exec: E,
    swarm_id: SwarmId,
    namespace: &str,
    key: &str,
) -> Result<Option<MemoryEntry>, StorageError>
where
    E: Executor<'e, Database = Sqlite>,
{
    let sql = format!(
        "SELECT {MEMORY_COLUMNS} FROM collective_memory WHERE swarm_id = ? AND namespace = ? AND key = ?"
    );
    sqlx::query(&sql)
        .bind(swarm_id.to_string())
        .bind(namespace)
        .bind(key)
        .fetch_optional(exec)
        .await?
        .as_ref()
        .map(memory_from_row)
        .transpose()
}

#[async_trait]
impl PersistentStore for SqliteStore {
    async fn create_swarm(&self, swarm: &Swarm) -> Result<(), StorageError> {
        let sql = format!("INSERT INTO swarms ({SWARM_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)");
        sqlx::query(&sql)
            .bind(swarm.id.to_string())
            .bind(&swarm.name)
            .bind(&swarm.objective)
            .bind(swarm.status.as_str())
            .bind(swarm.queen_type.as_str())
            .bind(swarm.topology.as_str())
            .bind(swarm.consensus.as_str())
            .bind(swarm.max_workers as i64)
            .bind(swarm.created_at)
            .bind(swarm.updated_at)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn get_swarm(&self, id: SwarmId) -> Result<Option<Swarm>, StorageError> {
        let sql = format!("SELECT {SWARM_COLUMNS} FROM swarms WHERE id = ?");
        sqlx::query(&sql)
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?
            .as_ref()
            .map(swarm_from_row)
            .transpose()
    }

    async fn update_swarm(&self, swarm: &Swarm) -> Result<(), StorageError> {
        let result = sqlx::query(
            r#"
            UPDATE swarms
            SET name = ?, objective = ?, status = ?, queen_type = ?, topology = ?,
                consensus = ?, max_workers = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(&swarm.name)
        .bind(&swarm.objective)
        .bind(swarm.status.as_str())
        .bind(swarm.queen_type.as_str())
        .bind(swarm.topology.as_str())
        .bind(swarm.consensus.as_str())
        .bind(swarm.max_workers as i64)
        .bind(swarm.updated_at)
        .bind(swarm.id.to_string())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StorageError::not_found("swarm", swarm.id));
        }
        Ok(())
    }

    async fn list_swarms(&self) -> Result<Vec<Swarm>, StorageError> {
        let sql = format!("SELECT {SWARM_COLUMNS} FROM swarms ORDER BY created_at DESC, id");
        sqlx::query(&sql)
            .fetch_all(&self.pool)
            .await?
            .iter()
            .map(swarm_from_row)
            .collect()
    }

    async fn delete_swarm(&self, id: SwarmId) -> Result<(), StorageError> {
        let id = id.to_string();
        let mut tx = self.pool.begin().await?;

        for sql in [
            "DELETE FROM session_logs WHERE session_id IN (SELECT id FROM sessions WHERE swarm_id = ?)",
            "DELETE FROM session_checkpoints WHERE session_id IN (SELECT id FROM sessions WHERE swarm_id = ?)",
            "DELETE FROM sessions WHERE swarm_id = ?",
            "DELETE FROM consensus_decisions WHERE swarm_id = ?",
            "DELETE FROM collective_memory WHERE swarm_id = ?",
            "DELETE FROM tasks WHERE swarm_id = ?",
            "DELETE FROM agents WHERE swarm_id = ?",
            "DELETE FROM swarms WHERE id = ?",
        ] {
            sqlx::query(sql).bind(&id).execute(&mut *tx).await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn upsert_agent(&self, agent: &Agent) -> Result<(), StorageError> {
        write_agent(&self.pool, agent).await
    }

    async fn get_agent(&self, id: AgentId) -> Result<Option<Agent>, StorageError> {
        let sql = format!("SELECT {AGENT_COLUMNS} FROM agents WHERE id = ?");
        sqlx::query(&sql)
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?
            .as_ref()
            .map(agent_from_row)
            .transpose()
    }

    async fn list_agents(&self, swarm_id: SwarmId) -> Result<Vec<Agent>, StorageError> {
        let sql = format!("SELECT {AGENT_COLUMNS} FROM agents WHERE swarm_id = ? ORDER BY created_at, id");
        sqlx::query(&sql)
            .bind(swarm_id.to_string())
            .fetch_all(&self.pool)
            .await?
            .iter()
            .map(agent_from_row)
            .collect()
    }

    async fn upsert_task(&self, task: &Task) -> Result<(), StorageError> {
        write_task(&self.pool, task).await
    }

    async fn get_task(&self, id: TaskId) -> Result<Option<Task>, StorageError> {
        let sql = format!("SELECT {TASK_COLUMNS} FROM tasks WHERE id = ?");
        sqlx::query(&sql)
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?
            .as_ref()
            .map(task_from_row)
            .transpose()
    }

    async fn list_tasks(&self, swarm_id: SwarmId) -> Result<Vec<Task>, StorageError> {
        let sql = format!("SELECT {TASK_COLUMNS} FROM tasks WHERE swarm_id = ? ORDER BY created_at, id");
        sqlx::query(&sql)
            .bind(swarm_id.to_string())
            .fetch_all(&self.pool)
            .await?
            .iter()
            .map(task_from_row)
            .collect()
    }

    async fn commit(&self, batch: WriteBatch) -> Result<(), StorageError> {
        if batch.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await?;
        if let Some(swarm) = &batch.swarm {
            write_swarm(&mut *tx, swarm).await?;
        }
        for agent in &batch.agents {
            write_agent(&mut *tx, agent).await?;
        }
        for task in &batch.tasks {
            write_task(&mut *tx, task).await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn append_memory_entry(&self, entry: &MemoryEntry) -> Result<(), StorageError> {
        sqlx::query(
            r#"
            INSERT INTO collective_memory (id, swarm_id, namespace, key, value, memory_type, confidence,
                                           created_by, access_count, compressed, size,
                                           created_at, updated_at, accessed_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (swarm_id, namespace, key) DO UPDATE SET
                value = excluded.value,
                memory_type = excluded.memory_type,
                confidence = excluded.confidence,
                access_count = excluded.access_count,
                compressed = excluded.compressed,
                size = excluded.size,
                updated_at = excluded.updated_at,
                accessed_at = excluded.accessed_at
            "#,
        )
        .bind(entry.id.to_string())
        .bind(entry.swarm_id.to_string())
        .bind(&entry.namespace)
        .bind(&entry.key)
        .bind(serde_json::to_string(&entry.value)?)
        .bind(entry.memory_type.as_str())
        .bind(entry.confidence)
        .bind(entry.created_by.map(|id| id.to_string()))
        .bind(entry.access_count as i64)
        .bind(entry.compressed)
        .bind(entry.size as i64)
        .bind(entry.created_at)
        .bind(entry.updated_at)
        .bind(entry.accessed_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_memory_entry(
        &self,
        swarm_id: SwarmId,
        namespace: &str,
        key: &str,
    ) -> Result<Option<MemoryEntry>, StorageError> {
        fetch_memory_entry(&self.pool, swarm_id, namespace, key).await
    }

    async fn list_memory_entries(
        &self,
        swarm_id: SwarmId,
        namespace: Option<&str>,
    ) -> Result<Vec<MemoryEntry>, StorageError> {
        let rows = match namespace {
            Some(namespace) => {
                let sql = format!(
                    "SELECT {MEMORY_COLUMNS} FROM collective_memory WHERE swarm_id = ? AND namespace = ? ORDER BY key, namespace"
                );
                sqlx::query(&sql)
                    .bind(swarm_id.to_string())
                    .bind(namespace)
                    .fetch_all(&self.pool)
                    .await?
            }
            None => {
                let sql = format!(
                    "SELECT {MEMORY_COLUMNS} FROM collective_memory WHERE swarm_id = ? ORDER BY key, namespace"
                );
                sqlx::query(&sql)
                    .bind(swarm_id.to_string())
                    .fetch_all(&self.pool)
                    .await?
            }
        };
        rows.iter().map(memory_from_row).collect()
    }

    async fn record_memory_access(
        &self,
        swarm_id: SwarmId,
        namespace: &str,
        key: &str,
    ) -> Result<Option<MemoryEntry>, StorageError> {
        let mut tx = self.pool.begin().await?;
        let updated = sqlx::query(
            r#"
            UPDATE collective_memory
            SET access_count = access_count + 1, accessed_at = ?
            WHERE swarm_id = ? AND namespace = ? AND key = ?
            "#,
        )
        .bind(Utc::now())
        .bind(swarm_id.to_string())
        .bind(namespace)
        .bind(key)
        .execute(&mut *tx)
        .await?;

        if updated.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(None);
        }

        let entry = fetch_memory_entry(&mut *tx, swarm_id, namespace, key).await?;
        tx.commit().await?;
        Ok(entry)
    }

    async fn delete_memory_entry(
        &self,
        swarm_id: SwarmId,
        namespace: &str,
        key: &str,
    ) -> Result<bool, StorageError> {
        let result = sqlx::query("DELETE FROM collective_memory WHERE swarm_id = ? AND namespace = ? AND key = ?")
            .bind(swarm_id.to_string())
            .bind(namespace)
            .bind(key)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn append_consensus_decision(&self, decision: &ConsensusDecision) -> Result<(), StorageError> {
        let abort_reason = decision.abort_reason.as_ref().map(serde_json::to_string).transpose()?;
        let sql = format!(
            "INSERT INTO consensus_decisions ({DECISION_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
        );
        sqlx::query(&sql)
            .bind(decision.id.to_string())
            .bind(decision.swarm_id.to_string())
            .bind(decision.proposal_id.to_string())
            .bind(&decision.topic)
            .bind(serde_json::to_string(&decision.options)?)
            .bind(&decision.decision)
            .bind(decision.status.as_str())
            .bind(abort_reason)
            .bind(serde_json::to_string(&decision.votes)?)
            .bind(decision.algorithm.as_str())
            .bind(decision.confidence)
            .bind(decision.created_at)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn list_consensus_decisions(&self, swarm_id: SwarmId) -> Result<Vec<ConsensusDecision>, StorageError> {
        let sql = format!(
            "SELECT {DECISION_COLUMNS} FROM consensus_decisions WHERE swarm_id = ? ORDER BY created_at, id"
        );
        sqlx::query(&sql)
            .bind(swarm_id.to_string())
            .fetch_all(&self.pool)
            .await?
            .iter()
            .map(decision_from_row)
            .collect()
    }

    async fn create_session(&self, session: &Session) -> Result<(), StorageError> {
        let sql = format!("INSERT INTO sessions ({SESSION_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)");
        sqlx::query(&sql)
            .bind(session.id.to_string())
            .bind(session.swarm_id.to_string())
            .bind(session.status.as_str())
            .bind(session.completion_percentage as i64)
            .bind(session.agent_count as i64)
            .bind(session.task_count as i64)
            .bind(session.completed_task_count as i64)
            .bind(session.created_at)
            .bind(session.updated_at)
            .bind(session.paused_at)
            .bind(session.resumed_at)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn update_session(&self, session: &Session) -> Result<(), StorageError> {
        let result = sqlx::query(
            r#"
            UPDATE sessions
            SET status = ?, completion_percentage = ?, agent_count = ?, task_count = ?,
                completed_task_count = ?, updated_at = ?, paused_at = ?, resumed_at = ?
            WHERE id = ?
            "#,
        )
        .bind(session.status.as_str())
        .bind(session.completion_percentage as i64)
        .bind(session.agent_count as i64)
        .bind(session.task_count as i64)
        .bind(session.completed_task_count as i64)
        .bind(session.updated_at)
        .bind(session.paused_at)
        .bind(session.resumed_at)
        .bind(session.id.to_string())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StorageError::not_found("session", session.id));
        }
        Ok(())
    }

    async fn get_session(&self, id: SessionId) -> Result<Option<Session>, StorageError> {
        let sql = format!("SELECT {SESSION_COLUMNS} FROM sessions WHERE id = ?");
        sqlx::query(&sql)
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?
            .as_ref()
            .map(session_from_row)
            .transpose()
    }

    async fn find_session_by_swarm(&self, swarm_id: SwarmId) -> Result<Option<Session>, StorageError> {
        let sql = format!(
            "SELECT {SESSION_COLUMNS} FROM sessions WHERE swarm_id = ? ORDER BY created_at DESC LIMIT 1"
        );
        sqlx::query(&sql)
            .bind(swarm_id.to_string())
            .fetch_optional(&self.pool)
            .await?
            .as_ref()
            .map(session_from_row)
            .transpose()
    }

    async fn list_sessions(&self) -> Result<Vec<Session>, StorageError> {
        let sql = format!("SELECT {SESSION_COLUMNS} FROM sessions ORDER BY updated_at DESC, id");
        sqlx::query(&sql)
            .fetch_all(&self.pool)
            .await?
            .iter()
            .map(session_from_row)
            .collect()
    }

    async fn append_checkpoint(&self, checkpoint: &Checkpoint) -> Result<(), StorageError> {
        sqlx::query(
            r#"
            INSERT INTO session_checkpoints (id, session_id, seq, completion_percentage, payload, created_at)
            VALUES (?, ?,
                    (SELECT COALESCE(MAX(seq), 0) + 1 FROM session_checkpoints WHERE session_id = ?),
                    ?, ?, ?)
            "#,
        )
        .bind(checkpoint.id.to_string())
        .bind(checkpoint.session_id.to_string())
        .bind(checkpoint.session_id.to_string())
        .bind(checkpoint.completion_percentage as i64)
        .bind(serde_json::to_string(&checkpoint.payload)?)
        .bind(checkpoint.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn latest_checkpoint(&self, session_id: SessionId) -> Result<Option<Checkpoint>, StorageError> {
        let row = sqlx::query(
            r#"
            SELECT id, session_id, completion_percentage, payload, created_at
            FROM session_checkpoints
            WHERE session_id = ?
            ORDER BY seq DESC
            LIMIT 1
            "#,
        )
        .bind(session_id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        Ok(Some(Checkpoint {
            id: CheckpointId(uuid::Uuid::parse_str(&row.try_get::<String, _>("id")?)?),
            session_id: SessionId::from_string(&row.try_get::<String, _>("session_id")?)?,
            created_at: row.try_get::<DateTime<Utc>, _>("created_at")?,
            completion_percentage: row.try_get::<i64, _>("completion_percentage")?.clamp(0, 100) as u8,
            payload: serde_json::from_str(&row.try_get::<String, _>("payload")?)?,
        }))
    }

    async fn append_session_log(&self, entry: &SessionLogEntry) -> Result<(), StorageError> {
        let data = entry.data.as_ref().map(serde_json::to_string).transpose()?;
        sqlx::query("INSERT INTO session_logs (session_id, level, message, data, created_at) VALUES (?, ?, ?, ?, ?)")
            .bind(entry.session_id.to_string())
            .bind(entry.level.as_str())
            .bind(&entry.message)
            .bind(data)
            .bind(entry.timestamp)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn session_log_tail(
        &self,
        session_id: SessionId,
        limit: usize,
    ) -> Result<Vec<SessionLogEntry>, StorageError> {
        let rows = sqlx::query(
            r#"
            SELECT session_id, level, message, data, created_at
            FROM session_logs
            WHERE session_id = ?
            ORDER BY id DESC
            LIMIT ?
            "#,
        )
        .bind(session_id.to_string())
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        let mut entries = rows
            .iter()
            .map(|row| {
                let data = row
                    .try_get::<Option<String>, _>("data")?
                    .map(|d| serde_json::from_str(&d))
                    .transpose()?;
                Ok(SessionLogEntry {
                    session_id: SessionId::from_string(&row.try_get::<String, _>("session_id")?)?,
                    level: row.try_get::<String, _>("level")?.parse()?,
                    message: row.try_get("message")?,
                    data,
                    timestamp: row.try_get("created_at")?,
                })
            })
            .collect::<Result<Vec<_>, StorageError>>()?;
        entries.reverse();
        Ok(entries)
    }
}
