// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! End-to-end coordination scenarios, mostly against the in-memory store.
//!
//! Covers dispatch ordering, the in-progress ownership rule, failure
//! handling, auto-scaling, topology votes, pause/resume and crash recovery
//! (including a restart on a SQLite file) and a full run to completion.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use hive_mind_core::application::repository_factory::create_store;
use hive_mind_core::domain::agent::{Agent, AgentRole, AgentStatus};
use hive_mind_core::domain::consensus::ConsensusAlgorithm;
use hive_mind_core::domain::repository::{SqliteConfig, StorageBackend};
use hive_mind_core::domain::session::{LogLevel, Session, SessionStatus};
use hive_mind_core::domain::swarm::{QueenType, Swarm, SwarmStatus, Topology};
use hive_mind_core::domain::task::{Task, TaskId, TaskStatus};
use hive_mind_core::infrastructure::repositories::InMemoryStore;
use hive_mind_core::infrastructure::swarm_bus::SwarmBus;
use hive_mind_swarm::application::{
    CoordinatorSettings, EchoExecutor, ExecutionRequest, ExecutorError, NewTask, QueenCoordinator, RunOutcome,
    SessionManager, SpawnRequest, SwarmContext, TaskExecutor,
};

/// Never finishes; keeps assigned workers busy.
struct StuckExecutor;

#[async_trait]
impl TaskExecutor for StuckExecutor {
    async fn execute(&self, _request: ExecutionRequest) -> Result<serde_json::Value, ExecutorError> {
        std::future::pending().await
    }
}

/// Fails every task it is given.
struct FailingExecutor;

#[async_trait]
impl TaskExecutor for FailingExecutor {
    async fn execute(&self, _request: ExecutionRequest) -> Result<serde_json::Value, ExecutorError> {
        Err(ExecutorError::Failed("tool crashed".to_string()))
    }
}

/// Holds its tasks forever and votes for the option at `pick`.
struct VotingExecutor {
    pick: usize,
}

#[async_trait]
impl TaskExecutor for VotingExecutor {
    async fn execute(&self, _request: ExecutionRequest) -> Result<serde_json::Value, ExecutorError> {
        std::future::pending().await
    }

    async fn vote(&self, _agent: &Agent, _topic: &str, options: &[String]) -> Option<String> {
        options.get(self.pick).cloned()
    }
}

fn settings() -> CoordinatorSettings {
    CoordinatorSettings {
        dispatch_interval: Duration::from_millis(10),
        ..CoordinatorSettings::default()
    }
}

fn context(executor: Arc<dyn TaskExecutor>) -> SwarmContext {
    context_with(executor, settings())
}

fn context_with(executor: Arc<dyn TaskExecutor>, settings: CoordinatorSettings) -> SwarmContext {
    SwarmContext::new(Arc::new(InMemoryStore::new()), SwarmBus::new(1024), executor).with_settings(settings)
}

fn request(objective: &str, max_workers: u32, decompose: bool) -> SpawnRequest {
    SpawnRequest {
        max_workers,
        decompose,
        ..SpawnRequest::new(objective)
    }
}

/// Dispatches and applies worker reports until the task satisfies `done`.
async fn drive_until(
    queen: &QueenCoordinator,
    ctx: &SwarmContext,
    task_id: TaskId,
    done: impl Fn(&Task) -> bool,
) -> anyhow::Result<Task> {
    for _ in 0..200 {
        queen.dispatch_pending().await?;
        tokio::time::sleep(Duration::from_millis(5)).await;
        queen.process_inbox().await?;
        let task = ctx
            .store
            .get_task(task_id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("task {task_id} missing"))?;
        if done(&task) {
            return Ok(task);
        }
    }
    anyhow::bail!("task {task_id} never settled")
}

#[tokio::test]
async fn test_spawn_yields_one_queen_and_idle_workers() -> anyhow::Result<()> {
    let ctx = context(Arc::new(EchoExecutor));
    let queen = QueenCoordinator::spawn_swarm(ctx.clone(), request("research caching", 3, true)).await?;

    let report = queen.status().await?;
    assert_eq!(report.swarm.status, SwarmStatus::Active);
    assert_eq!(report.agents_in(AgentStatus::Idle), 3);
    assert_eq!(report.total_tasks, 6);
    assert_eq!(report.completion_percentage, 0);

    let agents = ctx.store.list_agents(queen.swarm_id()).await?;
    let queens: Vec<_> = agents.iter().filter(|a| a.role == AgentRole::Queen).collect();
    assert_eq!(queens.len(), 1);
    assert_eq!(queens[0].status, AgentStatus::Active);
    Ok(())
}

#[tokio::test]
async fn test_higher_priority_dispatched_first() -> anyhow::Result<()> {
    let ctx = context(Arc::new(StuckExecutor));
    let queen = QueenCoordinator::spawn_swarm(ctx.clone(), request("sort things", 1, false)).await?;

    let low = queen.submit_task(NewTask::new("low", 5)).await?;
    let high = queen.submit_task(NewTask::new("high", 10)).await?;

    let report = queen.dispatch_pending().await?;
    assert_eq!(report.assigned.len(), 1);
    assert_eq!(report.assigned[0].task_id, high.id);
    assert_eq!(report.backlog, 1);

    let low = ctx.store.get_task(low.id).await?.unwrap();
    assert_eq!(low.status, TaskStatus::Pending);
    Ok(())
}

#[tokio::test]
async fn test_in_progress_tasks_are_held_by_engaged_agents() -> anyhow::Result<()> {
    let ctx = context(Arc::new(StuckExecutor));
    let queen = QueenCoordinator::spawn_swarm(ctx.clone(), request("parallel work", 2, false)).await?;
    for i in 0..4 {
        queen.submit_task(NewTask::new(format!("task {i}"), i)).await?;
    }

    queen.dispatch_pending().await?;
    tokio::time::sleep(Duration::from_millis(20)).await;
    queen.process_inbox().await?;

    let agents = ctx.store.list_agents(queen.swarm_id()).await?;
    let tasks = ctx.store.list_tasks(queen.swarm_id()).await?;
    let in_progress: Vec<_> = tasks.iter().filter(|t| t.status == TaskStatus::InProgress).collect();
    assert_eq!(in_progress.len(), 2);
    for task in in_progress {
        let holder = agents.iter().find(|a| Some(a.id) == task.agent_id).unwrap();
        assert_eq!(holder.status, AgentStatus::Busy);
    }
    Ok(())
}

#[tokio::test]
async fn test_pause_and_resume_releases_in_flight_work() -> anyhow::Result<()> {
    let ctx = context(Arc::new(StuckExecutor));
    let queen = QueenCoordinator::spawn_swarm(ctx.clone(), request("long job", 1, false)).await?;
    let swarm_id = queen.swarm_id();
    let task = queen.submit_task(NewTask::new("long task", 1)).await?;

    queen.dispatch_pending().await?;
    tokio::time::sleep(Duration::from_millis(20)).await;
    queen.process_inbox().await?;
    let worker_id = ctx.store.get_task(task.id).await?.unwrap().agent_id.unwrap();
    assert_eq!(ctx.store.get_agent(worker_id).await?.unwrap().status, AgentStatus::Busy);

    let sessions = SessionManager::new(ctx.clone());
    let paused = sessions.pause(swarm_id).await?;
    assert_eq!(paused.status, SessionStatus::Paused);
    assert_eq!(queen.dispatch_pending().await?.assigned.len(), 0);
    drop(queen);

    let queen = sessions.resume(paused.id).await?;
    let worker = ctx.store.get_agent(worker_id).await?.unwrap();
    assert_eq!(worker.status, AgentStatus::Idle);
    let task = ctx.store.get_task(task.id).await?.unwrap();
    assert_eq!(task.status, TaskStatus::Pending);
    assert_eq!(task.agent_id, None);

    let swarm = ctx.store.get_swarm(swarm_id).await?.unwrap();
    assert_eq!(swarm.status, SwarmStatus::Active);
    assert_eq!(sessions.get(paused.id).await?.status, SessionStatus::Active);
    assert_eq!(queen.dispatch_pending().await?.assigned.len(), 1);
    Ok(())
}

#[tokio::test]
async fn test_checkpoint_of_unchanged_swarm_is_stable() -> anyhow::Result<()> {
    let ctx = context(Arc::new(EchoExecutor));
    let queen = QueenCoordinator::spawn_swarm(ctx.clone(), request("stable", 2, true)).await?;
    let sessions = SessionManager::new(ctx.clone());

    let first = sessions.checkpoint(queen.swarm_id()).await?;
    let second = sessions.checkpoint(queen.swarm_id()).await?;
    assert_ne!(first.id, second.id);
    assert_eq!(first.payload, second.payload);
    assert_eq!(first.completion_percentage, second.completion_percentage);
    Ok(())
}

#[tokio::test]
async fn test_resume_without_checkpoint_is_logged() -> anyhow::Result<()> {
    let ctx = context(Arc::new(EchoExecutor));
    let swarm = Swarm::new(
        "orphan",
        "never checkpointed",
        QueenType::Strategic,
        Topology::Mesh,
        ConsensusAlgorithm::Majority,
        1,
    );
    ctx.store.create_swarm(&swarm).await?;
    let session = Session::new(swarm.id);
    ctx.store.create_session(&session).await?;
    let sessions = SessionManager::new(ctx.clone());

    let err = sessions.resume(session.id).await.err().unwrap();
    assert!(err.to_string().contains("no checkpoint"));

    let tail = sessions.log_tail(session.id, 10).await?;
    assert!(tail.iter().any(|e| e.message.contains("no checkpoint")));
    Ok(())
}

#[tokio::test]
async fn test_resume_after_crash_without_pause() -> anyhow::Result<()> {
    let ctx = context(Arc::new(StuckExecutor));
    let queen = QueenCoordinator::spawn_swarm(ctx.clone(), request("crash early", 1, false)).await?;
    let swarm_id = queen.swarm_id();
    let task = queen.submit_task(NewTask::new("in flight", 1)).await?;
    let report = queen.dispatch_pending().await?;
    let worker_id = report.assigned[0].agent_id;

    let sessions = SessionManager::new(ctx.clone());
    let session = sessions.session_for(swarm_id).await?;
    assert_eq!(session.status, SessionStatus::Active);
    assert!(ctx.store.latest_checkpoint(session.id).await?.is_some());
    drop(queen);

    let queen = sessions.resume(session.id).await?;
    assert_eq!(ctx.store.get_agent(worker_id).await?.unwrap().status, AgentStatus::Idle);
    let task = ctx.store.get_task(task.id).await?.unwrap();
    assert_eq!(task.status, TaskStatus::Pending);
    assert_eq!(task.agent_id, None);
    assert_eq!(task.retry_count, 0);
    assert_eq!(queen.dispatch_pending().await?.assigned.len(), 1);
    Ok(())
}

#[tokio::test]
async fn test_run_checkpoints_and_restarts_from_sqlite() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let backend = StorageBackend::Sqlite(SqliteConfig {
        url: format!("sqlite://{}", dir.path().join("hive.db").display()),
    });
    let settings = CoordinatorSettings {
        checkpoint_interval: Duration::from_millis(30),
        ..settings()
    };

    let (session_id, task_id) = {
        let ctx = SwarmContext::new(create_store(&backend).await?, SwarmBus::new(1024), Arc::new(StuckExecutor))
            .with_settings(settings.clone());
        let queen = QueenCoordinator::spawn_swarm(ctx.clone(), request("outlive the process", 1, false)).await?;
        let task = queen.submit_task(NewTask::new("slow step", 1)).await?;
        let session = ctx.store.find_session_by_swarm(queen.swarm_id()).await?.unwrap();
        let first = ctx.store.latest_checkpoint(session.id).await?.unwrap();
        assert!(first.payload.tasks.is_empty());

        let cancel = CancellationToken::new();
        let stopper = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(150)).await;
            stopper.cancel();
        });
        assert_eq!(queen.run(cancel).await?, RunOutcome::Cancelled);

        let latest = ctx.store.latest_checkpoint(session.id).await?.unwrap();
        assert_ne!(latest.id, first.id);
        let saved = latest.payload.tasks.iter().find(|t| t.id == task.id).unwrap();
        assert_eq!(saved.status, TaskStatus::InProgress);
        (session.id, task.id)
    };

    let ctx = SwarmContext::new(create_store(&backend).await?, SwarmBus::new(1024), Arc::new(StuckExecutor))
        .with_settings(settings);
    let queen = SessionManager::new(ctx.clone()).resume(session_id).await?;
    let task = ctx.store.get_task(task_id).await?.unwrap();
    assert_eq!(task.status, TaskStatus::Pending);
    assert_eq!(task.agent_id, None);
    assert_eq!(queen.connected_workers().len(), 1);
    assert_eq!(queen.status().await?.agents_in(AgentStatus::Idle), 1);
    assert_eq!(queen.dispatch_pending().await?.assigned.len(), 1);
    Ok(())
}

#[tokio::test]
async fn test_failed_results_requeue_then_exhaust() -> anyhow::Result<()> {
    let ctx = context_with(
        Arc::new(FailingExecutor),
        CoordinatorSettings {
            task_max_retries: 1,
            ..settings()
        },
    );
    let queen = QueenCoordinator::spawn_swarm(ctx.clone(), request("flaky tools", 1, false)).await?;
    let task = queen.submit_task(NewTask::new("fragile step", 1)).await?;

    let task = drive_until(&queen, &ctx, task.id, |t| t.status == TaskStatus::Failed).await?;
    assert_eq!(task.retry_count, 1);
    assert_eq!(task.agent_id, None);
    assert!(task.error.as_deref().is_some_and(|e| e.contains("tool crashed")));
    assert_eq!(queen.status().await?.agents_in(AgentStatus::Idle), 1);

    let sessions = SessionManager::new(ctx.clone());
    let session = sessions.session_for(queen.swarm_id()).await?;
    let tail = sessions.log_tail(session.id, 20).await?;
    let requeued = tail.iter().position(|e| e.message == "Task failed, requeued");
    let exhausted = tail.iter().position(|e| e.message == "Task failed permanently");
    assert!(requeued.is_some() && exhausted.is_some());
    assert!(requeued < exhausted);
    assert_eq!(tail[exhausted.unwrap()].level, LogLevel::Error);
    Ok(())
}

#[tokio::test]
async fn test_silent_worker_is_failed_and_task_requeued() -> anyhow::Result<()> {
    let ctx = context_with(
        Arc::new(StuckExecutor),
        CoordinatorSettings {
            heartbeat_interval: Duration::from_secs(10),
            heartbeat_timeout: Duration::from_millis(50),
            ..settings()
        },
    );
    let queen = QueenCoordinator::spawn_swarm(ctx.clone(), request("go quiet", 1, false)).await?;
    let task = queen.submit_task(NewTask::new("never reported", 1)).await?;
    let worker_id = queen.dispatch_pending().await?.assigned[0].agent_id;
    assert!(queen.detect_stalled_agents().await?.is_empty());

    tokio::time::sleep(Duration::from_millis(100)).await;
    let failures = queen.detect_stalled_agents().await?;
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].agent_id, worker_id);
    assert_eq!(failures[0].task_id, Some(task.id));
    assert!(failures[0].reason.starts_with("no heartbeat"));

    assert_eq!(ctx.store.get_agent(worker_id).await?.unwrap().status, AgentStatus::Failed);
    let task = ctx.store.get_task(task.id).await?.unwrap();
    assert_eq!(task.status, TaskStatus::Pending);
    assert_eq!(task.retry_count, 1);
    assert_eq!(task.agent_id, None);
    assert!(!queen.connected_workers().contains(&worker_id));
    assert!(queen.detect_stalled_agents().await?.is_empty());

    let sessions = SessionManager::new(ctx.clone());
    let session = sessions.session_for(queen.swarm_id()).await?;
    let tail = sessions.log_tail(session.id, 10).await?;
    assert!(tail.iter().any(|e| e.message == failures[0].to_string()));
    Ok(())
}

#[tokio::test]
async fn test_auto_scale_grows_to_backlog_within_max_workers() -> anyhow::Result<()> {
    let ctx = context_with(
        Arc::new(StuckExecutor),
        CoordinatorSettings {
            auto_scale: true,
            ..settings()
        },
    );
    let queen = QueenCoordinator::spawn_swarm(ctx.clone(), request("burst", 3, false)).await?;
    assert_eq!(queen.scale_swarm(1).await?.terminated.len(), 2);
    for i in 0..4 {
        queen.submit_task(NewTask::new(format!("chunk {i}"), 1)).await?;
    }

    let first = queen.dispatch_pending().await?;
    assert_eq!(first.assigned.len(), 1);
    assert_eq!(first.backlog, 3);
    assert_eq!(first.spawned.len(), 2);

    let second = queen.dispatch_pending().await?;
    assert_eq!(second.assigned.len(), 2);
    assert_eq!(second.backlog, 1);
    assert!(second.spawned.is_empty());
    assert_eq!(queen.connected_workers().len(), 3);
    Ok(())
}

#[tokio::test]
async fn test_topology_change_follows_the_vote() -> anyhow::Result<()> {
    let hierarchical = |objective: &str| SpawnRequest {
        topology: Topology::Hierarchical,
        consensus: ConsensusAlgorithm::Majority,
        ..request(objective, 2, false)
    };

    let ctx = context(Arc::new(VotingExecutor { pick: 0 }));
    let queen = QueenCoordinator::spawn_swarm(ctx.clone(), hierarchical("rewire")).await?;
    let decision = queen.propose_topology_change(Topology::Mesh).await?;
    assert_eq!(decision.decision.as_deref(), Some("mesh"));
    assert_eq!(ctx.store.get_swarm(queen.swarm_id()).await?.unwrap().topology, Topology::Mesh);
    assert_eq!(ctx.store.list_consensus_decisions(queen.swarm_id()).await?.len(), 1);

    let ctx = context(Arc::new(VotingExecutor { pick: 1 }));
    let queen = QueenCoordinator::spawn_swarm(ctx.clone(), hierarchical("stay put")).await?;
    let decision = queen.propose_topology_change(Topology::Ring).await?;
    assert_eq!(decision.decision.as_deref(), Some("hierarchical"));
    assert_eq!(
        ctx.store.get_swarm(queen.swarm_id()).await?.unwrap().topology,
        Topology::Hierarchical
    );
    Ok(())
}

#[tokio::test]
async fn test_run_to_completion() -> anyhow::Result<()> {
    let ctx = context(Arc::new(EchoExecutor));
    let queen = QueenCoordinator::spawn_swarm(ctx.clone(), request("write a tokenizer", 3, true)).await?;

    let outcome = tokio::time::timeout(Duration::from_secs(10), queen.run(CancellationToken::new())).await??;
    assert_eq!(outcome, RunOutcome::Completed);

    let report = queen.status().await?;
    assert_eq!(report.completed_tasks, 6);
    assert_eq!(report.completion_percentage, 100);
    assert_eq!(report.memory.map(|m| m.total_entries), Some(6));

    let session = ctx.store.find_session_by_swarm(queen.swarm_id()).await?.unwrap();
    assert_eq!(session.status, SessionStatus::Completed);
    assert_eq!(session.completion_percentage, 100);
    Ok(())
}

#[tokio::test]
async fn test_run_stops_on_cancel() -> anyhow::Result<()> {
    let ctx = context(Arc::new(StuckExecutor));
    let queen = QueenCoordinator::spawn_swarm(ctx, request("forever", 1, true)).await?;
    let cancel = CancellationToken::new();

    let stopper = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        stopper.cancel();
    });
    assert_eq!(queen.run(cancel).await?, RunOutcome::Cancelled);
    Ok(())
}
