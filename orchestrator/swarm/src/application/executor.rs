// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Task Executor - Application Layer
//!
//! The seam between the coordination engine and whatever does a worker's
//! actual thinking. Workers call [`TaskExecutor::execute`] once per assigned
//! task; timeouts and retries inside one attempt are the executor's business.
//!
//! # Architecture
//!
//! - **Layer:** Application Layer
//! - **Purpose:** Executor contract and the built-in echo executor

use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use thiserror::Error;

use hive_mind_core::domain::agent::Agent;
use hive_mind_core::domain::task::Task;

#[derive(Debug, Clone)]
pub struct ExecutionRequest {
    pub agent: Agent,
    pub task: Task,
    pub objective: String,
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum ExecutorError {
    #[error("execution failed: {0}")]
    Failed(String),

    #[error("execution timed out after {0:?}")]
    TimedOut(Duration),

    #[error("executor unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait TaskExecutor: Send + Sync {
    async fn execute(&self, request: ExecutionRequest) -> Result<serde_json::Value, ExecutorError>;

    /// Choice of `agent` on a consensus proposal. `None` casts no vote.
    async fn vote(&self, _agent: &Agent, _topic: &str, _options: &[String]) -> Option<String> {
        None
    }
}

/// Completes every task with a summary of its own input.
#[derive(Debug, Clone, Default)]
pub struct EchoExecutor;

#[async_trait]
impl TaskExecutor for EchoExecutor {
    async fn execute(&self, request: ExecutionRequest) -> Result<serde_json::Value, ExecutorError> {
        Ok(json!({
            "agent": request.agent.name,
            "agent_type": request.agent.agent_type.as_str(),
            "task": request.task.description,
        }))
    }
}
