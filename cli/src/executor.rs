// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Process-backed task executor.
//!
//! Runs `executor.command` once per task. The request is written to the
//! child's stdin as JSON; stdout is the task result (parsed as JSON when
//! possible, otherwise kept as a string). A non-zero exit status fails the
//! task with the child's stderr.

use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

use hive_mind_core::domain::config::ExecutorConfig;
use hive_mind_swarm::application::executor::{EchoExecutor, ExecutionRequest, ExecutorError, TaskExecutor};

pub struct ProcessTaskExecutor {
    command: String,
    args: Vec<String>,
    timeout: Duration,
}

impl ProcessTaskExecutor {
    pub fn new(command: impl Into<String>, args: Vec<String>, timeout: Duration) -> Self {
        Self {
            command: command.into(),
            args,
            timeout,
        }
    }
}

#[async_trait]
impl TaskExecutor for ProcessTaskExecutor {
    async fn execute(&self, request: ExecutionRequest) -> Result<Value, ExecutorError> {
        let input = json!({
            "objective": request.objective,
            "agent": {
                "id": request.agent.id,
                "name": request.agent.name,
                "type": request.agent.agent_type.as_str(),
                "capabilities": request.agent.capabilities,
            },
            "task": request.task,
        });
        let input = serde_json::to_vec(&input).map_err(|e| ExecutorError::Failed(e.to_string()))?;

        let mut child = Command::new(&self.command)
            .args(&self.args)
            .env("HIVE_MIND_AGENT_TYPE", request.agent.agent_type.as_str())
            .env("HIVE_MIND_TASK_ID", request.task.id.to_string())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| ExecutorError::Unavailable(format!("{}: {e}", self.command)))?;
        debug!(command = %self.command, task_id = %request.task.id, "Executor process started");

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(&input)
                .await
                .map_err(|e| ExecutorError::Failed(format!("failed to write task to executor: {e}")))?;
        }

        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| ExecutorError::TimedOut(self.timeout))?
            .map_err(|e| ExecutorError::Failed(e.to_string()))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ExecutorError::Failed(format!("{} ({})", stderr.trim(), output.status)));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stdout = stdout.trim();
        Ok(serde_json::from_str(stdout).unwrap_or_else(|_| Value::String(stdout.to_string())))
    }
}

/// The configured executor, or the echo executor when no command is set.
pub fn build_executor(config: &ExecutorConfig) -> Arc<dyn TaskExecutor> {
    match &config.command {
        Some(command) => Arc::new(ProcessTaskExecutor::new(command, config.args.clone(), config.timeout)),
        None => Arc::new(EchoExecutor),
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use hive_mind_core::domain::agent::{Agent, AgentType};
    use hive_mind_core::domain::swarm::SwarmId;
    use hive_mind_core::domain::task::Task;

    fn request() -> ExecutionRequest {
        let swarm_id = SwarmId::new();
        ExecutionRequest {
            agent: Agent::worker(swarm_id, "coder-1", AgentType::Coder),
            task: Task::new(swarm_id, "write the lexer", 3),
            objective: "build a compiler".to_string(),
        }
    }

    #[tokio::test]
    async fn test_stdout_json_becomes_result() {
        let executor = ProcessTaskExecutor::new("cat", Vec::new(), Duration::from_secs(5));
        let result = executor.execute(request()).await.unwrap();
        assert_eq!(result["task"]["description"], "write the lexer");
        assert_eq!(result["agent"]["type"], "coder");
    }

    #[tokio::test]
    async fn test_plain_stdout_is_kept_as_string() {
        let executor = ProcessTaskExecutor::new(
            "sh",
            vec!["-c".to_string(), "cat >/dev/null; echo done".to_string()],
            Duration::from_secs(5),
        );
        assert_eq!(executor.execute(request()).await.unwrap(), json!("done"));
    }

    #[tokio::test]
    async fn test_non_zero_exit_fails() {
        let executor = ProcessTaskExecutor::new(
            "sh",
            vec!["-c".to_string(), "cat >/dev/null; echo broken >&2; exit 3".to_string()],
            Duration::from_secs(5),
        );
        match executor.execute(request()).await {
            Err(ExecutorError::Failed(message)) => assert!(message.contains("broken")),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_slow_process_times_out() {
        let executor = ProcessTaskExecutor::new(
            "sh",
            vec!["-c".to_string(), "cat >/dev/null; sleep 5".to_string()],
            Duration::from_millis(100),
        );
        let err = executor.execute(request()).await.unwrap_err();
        assert_eq!(err, ExecutorError::TimedOut(Duration::from_millis(100)));
    }

    #[tokio::test]
    async fn test_missing_binary_is_unavailable() {
        let executor = ProcessTaskExecutor::new("/nonexistent/hive-executor", Vec::new(), Duration::from_secs(1));
        assert!(matches!(executor.execute(request()).await, Err(ExecutorError::Unavailable(_))));
    }
}
