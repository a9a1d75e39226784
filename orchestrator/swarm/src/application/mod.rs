// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

pub mod context;
pub mod executor;
pub mod queen;
pub mod session;
pub mod worker;

pub use context::{CoordinatorSettings, SwarmContext};
pub use executor::{EchoExecutor, ExecutionRequest, ExecutorError, TaskExecutor};
pub use queen::{
    AgentFailureError, CoordinatorError, DispatchReport, NewTask, QueenCoordinator, RunOutcome, ScaleReport,
    SpawnRequest, RESULTS_NAMESPACE,
};
pub use session::{rehydrate, ResumeFailure, SessionError, SessionManager, SessionResumeError};
pub use worker::{WorkerHandle, WorkerRuntime};
