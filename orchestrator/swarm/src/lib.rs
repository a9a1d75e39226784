// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # `hive-mind-swarm`: Queen Coordination Crate
//!
//! Runs a swarm on top of `hive-mind-core`: the queen's control loop, the
//! per-worker runtimes and the session lifecycle (pause, checkpoint, resume).
//!
//! ## Crate Layout
//!
//! | Module | Layer | Contents |
//! |--------|-------|----------|
//! | [`domain`] | Domain | Dispatch planning, objective decomposition, message payloads, reports |
//! | [`application`] | Application | `QueenCoordinator`, `SessionManager`, `WorkerRuntime`, `TaskExecutor` |
//!
//! ## Key Concepts
//!
//! - **Queen**: one per swarm. Assigns ready tasks to idle workers, folds
//!   results back into the store and fails workers whose heartbeats stop.
//! - **Worker runtime**: a background task per worker agent that executes
//!   assignments through a [`application::TaskExecutor`].
//! - **Session**: durable record of a run. Resuming rehydrates from the
//!   latest checkpoint with workers idle and in-flight tasks pending.

pub mod application;
pub mod domain;

pub use application::{
    CoordinatorError, NewTask, QueenCoordinator, SessionError, SessionManager, SpawnRequest, SwarmContext,
};
