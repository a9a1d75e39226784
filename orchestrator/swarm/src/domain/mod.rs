// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Swarm Coordination Domain
//!
//! Pure rules used by the queen coordinator. No I/O dependencies.
//!
//! | Module | Key Types |
//! |--------|-----------|
//! | [`planning`] | worker mix per queen type, objective decomposition |
//! | [`dispatch`] | `Assignment`, `plan_assignments` |
//! | [`protocol`] | typed payloads of queen/worker messages |
//! | [`report`] | `SwarmReport` |

pub mod dispatch;
pub mod planning;
pub mod protocol;
pub mod report;

pub use dispatch::{plan_assignments, Assignment};
pub use planning::{decompose_objective, worker_mix};
pub use protocol::{Heartbeat, TaskAssignment, TaskOutcome, TaskReport, WorkerState, WorkerStatus};
pub use report::SwarmReport;
