// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Hive Mind Core
//!
//! Domain model, durable store, collective memory, consensus and the swarm
//! message bus shared by the coordinator and the CLI.
//!
//! # Architecture
//!
//! - **Layer:** Core System
//! - **Purpose:** Everything below the queen coordinator

pub mod application;
pub mod domain;
pub mod infrastructure;

pub use domain::*;
