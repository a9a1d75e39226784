// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Hive Mind CLI library - exposes testable components
//!
//! # Architecture
//!
//! - **Layer:** Interface / Presentation Layer
//! - **Purpose:** Command handlers, global options and the process executor behind `hive-mind`

pub mod commands;
pub mod context;
pub mod executor;
pub mod monitor;
pub mod options;
