// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

pub mod collective_memory;
pub mod consensus_engine;
pub mod repository_factory;

pub use collective_memory::{CollectiveMemory, MemoryError};
pub use consensus_engine::ConsensusEngine;
pub use repository_factory::create_store;
