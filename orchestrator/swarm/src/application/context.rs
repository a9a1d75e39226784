// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Coordinator Context - Application Layer
//!
//! Shared handles (store, bus, executor) and tuning knobs passed to every
//! coordinator and session manager.

use std::sync::Arc;
use std::time::Duration;

use hive_mind_core::domain::config::HiveMindConfig;
use hive_mind_core::domain::memory::DEFAULT_NAMESPACE;
use hive_mind_core::domain::repository::PersistentStore;
use hive_mind_core::infrastructure::swarm_bus::SwarmBus;

use crate::application::executor::TaskExecutor;

#[derive(Debug, Clone, PartialEq)]
pub struct CoordinatorSettings {
    pub heartbeat_interval: Duration,
    pub heartbeat_timeout: Duration,
    pub dispatch_interval: Duration,
    pub checkpoint_interval: Duration,
    pub auto_scale: bool,
    pub encryption: bool,
    pub task_max_retries: u32,
    pub voting_timeout: Duration,
    pub quorum_fraction: f64,
    pub memory_namespace: String,
    pub compression_threshold: usize,
}

impl Default for CoordinatorSettings {
    fn default() -> Self {
        Self::from(&HiveMindConfig::default())
    }
}

impl From<&HiveMindConfig> for CoordinatorSettings {
    fn from(config: &HiveMindConfig) -> Self {
        Self {
            heartbeat_interval: config.swarm.heartbeat_interval,
            heartbeat_timeout: config.swarm.heartbeat_timeout,
            dispatch_interval: config.swarm.dispatch_interval,
            checkpoint_interval: config.swarm.checkpoint_interval,
            auto_scale: config.swarm.auto_scale,
            encryption: config.swarm.encryption,
            task_max_retries: config.swarm.task_max_retries,
            voting_timeout: config.consensus.voting_timeout,
            quorum_fraction: config.consensus.quorum_fraction,
            memory_namespace: if config.memory.namespace.is_empty() {
                DEFAULT_NAMESPACE.to_string()
            } else {
                config.memory.namespace.clone()
            },
            compression_threshold: config.memory.compression_threshold,
        }
    }
}

#[derive(Clone)]
pub struct SwarmContext {
    pub store: Arc<dyn PersistentStore>,
    pub bus: SwarmBus,
    pub executor: Arc<dyn TaskExecutor>,
    pub settings: CoordinatorSettings,
}

impl SwarmContext {
    pub fn new(store: Arc<dyn PersistentStore>, bus: SwarmBus, executor: Arc<dyn TaskExecutor>) -> Self {
        Self {
            store,
            bus,
            executor,
            settings: CoordinatorSettings::default(),
        }
    }

    pub fn with_settings(mut self, settings: CoordinatorSettings) -> Self {
        self.settings = settings;
        self
    }
}
