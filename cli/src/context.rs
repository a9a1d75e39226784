// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Per-invocation context handed to every command handler.
//!
//! # Architecture
//!
//! - **Layer:** Interface / Presentation Layer
//! - **Purpose:** Resolve configuration, open the store and build the executor once

use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};

use hive_mind_core::application::repository_factory::create_store;
use hive_mind_core::domain::config::HiveMindConfig;
use hive_mind_core::domain::repository::PersistentStore;
use hive_mind_core::domain::session::{Session, SessionId};
use hive_mind_core::domain::swarm::{Swarm, SwarmId, SwarmStatus};
use hive_mind_core::infrastructure::swarm_bus::SwarmBus;
use hive_mind_swarm::application::context::{CoordinatorSettings, SwarmContext};
use hive_mind_swarm::application::executor::TaskExecutor;

use crate::executor::build_executor;
use crate::options::HiveOptions;

pub struct HiveMindContext {
    pub config: HiveMindConfig,
    pub options: HiveOptions,
    pub store: Arc<dyn PersistentStore>,
    pub executor: Arc<dyn TaskExecutor>,
    pub bus: SwarmBus,
}

impl HiveMindContext {
    /// Opens the configured store. `config` already carries file,
    /// environment and flag overrides.
    pub async fn from_config(config: HiveMindConfig, options: HiveOptions) -> Result<Self> {
        let store = create_store(&config.storage_backend())
            .await
            .context("Failed to open the hive mind store")?;
        let executor = build_executor(&config.executor);
        Ok(Self {
            config,
            options,
            store,
            executor,
            bus: SwarmBus::with_default_capacity(),
        })
    }

    pub fn swarm_context(&self) -> SwarmContext {
        SwarmContext::new(self.store.clone(), self.bus.clone(), self.executor.clone())
            .with_settings(CoordinatorSettings::from(&self.config))
    }

    /// Resolves a swarm by id or exact name. Without a selector the most
    /// recently created active or paused swarm is used.
    pub async fn resolve_swarm(&self, selector: Option<&str>) -> Result<Swarm> {
        let swarms = self.store.list_swarms().await?;

        let Some(selector) = selector else {
            return swarms
                .into_iter()
                .find(|s| matches!(s.status, SwarmStatus::Active | SwarmStatus::Paused))
                .ok_or_else(|| anyhow!("No active swarm. Spawn one with `hive-mind spawn <objective>`"));
        };

        if let Ok(id) = SwarmId::from_string(selector) {
            if let Some(swarm) = self.store.get_swarm(id).await? {
                return Ok(swarm);
            }
        }

        let mut named = swarms.into_iter().filter(|s| s.name == selector);
        match (named.next(), named.next()) {
            (Some(swarm), None) => Ok(swarm),
            (Some(_), Some(_)) => bail!("Several swarms are named '{selector}'; use the swarm id"),
            (None, _) => bail!("Swarm '{selector}' not found"),
        }
    }

    /// Resolves a session by id, or by the id or name of its swarm.
    pub async fn resolve_session(&self, selector: &str) -> Result<Session> {
        if let Ok(id) = SessionId::from_string(selector) {
            if let Some(session) = self.store.get_session(id).await? {
                return Ok(session);
            }
        }
        let swarm = self
            .resolve_swarm(Some(selector))
            .await
            .with_context(|| format!("Session '{selector}' not found"))?;
        self.store
            .find_session_by_swarm(swarm.id)
            .await?
            .ok_or_else(|| anyhow!("Swarm '{}' has no session", swarm.name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hive_mind_core::domain::config::DatabaseBackend;
    use hive_mind_core::domain::consensus::ConsensusAlgorithm;
    use hive_mind_core::domain::swarm::{QueenType, Topology};

    async fn memory_context() -> HiveMindContext {
        let mut config = HiveMindConfig::default();
        config.database.backend = DatabaseBackend::Memory;
        HiveMindContext::from_config(config, HiveOptions::default()).await.unwrap()
    }

    fn swarm(name: &str) -> Swarm {
        Swarm::new(name, "objective", QueenType::Adaptive, Topology::Mesh, ConsensusAlgorithm::Majority, 2)
    }

    #[tokio::test]
    async fn test_resolve_swarm_by_id_and_name() {
        let ctx = memory_context().await;
        let alpha = swarm("alpha");
        ctx.store.create_swarm(&alpha).await.unwrap();

        assert_eq!(ctx.resolve_swarm(Some(&alpha.id.to_string())).await.unwrap().id, alpha.id);
        assert_eq!(ctx.resolve_swarm(Some("alpha")).await.unwrap().id, alpha.id);
        assert_eq!(ctx.resolve_swarm(None).await.unwrap().id, alpha.id);
        assert!(ctx.resolve_swarm(Some("beta")).await.is_err());
    }

    #[tokio::test]
    async fn test_resolve_swarm_skips_finished_swarms() {
        let ctx = memory_context().await;
        let mut done = swarm("done");
        done.set_status(SwarmStatus::Completed);
        ctx.store.create_swarm(&done).await.unwrap();

        assert!(ctx.resolve_swarm(None).await.is_err());
        assert_eq!(ctx.resolve_swarm(Some("done")).await.unwrap().id, done.id);
    }

    #[tokio::test]
    async fn test_resolve_session_through_swarm_name() {
        let ctx = memory_context().await;
        let alpha = swarm("alpha");
        ctx.store.create_swarm(&alpha).await.unwrap();
        let session = Session::new(alpha.id);
        ctx.store.create_session(&session).await.unwrap();

        assert_eq!(ctx.resolve_session("alpha").await.unwrap().id, session.id);
        assert_eq!(ctx.resolve_session(&session.id.to_string()).await.unwrap().id, session.id);
    }
}
