// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Global swarm options shared by every command.
//!
//! Each flag overrides the matching configuration value after the config file
//! and `HIVE_MIND_*` environment variables have been applied.

use clap::Args;

use hive_mind_core::domain::config::HiveMindConfig;
use hive_mind_core::domain::consensus::ConsensusAlgorithm;
use hive_mind_core::domain::swarm::QueenType;

#[derive(Args, Debug, Clone, Default, PartialEq)]
pub struct HiveOptions {
    /// Queen strategy (strategic, tactical, adaptive)
    #[arg(long, global = true, value_name = "TYPE")]
    pub queen_type: Option<QueenType>,

    /// Maximum number of worker agents
    #[arg(long, global = true, value_name = "N")]
    pub max_workers: Option<u32>,

    /// Consensus algorithm (majority, weighted, byzantine, unanimous, quorum)
    #[arg(long, global = true, value_name = "ALGORITHM")]
    pub consensus: Option<ConsensusAlgorithm>,

    /// Collective memory entry budget per swarm
    #[arg(long, global = true, value_name = "ENTRIES")]
    pub memory_size: Option<usize>,

    /// Spawn workers automatically while ready tasks wait
    #[arg(long, global = true)]
    pub auto_scale: bool,

    /// Mark swarm messages as encrypted
    #[arg(long, global = true)]
    pub encryption: bool,

    /// Serve Prometheus metrics and print swarm traffic while running
    #[arg(long, global = true)]
    pub monitor: bool,
}

impl HiveOptions {
    pub fn apply(&self, config: &mut HiveMindConfig) {
        if let Some(queen_type) = self.queen_type {
            config.swarm.queen_type = queen_type;
        }
        if let Some(max_workers) = self.max_workers {
            config.swarm.max_workers = max_workers;
        }
        if let Some(consensus) = self.consensus {
            config.swarm.consensus = consensus;
        }
        if let Some(memory_size) = self.memory_size {
            config.memory.memory_size = memory_size;
        }
        if self.auto_scale {
            config.swarm.auto_scale = true;
        }
        if self.encryption {
            config.swarm.encryption = true;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_override_config() {
        let mut config = HiveMindConfig::default();
        let options = HiveOptions {
            queen_type: Some(QueenType::Tactical),
            max_workers: Some(3),
            consensus: Some(ConsensusAlgorithm::Byzantine),
            memory_size: Some(50),
            auto_scale: true,
            ..HiveOptions::default()
        };

        options.apply(&mut config);
        assert_eq!(config.swarm.queen_type, QueenType::Tactical);
        assert_eq!(config.swarm.max_workers, 3);
        assert_eq!(config.swarm.consensus, ConsensusAlgorithm::Byzantine);
        assert_eq!(config.memory.memory_size, 50);
        assert!(config.swarm.auto_scale);
        assert!(!config.swarm.encryption);
    }

    #[test]
    fn test_unset_flags_keep_config() {
        let mut config = HiveMindConfig::default();
        config.swarm.auto_scale = true;
        HiveOptions::default().apply(&mut config);
        assert_eq!(config, {
            let mut expected = HiveMindConfig::default();
            expected.swarm.auto_scale = true;
            expected
        });
    }
}
