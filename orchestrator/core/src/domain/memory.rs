// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Collective memory entries.
//!
//! Entries are unique per `(swarm, namespace, key)`. Values are opaque JSON;
//! when `compressed` is set the stored value is an encoded string produced by
//! the collective memory compression pass.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::agent::AgentId;
use crate::domain::swarm::SwarmId;
use crate::domain::ParseEnumError;

pub const DEFAULT_NAMESPACE: &str = "default";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MemoryEntryId(pub Uuid);

impl MemoryEntryId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for MemoryEntryId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for MemoryEntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryType {
    Knowledge,
    Decision,
    Pattern,
    Learning,
    Coordination,
    Performance,
    Configuration,
    #[default]
    General,
}

impl MemoryType {
    pub const ALL: [MemoryType; 8] = [
        MemoryType::Knowledge,
        MemoryType::Decision,
        MemoryType::Pattern,
        MemoryType::Learning,
        MemoryType::Coordination,
        MemoryType::Performance,
        MemoryType::Configuration,
        MemoryType::General,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MemoryType::Knowledge => "knowledge",
            MemoryType::Decision => "decision",
            MemoryType::Pattern => "pattern",
            MemoryType::Learning => "learning",
            MemoryType::Coordination => "coordination",
            MemoryType::Performance => "performance",
            MemoryType::Configuration => "configuration",
            MemoryType::General => "general",
        }
    }
}

impl FromStr for MemoryType {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        MemoryType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| ParseEnumError::new("memory type", s))
    }
}

impl fmt::Display for MemoryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryEntry {
    pub id: MemoryEntryId,
    pub swarm_id: SwarmId,
    pub namespace: String,
    pub key: String,
    pub value: serde_json::Value,
    pub memory_type: MemoryType,
    /// Advisory only; callers decide how to weigh it.
    pub confidence: f64,
    pub created_by: Option<AgentId>,
    pub access_count: u64,
    pub compressed: bool,
    /// Size in bytes of the uncompressed JSON value.
    pub size: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub accessed_at: DateTime<Utc>,
}

impl MemoryEntry {
    pub fn new(
        swarm_id: SwarmId,
        namespace: impl Into<String>,
        key: impl Into<String>,
        value: serde_json::Value,
        memory_type: MemoryType,
        confidence: f64,
        created_by: Option<AgentId>,
    ) -> Self {
        let now = Utc::now();
        let size = json_size(&value);
        Self {
            id: MemoryEntryId::new(),
            swarm_id,
            namespace: namespace.into(),
            key: key.into(),
            value,
            memory_type,
            confidence: clamp_confidence(confidence),
            created_by,
            access_count: 0,
            compressed: false,
            size,
            created_at: now,
            updated_at: now,
            accessed_at: now,
        }
    }
}

/// Clamps into `[0, 1]`; NaN becomes 0.
pub fn clamp_confidence(confidence: f64) -> f64 {
    if confidence.is_nan() {
        0.0
    } else {
        confidence.clamp(0.0, 1.0)
    }
}

pub fn json_size(value: &serde_json::Value) -> u64 {
    serde_json::to_vec(value).map(|v| v.len() as u64).unwrap_or(0)
}

/// Aggregate figures over one swarm's memory.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MemoryStats {
    pub total_entries: usize,
    pub total_size: u64,
    pub compressed_entries: usize,
    pub total_accesses: u64,
    pub average_confidence: f64,
    pub by_type: std::collections::BTreeMap<String, usize>,
    pub by_namespace: std::collections::BTreeMap<String, usize>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_confidence_is_clamped() {
        assert_eq!(clamp_confidence(1.7), 1.0);
        assert_eq!(clamp_confidence(-0.2), 0.0);
        assert_eq!(clamp_confidence(f64::NAN), 0.0);
        assert_eq!(clamp_confidence(0.42), 0.42);
    }

    #[test]
    fn test_new_entry_measures_size() {
        let entry = MemoryEntry::new(
            SwarmId::new(),
            DEFAULT_NAMESPACE,
            "api/style",
            serde_json::json!({"case": "snake"}),
            MemoryType::Pattern,
            0.8,
            None,
        );
        assert_eq!(entry.size, br#"{"case":"snake"}"#.len() as u64);
        assert_eq!(entry.access_count, 0);
        assert!(!entry.compressed);
    }
}
