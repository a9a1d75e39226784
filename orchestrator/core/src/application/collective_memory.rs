// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Collective Memory - Application Layer
//!
//! Shared key/value knowledge for one swarm, namespaced and persisted through
//! the [`PersistentStore`]. Every successful write publishes a `memory`
//! message on the swarm bus.
//!
//! # Architecture
//!
//! - **Layer:** Application Layer
//! - **Purpose:** Store, retrieve and search swarm knowledge; compression and
//!   eviction maintenance passes

use std::collections::BTreeMap;
use std::sync::Arc;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::Utc;
use metrics::counter;
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{debug, info};

use crate::domain::agent::AgentId;
use crate::domain::memory::{clamp_confidence, json_size, MemoryEntry, MemoryStats, MemoryType, DEFAULT_NAMESPACE};
use crate::domain::message::{topics, MessageType, SwarmMessage};
use crate::domain::repository::{retry_once, PersistentStore, StorageError};
use crate::domain::swarm::SwarmId;
use crate::infrastructure::swarm_bus::SwarmBus;

const ZSTD_LEVEL: i32 = 3;

#[derive(Debug, Error)]
pub enum MemoryError {
    #[error("memory key '{key}' not found in namespace '{namespace}'")]
    NotFound { namespace: String, key: String },

    #[error("memory key cannot be empty")]
    EmptyKey,

    #[error("failed to decode compressed value for '{key}': {reason}")]
    Codec { key: String, reason: String },

    #[error(transparent)]
    Storage(#[from] StorageError),
}

#[derive(Clone)]
pub struct CollectiveMemory {
    store: Arc<dyn PersistentStore>,
    bus: SwarmBus,
    swarm_id: SwarmId,
    namespace: String,
    author: Option<AgentId>,
    compression_threshold: usize,
    encrypted: bool,
}

impl CollectiveMemory {
    pub fn new(store: Arc<dyn PersistentStore>, bus: SwarmBus, swarm_id: SwarmId) -> Self {
        Self {
            store,
            bus,
            swarm_id,
            namespace: DEFAULT_NAMESPACE.to_string(),
            author: None,
            compression_threshold: 10 * 1024,
            encrypted: false,
        }
    }

    /// Namespace used by the un-suffixed operations.
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    /// Agent recorded as `created_by` on new entries and as message sender.
    pub fn with_author(mut self, agent_id: AgentId) -> Self {
        self.author = Some(agent_id);
        self
    }

    pub fn with_compression_threshold(mut self, bytes: usize) -> Self {
        self.compression_threshold = bytes;
        self
    }

    pub fn with_encryption(mut self, encrypted: bool) -> Self {
        self.encrypted = encrypted;
        self
    }

    pub fn swarm_id(&self) -> SwarmId {
        self.swarm_id
    }

    pub async fn store(
        &self,
        key: &str,
        value: Value,
        memory_type: MemoryType,
        confidence: f64,
    ) -> Result<MemoryEntry, MemoryError> {
        self.store_in(&self.namespace, key, value, memory_type, confidence).await
    }

    /// Inserts or overwrites `key`. Overwrites keep the entry's identity and
    /// access counter.
    pub async fn store_in(
        &self,
        namespace: &str,
        key: &str,
        value: Value,
        memory_type: MemoryType,
        confidence: f64,
    ) -> Result<MemoryEntry, MemoryError> {
        if key.trim().is_empty() {
            return Err(MemoryError::EmptyKey);
        }

        let existing = retry_once("get_memory_entry", || self.store.get_memory_entry(self.swarm_id, namespace, key)).await?;
        let entry = match existing {
            Some(mut entry) => {
                entry.size = json_size(&value);
                entry.value = value;
                entry.memory_type = memory_type;
                entry.confidence = clamp_confidence(confidence);
                entry.compressed = false;
                entry.updated_at = Utc::now();
                entry
            }
            None => MemoryEntry::new(self.swarm_id, namespace, key, value, memory_type, confidence, self.author),
        };

        retry_once("append_memory_entry", || self.store.append_memory_entry(&entry)).await?;
        counter!("hive_mind_memory_writes_total", "op" => "store").increment(1);
        debug!(swarm_id = %self.swarm_id, namespace, key, "Stored memory entry");

        self.announce("store", namespace, key);
        Ok(entry)
    }

    pub async fn retrieve(&self, key: &str) -> Result<Option<MemoryEntry>, MemoryError> {
        self.retrieve_in(&self.namespace, key).await
    }

    /// Reads an entry, counting exactly one access. Compressed values are
    /// returned decoded.
    pub async fn retrieve_in(&self, namespace: &str, key: &str) -> Result<Option<MemoryEntry>, MemoryError> {
        let entry = retry_once("record_memory_access", || {
            self.store.record_memory_access(self.swarm_id, namespace, key)
        })
        .await?;
        entry.map(decode_entry).transpose()
    }

    /// `pattern` ending in `*` matches a key prefix, anything else a substring.
    /// Results are ordered by key and do not count as accesses.
    pub async fn search(&self, pattern: &str) -> Result<Vec<MemoryEntry>, MemoryError> {
        self.search_in(Some(&self.namespace), pattern).await
    }

    /// Like [`search`](Self::search), across every namespace when `namespace` is `None`.
    pub async fn search_in(&self, namespace: Option<&str>, pattern: &str) -> Result<Vec<MemoryEntry>, MemoryError> {
        let entries = retry_once("list_memory_entries", || {
            self.store.list_memory_entries(self.swarm_id, namespace)
        })
        .await?;

        entries
            .into_iter()
            .filter(|e| key_matches(&e.key, pattern))
            .map(decode_entry)
            .collect()
    }

    /// Replaces the value of an existing key, keeping type and confidence.
    pub async fn update(&self, key: &str, value: Value) -> Result<MemoryEntry, MemoryError> {
        let namespace = self.namespace.as_str();
        let Some(mut entry) = self.store.get_memory_entry(self.swarm_id, namespace, key).await? else {
            return Err(MemoryError::NotFound {
                namespace: namespace.to_string(),
                key: key.to_string(),
            });
        };

        entry.size = json_size(&value);
        entry.value = value;
        entry.compressed = false;
        entry.updated_at = Utc::now();

        retry_once("append_memory_entry", || self.store.append_memory_entry(&entry)).await?;
        counter!("hive_mind_memory_writes_total", "op" => "update").increment(1);
        self.announce("update", namespace, key);
        Ok(entry)
    }

    /// Returns whether the key existed.
    pub async fn delete(&self, key: &str) -> Result<bool, MemoryError> {
        let namespace = self.namespace.as_str();
        let removed = retry_once("delete_memory_entry", || {
            self.store.delete_memory_entry(self.swarm_id, namespace, key)
        })
        .await?;
        if removed {
            counter!("hive_mind_memory_writes_total", "op" => "delete").increment(1);
            self.announce("delete", namespace, key);
        }
        Ok(removed)
    }

    pub async fn get_stats(&self) -> Result<MemoryStats, MemoryError> {
        let entries = self.store.list_memory_entries(self.swarm_id, None).await?;
        Ok(compute_stats(&entries))
    }

    /// Compresses every uncompressed value larger than the threshold.
    /// Returns the number of entries rewritten.
    pub async fn compress(&self) -> Result<usize, MemoryError> {
        let entries = self.store.list_memory_entries(self.swarm_id, None).await?;
        let mut rewritten = 0;

        for mut entry in entries {
            if entry.compressed || (entry.size as usize) <= self.compression_threshold {
                continue;
            }
            entry.value = Value::String(encode_value(&entry.value, &entry.key)?);
            entry.compressed = true;
            self.store.append_memory_entry(&entry).await?;
            rewritten += 1;
        }

        if rewritten > 0 {
            info!(swarm_id = %self.swarm_id, rewritten, "Compressed memory entries");
            counter!("hive_mind_memory_writes_total", "op" => "compress").increment(rewritten as u64);
            self.publish(json!({ "op": "compress", "entries": rewritten }));
        }
        Ok(rewritten)
    }

    /// Deletes the least recently accessed, lowest-confidence entries until at
    /// most `max_entries` remain. Returns the number removed.
    pub async fn evict(&self, max_entries: usize) -> Result<usize, MemoryError> {
        let mut entries = self.store.list_memory_entries(self.swarm_id, None).await?;
        if entries.len() <= max_entries {
            return Ok(0);
        }

        entries.sort_by(|a, b| {
            a.accessed_at
                .cmp(&b.accessed_at)
                .then_with(|| a.confidence.total_cmp(&b.confidence))
        });

        let excess = entries.len() - max_entries;
        let mut removed = 0;
        for entry in entries.iter().take(excess) {
            if self
                .store
                .delete_memory_entry(self.swarm_id, &entry.namespace, &entry.key)
                .await?
            {
                removed += 1;
            }
        }

        info!(swarm_id = %self.swarm_id, removed, max_entries, "Evicted memory entries");
        counter!("hive_mind_memory_writes_total", "op" => "evict").increment(removed as u64);
        self.publish(json!({ "op": "evict", "entries": removed }));
        Ok(removed)
    }

    fn announce(&self, op: &str, namespace: &str, key: &str) {
        self.publish(json!({ "op": op, "namespace": namespace, "key": key }));
    }

    fn publish(&self, payload: Value) {
        let message = SwarmMessage::new(
            self.swarm_id,
            self.author,
            MessageType::Memory,
            topics::memory(self.swarm_id),
            payload,
        )
        .encrypted(self.encrypted);
        self.bus.publish(message);
    }
}

fn key_matches(key: &str, pattern: &str) -> bool {
    match pattern.strip_suffix('*') {
        Some(prefix) => key.starts_with(prefix),
        None => key.contains(pattern),
    }
}

fn encode_value(value: &Value, key: &str) -> Result<String, MemoryError> {
    let raw = serde_json::to_vec(value).map_err(StorageError::from)?;
    let packed = zstd::stream::encode_all(raw.as_slice(), ZSTD_LEVEL).map_err(|e| MemoryError::Codec {
        key: key.to_string(),
        reason: e.to_string(),
    })?;
    Ok(STANDARD.encode(packed))
}

fn decode_value(encoded: &Value, key: &str) -> Result<Value, MemoryError> {
    let codec = |reason: String| MemoryError::Codec {
        key: key.to_string(),
        reason,
    };
    let Value::String(text) = encoded else {
        return Err(codec("compressed value is not a string".to_string()));
    };
    let packed = STANDARD.decode(text).map_err(|e| codec(e.to_string()))?;
    let raw = zstd::stream::decode_all(packed.as_slice()).map_err(|e| codec(e.to_string()))?;
    serde_json::from_slice(&raw).map_err(|e| codec(e.to_string()))
}

fn decode_entry(mut entry: MemoryEntry) -> Result<MemoryEntry, MemoryError> {
    if entry.compressed {
        entry.value = decode_value(&entry.value, &entry.key)?;
    }
    Ok(entry)
}

pub fn compute_stats(entries: &[MemoryEntry]) -> MemoryStats {
    let mut by_type = BTreeMap::new();
    let mut by_namespace = BTreeMap::new();
    for entry in entries {
        *by_type.entry(entry.memory_type.as_str().to_string()).or_insert(0) += 1;
        *by_namespace.entry(entry.namespace.clone()).or_insert(0) += 1;
    }

    let average_confidence = if entries.is_empty() {
        0.0
    } else {
        entries.iter().map(|e| e.confidence).sum::<f64>() / entries.len() as f64
    };

    MemoryStats {
        total_entries: entries.len(),
        total_size: entries.iter().map(|e| e.size).sum(),
        compressed_entries: entries.iter().filter(|e| e.compressed).count(),
        total_accesses: entries.iter().map(|e| e.access_count).sum(),
        average_confidence,
        by_type,
        by_namespace,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::consensus::ConsensusAlgorithm;
    use crate::domain::swarm::{QueenType, Swarm, Topology};
    use crate::infrastructure::repositories::InMemoryStore;

    async fn memory() -> (CollectiveMemory, SwarmBus) {
        let store = Arc::new(InMemoryStore::new());
        let swarm = Swarm::new("m", "remember", QueenType::Strategic, Topology::Mesh, ConsensusAlgorithm::Majority, 2);
        store.create_swarm(&swarm).await.unwrap();
        let bus = SwarmBus::new(64);
        (CollectiveMemory::new(store, bus.clone(), swarm.id), bus)
    }

    #[tokio::test]
    async fn test_store_then_retrieve_counts_one_access() {
        let (memory, _) = memory().await;
        let value = json!({"endpoints": ["/a", "/b"], "auth": {"kind": "token"}});
        memory.store("api/design", value.clone(), MemoryType::Knowledge, 0.9).await.unwrap();

        let entry = memory.retrieve("api/design").await.unwrap().unwrap();
        assert_eq!(entry.value, value);
        assert_eq!(entry.access_count, 1);

        let entry = memory.retrieve("api/design").await.unwrap().unwrap();
        assert_eq!(entry.access_count, 2);
        assert!(memory.retrieve("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_overwrite_keeps_access_count() {
        let (memory, _) = memory().await;
        memory.store("k", json!(1), MemoryType::General, 0.5).await.unwrap();
        memory.retrieve("k").await.unwrap();

        let entry = memory.store("k", json!(2), MemoryType::Decision, 2.0).await.unwrap();
        assert_eq!(entry.access_count, 1);
        assert_eq!(entry.confidence, 1.0);
        assert_eq!(entry.memory_type, MemoryType::Decision);
    }

    #[tokio::test]
    async fn test_search_prefix_and_substring() {
        let (memory, _) = memory().await;
        for key in ["api/users", "api/orders", "db/users", "cache"] {
            memory.store(key, json!(key), MemoryType::General, 0.5).await.unwrap();
        }

        let keys = |entries: Vec<MemoryEntry>| entries.into_iter().map(|e| e.key).collect::<Vec<_>>();
        assert_eq!(keys(memory.search("api/*").await.unwrap()), vec!["api/orders", "api/users"]);
        assert_eq!(keys(memory.search("users").await.unwrap()), vec!["api/users", "db/users"]);
        assert!(memory.search("nothing*").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_namespaces_are_isolated() {
        let (memory, _) = memory().await;
        memory.store_in("research", "k", json!("a"), MemoryType::Learning, 0.5).await.unwrap();
        assert!(memory.retrieve("k").await.unwrap().is_none());
        assert_eq!(memory.retrieve_in("research", "k").await.unwrap().unwrap().value, json!("a"));

        let stats = memory.get_stats().await.unwrap();
        assert_eq!(stats.by_namespace.get("research"), Some(&1));
    }

    #[tokio::test]
    async fn test_update_requires_existing_key() {
        let (memory, _) = memory().await;
        assert!(matches!(
            memory.update("ghost", json!(1)).await,
            Err(MemoryError::NotFound { .. })
        ));
        memory.store("k", json!(1), MemoryType::Pattern, 0.4).await.unwrap();
        let entry = memory.update("k", json!(2)).await.unwrap();
        assert_eq!(entry.memory_type, MemoryType::Pattern);
        assert_eq!(entry.value, json!(2));
    }

    #[tokio::test]
    async fn test_compress_is_transparent() {
        let (memory, _) = memory().await;
        let memory = memory.with_compression_threshold(64);
        let big = json!({ "text": "lorem ipsum ".repeat(50) });
        memory.store("big", big.clone(), MemoryType::Knowledge, 0.8).await.unwrap();
        memory.store("small", json!("tiny"), MemoryType::Knowledge, 0.8).await.unwrap();

        assert_eq!(memory.compress().await.unwrap(), 1);
        assert_eq!(memory.compress().await.unwrap(), 0);

        let entry = memory.retrieve("big").await.unwrap().unwrap();
        assert!(entry.compressed);
        assert_eq!(entry.value, big);
        assert_eq!(memory.get_stats().await.unwrap().compressed_entries, 1);
    }

    #[tokio::test]
    async fn test_evict_drops_least_recently_used() {
        let (memory, _) = memory().await;
        for key in ["a", "b", "c"] {
            memory.store(key, json!(key), MemoryType::General, 0.5).await.unwrap();
        }
        memory.retrieve("a").await.unwrap();

        assert_eq!(memory.evict(2).await.unwrap(), 1);
        let remaining: Vec<String> = memory.search("*").await.unwrap().into_iter().map(|e| e.key).collect();
        assert_eq!(remaining, vec!["a", "c"]);
    }

    #[tokio::test]
    async fn test_writes_publish_memory_messages() {
        let (memory, bus) = memory().await;
        let mut observer = bus.observe();

        memory.store("k", json!(1), MemoryType::General, 0.5).await.unwrap();
        memory.delete("k").await.unwrap();
        assert!(!memory.delete("k").await.unwrap());

        let first = observer.recv().await.unwrap();
        assert_eq!(first.message_type, MessageType::Memory);
        assert_eq!(first.payload["op"], "store");
        assert_eq!(observer.recv().await.unwrap().payload["op"], "delete");
        assert!(observer.try_recv().is_err());
    }
}
