// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Repository Factory - Application Layer
//!
//! Creates the concrete [`PersistentStore`] for the configured storage backend,
//! keeping the domain layer free of infrastructure types.
//!
//! # Architecture
//!
//! - **Layer:** Application Layer
//! - **Purpose:** Backend selection for the durable store

use std::sync::Arc;

use tracing::info;

use crate::domain::repository::{PersistentStore, StorageBackend, StorageError};
use crate::infrastructure::db::Database;
use crate::infrastructure::repositories::sqlite::SqliteStore;
use crate::infrastructure::repositories::InMemoryStore;

/// Opens the store for `backend`. SQLite databases are created and migrated
/// on first use.
pub async fn create_store(backend: &StorageBackend) -> Result<Arc<dyn PersistentStore>, StorageError> {
    match backend {
        StorageBackend::InMemory => {
            info!("Using in-memory store; state is lost on exit");
            Ok(Arc::new(InMemoryStore::new()))
        }
        StorageBackend::Sqlite(config) => {
            let database = Database::new(&config.url).await?;
            info!(url = %config.url, "Opened SQLite store");
            Ok(Arc::new(SqliteStore::new(&database)))
        }
    }
}
