// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Durable Key-Value Storage
//!
//! The orchestrator needs exactly one durable slot: the record of the
//! in-flight payment. It sits behind [`KeyValueStore`] so the app can pick a
//! backend:
//!
//! - [`FileStore`]: one JSON file per key, atomic write via rename.
//! - [`RedbStore`]: a single redb table (pure Rust, ACID).
//! - [`MemoryStore`]: process memory only; tests and ephemeral sessions.
//!
//! ## Storage Layout
//!
//! ```text
//! {data_dir}/
//!   state/
//!     pending_payment.json   # FileStore
//!   orchestrator.redb        # RedbStore
//! ```

pub mod file_store;
pub mod memory;
pub mod paths;
pub mod pending;
pub mod redb_store;

use std::io;
use std::sync::Arc;

use async_trait::async_trait;

use crate::config::{OrchestratorConfig, StoreBackend};

pub use file_store::FileStore;
pub use memory::MemoryStore;
pub use paths::StoragePaths;
pub use pending::{PendingPaymentStore, PENDING_PAYMENT_KEY};
pub use redb_store::RedbStore;

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("redb error: {0}")]
    Redb(String),

    #[error("invalid storage key: {0}")]
    InvalidKey(String),
}

pub type StorageResult<T> = Result<T, StorageError>;

/// Byte-oriented durable store. Every call is a suspension point.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> StorageResult<Option<Vec<u8>>>;

    /// Insert or fully overwrite `key`.
    async fn put(&self, key: &str, value: &[u8]) -> StorageResult<()>;

    /// Remove `key`; returns whether it existed.
    async fn remove(&self, key: &str) -> StorageResult<bool>;
}

/// Open the store selected by configuration.
pub fn open_configured(config: &OrchestratorConfig) -> StorageResult<Arc<dyn KeyValueStore>> {
    let paths = StoragePaths::new(&config.data_dir);
    let store: Arc<dyn KeyValueStore> = match config.store_backend {
        StoreBackend::File => {
            let store = FileStore::open(paths)?;
            store.health_check()?;
            Arc::new(store)
        }
        StoreBackend::Redb => Arc::new(RedbStore::open(&paths.redb_file())?),
    };
    Ok(store)
}

/// Keys become file names, so keep them to a safe alphabet.
pub(crate) fn validate_key(key: &str) -> StorageResult<()> {
    let valid = !key.is_empty()
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if valid {
        Ok(())
    } else {
        Err(StorageError::InvalidKey(key.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_key_rejects_path_characters() {
        assert!(validate_key("pending_payment").is_ok());
        assert!(validate_key("flow-2").is_ok());
        assert!(validate_key("").is_err());
        assert!(validate_key("../etc/passwd").is_err());
        assert!(validate_key("a/b").is_err());
    }

    fn config_for(dir: &std::path::Path, backend: &str) -> OrchestratorConfig {
        let data_dir = dir.to_string_lossy().into_owned();
        OrchestratorConfig::from_lookup(|name| match name {
            crate::config::API_BASE_URL_ENV => Some("https://api.example.com".to_string()),
            crate::config::DATA_DIR_ENV => Some(data_dir.clone()),
            crate::config::STORE_BACKEND_ENV => Some(backend.to_string()),
            _ => None,
        })
        .unwrap()
    }

    #[tokio::test]
    async fn open_configured_checks_file_store() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_configured(&config_for(dir.path(), "file")).unwrap();

        let state_dir = StoragePaths::new(dir.path()).state_dir().to_path_buf();
        assert_eq!(std::fs::read_dir(&state_dir).unwrap().count(), 0);
        store.put("pending_payment", b"{}").await.unwrap();
        assert_eq!(store.get("pending_payment").await.unwrap(), Some(b"{}".to_vec()));
    }

    #[test]
    fn open_configured_fails_on_unusable_data_dir() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("not_a_dir");
        std::fs::write(&blocker, b"x").unwrap();

        assert!(open_configured(&config_for(&blocker, "file")).is_err());
    }

    #[tokio::test]
    async fn open_configured_selects_redb() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_configured(&config_for(dir.path(), "redb")).unwrap();
        store.put("pending_payment", b"1").await.unwrap();
        assert!(StoragePaths::new(dir.path()).redb_file().exists());
    }
}
