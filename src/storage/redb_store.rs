// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Embedded key-value store backed by redb (pure Rust, ACID).
//!
//! ## Table Layout
//!
//! - `orchestrator_state`: key → value bytes (the pending payment record)

use std::path::Path;

use async_trait::async_trait;
use redb::{Database, ReadableDatabase, TableDefinition};

use super::{validate_key, KeyValueStore, StorageError, StorageResult};

const ORCHESTRATOR_STATE: TableDefinition<&str, &[u8]> =
    TableDefinition::new("orchestrator_state");

impl From<redb::Error> for StorageError {
    fn from(e: redb::Error) -> Self {
        StorageError::Redb(e.to_string())
    }
}

impl From<redb::DatabaseError> for StorageError {
    fn from(e: redb::DatabaseError) -> Self {
        StorageError::Redb(e.to_string())
    }
}

impl From<redb::TransactionError> for StorageError {
    fn from(e: redb::TransactionError) -> Self {
        StorageError::Redb(e.to_string())
    }
}

impl From<redb::TableError> for StorageError {
    fn from(e: redb::TableError) -> Self {
        StorageError::Redb(e.to_string())
    }
}

impl From<redb::StorageError> for StorageError {
    fn from(e: redb::StorageError) -> Self {
        StorageError::Redb(e.to_string())
    }
}

impl From<redb::CommitError> for StorageError {
    fn from(e: redb::CommitError) -> Self {
        StorageError::Redb(e.to_string())
    }
}

pub struct RedbStore {
    db: Database,
}

impl RedbStore {
    /// Open (or create) the database at the given path.
    pub fn open(path: &Path) -> StorageResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let db = Database::create(path)?;

        // Pre-create the table so later read transactions don't fail
        let write_txn = db.begin_write()?;
        {
            let _ = write_txn.open_table(ORCHESTRATOR_STATE)?;
        }
        write_txn.commit()?;

        Ok(Self { db })
    }

    fn read_entry(&self, key: &str) -> StorageResult<Option<Vec<u8>>> {
        validate_key(key)?;
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(ORCHESTRATOR_STATE)?;
        Ok(table.get(key)?.map(|v| v.value().to_vec()))
    }

    fn write_entry(&self, key: &str, value: &[u8]) -> StorageResult<()> {
        validate_key(key)?;
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(ORCHESTRATOR_STATE)?;
            table.insert(key, value)?;
        }
        write_txn.commit()?;
        Ok(())
    }

    fn remove_entry(&self, key: &str) -> StorageResult<bool> {
        validate_key(key)?;
        let write_txn = self.db.begin_write()?;
        let existed = {
            let mut table = write_txn.open_table(ORCHESTRATOR_STATE)?;
            let removed = table.remove(key)?;
            removed.is_some()
        };
        write_txn.commit()?;
        Ok(existed)
    }
}

#[async_trait]
impl KeyValueStore for RedbStore {
    async fn get(&self, key: &str) -> StorageResult<Option<Vec<u8>>> {
        self.read_entry(key)
    }

    async fn put(&self, key: &str, value: &[u8]) -> StorageResult<()> {
        self.write_entry(key, value)
    }

    async fn remove(&self, key: &str) -> StorageResult<bool> {
        self.remove_entry(key)
    }
}
