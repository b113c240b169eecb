// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! File-backed key-value store.
//!
//! Each key maps to `{root}/state/{key}.json`. Writes go to a temp file that
//! is synced and then renamed over the target, so a crash mid-write leaves
//! either the old record or the new one, never a torn file.

use std::fs::{self, File};
use std::io::{self, Read, Write};

use async_trait::async_trait;

use super::{validate_key, KeyValueStore, StoragePaths, StorageResult};

#[derive(Debug, Clone)]
pub struct FileStore {
    paths: StoragePaths,
}

impl FileStore {
    /// Open the store, creating the directory layout if needed.
    ///
    /// Safe to call multiple times (idempotent).
    pub fn open(paths: StoragePaths) -> StorageResult<Self> {
        fs::create_dir_all(paths.state_dir())?;
        Ok(Self { paths })
    }

    pub fn paths(&self) -> &StoragePaths {
        &self.paths
    }

    /// Write-read-delete probe of the state directory.
    pub fn health_check(&self) -> StorageResult<()> {
        let probe = self.paths.state_dir().join(".health_check");
        let data = b"health_check_data";
        fs::write(&probe, data)?;
        let read_back = fs::read(&probe)?;
        fs::remove_file(&probe)?;
        if read_back != data {
            return Err(io::Error::new(io::ErrorKind::InvalidData, "health check data mismatch").into());
        }
        Ok(())
    }

    fn read_entry(&self, key: &str) -> StorageResult<Option<Vec<u8>>> {
        validate_key(key)?;
        let mut file = match File::open(self.paths.state_entry(key)) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let mut data = Vec::new();
        file.read_to_end(&mut data)?;
        Ok(Some(data))
    }

    fn write_entry(&self, key: &str, value: &[u8]) -> StorageResult<()> {
        validate_key(key)?;
        let path = self.paths.state_entry(key);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let temp_path = path.with_extension("tmp");
        {
            let mut file = File::create(&temp_path)?;
            file.write_all(value)?;
            file.sync_all()?;
        }
        fs::rename(&temp_path, &path)?;
        Ok(())
    }

    fn remove_entry(&self, key: &str) -> StorageResult<bool> {
        validate_key(key)?;
        match fs::remove_file(self.paths.state_entry(key)) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl KeyValueStore for FileStore {
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
