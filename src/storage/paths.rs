// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Path utilities for the on-disk storage layout.

use std::path::{Path, PathBuf};

use crate::config::DEFAULT_DATA_DIR;

/// Storage path utilities rooted at the configured data directory.
#[derive(Debug, Clone)]
pub struct StoragePaths {
    root: PathBuf,
}

impl Default for StoragePaths {
    fn default() -> Self {
        Self::new(DEFAULT_DATA_DIR)
    }
}

impl StoragePaths {
    /// Create a new StoragePaths with a custom root (useful for testing).
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding one JSON file per key.
    pub fn state_dir(&self) -> PathBuf {
        self.root.join("state")
    }

    /// Path to the file backing `key`.
    pub fn state_entry(&self, key: &str) -> PathBuf {
        self.state_dir().join(format!("{key}.json"))
    }

    /// Path to the embedded redb database.
    pub fn redb_file(&self) -> PathBuf {
        self.root.join("orchestrator.redb")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_paths_use_data_dir() {
        let paths = StoragePaths::default();
        assert_eq!(paths.root(), Path::new("./data"));
    }

    #[test]
    fn state_paths_are_correct() {
        let paths = StoragePaths::new("/tmp/test-data");
        assert_eq!(paths.state_dir(), PathBuf::from("/tmp/test-data/state"));
        assert_eq!(
            paths.state_entry("pending_payment"),
            PathBuf::from("/tmp/test-data/state/pending_payment.json")
        );
        assert_eq!(
            paths.redb_file(),
            PathBuf::from("/tmp/test-data/orchestrator.redb")
        );
    }
}
