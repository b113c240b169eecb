// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Error taxonomy at the reconciliation boundary.
//!
//! Once a flow is running, none of these reach the UI: the engine folds
//! every failure into a [`ReconciliationOutcome`](crate::models::ReconciliationOutcome).
//! Only `start` and `recover` hand an error back, because they can fail
//! before anything has been persisted.

use crate::backend::BackendError;
use crate::storage::StorageError;

#[derive(Debug, thiserror::Error)]
pub enum ReconcileError {
    /// Malformed redirect or identifier. Never trusted at face value.
    #[error("parse error: {0}")]
    Parse(String),

    /// Transient transport failure talking to the backend.
    #[error("network error: {0}")]
    Network(String),

    /// Event arrived for an entity with no active record.
    #[error("no active payment flow for entity {0}")]
    AlreadyResolved(String),

    /// Another reconciliation is still running.
    #[error("a reconciliation for entity {0} is already in flight")]
    FlowInProgress(String),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// The engine run loop has exited and can no longer accept events.
    #[error("reconciliation engine stopped")]
    EngineStopped,
}

impl From<BackendError> for ReconcileError {
    fn from(error: BackendError) -> Self {
        match error {
            BackendError::InvalidResponse(message) => ReconcileError::Parse(message),
            other => ReconcileError::Network(other.to_string()),
        }
    }
}

pub type ReconcileResult<T> = Result<T, ReconcileError>;
