// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Single-slot persistence of the in-flight payment.
//!
//! There is only ever one record, stored as JSON under [`PENDING_PAYMENT_KEY`].
//! Starting a new flow fully overwrites it; resolving a flow deletes it. The
//! delete is the durable boundary: once it succeeds, no recovery pass can pick
//! the flow up again.

use std::sync::Arc;

use tracing::{debug, warn};

use super::{KeyValueStore, StorageResult};
use crate::models::PendingPaymentRecord;

/// Well-known key of the pending payment record.
pub const PENDING_PAYMENT_KEY: &str = "pending_payment";

#[derive(Clone)]
pub struct PendingPaymentStore {
    inner: Arc<dyn KeyValueStore>,
}

impl PendingPaymentStore {
    pub fn new(inner: Arc<dyn KeyValueStore>) -> Self {
        Self { inner }
    }

    /// Overwrite the slot with `record`.
    pub async fn save(&self, record: &PendingPaymentRecord) -> StorageResult<()> {
        let bytes = serde_json::to_vec_pretty(record)?;
        self.inner.put(PENDING_PAYMENT_KEY, &bytes).await?;
        debug!(
            entity_id = %record.entity_id,
            external_reference = %record.external_reference,
            "Persisted pending payment"
        );
        Ok(())
    }

    /// Read the slot. A record that no longer deserializes is removed and
    /// reported as absent.
    pub async fn load(&self) -> StorageResult<Option<PendingPaymentRecord>> {
        let Some(bytes) = self.inner.get(PENDING_PAYMENT_KEY).await? else {
            return Ok(None);
        };

        match serde_json::from_slice::<PendingPaymentRecord>(&bytes) {
            Ok(record) => Ok(Some(record)),
            Err(e) => {
                warn!(error = %e, "Discarding corrupt pending payment record");
                self.inner.remove(PENDING_PAYMENT_KEY).await?;
                Ok(None)
            }
        }
    }

    /// Delete the slot; returns whether a record existed.
    pub async fn clear(&self) -> StorageResult<bool> {
        let existed = self.inner.remove(PENDING_PAYMENT_KEY).await?;
        if existed {
            debug!("Cleared pending payment");
        }
        Ok(existed)
    }
}
