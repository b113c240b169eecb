// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use marketplace_checkout::backend::{BackendError, CheckoutSessionApi, ConfirmationClient};
use marketplace_checkout::config::EngineSettings;
use marketplace_checkout::interceptor::CheckoutSurface;
use marketplace_checkout::models::{
    CheckoutRequest, CheckoutSession, ConfirmRequest, ConfirmResponse,
};
use marketplace_checkout::storage::{KeyValueStore, MemoryStore, PendingPaymentStore};
use marketplace_checkout::{EntityId, ReconciliationEngine, RemotePaymentStatus};
use tokio::sync::Notify;

pub const SCHEME: &str = "marketplace";

/// What the fake backend does with a confirm call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfirmBehavior {
    /// Marks the entity paid and reports success.
    Pays,
    /// Leaves the entity as is and reports failure.
    Declines,
    /// Never reaches the backend.
    TransportError,
}

#[derive(Default)]
struct Ledger {
    statuses: HashMap<EntityId, RemotePaymentStatus>,
    /// Responses already given, keyed by external reference.
    confirmations: HashMap<String, ConfirmResponse>,
    failing_status_queries: usize,
}

/// In-process backend with an idempotent confirmation ledger.
pub struct FakeBackend {
    ledger: Mutex<Ledger>,
    confirm_behavior: Mutex<ConfirmBehavior>,
    hold_status: AtomicBool,
    release: Notify,
    pub status_calls: AtomicUsize,
    pub confirm_calls: AtomicUsize,
    pub session_calls: AtomicUsize,
    pub confirm_keys: Mutex<Vec<Option<String>>>,
}

impl FakeBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            ledger: Mutex::new(Ledger::default()),
            confirm_behavior: Mutex::new(ConfirmBehavior::Pays),
            hold_status: AtomicBool::new(false),
            release: Notify::new(),
            status_calls: AtomicUsize::new(0),
            confirm_calls: AtomicUsize::new(0),
            session_calls: AtomicUsize::new(0),
            confirm_keys: Mutex::new(Vec::new()),
        })
    }

    pub fn set_status(&self, entity_id: impl Into<EntityId>, status: RemotePaymentStatus) {
        self.ledger
            .lock()
            .unwrap()
            .statuses
            .insert(entity_id.into(), status);
    }

    pub fn status_of(&self, entity_id: impl Into<EntityId>) -> RemotePaymentStatus {
        self.ledger
            .lock()
            .unwrap()
            .statuses
            .get(&entity_id.into())
            .copied()
            .unwrap_or(RemotePaymentStatus::Unpaid)
    }

    pub fn set_confirm_behavior(&self, behavior: ConfirmBehavior) {
        *self.confirm_behavior.lock().unwrap() = behavior;
    }

    pub fn fail_next_status_queries(&self, count: usize) {
        self.ledger.lock().unwrap().failing_status_queries = count;
    }

    /// Make status queries wait until [`FakeBackend::release_status`].
    pub fn hold_status_queries(&self) {
        self.hold_status.store(true, Ordering::SeqCst);
    }

    pub fn release_status(&self) {
        self.hold_status.store(false, Ordering::SeqCst);
        self.release.notify_one();
    }

    pub fn confirms(&self) -> usize {
        self.confirm_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CheckoutSessionApi for FakeBackend {
    async fn create_checkout_session(
        &self,
        request: &CheckoutRequest,
    ) -> Result<CheckoutSession, BackendError> {
        self.session_calls.fetch_add(1, Ordering::SeqCst);
        Ok(CheckoutSession {
            checkout_url: format!("https://pay.example/checkout/{}", request.entity_id),
            external_reference: format!("oferta_{}_{}", request.entity_id, request.payment_kind),
        })
    }
}

#[async_trait]
impl ConfirmationClient for FakeBackend {
    async fn query_remote_status(
        &self,
        entity_id: &EntityId,
    ) -> Result<RemotePaymentStatus, BackendError> {
        self.status_calls.fetch_add(1, Ordering::SeqCst);
        if self.hold_status.load(Ordering::SeqCst) {
            self.release.notified().await;
        }

        let mut ledger = self.ledger.lock().unwrap();
        if ledger.failing_status_queries > 0 {
            ledger.failing_status_queries -= 1;
            return Err(BackendError::Request("status query timed out".to_string()));
        }
        Ok(ledger
            .statuses
            .get(entity_id)
            .copied()
            .unwrap_or(RemotePaymentStatus::Unpaid))
    }

    async fn confirm_payment(
        &self,
        request: &ConfirmRequest,
    ) -> Result<ConfirmResponse, BackendError> {
        self.confirm_calls.fetch_add(1, Ordering::SeqCst);
        self.confirm_keys
            .lock()
            .unwrap()
            .push(request.external_reference.clone());

        let behavior = *self.confirm_behavior.lock().unwrap();
        if behavior == ConfirmBehavior::TransportError {
            return Err(BackendError::Request("connection reset".to_string()));
        }

        let mut ledger = self.ledger.lock().unwrap();
        if let Some(key) = &request.external_reference {
            if let Some(previous) = ledger.confirmations.get(key) {
                return Ok(previous.clone());
            }
        }

        let response = match behavior {
            ConfirmBehavior::Pays => {
                ledger
                    .statuses
                    .insert(request.entity_id.clone(), RemotePaymentStatus::Paid);
                ConfirmResponse {
                    success: true,
                    message: Some("payment applied".to_string()),
                    updated_remote_status: RemotePaymentStatus::Paid,
                }
            }
            _ => ConfirmResponse {
                success: false,
                message: Some("payment not found".to_string()),
                updated_remote_status: ledger
                    .statuses
                    .get(&request.entity_id)
                    .copied()
                    .unwrap_or(RemotePaymentStatus::Unpaid),
            },
        };

        // Only successful confirmations are final for a reference.
        if response.success {
            if let Some(key) = &request.external_reference {
                ledger.confirmations.insert(key.clone(), response.clone());
            }
        }
        Ok(response)
    }
}

/// Checkout surface that records what the engine asked of it.
#[derive(Default)]
pub struct RecordingSurface {
    pub opened: Mutex<Vec<String>>,
    pub closes: AtomicUsize,
}

impl RecordingSurface {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

impl CheckoutSurface for RecordingSurface {
    fn open(&self, checkout_url: &str) {
        self.opened.lock().unwrap().push(checkout_url.to_string());
    }

    fn close(&self) {
        self.closes.fetch_add(1, Ordering::SeqCst);
    }
}

pub struct Harness {
    pub backend: Arc<FakeBackend>,
    pub surface: Arc<RecordingSurface>,
    pub store: PendingPaymentStore,
}

impl Harness {
    pub fn in_memory() -> Self {
        Self::with_store(Arc::new(MemoryStore::new()))
    }

    pub fn with_store(store: Arc<dyn KeyValueStore>) -> Self {
        Self {
            backend: FakeBackend::new(),
            surface: RecordingSurface::new(),
            store: PendingPaymentStore::new(store),
        }
    }

    pub fn engine(&self) -> ReconciliationEngine {
        ReconciliationEngine::new(
            self.backend.clone(),
            self.backend.clone(),
            self.store.clone(),
            self.surface.clone(),
            EngineSettings::default(),
        )
    }
}

pub fn redirect_uri(status: &str, entity: u64) -> String {
    format!(
        "{SCHEME}://payment/{status}?status={status}&payment_id=999&external_reference=oferta_{entity}_total"
    )
}
