// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Reconciliation Engine
//!
//! Drives the pure [`FlowMachine`] against the real collaborators: the
//! checkout-session API, the confirmation client, the pending-payment store
//! and the checkout surface.
//!
//! ## Usage
//!
//! The engine can be called directly (`start`, `on_redirect_captured`, ...)
//! or spawned as a task that owns it and consumes [`EngineEvent`]s from a
//! bounded channel:
//!
//! ```rust,ignore
//! let (handle, task) = engine.spawn(shutdown.clone());
//! let session = handle.start(EntityId::from(42), PaymentKind::Total).await?;
//! ```
//!
//! Events are processed one at a time, so a reconciliation never interleaves
//! with another. Triggers that arrive mid-verification are coalesced by the
//! machine into a follow-up.
//!
//! An attached [`RedirectInterceptor`] is re-armed by every `start`, before
//! the checkout surface opens. It holds a sender of the event channel, so
//! build the channel first and hand it to [`ReconciliationEngine::spawn_on`]:
//!
//! ```rust,ignore
//! let (events, receiver) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
//! let interceptor = Arc::new(RedirectInterceptor::new("marketplace", events.clone()));
//! let engine = engine.with_interceptor(interceptor.clone());
//! let (handle, task) = engine.spawn_on((events, receiver), shutdown.clone());
//! ```
//!
//! ## Shutdown
//!
//! The run loop exits when its `CancellationToken` is cancelled or every
//! sender of the event channel is dropped. An attached interceptor keeps a
//! sender alive, so such engines stop only through the token.

pub mod machine;

use std::collections::VecDeque;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::backend::{CheckoutSessionApi, ConfirmationClient};
use crate::config::EngineSettings;
use crate::deeplink::DeepLinkParser;
use crate::error::{ReconcileError, ReconcileResult};
use crate::interceptor::{CaptureSource, CheckoutSurface, RedirectInterceptor};
use crate::models::{
    CheckoutRequest, CheckoutSession, EntityId, FlowOutcome, PaymentKind, PendingPaymentRecord,
    RedirectParameters, RemotePaymentStatus, ReturnUrls,
};
use crate::storage::PendingPaymentStore;

pub use machine::{Effect, FlowEvent, FlowMachine, FlowPhase, FlowState};

/// Capacity of the engine's event channel.
pub const EVENT_CHANNEL_CAPACITY: usize = 32;

/// Input to a spawned engine.
#[derive(Debug)]
pub enum EngineEvent {
    Start {
        entity_id: EntityId,
        payment_kind: PaymentKind,
        reply: oneshot::Sender<ReconcileResult<CheckoutSession>>,
    },
    Recover {
        reply: oneshot::Sender<ReconcileResult<Option<FlowOutcome>>>,
    },
    RedirectCaptured {
        uri: String,
        source: CaptureSource,
    },
    AppResumed,
    UserCancelled,
}

pub struct ReconciliationEngine {
    sessions: Arc<dyn CheckoutSessionApi>,
    client: Arc<dyn ConfirmationClient>,
    store: PendingPaymentStore,
    surface: Arc<dyn CheckoutSurface>,
    interceptor: Option<Arc<RedirectInterceptor>>,
    settings: EngineSettings,
    machine: FlowMachine,
    phase: watch::Sender<FlowPhase>,
    outcome_sink: Option<mpsc::Sender<FlowOutcome>>,
    recheck_at: Option<Instant>,
}

impl ReconciliationEngine {
    pub fn new(
        sessions: Arc<dyn CheckoutSessionApi>,
        client: Arc<dyn ConfirmationClient>,
        store: PendingPaymentStore,
        surface: Arc<dyn CheckoutSurface>,
        settings: EngineSettings,
    ) -> Self {
        let (phase, _) = watch::channel(FlowPhase::Idle);
        Self {
            sessions,
            client,
            store,
            surface,
            interceptor: None,
            machine: FlowMachine::new(settings.max_verify_attempts),
            settings,
            phase,
            outcome_sink: None,
            recheck_at: None,
        }
    }

    /// Publish every emitted outcome on `sink` as well as returning it.
    pub fn with_outcome_sink(mut self, sink: mpsc::Sender<FlowOutcome>) -> Self {
        self.outcome_sink = Some(sink);
        self
    }

    /// Re-arm `interceptor` whenever a new checkout is opened.
    pub fn with_interceptor(mut self, interceptor: Arc<RedirectInterceptor>) -> Self {
        self.interceptor = Some(interceptor);
        self
    }

    pub fn phase(&self) -> FlowPhase {
        self.machine.phase()
    }

    pub fn subscribe_phase(&self) -> watch::Receiver<FlowPhase> {
        self.phase.subscribe()
    }

    pub fn active_record(&self) -> Option<&PendingPaymentRecord> {
        self.machine.active_record()
    }

    /// Deadline of the armed pending re-check, if any.
    pub fn recheck_deadline(&self) -> Option<Instant> {
        self.recheck_at
    }

    /// Begin a payment flow for `entity_id`.
    ///
    /// Snapshots the remote status as the flow's baseline, creates the
    /// checkout session, persists the pending record and opens the checkout
    /// surface. Nothing is persisted if any backend call fails.
    pub async fn start(
        &mut self,
        entity_id: EntityId,
        payment_kind: PaymentKind,
    ) -> ReconcileResult<CheckoutSession> {
        if let (FlowPhase::VerifyingRemote, Some(active)) = (self.phase(), self.active_record()) {
            return Err(ReconcileError::FlowInProgress(active.entity_id.to_string()));
        }

        let initial = self.client.query_remote_status(&entity_id).await?;
        if initial == RemotePaymentStatus::Unknown {
            return Err(ReconcileError::Network(format!(
                "remote status of entity {entity_id} is unknown; cannot establish a baseline"
            )));
        }

        let request = CheckoutRequest {
            entity_id: entity_id.clone(),
            payment_kind,
            return_urls: ReturnUrls::for_scheme(&self.settings.return_scheme),
        };
        let session = self.sessions.create_checkout_session(&request).await?;

        let record = PendingPaymentRecord::new(
            entity_id.clone(),
            payment_kind,
            session.external_reference.clone(),
            initial,
        );
        self.recheck_at = None;
        self.dispatch(FlowEvent::Started(record)).await?;

        info!(
            entity_id = %entity_id,
            payment_kind = %payment_kind,
            initial_remote_status = %initial,
            external_reference = %session.external_reference,
            "Payment flow started"
        );
        if let Some(interceptor) = &self.interceptor {
            interceptor.reset_for_flow();
        }
        self.surface.open(&session.checkout_url);
        Ok(session)
    }

    /// Feed a captured app-scheme URI into the flow.
    pub async fn on_redirect_captured(&mut self, raw_uri: &str) -> ReconcileResult<Vec<FlowOutcome>> {
        let parsed = DeepLinkParser::inspect(raw_uri);
        let params = if parsed.malformed {
            // Nothing from a malformed redirect is trusted; the backend decides.
            warn!(uri = %raw_uri, "Malformed redirect, falling back to a status query");
            RedirectParameters::default()
        } else {
            parsed.params
        };
        if params.is_empty() {
            debug!(uri = %raw_uri, "Redirect carried no recognizable parameters");
        }
        self.dispatch(FlowEvent::RedirectCaptured(params)).await
    }

    pub async fn on_app_resumed(&mut self) -> ReconcileResult<Vec<FlowOutcome>> {
        self.dispatch(FlowEvent::AppResumed).await
    }

    /// Checkout surface closed without any redirect.
    pub async fn on_user_cancelled(&mut self) -> ReconcileResult<Vec<FlowOutcome>> {
        self.dispatch(FlowEvent::UserCancelled).await
    }

    pub async fn on_recheck_due(&mut self) -> ReconcileResult<Vec<FlowOutcome>> {
        self.recheck_at = None;
        self.dispatch(FlowEvent::RecheckDue).await
    }

    /// Resume a flow left behind by a previous process.
    ///
    /// Goes straight to a remote check since the redirect may have been lost
    /// with the process. Returns `None` when there is nothing to recover.
    pub async fn recover(&mut self) -> ReconcileResult<Option<FlowOutcome>> {
        let Some(record) = self.store.load().await? else {
            debug!("No pending payment to recover");
            return Ok(None);
        };

        let stale = record.is_stale(Utc::now(), self.settings.pending_ttl);
        info!(
            entity_id = %record.entity_id,
            external_reference = %record.external_reference,
            created_at = %record.created_at,
            stale,
            "Recovering pending payment"
        );

        let outcomes = self
            .dispatch(FlowEvent::Recovered { record, stale })
            .await?;
        Ok(outcomes.into_iter().last())
    }

    /// Run one event through the machine and execute the resulting effects,
    /// including the follow-on events produced by backend calls.
    async fn dispatch(&mut self, event: FlowEvent) -> ReconcileResult<Vec<FlowOutcome>> {
        let mut outcomes = Vec::new();
        let mut pending: VecDeque<Effect> = self.machine.handle(event)?.into();
        self.publish_phase();

        while let Some(effect) = pending.pop_front() {
            match effect {
                Effect::Persist(record) => {
                    if let Err(e) = self.store.save(&record).await {
                        warn!(entity_id = %record.entity_id, error = %e, "Failed to persist pending payment");
                        self.machine.abandon();
                        self.publish_phase();
                        return Err(e.into());
                    }
                }
                Effect::DeleteRecord => {
                    if let Err(e) = self.store.clear().await {
                        warn!(error = %e, "Failed to delete pending payment record");
                    }
                }
                Effect::QueryRemote(entity_id) => {
                    let result = self
                        .client
                        .query_remote_status(&entity_id)
                        .await
                        .map_err(|e| {
                            warn!(entity_id = %entity_id, error = %e, "Remote status query failed");
                            e.to_string()
                        });
                    if let Ok(status) = &result {
                        debug!(entity_id = %entity_id, remote_status = %status, "Remote status");
                    }
                    pending.extend(self.machine.handle(FlowEvent::RemoteStatus(result))?);
                }
                Effect::Confirm(request) => {
                    let result = self.client.confirm_payment(&request).await.map_err(|e| {
                        warn!(
                            entity_id = %request.entity_id,
                            error = %e,
                            "Confirm call inconclusive; falling back to status query"
                        );
                        e.to_string()
                    });
                    if let Ok(response) = &result {
                        debug!(
                            entity_id = %request.entity_id,
                            success = response.success,
                            updated_remote_status = %response.updated_remote_status,
                            message = ?response.message,
                            "Confirm response"
                        );
                    }
                    pending.extend(self.machine.handle(FlowEvent::ConfirmFinished(result))?);
                }
                Effect::ScheduleRecheck => {
                    let delay = self.settings.pending_recheck_delay;
                    debug!(delay_ms = delay.as_millis() as u64, "Scheduling pending re-check");
                    self.recheck_at = Instant::now().checked_add(delay);
                    if self.recheck_at.is_none() {
                        warn!(delay_ms = delay.as_millis() as u64, "Re-check delay out of range, not scheduled");
                    }
                }
                Effect::Emit(outcome) => {
                    self.emit(&outcome);
                    outcomes.push(outcome);
                }
            }
            self.publish_phase();
        }

        if matches!(self.phase(), FlowPhase::Idle | FlowPhase::Terminal) {
            self.recheck_at = None;
        }
        Ok(outcomes)
    }

    fn emit(&self, flow: &FlowOutcome) {
        info!(
            entity_id = %flow.entity_id,
            outcome = ?flow.outcome,
            terminal = flow.outcome.is_terminal(),
            "Reconciliation outcome"
        );
        self.surface.close();

        if let Some(sink) = &self.outcome_sink {
            if let Err(e) = sink.try_send(flow.clone()) {
                warn!(entity_id = %flow.entity_id, error = %e, "Dropping outcome notification");
            }
        }
    }

    fn publish_phase(&self) {
        self.phase.send_if_modified(|current| {
            let next = self.machine.phase();
            if *current == next {
                false
            } else {
                *current = next;
                true
            }
        });
    }

    /// Spawn the run loop on the current runtime.
    pub fn spawn(self, shutdown: CancellationToken) -> (EngineHandle, JoinHandle<()>) {
        self.spawn_on(mpsc::channel(EVENT_CHANNEL_CAPACITY), shutdown)
    }

    /// Like [`ReconciliationEngine::spawn`], on a channel the caller created.
    pub fn spawn_on(
        self,
        (events, receiver): (mpsc::Sender<EngineEvent>, mpsc::Receiver<EngineEvent>),
        shutdown: CancellationToken,
    ) -> (EngineHandle, JoinHandle<()>) {
        let handle = EngineHandle {
            events,
            phase: self.subscribe_phase(),
        };
        let task = tokio::spawn(self.run(receiver, shutdown));
        (handle, task)
    }

    /// Consume events until shutdown or until every sender is gone.
    pub async fn run(mut self, mut events: mpsc::Receiver<EngineEvent>, shutdown: CancellationToken) {
        info!(
            return_scheme = %self.settings.return_scheme,
            "Reconciliation engine starting"
        );

        loop {
            let recheck_at = self.recheck_at;
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Reconciliation engine shutting down");
                    return;
                }
                _ = wait_until(recheck_at) => {
                    let result = self.on_recheck_due().await;
                    log_rejection("pending_recheck", result);
                }
                event = events.recv() => {
                    let Some(event) = event else {
                        info!("Reconciliation engine event channel closed");
                        return;
                    };
                    self.handle_event(event).await;
                }
            }
        }
    }

    async fn handle_event(&mut self, event: EngineEvent) {
        match event {
            EngineEvent::Start {
                entity_id,
                payment_kind,
                reply,
            } => {
                let result = self.start(entity_id, payment_kind).await;
                if let Err(e) = &result {
                    warn!(error = %e, "Failed to start payment flow");
                }
                let _ = reply.send(result);
            }
            EngineEvent::Recover { reply } => {
                let result = self.recover().await;
                if let Err(e) = &result {
                    warn!(error = %e, "Recovery pass failed");
                }
                let _ = reply.send(result);
            }
            EngineEvent::RedirectCaptured { uri, source } => {
                debug!(source = ?source, "Redirect captured");
                let result = self.on_redirect_captured(&uri).await;
                log_rejection("redirect", result);
            }
            EngineEvent::AppResumed => {
                let result = self.on_app_resumed().await;
                log_rejection("app_resumed", result);
            }
            EngineEvent::UserCancelled => {
                let result = self.on_user_cancelled().await;
                log_rejection("user_cancelled", result);
            }
        }
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

fn log_rejection(trigger: &str, result: ReconcileResult<Vec<FlowOutcome>>) {
    match result {
        Ok(_) => {}
        Err(ReconcileError::AlreadyResolved(entity)) => {
            debug!(trigger, entity_id = %entity, "Ignoring event without an active flow");
        }
        Err(e) => warn!(trigger, error = %e, "Event handling failed"),
    }
}

/// Clonable front door to a spawned engine.
#[derive(Clone)]
pub struct EngineHandle {
    events: mpsc::Sender<EngineEvent>,
    phase: watch::Receiver<FlowPhase>,
}

impl EngineHandle {
    pub async fn start(
        &self,
        entity_id: EntityId,
        payment_kind: PaymentKind,
    ) -> ReconcileResult<CheckoutSession> {
        let (reply, response) = oneshot::channel();
        self.send(EngineEvent::Start {
            entity_id,
            payment_kind,
            reply,
        })
        .await?;
        response.await.map_err(|_| ReconcileError::EngineStopped)?
    }

    pub async fn recover(&self) -> ReconcileResult<Option<FlowOutcome>> {
        let (reply, response) = oneshot::channel();
        self.send(EngineEvent::Recover { reply }).await?;
        response.await.map_err(|_| ReconcileError::EngineStopped)?
    }

    pub async fn app_resumed(&self) -> ReconcileResult<()> {
        self.send(EngineEvent::AppResumed).await
    }

    pub async fn user_cancelled(&self) -> ReconcileResult<()> {
        self.send(EngineEvent::UserCancelled).await
    }

    pub async fn send(&self, event: EngineEvent) -> ReconcileResult<()> {
        self.events
            .send(event)
            .await
            .map_err(|_| ReconcileError::EngineStopped)
    }

    /// Raw sender, for components that push events themselves.
    pub fn sender(&self) -> mpsc::Sender<EngineEvent> {
        self.events.clone()
    }

    pub fn phase(&self) -> FlowPhase {
        *self.phase.borrow()
    }

    pub fn subscribe_phase(&self) -> watch::Receiver<FlowPhase> {
        self.phase.clone()
    }
}
