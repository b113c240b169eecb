// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Flow Transition Function
//!
//! Pure `(state, event) -> effects` core of the reconciliation engine. It
//! performs no I/O: the driver feeds it events (including the results of the
//! backend calls it asked for) and executes the [`Effect`]s it returns.
//!
//! ## States
//!
//! ```text
//! Idle ──start──▶ AwaitingRedirect ──trigger──▶ VerifyingRemote ──▶ Terminal
//!                        ▲                             │
//!                        └──── StillPending / Error ───┘
//! ```
//!
//! ## Rules
//!
//! - `Confirmed` requires the backend to report `paid` after a flow that
//!   started `unpaid`. A flow that started `paid` resolves as
//!   `AlreadyPaidPriorToFlow` on every path that finds it paid.
//! - A confirm call is only issued for a redirect whose status is in the
//!   approved or unknown family. Resume, cancel and recovery only query.
//! - Triggers that arrive while a verification is running are coalesced into
//!   one follow-up (redirect > cancel > resume > recheck), re-applied once
//!   the verification settles and dropped if it resolved the flow.

use tracing::{debug, warn};

use crate::deeplink::StatusFamily;
use crate::error::{ReconcileError, ReconcileResult};
use crate::models::{
    ConfirmRequest, ConfirmResponse, EntityId, ExternalReference, FlowOutcome,
    PendingPaymentRecord, ReconciliationOutcome, RedirectParameters, RemotePaymentStatus,
};

/// Coarse phase published to observers (resume watcher, UI).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowPhase {
    Idle,
    AwaitingRedirect,
    VerifyingRemote,
    Terminal,
}

/// Why a plain status query is running.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckKind {
    Resume,
    UserCancel,
    PendingRecheck,
    /// Leftover record found after a restart.
    Recovery { stale: bool },
    /// Redirect with no recognizable parameters.
    UnparsedRedirect,
    /// Approving redirect on a flow that started `paid`; the remote state
    /// decides whether a confirm is still warranted.
    PriorPaidRedirect { request: ConfirmRequest },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verification {
    Confirming {
        request: ConfirmRequest,
        attempt: u32,
    },
    /// Status query after a confirm that failed (`failure` set) or came back
    /// without agreeing the entity is paid.
    AfterConfirm {
        request: ConfirmRequest,
        attempt: u32,
        failure: Option<String>,
    },
    Check(CheckKind),
}

/// Trigger that can start a verification from `AwaitingRedirect`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Trigger {
    Redirect(RedirectParameters),
    Cancel,
    Resume,
    Recheck,
}

impl Trigger {
    fn priority(&self) -> u8 {
        match self {
            Trigger::Redirect(_) => 3,
            Trigger::Cancel => 2,
            Trigger::Resume => 1,
            Trigger::Recheck => 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlowState {
    Idle,
    AwaitingRedirect {
        record: PendingPaymentRecord,
    },
    VerifyingRemote {
        record: PendingPaymentRecord,
        step: Verification,
        follow_up: Option<Trigger>,
    },
    Terminal {
        entity_id: EntityId,
        outcome: ReconciliationOutcome,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlowEvent {
    Started(PendingPaymentRecord),
    Recovered {
        record: PendingPaymentRecord,
        stale: bool,
    },
    RedirectCaptured(RedirectParameters),
    AppResumed,
    UserCancelled,
    RecheckDue,
    RemoteStatus(Result<RemotePaymentStatus, String>),
    ConfirmFinished(Result<ConfirmResponse, String>),
}

/// Work the driver must perform, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    Persist(PendingPaymentRecord),
    DeleteRecord,
    QueryRemote(EntityId),
    Confirm(ConfirmRequest),
    ScheduleRecheck,
    Emit(FlowOutcome),
}

#[derive(Debug)]
pub struct FlowMachine {
    state: FlowState,
    max_verify_attempts: u32,
    recheck_used: bool,
}

impl FlowMachine {
    pub fn new(max_verify_attempts: u32) -> Self {
        Self {
            state: FlowState::Idle,
            max_verify_attempts: max_verify_attempts.max(1),
            recheck_used: false,
        }
    }

    pub fn state(&self) -> &FlowState {
        &self.state
    }

    pub fn phase(&self) -> FlowPhase {
        phase_of(&self.state)
    }

    pub fn active_record(&self) -> Option<&PendingPaymentRecord> {
        match &self.state {
            FlowState::AwaitingRedirect { record }
            | FlowState::VerifyingRemote { record, .. } => Some(record),
            FlowState::Idle | FlowState::Terminal { .. } => None,
        }
    }

    /// Drop the active flow without an outcome (the record never made it to
    /// storage).
    pub fn abandon(&mut self) {
        self.state = FlowState::Idle;
    }

    pub fn handle(&mut self, event: FlowEvent) -> ReconcileResult<Vec<Effect>> {
        match event {
            FlowEvent::Started(record) => self.on_started(record),
            FlowEvent::Recovered { record, stale } => self.on_recovered(record, stale),
            FlowEvent::RedirectCaptured(params) => self.on_trigger(Trigger::Redirect(params)),
            FlowEvent::AppResumed => self.on_trigger(Trigger::Resume),
            FlowEvent::UserCancelled => self.on_trigger(Trigger::Cancel),
            FlowEvent::RecheckDue => self.on_trigger(Trigger::Recheck),
            FlowEvent::RemoteStatus(result) => Ok(self.on_remote_status(result)),
            FlowEvent::ConfirmFinished(result) => Ok(self.on_confirm_finished(result)),
        }
    }

    fn ensure_not_verifying(&self) -> ReconcileResult<()> {
        match &self.state {
            FlowState::VerifyingRemote { record, .. } => {
                Err(ReconcileError::FlowInProgress(record.entity_id.to_string()))
            }
            _ => Ok(()),
        }
    }

    fn on_started(&mut self, record: PendingPaymentRecord) -> ReconcileResult<Vec<Effect>> {
        self.ensure_not_verifying()?;
        if let Some(previous) = self.active_record() {
            debug!(
                previous = %previous.entity_id,
                entity_id = %record.entity_id,
                "Replacing pending flow"
            );
        }
        self.recheck_used = false;
        self.state = FlowState::AwaitingRedirect {
            record: record.clone(),
        };
        Ok(vec![Effect::Persist(record)])
    }

    fn on_recovered(
        &mut self,
        record: PendingPaymentRecord,
        stale: bool,
    ) -> ReconcileResult<Vec<Effect>> {
        self.ensure_not_verifying()?;
        self.recheck_used = false;
        Ok(self.advance(
            record,
            Verification::Check(CheckKind::Recovery { stale }),
            None,
        ))
    }

    fn on_trigger(&mut self, trigger: Trigger) -> ReconcileResult<Vec<Effect>> {
        if let (Some(record), Trigger::Redirect(params)) = (self.active_record(), &trigger) {
            if let Some(foreign) = foreign_entity(record, params) {
                return Err(ReconcileError::AlreadyResolved(foreign));
            }
        }

        match std::mem::replace(&mut self.state, FlowState::Idle) {
            FlowState::AwaitingRedirect { record } => Ok(self.begin(record, trigger)),
            FlowState::VerifyingRemote {
                record,
                step,
                mut follow_up,
            } => {
                coalesce(&mut follow_up, trigger);
                self.state = FlowState::VerifyingRemote {
                    record,
                    step,
                    follow_up,
                };
                Ok(Vec::new())
            }
            FlowState::Terminal { entity_id, outcome } => {
                let err = ReconcileError::AlreadyResolved(entity_id.to_string());
                self.state = FlowState::Terminal { entity_id, outcome };
                Err(err)
            }
            FlowState::Idle => Err(ReconcileError::AlreadyResolved("none".to_string())),
        }
    }

    fn begin(&mut self, record: PendingPaymentRecord, trigger: Trigger) -> Vec<Effect> {
        match trigger {
            Trigger::Resume => self.advance(record, Verification::Check(CheckKind::Resume), None),
            Trigger::Cancel => {
                self.advance(record, Verification::Check(CheckKind::UserCancel), None)
            }
            Trigger::Recheck => {
                self.advance(record, Verification::Check(CheckKind::PendingRecheck), None)
            }
            Trigger::Redirect(params) => self.begin_redirect(record, params),
        }
    }

    fn begin_redirect(
        &mut self,
        record: PendingPaymentRecord,
        params: RedirectParameters,
    ) -> Vec<Effect> {
        if params.is_empty() {
            return self.advance(record, Verification::Check(CheckKind::UnparsedRedirect), None);
        }

        match StatusFamily::classify(params.status.as_deref()) {
            StatusFamily::Rejected => {
                self.resolve(record, ReconciliationOutcome::UserCancelledOrFailed)
            }
            StatusFamily::Pending => {
                let mut effects =
                    self.settle(record, Some(ReconciliationOutcome::StillPending), None);
                self.arm_recheck(&mut effects);
                effects
            }
            StatusFamily::Approved | StatusFamily::Unknown => {
                let request = confirm_request(&record, params);
                if record.was_paid_before_flow() {
                    self.advance(
                        record,
                        Verification::Check(CheckKind::PriorPaidRedirect { request }),
                        None,
                    )
                } else {
                    self.advance(record, Verification::Confirming { request, attempt: 1 }, None)
                }
            }
        }
    }

    fn on_remote_status(&mut self, result: Result<RemotePaymentStatus, String>) -> Vec<Effect> {
        match std::mem::replace(&mut self.state, FlowState::Idle) {
            FlowState::VerifyingRemote {
                record,
                step: Verification::Check(kind),
                follow_up,
            } => self.after_check(record, kind, result, follow_up),
            FlowState::VerifyingRemote {
                record,
                step:
                    Verification::AfterConfirm {
                        request,
                        attempt,
                        failure,
                    },
                follow_up,
            } => self.after_fallback(record, request, attempt, failure, result, follow_up),
            other => {
                warn!(phase = ?phase_of(&other), "Ignoring status result outside a status check");
                self.state = other;
                Vec::new()
            }
        }
    }

    fn after_check(
        &mut self,
        record: PendingPaymentRecord,
        kind: CheckKind,
        result: Result<RemotePaymentStatus, String>,
        follow_up: Option<Trigger>,
    ) -> Vec<Effect> {
        if let Ok(RemotePaymentStatus::Paid) = result {
            let outcome = paid_outcome(&record);
            return self.resolve(record, outcome);
        }

        let unpaid = matches!(result, Ok(RemotePaymentStatus::Unpaid));
        match kind {
            CheckKind::Resume | CheckKind::PendingRecheck => self.settle(record, None, follow_up),
            CheckKind::UserCancel if unpaid => {
                self.resolve(record, ReconciliationOutcome::UserCancelledOrFailed)
            }
            CheckKind::Recovery { stale: true } if unpaid => {
                self.resolve(record, ReconciliationOutcome::UserCancelledOrFailed)
            }
            CheckKind::Recovery { .. } => {
                let mut effects =
                    self.settle(record, Some(ReconciliationOutcome::StillPending), follow_up);
                self.arm_recheck(&mut effects);
                effects
            }
            CheckKind::PriorPaidRedirect { request } if unpaid => {
                self.advance(record, Verification::Confirming { request, attempt: 1 }, follow_up)
            }
            CheckKind::UserCancel
            | CheckKind::UnparsedRedirect
            | CheckKind::PriorPaidRedirect { .. } => {
                self.settle(record, Some(ReconciliationOutcome::StillPending), follow_up)
            }
        }
    }

    fn after_fallback(
        &mut self,
        record: PendingPaymentRecord,
        request: ConfirmRequest,
        attempt: u32,
        failure: Option<String>,
        result: Result<RemotePaymentStatus, String>,
        follow_up: Option<Trigger>,
    ) -> Vec<Effect> {
        if let Ok(RemotePaymentStatus::Paid) = result {
            let outcome = paid_outcome(&record);
            return self.resolve(record, outcome);
        }

        match failure {
            Some(reason) => {
                self.settle(record, Some(ReconciliationOutcome::Error(reason)), follow_up)
            }
            None if attempt < self.max_verify_attempts => self.advance(
                record,
                Verification::Confirming {
                    request,
                    attempt: attempt + 1,
                },
                follow_up,
            ),
            None => {
                debug!(
                    entity_id = %record.entity_id,
                    attempts = attempt,
                    "Backend still disagrees after bounded retries"
                );
                let mut effects =
                    self.settle(record, Some(ReconciliationOutcome::StillPending), follow_up);
                self.arm_recheck(&mut effects);
                effects
            }
        }
    }

    fn on_confirm_finished(&mut self, result: Result<ConfirmResponse, String>) -> Vec<Effect> {
        match std::mem::replace(&mut self.state, FlowState::Idle) {
            FlowState::VerifyingRemote {
                record,
                step: Verification::Confirming { request, attempt },
                follow_up,
            } => match result {
                Ok(response) if response.success && response.updated_remote_status.is_paid() => {
                    let outcome = paid_outcome(&record);
                    self.resolve(record, outcome)
                }
                Ok(_) => self.advance(
                    record,
                    Verification::AfterConfirm {
                        request,
                        attempt,
                        failure: None,
                    },
                    follow_up,
                ),
                Err(reason) => self.advance(
                    record,
                    Verification::AfterConfirm {
                        request,
                        attempt,
                        failure: Some(reason),
                    },
                    follow_up,
                ),
            },
            other => {
                warn!(phase = ?phase_of(&other), "Ignoring confirm result outside a confirm step");
                self.state = other;
                Vec::new()
            }
        }
    }

    /// Enter (or stay in) `VerifyingRemote` with `step` and request its call.
    fn advance(
        &mut self,
        record: PendingPaymentRecord,
        step: Verification,
        follow_up: Option<Trigger>,
    ) -> Vec<Effect> {
        let effect = match &step {
            Verification::Confirming { request, .. } => Effect::Confirm(request.clone()),
            Verification::AfterConfirm { .. } | Verification::Check(_) => {
                Effect::QueryRemote(record.entity_id.clone())
            }
        };
        self.state = FlowState::VerifyingRemote {
            record,
            step,
            follow_up,
        };
        vec![effect]
    }

    /// Resolve the flow: delete the record, then publish the outcome.
    fn resolve(
        &mut self,
        record: PendingPaymentRecord,
        outcome: ReconciliationOutcome,
    ) -> Vec<Effect> {
        let entity_id = record.entity_id;
        self.state = FlowState::Terminal {
            entity_id: entity_id.clone(),
            outcome: outcome.clone(),
        };
        vec![
            Effect::DeleteRecord,
            Effect::Emit(FlowOutcome { entity_id, outcome }),
        ]
    }

    /// Return to `AwaitingRedirect`, keeping the record, then apply any
    /// coalesced follow-up.
    fn settle(
        &mut self,
        record: PendingPaymentRecord,
        outcome: Option<ReconciliationOutcome>,
        follow_up: Option<Trigger>,
    ) -> Vec<Effect> {
        let mut effects = Vec::new();
        if let Some(outcome) = outcome {
            effects.push(Effect::Emit(FlowOutcome {
                entity_id: record.entity_id.clone(),
                outcome,
            }));
        }
        match follow_up {
            Some(trigger) => effects.extend(self.begin(record, trigger)),
            None => self.state = FlowState::AwaitingRedirect { record },
        }
        effects
    }

    fn arm_recheck(&mut self, effects: &mut Vec<Effect>) {
        if !self.recheck_used && self.phase() != FlowPhase::Terminal {
            self.recheck_used = true;
            effects.push(Effect::ScheduleRecheck);
        }
    }
}

fn phase_of(state: &FlowState) -> FlowPhase {
    match state {
        FlowState::Idle => FlowPhase::Idle,
        FlowState::AwaitingRedirect { .. } => FlowPhase::AwaitingRedirect,
        FlowState::VerifyingRemote { .. } => FlowPhase::VerifyingRemote,
        FlowState::Terminal { .. } => FlowPhase::Terminal,
    }
}

fn coalesce(slot: &mut Option<Trigger>, incoming: Trigger) {
    match slot {
        Some(existing) if existing.priority() >= incoming.priority() => {}
        _ => *slot = Some(incoming),
    }
}

fn paid_outcome(record: &PendingPaymentRecord) -> ReconciliationOutcome {
    if record.was_paid_before_flow() {
        ReconciliationOutcome::AlreadyPaidPriorToFlow
    } else {
        ReconciliationOutcome::Confirmed
    }
}

fn confirm_request(record: &PendingPaymentRecord, params: RedirectParameters) -> ConfirmRequest {
    ConfirmRequest {
        entity_id: record.entity_id.clone(),
        payment_kind: record.payment_kind,
        payment_id: params.payment_id,
        status: params
            .status
            .unwrap_or_else(|| RemotePaymentStatus::Unknown.as_str().to_string()),
        external_reference: params
            .external_reference
            .or_else(|| Some(record.external_reference.clone())),
    }
}

/// Entity named by the redirect's external reference, when it is not the
/// active one.
fn foreign_entity(record: &PendingPaymentRecord, params: &RedirectParameters) -> Option<String> {
    let reference: ExternalReference = params.external_reference.as_deref()?.parse().ok()?;
    (reference.entity_id != record.entity_id).then(|| reference.entity_id.to_string())
}
