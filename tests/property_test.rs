// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use std::collections::VecDeque;

use marketplace_checkout::deeplink::{DeepLinkParser, StatusFamily};
use marketplace_checkout::engine::{Effect, FlowEvent, FlowMachine};
use marketplace_checkout::models::ConfirmResponse;
use marketplace_checkout::{
    EntityId, PaymentKind, PendingPaymentRecord, ReconciliationOutcome, RedirectParameters,
    RemotePaymentStatus,
};
use proptest::prelude::*;

const ALL_STATUSES: [&str; 12] = [
    "approved",
    "success",
    "pending",
    "in_process",
    "rejected",
    "failure",
    "cancelled",
    "authorized",
    "",
    "null",
    "paid",
    "processing",
];

fn arb_value() -> impl Strategy<Value = Option<String>> {
    proptest::option::of("[a-z0-9_]{1,12}")
}

fn arb_params() -> impl Strategy<Value = RedirectParameters> {
    (arb_value(), arb_value(), arb_value(), arb_value(), arb_value()).prop_map(
        |(status, payment_id, external_reference, collection_status, payment_type)| {
            RedirectParameters {
                status,
                payment_id,
                external_reference,
                collection_status,
                payment_type,
            }
        },
    )
}

fn arb_remote() -> impl Strategy<Value = Result<RemotePaymentStatus, String>> {
    prop_oneof![
        Just(Ok(RemotePaymentStatus::Unpaid)),
        Just(Ok(RemotePaymentStatus::Paid)),
        Just(Ok(RemotePaymentStatus::Unknown)),
        Just(Err("timeout".to_string())),
    ]
}

fn arb_confirm() -> impl Strategy<Value = Result<ConfirmResponse, String>> {
    prop_oneof![
        Just(Ok(ConfirmResponse {
            success: true,
            message: None,
            updated_remote_status: RemotePaymentStatus::Paid,
        })),
        Just(Ok(ConfirmResponse {
            success: false,
            message: None,
            updated_remote_status: RemotePaymentStatus::Unpaid,
        })),
        Just(Err("connection reset".to_string())),
    ]
}

fn arb_trigger() -> impl Strategy<Value = FlowEvent> {
    prop_oneof![
        (0..ALL_STATUSES.len()).prop_map(|i| FlowEvent::RedirectCaptured(RedirectParameters {
            status: Some(ALL_STATUSES[i].to_string()).filter(|s| !s.is_empty()),
            external_reference: Some("oferta_7_total".to_string()),
            ..Default::default()
        })),
        Just(FlowEvent::AppResumed),
        Just(FlowEvent::UserCancelled),
        Just(FlowEvent::RecheckDue),
    ]
}

fn record(initial: RemotePaymentStatus) -> PendingPaymentRecord {
    PendingPaymentRecord::new(
        EntityId::from(7),
        PaymentKind::Total,
        "oferta_7_total".to_string(),
        initial,
    )
}

/// Drive the machine through `triggers`, answering backend calls from the
/// scripted results (cycled). Returns every emitted outcome and whether the
/// record was deleted.
fn run_flow(
    initial: RemotePaymentStatus,
    triggers: Vec<FlowEvent>,
    remote: &[Result<RemotePaymentStatus, String>],
    confirms: &[Result<ConfirmResponse, String>],
) -> (Vec<ReconciliationOutcome>, usize) {
    let mut machine = FlowMachine::new(3);
    let mut emitted = Vec::new();
    let mut deletes = 0;
    let mut remote = remote.iter().cycle();
    let mut confirms = confirms.iter().cycle();

    let mut queue: VecDeque<Effect> = machine
        .handle(FlowEvent::Started(record(initial)))
        .unwrap()
        .into();
    let mut triggers = triggers.into_iter();

    loop {
        while let Some(effect) = queue.pop_front() {
            let next = match effect {
                Effect::QueryRemote(_) => Some(FlowEvent::RemoteStatus(remote.next().unwrap().clone())),
                Effect::Confirm(_) => Some(FlowEvent::ConfirmFinished(confirms.next().unwrap().clone())),
                Effect::Emit(flow) => {
                    emitted.push(flow.outcome);
                    None
                }
                Effect::DeleteRecord => {
                    deletes += 1;
                    None
                }
                Effect::Persist(_) | Effect::ScheduleRecheck => None,
            };
            if let Some(event) = next {
                queue.extend(machine.handle(event).unwrap());
            }
        }
        match triggers.next() {
            Some(event) => {
                if let Ok(effects) = machine.handle(event) {
                    queue.extend(effects);
                }
            }
            None => break,
        }
    }
    (emitted, deletes)
}

proptest! {
    /// Parsing a URI built from canonical parameters recovers them, with
    /// `status` falling back to `collection_status` as the alias rule says.
    #[test]
    fn redirect_round_trip(params in arb_params()) {
        let uri = DeepLinkParser::build_redirect_uri("marketplace", &params);
        let parsed = DeepLinkParser::parse(&uri);

        let expected = RedirectParameters {
            status: params.status.clone().or_else(|| params.collection_status.clone()),
            ..params.clone()
        };
        prop_assert_eq!(parsed, expected);
    }

    /// Parsing never panics, whatever the input.
    #[test]
    fn parse_is_total(raw in ".{0,80}") {
        let _ = DeepLinkParser::parse(&raw);
    }

    /// A flow that started paid never reports `Confirmed`, whatever happens.
    #[test]
    fn prior_payment_never_confirms(
        triggers in prop::collection::vec(arb_trigger(), 1..12),
        remote in prop::collection::vec(arb_remote(), 1..6),
        confirms in prop::collection::vec(arb_confirm(), 1..4),
    ) {
        let (emitted, _) = run_flow(RemotePaymentStatus::Paid, triggers, &remote, &confirms);
        prop_assert!(!emitted.contains(&ReconciliationOutcome::Confirmed));
    }

    /// At most one terminal outcome per flow, and the record is deleted
    /// exactly when one is produced.
    #[test]
    fn single_terminal_outcome_and_single_delete(
        initial in prop_oneof![Just(RemotePaymentStatus::Unpaid), Just(RemotePaymentStatus::Paid)],
        triggers in prop::collection::vec(arb_trigger(), 1..12),
        remote in prop::collection::vec(arb_remote(), 1..6),
        confirms in prop::collection::vec(arb_confirm(), 1..4),
    ) {
        let (emitted, deletes) = run_flow(initial, triggers, &remote, &confirms);
        let terminal = emitted.iter().filter(|o| o.is_terminal()).count();
        prop_assert!(terminal <= 1);
        prop_assert_eq!(terminal, deletes);
        if terminal == 1 {
            prop_assert!(emitted.last().unwrap().is_terminal());
        }
    }

    /// Rejected-family redirects resolve immediately regardless of the other
    /// parameters or the starting status.
    #[test]
    fn rejected_redirect_always_cancels(
        status in prop_oneof![Just("rejected"), Just("failure"), Just("cancelled")],
        payment_id in arb_value(),
        payment_type in arb_value(),
        collection_status in arb_value(),
        initial in prop_oneof![Just(RemotePaymentStatus::Unpaid), Just(RemotePaymentStatus::Paid)],
    ) {
        let mut machine = FlowMachine::new(3);
        machine.handle(FlowEvent::Started(record(initial))).unwrap();

        let effects = machine
            .handle(FlowEvent::RedirectCaptured(RedirectParameters {
                status: Some(status.to_string()),
                payment_id,
                external_reference: Some("oferta_7_total".to_string()),
                collection_status,
                payment_type,
            }))
            .unwrap();

        prop_assert_eq!(effects.first(), Some(&Effect::DeleteRecord));
        prop_assert!(effects.iter().any(|e| matches!(
            e,
            Effect::Emit(flow) if flow.outcome == ReconciliationOutcome::UserCancelledOrFailed
        )));
    }

    /// Classification ignores case and surrounding whitespace.
    #[test]
    fn classification_is_case_insensitive(index in 0..ALL_STATUSES.len(), upper in any::<bool>()) {
        let status = ALL_STATUSES[index];
        let variant = if upper { format!("  {}  ", status.to_uppercase()) } else { status.to_string() };
        prop_assert_eq!(
            StatusFamily::classify(Some(&variant)),
            StatusFamily::classify(Some(status))
        );
    }
}
