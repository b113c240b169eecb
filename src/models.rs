// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Payment Flow Data Models
//!
//! Types shared by the parser, the backend client, the pending store and the
//! reconciliation engine.
//!
//! ## Model Categories
//!
//! - **Identifiers**: [`EntityId`], [`ExternalReference`]
//! - **Remote state**: [`RemotePaymentStatus`], [`PaymentKind`]
//! - **Persisted flow**: [`PendingPaymentRecord`]
//! - **Redirects**: [`RedirectParameters`]
//! - **Results**: [`ReconciliationOutcome`], [`FlowOutcome`]
//! - **Backend payloads**: [`CheckoutRequest`], [`CheckoutSession`],
//!   [`ConfirmRequest`], [`ConfirmResponse`]

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ReconcileError;

// =============================================================================
// Identifiers
// =============================================================================

/// Marketplace entity (offer) being paid for.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(transparent)]
pub struct EntityId(String);

impl EntityId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for EntityId {
    fn from(value: &str) -> Self {
        EntityId(value.to_string())
    }
}

impl From<String> for EntityId {
    fn from(value: String) -> Self {
        EntityId(value)
    }
}

impl From<u64> for EntityId {
    fn from(value: u64) -> Self {
        EntityId(value.to_string())
    }
}

/// Which part of an offer a checkout pays for.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum PaymentKind {
    Parts,
    Service,
    Total,
}

impl PaymentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Parts => "parts",
            Self::Service => "service",
            Self::Total => "total",
        }
    }
}

impl fmt::Display for PaymentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for PaymentKind {
    type Err = ReconcileError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "parts" | "repuestos" => Ok(Self::Parts),
            "service" | "servicio" => Ok(Self::Service),
            "total" => Ok(Self::Total),
            other => Err(ReconcileError::Parse(format!("unknown payment kind: {other}"))),
        }
    }
}

/// Parsed `"{entityKind}_{entityId}_{paymentKind}"` reference.
///
/// Only the first two segments are required. Anything after the entity id
/// is kept verbatim as the payment kind so unknown kinds still round-trip.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExternalReference {
    pub entity_kind: String,
    pub entity_id: EntityId,
    pub payment_kind: Option<String>,
}

impl ExternalReference {
    pub fn new(entity_kind: &str, entity_id: &EntityId, payment_kind: PaymentKind) -> Self {
        Self {
            entity_kind: entity_kind.to_string(),
            entity_id: entity_id.clone(),
            payment_kind: Some(payment_kind.as_str().to_string()),
        }
    }

    /// Typed payment kind, if the trailing segment names a known one.
    pub fn kind(&self) -> Option<PaymentKind> {
        self.payment_kind.as_deref().and_then(|k| k.parse().ok())
    }
}

impl FromStr for ExternalReference {
    type Err = ReconcileError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let mut segments = raw.trim().splitn(3, '_');
        let entity_kind = segments.next().unwrap_or_default();
        let entity_id = segments.next().unwrap_or_default();
        if entity_kind.is_empty() || entity_id.is_empty() {
            return Err(ReconcileError::Parse(format!(
                "external reference needs at least two segments: {raw}"
            )));
        }
        let payment_kind = segments
            .next()
            .filter(|kind| !kind.is_empty())
            .map(str::to_string);

        Ok(Self {
            entity_kind: entity_kind.to_string(),
            entity_id: EntityId::from(entity_id),
            payment_kind,
        })
    }
}

impl fmt::Display for ExternalReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.entity_kind, self.entity_id)?;
        if let Some(kind) = &self.payment_kind {
            write!(f, "_{kind}")?;
        }
        Ok(())
    }
}

// =============================================================================
// Remote State
// =============================================================================

/// Authoritative payment state, only ever obtained from the backend.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum RemotePaymentStatus {
    Unpaid,
    Paid,
    Unknown,
}

impl RemotePaymentStatus {
    pub fn is_paid(&self) -> bool {
        matches!(self, Self::Paid)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unpaid => "unpaid",
            Self::Paid => "paid",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for RemotePaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// =============================================================================
// Persisted Flow
// =============================================================================

/// Durable record of the single in-flight payment.
///
/// Written once by `start`, read by every reconciliation attempt and deleted
/// by the transition that resolves the flow. `initial_remote_status` is the
/// baseline that separates a real payment from one that already existed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PendingPaymentRecord {
    pub entity_id: EntityId,
    pub payment_kind: PaymentKind,
    pub external_reference: String,
    /// Either `Unpaid` or `Paid`; a flow never starts from `Unknown`.
    pub initial_remote_status: RemotePaymentStatus,
    pub created_at: DateTime<Utc>,
}

impl PendingPaymentRecord {
    pub fn new(
        entity_id: EntityId,
        payment_kind: PaymentKind,
        external_reference: String,
        initial_remote_status: RemotePaymentStatus,
    ) -> Self {
        Self {
            entity_id,
            payment_kind,
            external_reference,
            initial_remote_status,
            created_at: Utc::now(),
        }
    }

    pub fn was_paid_before_flow(&self) -> bool {
        self.initial_remote_status.is_paid()
    }

    /// Whether the record has outlived `ttl` as of `now`.
    pub fn is_stale(&self, now: DateTime<Utc>, ttl: Duration) -> bool {
        now.signed_duration_since(self.created_at) > ttl
    }
}

// =============================================================================
// Redirects
// =============================================================================

/// Canonical parameters recovered from a provider redirect.
///
/// Every field is optional: providers disagree on names and some send
/// nothing but a path segment.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RedirectParameters {
    pub status: Option<String>,
    pub payment_id: Option<String>,
    pub external_reference: Option<String>,
    pub collection_status: Option<String>,
    pub payment_type: Option<String>,
}

impl RedirectParameters {
    pub fn is_empty(&self) -> bool {
        self.status.is_none()
            && self.payment_id.is_none()
            && self.external_reference.is_none()
            && self.collection_status.is_none()
            && self.payment_type.is_none()
    }
}

// =============================================================================
// Results
// =============================================================================

/// Verdict of one reconciliation attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", content = "reason", rename_all = "snake_case")]
pub enum ReconciliationOutcome {
    Confirmed,
    StillPending,
    AlreadyPaidPriorToFlow,
    UserCancelledOrFailed,
    Error(String),
}

impl ReconciliationOutcome {
    /// Terminal outcomes delete the pending record and end the flow.
    ///
    /// `Error` keeps the record so the next resume can retry, so it is not
    /// terminal either.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Confirmed | Self::AlreadyPaidPriorToFlow | Self::UserCancelledOrFailed
        )
    }

    /// Text safe to show the user. Technical reasons stay in the logs.
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::Confirmed => "Payment confirmed.",
            Self::AlreadyPaidPriorToFlow => "This item was already paid.",
            Self::UserCancelledOrFailed => "The payment was cancelled or rejected.",
            Self::StillPending | Self::Error(_) => {
                "Your payment is still processing. Check your requests later."
            }
        }
    }
}

/// Outcome tagged with the entity it resolves.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlowOutcome {
    pub entity_id: EntityId,
    pub outcome: ReconciliationOutcome,
}

// =============================================================================
// Backend Payloads
// =============================================================================

/// Return URLs handed to the provider when the checkout session is created.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ReturnUrls {
    pub success: String,
    pub failure: String,
    pub pending: String,
}

impl ReturnUrls {
    pub fn for_scheme(scheme: &str) -> Self {
        Self {
            success: format!("{scheme}://payment/success"),
            failure: format!("{scheme}://payment/failure"),
            pending: format!("{scheme}://payment/pending"),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CheckoutRequest {
    pub entity_id: EntityId,
    pub payment_kind: PaymentKind,
    pub return_urls: ReturnUrls,
}

/// Provider-hosted checkout returned by the backend.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct CheckoutSession {
    pub checkout_url: String,
    pub external_reference: String,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ConfirmRequest {
    #[serde(skip)]
    pub entity_id: EntityId,
    pub payment_kind: PaymentKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payment_id: Option<String>,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub external_reference: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfirmResponse {
    pub success: bool,
    pub message: Option<String>,
    pub updated_remote_status: RemotePaymentStatus,
}
