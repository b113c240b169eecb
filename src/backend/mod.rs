// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Marketplace Backend Seams
//!
//! The engine talks to the backend through two traits so it can be driven by
//! the HTTP client in production and by scripted fakes in tests:
//!
//! - [`CheckoutSessionApi`]: creates the provider-hosted checkout.
//! - [`ConfirmationClient`]: reads authoritative status and submits a
//!   redirect-backed confirmation.
//!
//! `query_remote_status` is a pure read and may be called any number of
//! times. `confirm_payment` must be idempotent per external reference; a
//! transport failure there is inconclusive, never proof the payment failed.

pub mod http;

use async_trait::async_trait;

use crate::models::{
    CheckoutRequest, CheckoutSession, ConfirmRequest, ConfirmResponse, EntityId,
    RemotePaymentStatus,
};

pub use http::HttpPaymentBackend;

#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("backend configuration missing: {0}")]
    MissingConfig(String),

    #[error("backend request failed: {0}")]
    Request(String),

    #[error("backend returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("backend response was invalid: {0}")]
    InvalidResponse(String),
}

#[async_trait]
pub trait CheckoutSessionApi: Send + Sync {
    async fn create_checkout_session(
        &self,
        request: &CheckoutRequest,
    ) -> Result<CheckoutSession, BackendError>;
}

#[async_trait]
pub trait ConfirmationClient: Send + Sync {
    async fn query_remote_status(
        &self,
        entity_id: &EntityId,
    ) -> Result<RemotePaymentStatus, BackendError>;

    async fn confirm_payment(
        &self,
        request: &ConfirmRequest,
    ) -> Result<ConfirmResponse, BackendError>;
}

/// Map the backend's remote-state string onto [`RemotePaymentStatus`].
pub fn map_remote_state(raw_state: &str) -> RemotePaymentStatus {
    let state = raw_state.trim().to_ascii_lowercase();
    match state.as_str() {
        "paid" | "pagado" | "approved" | "completed" => RemotePaymentStatus::Paid,
        "unpaid" | "pending" | "pendiente" | "no_pagado" => RemotePaymentStatus::Unpaid,
        _ => RemotePaymentStatus::Unknown,
    }
}
