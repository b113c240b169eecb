// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Marketplace Checkout - Payment Confirmation Orchestrator
//!
//! This crate drives a redirect-based external checkout to a single,
//! backend-agreed verdict about whether a payment actually happened, and
//! survives process restarts in the middle of a flow.
//!
//! ## Modules
//!
//! - `backend` - Checkout-session and confirmation API clients (reqwest)
//! - `config` - Environment configuration
//! - `deeplink` - Redirect URI parsing into canonical parameters
//! - `engine` - Reconciliation state machine and its async driver
//! - `interceptor` - Embedded browser redirect capture
//! - `resume` - Foreground resume watcher
//! - `storage` - Durable pending-payment record (file / redb / memory)
//! - `telemetry` - Tracing subscriber setup

pub mod backend;
pub mod config;
pub mod deeplink;
pub mod engine;
pub mod error;
pub mod interceptor;
pub mod models;
pub mod resume;
pub mod storage;
pub mod telemetry;

pub use engine::{EngineEvent, EngineHandle, FlowPhase, ReconciliationEngine};
pub use error::{ReconcileError, ReconcileResult};
pub use models::{
    EntityId, FlowOutcome, PaymentKind, PendingPaymentRecord, ReconciliationOutcome,
    RedirectParameters, RemotePaymentStatus,
};
