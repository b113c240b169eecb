// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! `checkout-recover`: resolve a payment flow left behind by a killed app.
//!
//! Reads the pending payment record (if any), reconciles it against the
//! backend and logs the outcome. A flow that is still pending is given one
//! delayed re-check before the process exits.

use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use marketplace_checkout::backend::HttpPaymentBackend;
use marketplace_checkout::config::OrchestratorConfig;
use marketplace_checkout::interceptor::CheckoutSurface;
use marketplace_checkout::storage::{self, PendingPaymentStore};
use marketplace_checkout::{telemetry, FlowOutcome, ReconciliationEngine};

/// No embedded browser during a recovery pass.
struct HeadlessSurface;

impl CheckoutSurface for HeadlessSurface {
    fn open(&self, checkout_url: &str) {
        warn!(checkout_url = %checkout_url, "No checkout surface in recovery mode");
    }

    fn close(&self) {}
}

#[tokio::main]
async fn main() -> ExitCode {
    let config = match OrchestratorConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Configuration error: {e}");
            return ExitCode::FAILURE;
        }
    };
    telemetry::init(config.log_format);

    let store = match storage::open_configured(&config) {
        Ok(store) => store,
        Err(e) => {
            error!(data_dir = %config.data_dir.display(), error = %e, "Failed to open storage");
            return ExitCode::FAILURE;
        }
    };
    let backend = match HttpPaymentBackend::from_config(&config) {
        Ok(backend) => Arc::new(backend),
        Err(e) => {
            error!(error = %e, "Failed to build backend client");
            return ExitCode::FAILURE;
        }
    };

    let (outcome_tx, mut outcomes) = mpsc::channel(8);
    let engine = ReconciliationEngine::new(
        backend.clone(),
        backend,
        PendingPaymentStore::new(store),
        Arc::new(HeadlessSurface),
        config.engine.clone(),
    )
    .with_outcome_sink(outcome_tx);

    let shutdown = CancellationToken::new();
    let (handle, task) = engine.spawn(shutdown.clone());

    let code = match handle.recover().await {
        Ok(None) => {
            info!("No pending payment to recover");
            ExitCode::SUCCESS
        }
        Ok(Some(flow)) if flow.outcome.is_terminal() => {
            info!(entity_id = %flow.entity_id, outcome = ?flow.outcome, "Pending payment resolved");
            ExitCode::SUCCESS
        }
        Ok(Some(flow)) => {
            info!(
                entity_id = %flow.entity_id,
                outcome = ?flow.outcome,
                "Payment still pending; waiting for re-check"
            );
            let limit = config.engine.pending_recheck_delay + config.http_timeout * 2;
            match wait_for_resolution(&mut outcomes, limit).await {
                Some(resolved) => info!(
                    entity_id = %resolved.entity_id,
                    outcome = ?resolved.outcome,
                    "Pending payment resolved"
                ),
                None => info!(
                    entity_id = %flow.entity_id,
                    "Payment still processing; record kept for the next run"
                ),
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(error = %e, "Recovery failed");
            ExitCode::FAILURE
        }
    };

    shutdown.cancel();
    if let Err(e) = task.await {
        warn!(error = %e, "Engine task ended abnormally");
    }
    code
}

/// Wait for a terminal outcome, bounded by `limit` and ctrl-c.
async fn wait_for_resolution(
    outcomes: &mut mpsc::Receiver<FlowOutcome>,
    limit: Duration,
) -> Option<FlowOutcome> {
    let resolved = async {
        while let Some(flow) = outcomes.recv().await {
            if flow.outcome.is_terminal() {
                return Some(flow);
            }
        }
        None
    };

    tokio::select! {
        flow = resolved => flow,
        _ = tokio::time::sleep(limit) => None,
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupted");
            None
        }
    }
}
