// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Foreground Resume Watcher
//!
//! Background task that turns background→foreground transitions into
//! [`EngineEvent::AppResumed`] while a checkout is awaiting its redirect.
//!
//! ## Strategy
//!
//! On every transition to the foreground the watcher:
//! 1. Skips unless the engine phase is `AwaitingRedirect`.
//! 2. Waits a short grace delay so a redirect that is already in flight can
//!    land first.
//! 3. Checks the phase again and only then asks the engine for a status
//!    check. A verification started in the meantime wins.
//!
//! ## Shutdown
//!
//! Uses `tokio_util::sync::CancellationToken`, like the engine run loop.

use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::engine::{EngineEvent, FlowPhase};

/// Host application visibility.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppLifecycle {
    Foreground,
    Background,
}

pub struct ForegroundResumeWatcher {
    lifecycle: watch::Receiver<AppLifecycle>,
    phase: watch::Receiver<FlowPhase>,
    events: mpsc::Sender<EngineEvent>,
    grace: Duration,
}

impl ForegroundResumeWatcher {
    pub fn new(
        lifecycle: watch::Receiver<AppLifecycle>,
        phase: watch::Receiver<FlowPhase>,
        events: mpsc::Sender<EngineEvent>,
        grace: Duration,
    ) -> Self {
        Self {
            lifecycle,
            phase,
            events,
            grace,
        }
    }

    /// Run until the token is cancelled or the lifecycle source goes away.
    ///
    /// ```rust,ignore
    /// tokio::spawn(watcher.run(shutdown.clone()));
    /// ```
    pub async fn run(mut self, shutdown: CancellationToken) {
        info!(grace_ms = self.grace.as_millis() as u64, "Resume watcher starting");
        let mut previous = *self.lifecycle.borrow_and_update();

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Resume watcher shutting down");
                    return;
                }
                changed = self.lifecycle.changed() => {
                    if changed.is_err() {
                        debug!("Lifecycle source closed; resume watcher exiting");
                        return;
                    }
                }
            }

            let current = *self.lifecycle.borrow_and_update();
            let resumed =
                previous == AppLifecycle::Background && current == AppLifecycle::Foreground;
            previous = current;
            if !resumed || !self.awaiting_redirect() {
                continue;
            }

            tokio::select! {
                _ = tokio::time::sleep(self.grace) => {}
                _ = shutdown.cancelled() => {
                    info!("Resume watcher shutting down");
                    return;
                }
            }

            if !self.awaiting_redirect() {
                debug!("Flow moved on during resume grace period; skipping status check");
                continue;
            }

            debug!("App resumed while awaiting redirect");
            if self.events.send(EngineEvent::AppResumed).await.is_err() {
                warn!("Engine stopped; resume watcher exiting");
                return;
            }
        }
    }

    fn awaiting_redirect(&self) -> bool {
        *self.phase.borrow() == FlowPhase::AwaitingRedirect
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Harness {
        lifecycle: watch::Sender<AppLifecycle>,
        phase: watch::Sender<FlowPhase>,
        events: mpsc::Receiver<EngineEvent>,
        shutdown: CancellationToken,
    }

    fn spawn_watcher(initial_phase: FlowPhase) -> Harness {
        let (lifecycle, lifecycle_rx) = watch::channel(AppLifecycle::Foreground);
        let (phase, phase_rx) = watch::channel(initial_phase);
        let (tx, events) = mpsc::channel(8);
        let shutdown = CancellationToken::new();
        let watcher =
            ForegroundResumeWatcher::new(lifecycle_rx, phase_rx, tx, Duration::from_millis(1500));
        tokio::spawn(watcher.run(shutdown.clone()));
        Harness {
            lifecycle,
            phase,
            events,
            shutdown,
        }
    }

    async fn background_then_foreground(harness: &Harness) {
        tokio::task::yield_now().await;
        harness.lifecycle.send_replace(AppLifecycle::Background);
        tokio::task::yield_now().await;
        harness.lifecycle.send_replace(AppLifecycle::Foreground);
        tokio::task::yield_now().await;
    }

    #[tokio::test(start_paused = true)]
    async fn resume_after_grace_emits_event() {
        let mut harness = spawn_watcher(FlowPhase::AwaitingRedirect);
        background_then_foreground(&harness).await;

        tokio::time::sleep(Duration::from_millis(1000)).await;
        assert!(harness.events.try_recv().is_err());

        tokio::time::sleep(Duration::from_millis(600)).await;
        assert!(matches!(harness.events.try_recv(), Ok(EngineEvent::AppResumed)));
        harness.shutdown.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn resume_ignored_when_not_awaiting() {
        let mut harness = spawn_watcher(FlowPhase::Idle);
        background_then_foreground(&harness).await;

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(harness.events.try_recv().is_err());
        harness.shutdown.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn verification_during_grace_suppresses_resume() {
        let mut harness = spawn_watcher(FlowPhase::AwaitingRedirect);
        background_then_foreground(&harness).await;

        harness.phase.send_replace(FlowPhase::VerifyingRemote);
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(harness.events.try_recv().is_err());
        harness.shutdown.cancel();
    }
}
