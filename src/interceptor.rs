// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Redirect Interceptor
//!
//! Glue between the embedded browser showing the provider's checkout page and
//! the reconciliation engine.
//!
//! Providers hand control back in different ways, so the interceptor watches
//! several independent signals and funnels the first hit into a single
//! [`EngineEvent::RedirectCaptured`]:
//!
//! 1. **Pre-navigation hook**: [`RedirectInterceptor::should_start_load`]
//!    vetoes loading an app-scheme URI.
//! 2. **Navigation state**: [`RedirectInterceptor::on_navigation_state_changed`]
//!    inspects the current URL, and the page title as a last resort.
//! 3. **Injected probe**: [`PROBE_SCRIPT`] reports client-side location
//!    changes and anchor clicks back through
//!    [`RedirectInterceptor::on_probe_message`].
//!
//! Only the first capture per flow is forwarded. An engine built with
//! [`ReconciliationEngine::with_interceptor`](crate::engine::ReconciliationEngine::with_interceptor)
//! re-arms it on every `start`; otherwise the embedding app must call
//! [`RedirectInterceptor::reset_for_flow`] when a new checkout opens.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use serde::Deserialize;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::deeplink::DeepLinkParser;
use crate::engine::EngineEvent;

/// Embedded browser surface hosting the provider checkout.
pub trait CheckoutSurface: Send + Sync {
    fn open(&self, checkout_url: &str);

    /// Dismiss the surface. Must tolerate being called when already closed.
    fn close(&self);
}

/// Which signal produced a capture.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureSource {
    PreNavigation,
    NavigationState,
    PageTitle,
    InjectedProbe,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NavigationDecision {
    Allow,
    Block,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadStatus {
    Loaded,
    TimedOut,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProbeKind {
    Navigation,
    Click,
}

/// Message posted by [`PROBE_SCRIPT`].
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ProbeMessage {
    #[serde(rename = "type")]
    pub kind: ProbeKind,
    pub url: String,
}

/// Script injected into the checkout page. The host exposes
/// `window.__checkoutBridge.postMessage(string)` and routes it to
/// [`RedirectInterceptor::on_probe_message`].
pub const PROBE_SCRIPT: &str = r#"(function () {
  if (window.__checkoutProbeInstalled) { return; }
  window.__checkoutProbeInstalled = true;
  function report(type, url) {
    try {
      if (window.__checkoutBridge && url) {
        window.__checkoutBridge.postMessage(JSON.stringify({ type: type, url: String(url) }));
      }
    } catch (e) {}
  }
  ['assign', 'replace'].forEach(function (name) {
    var original = window.location[name].bind(window.location);
    try {
      window.location[name] = function (url) { report('navigation', url); return original(url); };
    } catch (e) {}
  });
  ['pushState', 'replaceState'].forEach(function (name) {
    var original = history[name];
    history[name] = function (state, title, url) {
      if (url) { report('navigation', url); }
      return original.apply(this, arguments);
    };
  });
  var open = window.open;
  window.open = function (url) { report('navigation', url); return open.apply(window, arguments); };
  document.addEventListener('click', function (event) {
    var node = event.target;
    while (node && node.tagName !== 'A') { node = node.parentElement; }
    if (node && node.href) { report('click', node.href); }
  }, true);
  report('navigation', window.location.href);
})();"#;

pub struct RedirectInterceptor {
    scheme: String,
    events: mpsc::Sender<EngineEvent>,
    captured: AtomicBool,
    loaded: watch::Sender<bool>,
}

impl RedirectInterceptor {
    pub fn new(scheme: impl Into<String>, events: mpsc::Sender<EngineEvent>) -> Self {
        let (loaded, _) = watch::channel(false);
        Self {
            scheme: scheme.into(),
            events,
            captured: AtomicBool::new(false),
            loaded,
        }
    }

    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    /// Arm the interceptor for a freshly opened checkout.
    pub fn reset_for_flow(&self) {
        self.captured.store(false, Ordering::SeqCst);
        self.loaded.send_replace(false);
    }

    pub fn has_captured(&self) -> bool {
        self.captured.load(Ordering::SeqCst)
    }

    /// Pre-navigation hook. App-scheme targets are captured and never loaded.
    pub fn should_start_load(&self, url: &str) -> NavigationDecision {
        if self.capture(url, CaptureSource::PreNavigation) {
            NavigationDecision::Block
        } else {
            NavigationDecision::Allow
        }
    }

    /// Post-navigation observer. Covers redirects the pre-navigation hook
    /// never saw; some providers only leave the return URI in the title.
    pub fn on_navigation_state_changed(&self, url: &str, title: Option<&str>) {
        if self.capture(url, CaptureSource::NavigationState) {
            return;
        }
        if let Some(title) = title {
            self.capture(title, CaptureSource::PageTitle);
        }
    }

    /// Message from the injected probe. Malformed payloads are ignored.
    pub fn on_probe_message(&self, payload: &str) {
        match serde_json::from_str::<ProbeMessage>(payload) {
            Ok(message) => {
                self.capture(&message.url, CaptureSource::InjectedProbe);
            }
            Err(e) => debug!(error = %e, "Ignoring malformed probe message"),
        }
    }

    /// The surface was dismissed. Without a prior capture this is the user
    /// abandoning the checkout.
    pub fn on_surface_closed(&self) {
        if self.captured.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("Checkout surface closed without a redirect");
        if !self.forward(EngineEvent::UserCancelled) {
            self.captured.store(false, Ordering::SeqCst);
        }
    }

    pub fn on_load_finished(&self) {
        self.loaded.send_replace(true);
    }

    /// Wait for the checkout page to finish loading, bounded by `timeout`.
    pub async fn wait_for_load(&self, timeout: Duration) -> LoadStatus {
        let mut loaded = self.loaded.subscribe();
        let result = tokio::time::timeout(timeout, loaded.wait_for(|done| *done))
            .await
            .map(|waited| waited.map(|_| ()));
        match result {
            Ok(Ok(())) => LoadStatus::Loaded,
            Ok(Err(_)) | Err(_) => {
                warn!(timeout_ms = timeout.as_millis() as u64, "Checkout page did not finish loading");
                LoadStatus::TimedOut
            }
        }
    }

    /// Returns whether `candidate` is an app-scheme URI (captured now or
    /// already captured earlier in this flow).
    fn capture(&self, candidate: &str, source: CaptureSource) -> bool {
        let Some(uri) = DeepLinkParser::match_app_scheme(candidate, &self.scheme) else {
            return false;
        };
        if self.captured.swap(true, Ordering::SeqCst) {
            debug!(source = ?source, "Duplicate redirect capture suppressed");
            return true;
        }
        info!(source = ?source, "Captured checkout redirect");
        if !self.forward(EngineEvent::RedirectCaptured { uri, source }) {
            // Undelivered; let the next signal for this redirect try again.
            self.captured.store(false, Ordering::SeqCst);
        }
        true
    }

    /// Returns whether the engine received `event`.
    fn forward(&self, event: EngineEvent) -> bool {
        match self.events.try_send(event) {
            Ok(()) => true,
            Err(e) => {
                warn!(error = %e, "Failed to forward checkout event to engine");
                false
            }
        }
    }
}
