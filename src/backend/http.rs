// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! HTTP client for the marketplace payment endpoints.
//!
//! | Operation | Request |
//! |-----------|---------|
//! | create checkout session | `POST /api/payments/checkout` |
//! | remote status | `GET /api/payments/{entity_id}/status` |
//! | confirm payment | `POST /api/payments/{entity_id}/confirm` |
//!
//! Transport failures (connect, timeout) are retried once. Confirmation
//! carries the external reference as `Idempotency-Key`, so the retry cannot
//! double-apply a payment.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response};
use serde_json::Value;
use tracing::{debug, warn};
use uuid::Uuid;

use super::{map_remote_state, BackendError, CheckoutSessionApi, ConfirmationClient};
use crate::config::OrchestratorConfig;
use crate::models::{
    CheckoutRequest, CheckoutSession, ConfirmRequest, ConfirmResponse, EntityId,
    RemotePaymentStatus,
};

const CHECKOUT_PATH: &str = "/api/payments/checkout";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Debug, Clone)]
pub struct HttpPaymentBackend {
    api_base_url: String,
    api_token: Option<String>,
    http: Client,
}

impl HttpPaymentBackend {
    pub fn new(
        api_base_url: impl Into<String>,
        api_token: Option<String>,
        timeout: Duration,
    ) -> Result<Self, BackendError> {
        let api_base_url = api_base_url.into();
        if api_base_url.trim().is_empty() {
            return Err(BackendError::MissingConfig("api base url".to_string()));
        }

        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| BackendError::Request(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            api_base_url: api_base_url.trim().trim_end_matches('/').to_string(),
            api_token: api_token.filter(|token| !token.trim().is_empty()),
            http,
        })
    }

    pub fn from_config(config: &OrchestratorConfig) -> Result<Self, BackendError> {
        Self::new(
            config.api_base_url.clone(),
            config.api_token.clone(),
            config.http_timeout,
        )
    }

    /// Client with the default 15 s timeout.
    pub fn with_default_timeout(
        api_base_url: impl Into<String>,
        api_token: Option<String>,
    ) -> Result<Self, BackendError> {
        Self::new(api_base_url, api_token, DEFAULT_TIMEOUT)
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.api_base_url, path)
    }

    fn entity_path(entity_id: &EntityId, action: &str) -> String {
        let encoded: String =
            url::form_urlencoded::byte_serialize(entity_id.as_str().as_bytes()).collect();
        format!("/api/payments/{encoded}/{action}")
    }

    fn authorize(&self, builder: RequestBuilder) -> RequestBuilder {
        let builder = builder.header("X-Request-Id", Uuid::new_v4().to_string());
        match &self.api_token {
            Some(token) => builder.header("Authorization", format!("Bearer {token}")),
            None => builder,
        }
    }

    /// Send, retrying once if the request never reached the backend.
    async fn send_with_retry(
        &self,
        label: &str,
        build: impl Fn() -> RequestBuilder,
    ) -> Result<Response, BackendError> {
        let response = match build().send().await {
            Ok(response) => response,
            Err(e) if e.is_connect() || e.is_timeout() => {
                warn!(request = %label, error = %e, "backend request failed, retrying once");
                build()
                    .send()
                    .await
                    .map_err(|e| BackendError::Request(format!("{label} failed: {e}")))?
            }
            Err(e) => return Err(BackendError::Request(format!("{label} failed: {e}"))),
        };

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(BackendError::Status { status, body });
        }
        Ok(response)
    }

    async fn get_json(&self, path: &str) -> Result<Value, BackendError> {
        let label = format!("GET {path}");
        let url = self.url(path);
        let response = self
            .send_with_retry(&label, || self.authorize(self.http.get(&url)))
            .await?;
        response
            .json()
            .await
            .map_err(|e| BackendError::InvalidResponse(format!("{label} invalid JSON: {e}")))
    }

    async fn post_json(
        &self,
        path: &str,
        payload: &Value,
        idempotency_key: Option<&str>,
    ) -> Result<Value, BackendError> {
        let label = format!("POST {path}");
        let url = self.url(path);
        let response = self
            .send_with_retry(&label, || {
                let builder = self.authorize(self.http.post(&url)).json(payload);
                match idempotency_key {
                    Some(key) => builder.header("Idempotency-Key", key),
                    None => builder,
                }
            })
            .await?;
        response
            .json()
            .await
            .map_err(|e| BackendError::InvalidResponse(format!("{label} invalid JSON: {e}")))
    }
}

#[async_trait]
impl CheckoutSessionApi for HttpPaymentBackend {
    async fn create_checkout_session(
        &self,
        request: &CheckoutRequest,
    ) -> Result<CheckoutSession, BackendError> {
        let payload = serde_json::to_value(request)
            .map_err(|e| BackendError::InvalidResponse(format!("serialize body failed: {e}")))?;
        let response = self.post_json(CHECKOUT_PATH, &payload, None).await?;

        let checkout_url = first_str(&response, &["/checkout_url", "/checkoutUrl", "/init_point"])
            .ok_or_else(|| {
                BackendError::InvalidResponse("missing checkout url in response".to_string())
            })?;
        let external_reference =
            first_str(&response, &["/external_reference", "/externalReference"]).ok_or_else(
                || BackendError::InvalidResponse("missing external reference in response".to_string()),
            )?;

        debug!(
            entity_id = %request.entity_id,
            external_reference = %external_reference,
            "checkout session created"
        );

        Ok(CheckoutSession {
            checkout_url: checkout_url.to_string(),
            external_reference: external_reference.to_string(),
        })
    }
}

#[async_trait]
impl ConfirmationClient for HttpPaymentBackend {
    async fn query_remote_status(
        &self,
        entity_id: &EntityId,
    ) -> Result<RemotePaymentStatus, BackendError> {
        let response = self.get_json(&Self::entity_path(entity_id, "status")).await?;
        let state = extract_remote_state(&response).ok_or_else(|| {
            BackendError::InvalidResponse("missing remote state in response".to_string())
        })?;
        Ok(map_remote_state(state))
    }

    async fn confirm_payment(
        &self,
        request: &ConfirmRequest,
    ) -> Result<ConfirmResponse, BackendError> {
        let payload = serde_json::to_value(request)
            .map_err(|e| BackendError::InvalidResponse(format!("serialize body failed: {e}")))?;
        let response = self
            .post_json(
                &Self::entity_path(&request.entity_id, "confirm"),
                &payload,
                request.external_reference.as_deref(),
            )
            .await?;

        let success = response
            .get("success")
            .and_then(Value::as_bool)
            .ok_or_else(|| {
                BackendError::InvalidResponse("missing success flag in response".to_string())
            })?;
        let updated_remote_status = extract_updated_state(&response)
            .map(map_remote_state)
            .unwrap_or(RemotePaymentStatus::Unknown);

        Ok(ConfirmResponse {
            success,
            message: response
                .get("message")
                .and_then(Value::as_str)
                .map(str::to_string),
            updated_remote_status,
        })
    }
}

fn first_str<'a>(response: &'a Value, pointers: &[&str]) -> Option<&'a str> {
    pointers
        .iter()
        .find_map(|pointer| response.pointer(pointer).and_then(Value::as_str))
        .filter(|value| !value.trim().is_empty())
}

fn extract_remote_state(response: &Value) -> Option<&str> {
    first_str(
        response,
        &["/remote_state", "/remoteState", "/data/remote_state", "/status"],
    )
}

fn extract_updated_state(response: &Value) -> Option<&str> {
    first_str(
        response,
        &[
            "/updated_remote_state",
            "/updatedRemoteState",
            "/data/updated_remote_state",
        ],
    )
}
