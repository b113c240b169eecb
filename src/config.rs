// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Runtime Configuration
//!
//! Environment variable names, defaults, and the [`OrchestratorConfig`]
//! loaded from them at startup.
//!
//! ## Environment Variables
//!
//! | Variable | Description | Default |
//! |----------|-------------|---------|
//! | `MARKETPLACE_API_BASE_URL` | Backend base URL | Required |
//! | `MARKETPLACE_API_TOKEN` | Bearer token for the backend | None |
//! | `PAYMENT_RETURN_SCHEME` | App scheme the provider redirects to | `marketplace` |
//! | `PAYMENT_DATA_DIR` | Directory holding the pending payment record | `./data` |
//! | `PAYMENT_STORE_BACKEND` | `file` or `redb` | `file` |
//! | `PAYMENT_HTTP_TIMEOUT_SECS` | Backend request timeout | `15` |
//! | `PAYMENT_RESUME_GRACE_MS` | Delay before a resume triggers a status check | `1500` |
//! | `PAYMENT_PENDING_RECHECK_SECS` | Delay of the re-check after a pending redirect | `10` |
//! | `PAYMENT_CHECKOUT_LOAD_TIMEOUT_SECS` | How long the UI waits for the checkout page | `30` |
//! | `PAYMENT_MAX_VERIFY_ATTEMPTS` | Confirm attempts while the backend disagrees | `3` |
//! | `PAYMENT_PENDING_TTL_HOURS` | Age at which an unpaid recovered record is dropped | `24` |
//! | `LOG_FORMAT` | Logging format (`json` or `pretty`) | `pretty` |
//! | `RUST_LOG` | Log level filter | `info` |

use std::path::PathBuf;
use std::time::Duration;


pub const API_BASE_URL_ENV: &str = "MARKETPLACE_API_BASE_URL";
pub const API_TOKEN_ENV: &str = "MARKETPLACE_API_TOKEN";
pub const RETURN_SCHEME_ENV: &str = "PAYMENT_RETURN_SCHEME";
/// The directory must survive app restarts; recovery reads from it.
pub const DATA_DIR_ENV: &str = "PAYMENT_DATA_DIR";
pub const STORE_BACKEND_ENV: &str = "PAYMENT_STORE_BACKEND";
pub const HTTP_TIMEOUT_ENV: &str = "PAYMENT_HTTP_TIMEOUT_SECS";
pub const RESUME_GRACE_ENV: &str = "PAYMENT_RESUME_GRACE_MS";
pub const PENDING_RECHECK_ENV: &str = "PAYMENT_PENDING_RECHECK_SECS";
pub const CHECKOUT_LOAD_TIMEOUT_ENV: &str = "PAYMENT_CHECKOUT_LOAD_TIMEOUT_SECS";
pub const MAX_VERIFY_ATTEMPTS_ENV: &str = "PAYMENT_MAX_VERIFY_ATTEMPTS";
pub const PENDING_TTL_ENV: &str = "PAYMENT_PENDING_TTL_HOURS";
pub const LOG_FORMAT_ENV: &str = "LOG_FORMAT";

pub const DEFAULT_RETURN_SCHEME: &str = "marketplace";
pub const DEFAULT_DATA_DIR: &str = "./data";
const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 15;
const DEFAULT_RESUME_GRACE_MS: u64 = 1500;
const DEFAULT_PENDING_RECHECK_SECS: u64 = 10;
const DEFAULT_CHECKOUT_LOAD_TIMEOUT_SECS: u64 = 30;
const DEFAULT_MAX_VERIFY_ATTEMPTS: u32 = 3;
const DEFAULT_PENDING_TTL_HOURS: i64 = 24;

// Upper bounds for operator-supplied durations. Values above them are clamped.
const MAX_HTTP_TIMEOUT_SECS: u64 = 300;
const MAX_RESUME_GRACE_MS: u64 = 60_000;
const MAX_PENDING_RECHECK_SECS: u64 = 24 * 60 * 60;
const MAX_CHECKOUT_LOAD_TIMEOUT_SECS: u64 = 600;
const MAX_PENDING_TTL_HOURS: u64 = 24 * 365;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    Missing(&'static str),

    #[error("{name} is invalid ({value}): {reason}")]
    Invalid {
        name: &'static str,
        value: String,
        reason: &'static str,
    },
}

/// Which durable store holds the pending payment record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    File,
    Redb,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json,
}

/// Timing and retry knobs the engine needs; split out so tests can build an
/// engine without a full environment.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub return_scheme: String,
    pub pending_recheck_delay: Duration,
    pub max_verify_attempts: u32,
    pub pending_ttl: chrono::Duration,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            return_scheme: DEFAULT_RETURN_SCHEME.to_string(),
            pending_recheck_delay: Duration::from_secs(DEFAULT_PENDING_RECHECK_SECS),
            max_verify_attempts: DEFAULT_MAX_VERIFY_ATTEMPTS,
            pending_ttl: chrono::Duration::hours(DEFAULT_PENDING_TTL_HOURS),
        }
    }
}

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub api_base_url: String,
    pub api_token: Option<String>,
    pub data_dir: PathBuf,
    pub store_backend: StoreBackend,
    pub http_timeout: Duration,
    pub resume_grace: Duration,
    pub checkout_load_timeout: Duration,
    pub log_format: LogFormat,
    pub engine: EngineSettings,
}

impl OrchestratorConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from an arbitrary variable lookup (tests pass a map).
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let optional = |name: &str| {
            lookup(name)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        let or_default = |name: &str, default: &str| {
            optional(name).unwrap_or_else(|| default.to_string())
        };
        let number = |name: &'static str, default: u64, max: u64| -> Result<u64, ConfigError> {
            match optional(name) {
                Some(raw) => raw
                    .parse::<u64>()
                    .map(|value| value.min(max))
                    .map_err(|_| ConfigError::Invalid {
                        name,
                        value: raw,
                        reason: "expected a non-negative integer",
                    }),
                None => Ok(default),
            }
        };

        let api_base_url =
            optional(API_BASE_URL_ENV).ok_or(ConfigError::Missing(API_BASE_URL_ENV))?;

        let store_backend = match or_default(STORE_BACKEND_ENV, "file").to_ascii_lowercase().as_str() {
            "file" => StoreBackend::File,
            "redb" => StoreBackend::Redb,
            other => {
                return Err(ConfigError::Invalid {
                    name: STORE_BACKEND_ENV,
                    value: other.to_string(),
                    reason: "expected `file` or `redb`",
                })
            }
        };

        let log_format = match or_default(LOG_FORMAT_ENV, "pretty").to_ascii_lowercase().as_str() {
            "json" => LogFormat::Json,
            _ => LogFormat::Pretty,
        };

        let max_verify_attempts =
            number(MAX_VERIFY_ATTEMPTS_ENV, DEFAULT_MAX_VERIFY_ATTEMPTS as u64, 10)?.max(1) as u32;
        let pending_ttl_hours = number(
            PENDING_TTL_ENV,
            DEFAULT_PENDING_TTL_HOURS as u64,
            MAX_PENDING_TTL_HOURS,
        )?;

        Ok(Self {
            api_base_url,
            api_token: optional(API_TOKEN_ENV),
            data_dir: PathBuf::from(or_default(DATA_DIR_ENV, DEFAULT_DATA_DIR)),
            store_backend,
            http_timeout: Duration::from_secs(number(
                HTTP_TIMEOUT_ENV,
                DEFAULT_HTTP_TIMEOUT_SECS,
                MAX_HTTP_TIMEOUT_SECS,
            )?),
            resume_grace: Duration::from_millis(number(
                RESUME_GRACE_ENV,
                DEFAULT_RESUME_GRACE_MS,
                MAX_RESUME_GRACE_MS,
            )?),
            checkout_load_timeout: Duration::from_secs(number(
                CHECKOUT_LOAD_TIMEOUT_ENV,
                DEFAULT_CHECKOUT_LOAD_TIMEOUT_SECS,
                MAX_CHECKOUT_LOAD_TIMEOUT_SECS,
            )?),
            log_format,
            engine: EngineSettings {
                return_scheme: or_default(RETURN_SCHEME_ENV, DEFAULT_RETURN_SCHEME),
                pending_recheck_delay: Duration::from_secs(number(
                    PENDING_RECHECK_ENV,
                    DEFAULT_PENDING_RECHECK_SECS,
                    MAX_PENDING_RECHECK_SECS,
                )?),
                max_verify_attempts,
                pending_ttl: chrono::Duration::hours(pending_ttl_hours as i64),
            },
        })
    }
}
