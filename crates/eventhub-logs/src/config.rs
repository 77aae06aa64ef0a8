// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use regex::Regex;
use std::env;
use std::sync::OnceLock;
use std::time::Duration;
use tracing::{debug, error};

use crate::error::ConfigError;

pub const TOKEN_ENV: &str = "LogzioToken";
pub const LISTENER_URL_ENV: &str = "LogzioListener";
pub const BACKUP_CONNECTION_ENV: &str = "LogsStorageConnectionString";
pub const DEBUG_ENV: &str = "Debug";
pub const OVERSIZED_PAYLOAD_POLICY_ENV: &str = "LogsOversizedPayloadPolicy";

/// Regional listeners accepted as ingestion endpoints.
pub const ALLOWED_LISTENER_URLS: [&str; 7] = [
    "https://listener.logz.io:8071",
    "https://listener-au.logz.io:8071",
    "https://listener-ca.logz.io:8071",
    "https://listener-eu.logz.io:8071",
    "https://listener-nl.logz.io:8071",
    "https://listener-uk.logz.io:8071",
    "https://listener-wa.logz.io:8071",
];

/// Documented upper bound of a compressed bulk accepted by the listener.
pub const MAX_PAYLOAD_BYTES: usize = 10_000_000;
// the listener may be cold, don't wait for it to wake up
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

const SEND_ATTEMPTS: u32 = 4;
const INITIAL_BACKOFF: Duration = Duration::from_secs(2);

fn token_pattern() -> &'static Regex {
    static TOKEN_PATTERN: OnceLock<Regex> = OnceLock::new();
    #[allow(clippy::expect_used)]
    TOKEN_PATTERN.get_or_init(|| Regex::new(r"[a-zA-Z]{32}").expect("token pattern is valid"))
}

/// How many times a shipment is attempted and how long to wait between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryStrategy {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    /// Sleep before the second attempt, doubled before every following one.
    pub initial_backoff: Duration,
}

impl RetryStrategy {
    /// Backoff to sleep before attempt number `attempt` (zero based). The first attempt never waits.
    pub fn backoff_before(&self, attempt: u32) -> Option<Duration> {
        if attempt == 0 {
            return None;
        }
        let factor = 2_u32.checked_pow(attempt - 1).unwrap_or(u32::MAX);
        Some(self.initial_backoff.saturating_mul(factor))
    }
}

impl Default for RetryStrategy {
    fn default() -> Self {
        RetryStrategy {
            max_attempts: SEND_ATTEMPTS,
            initial_backoff: INITIAL_BACKOFF,
        }
    }
}

/// What to do with a buffer whose compressed form exceeds [`MAX_PAYLOAD_BYTES`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OversizedPayloadPolicy {
    /// Cancel the shipment and keep nothing.
    #[default]
    Drop,
    /// Cancel the shipment and write the raw buffer to the backup container.
    Backup,
}

impl OversizedPayloadPolicy {
    fn parse(value: &str) -> Self {
        match value.trim().to_lowercase().as_str() {
            "drop" | "" => OversizedPayloadPolicy::Drop,
            "backup" => OversizedPayloadPolicy::Backup,
            other => {
                error!(
                    "{OVERSIZED_PAYLOAD_POLICY_ENV} must be one of drop, backup, got: '{other}'. Using drop."
                );
                OversizedPayloadPolicy::Drop
            }
        }
    }
}

/// Everything one invocation needs to ship its buffer. Built per invocation, never cached.
#[derive(Debug, Clone)]
pub struct OperatingConfig {
    pub token: String,
    pub listener_url: String,
    /// Raw value of the debug toggle, kept verbatim.
    pub debug: Option<String>,
    pub backup_connection: String,
    pub https_proxy: Option<String>,
    pub request_timeout: Duration,
    pub retry_strategy: RetryStrategy,
    pub max_payload_bytes: usize,
    pub oversized_payload_policy: OversizedPayloadPolicy,
}

impl OperatingConfig {
    /// Reads and validates the process environment.
    pub fn from_env() -> Result<OperatingConfig, ConfigError> {
        Self::validate(|key| env::var(key).ok())
    }

    /// Validates the configuration found through `lookup`.
    ///
    /// Checks run token, listener url, backup connection, and stop at the first failure.
    pub fn validate<F>(lookup: F) -> Result<OperatingConfig, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let token = lookup(TOKEN_ENV)
            .filter(|token| token_pattern().is_match(token))
            .ok_or(ConfigError::InvalidToken)?;

        let listener_url = match lookup(LISTENER_URL_ENV) {
            Some(url) if ALLOWED_LISTENER_URLS.contains(&url.as_str()) => url,
            other => return Err(ConfigError::InvalidEndpoint(other)),
        };

        let backup_connection = lookup(BACKUP_CONNECTION_ENV)
            .filter(|connection| !connection.trim().is_empty())
            .ok_or(ConfigError::MissingBackupConfig)?;

        let oversized_payload_policy = lookup(OVERSIZED_PAYLOAD_POLICY_ENV)
            .map(|value| OversizedPayloadPolicy::parse(&value))
            .unwrap_or_default();

        let config = OperatingConfig {
            token,
            listener_url,
            debug: lookup(DEBUG_ENV),
            backup_connection,
            https_proxy: lookup("HTTPS_PROXY").or_else(|| lookup("https_proxy")),
            request_timeout: REQUEST_TIMEOUT,
            retry_strategy: RetryStrategy::default(),
            max_payload_bytes: MAX_PAYLOAD_BYTES,
            oversized_payload_policy,
        };
        debug!(
            "Resolved configuration for listener {}, debug: {}",
            config.listener_url,
            config.debug_enabled()
        );
        Ok(config)
    }

    pub fn debug_enabled(&self) -> bool {
        self.debug
            .as_deref()
            .is_some_and(|debug| debug.trim().eq_ignore_ascii_case("true"))
    }
}
