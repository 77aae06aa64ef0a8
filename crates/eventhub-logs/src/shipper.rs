// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Delivery of the pending buffer to the ingestion listener.
//!
//! ```text
//!   PendingBuffer
//!       │
//!       v
//!   ┌─────────────┐
//!   │  Compress   │ (gzip)
//!   └──────┬──────┘
//!          v
//!   ┌─────────────┐
//!   │ Size check  │ (413 past the listener limit)
//!   └──────┬──────┘
//!          v
//!   ┌─────────────┐
//!   │ HTTP POST   │ <── exponential backoff on 5xx / network errors
//!   └──────┬──────┘
//!          v
//!   ┌─────────────┐
//!   │   Backup    │ (only when the final status is not 200)
//!   └─────────────┘
//! ```

use bytes::Bytes;
use flate2::write::GzEncoder;
use flate2::Compression;
use reqwest::header::CONTENT_ENCODING;
use reqwest::StatusCode;
use std::io::Write;
use std::time::{Duration, Instant};
use tracing::{debug, error};

use crate::backup::BackupWriter;
use crate::buffer::PendingBuffer;
use crate::config::{OperatingConfig, OversizedPayloadPolicy};
use crate::execution_log::ExecutionLog;
use crate::http_utils::{build_client, transport_failure_status};

/// One pass through the retry loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShipmentAttempt {
    pub status: StatusCode,
    /// Zero based.
    pub attempt_index: u32,
    /// Time slept before this attempt, `None` for the first one.
    pub backoff: Option<Duration>,
}

/// What happened to the raw buffer once shipping gave up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackupOutcome {
    /// The listener accepted the payload.
    NotNeeded,
    /// Shipping failed and the buffer was dropped on purpose.
    Skipped,
    /// The buffer was written to the blob with this key.
    Persisted(String),
    /// The buffer could not be written anywhere and is lost.
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShipmentOutcome {
    /// Terminal status of the shipment.
    pub status: StatusCode,
    pub attempts: Vec<ShipmentAttempt>,
    pub backup: BackupOutcome,
}

impl ShipmentOutcome {
    fn without_attempts(status: StatusCode, backup: BackupOutcome) -> Self {
        ShipmentOutcome {
            status,
            attempts: Vec::new(),
            backup,
        }
    }

    /// Backoffs slept during the shipment, in order.
    pub fn backoffs(&self) -> Vec<Duration> {
        self.attempts.iter().filter_map(|a| a.backoff).collect()
    }
}

/// Returns whether a response with `status` is worth sending again.
///
/// Success and client errors that a retry cannot fix stop the loop; anything else,
/// including network failures, is retried.
pub fn should_retry(status: StatusCode) -> bool {
    !matches!(
        status,
        StatusCode::OK
            | StatusCode::BAD_REQUEST
            | StatusCode::UNAUTHORIZED
            | StatusCode::FORBIDDEN
            | StatusCode::NOT_FOUND
    )
}

/// gzip encodes `data`.
pub fn compress(data: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::with_capacity(data.len() / 4), Compression::default());
    encoder.write_all(data)?;
    encoder.finish()
}

pub struct Shipper {
    client: reqwest::Client,
}

impl Shipper {
    pub fn new(config: &OperatingConfig) -> Self {
        let client = build_client(config.https_proxy.as_deref(), config.request_timeout)
            .unwrap_or_else(|e| {
                error!(
                    "Unable to parse proxy configuration: {}, no proxy will be used",
                    e
                );
                reqwest::Client::new()
            });
        Shipper { client }
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Shipper { client }
    }

    /// Ships the buffer to `config.listener_url`, falling back to `backup` when the
    /// listener would not take it. The buffer is always empty afterwards.
    pub async fn ship(
        &self,
        buffer: &mut PendingBuffer,
        config: &OperatingConfig,
        backup: &dyn BackupWriter,
        log: &mut ExecutionLog,
    ) -> ShipmentOutcome {
        let outcome = self
            .ship_bytes(buffer.as_bytes(), config, backup, log)
            .await;
        buffer.clear();
        outcome
    }

    async fn ship_bytes(
        &self,
        raw: &[u8],
        config: &OperatingConfig,
        backup: &dyn BackupWriter,
        log: &mut ExecutionLog,
    ) -> ShipmentOutcome {
        let compressed = match compress(raw) {
            Ok(compressed) => Bytes::from(compressed),
            Err(e) => {
                log.error(format!(
                    "Failed to compress {} bytes, dropping them: {e}",
                    raw.len()
                ));
                return ShipmentOutcome::without_attempts(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    BackupOutcome::Skipped,
                );
            }
        };

        if compressed.len() > config.max_payload_bytes {
            log.error(format!(
                "Compressed bulk of {} bytes exceeds the {} bytes limit, cancelling shipment",
                compressed.len(),
                config.max_payload_bytes
            ));
            let backup_outcome = match config.oversized_payload_policy {
                OversizedPayloadPolicy::Drop => BackupOutcome::Skipped,
                OversizedPayloadPolicy::Backup => write_backup(raw, config, backup, log).await,
            };
            return ShipmentOutcome::without_attempts(
                StatusCode::PAYLOAD_TOO_LARGE,
                backup_outcome,
            );
        }

        let attempts = self.send_with_retry(compressed, raw.len(), config, log).await;
        let status = attempts
            .last()
            .map_or(StatusCode::INTERNAL_SERVER_ERROR, |a| a.status);

        let backup_outcome = if status == StatusCode::OK {
            BackupOutcome::NotNeeded
        } else {
            log.error(format!("Error sending logs, status code is: {}", status.as_u16()));
            log.info("Sending logs to backup storage");
            write_backup(raw, config, backup, log).await
        };

        ShipmentOutcome {
            status,
            attempts,
            backup: backup_outcome,
        }
    }

    async fn send_with_retry(
        &self,
        payload: Bytes,
        raw_len: usize,
        config: &OperatingConfig,
        log: &mut ExecutionLog,
    ) -> Vec<ShipmentAttempt> {
        let strategy = config.retry_strategy;
        let mut attempts = Vec::new();

        for attempt_index in 0..strategy.max_attempts.max(1) {
            let backoff = strategy.backoff_before(attempt_index);
            if let Some(backoff) = backoff {
                log.info(format!(
                    "Failed to send logs, trying again in {}",
                    format_duration(backoff)
                ));
                tokio::time::sleep(backoff).await;
            }

            log.info(format!(
                "Sending bulk of {} bytes ({raw_len} bytes uncompressed)",
                payload.len()
            ));
            let status = self.send(payload.clone(), config, log).await;
            attempts.push(ShipmentAttempt {
                status,
                attempt_index,
                backoff,
            });

            if !should_retry(status) {
                if status != StatusCode::OK {
                    log.error(format!(
                        "Got HTTP {} {}, skip retry",
                        status.as_u16(),
                        status.canonical_reason().unwrap_or("error")
                    ));
                }
                break;
            }
        }
        attempts
    }

    async fn send(
        &self,
        payload: Bytes,
        config: &OperatingConfig,
        log: &mut ExecutionLog,
    ) -> StatusCode {
        let url = format!("{}/", config.listener_url.trim_end_matches('/'));
        let time = Instant::now();
        let response = self
            .client
            .post(&url)
            .query(&[("token", config.token.as_str()), ("type", "eventhub")])
            .header(CONTENT_ENCODING, "gzip")
            .timeout(config.request_timeout)
            .body(payload)
            .send()
            .await;

        match response {
            Ok(response) => {
                let status = response.status();
                // drain the body so the connection can be reused
                if let Err(e) = response.bytes().await {
                    log.warn(format!("Error reading response body: {e}"));
                }
                debug!(
                    "Listener answered {} in {} ms",
                    status.as_u16(),
                    time.elapsed().as_millis()
                );
                log.info(format!("Response status code: {}", status.as_u16()));
                status
            }
            Err(e) => {
                let status = transport_failure_status(&e);
                // the token travels in the query string, keep it out of the trace
                log.error(format!(
                    "Error sending logs to {}: {}",
                    config.listener_url,
                    e.without_url()
                ));
                status
            }
        }
    }
}

async fn write_backup(
    raw: &[u8],
    config: &OperatingConfig,
    backup: &dyn BackupWriter,
    log: &mut ExecutionLog,
) -> BackupOutcome {
    match backup
        .persist(Bytes::copy_from_slice(raw), &config.backup_connection)
        .await
    {
        Ok(key) => {
            log.info(format!("Wrote {} bytes to backup blob {key}", raw.len()));
            BackupOutcome::Persisted(key)
        }
        Err(e) => {
            let message = format!(
                "Failed to write logs to backup storage, {} bytes were lost: {e}",
                raw.len()
            );
            log.error(message.clone());
            BackupOutcome::Failed(message)
        }
    }
}

fn format_duration(duration: Duration) -> String {
    if duration.subsec_nanos() == 0 {
        format!("{}s", duration.as_secs())
    } else {
        format!("{}ms", duration.as_millis())
    }
}
