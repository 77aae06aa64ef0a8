// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use reqwest::StatusCode;
use serde_json::Value;
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;

use crate::backup::BackupWriter;
use crate::buffer::PendingBuffer;
use crate::config::OperatingConfig;
use crate::execution_log::ExecutionLog;
use crate::record::extract;
use crate::shipper::{BackupOutcome, Shipper, ShipmentOutcome};

/// Outcome of one invocation, handed back to the function host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvocationResult {
    pub status_code: u16,
    pub logs: Vec<String>,
    pub message: String,
}

/// Buffer, ship and, if needed, back up one batch of Event Hub records.
pub struct Pipeline {
    config: OperatingConfig,
    shipper: Shipper,
    backup: Arc<dyn BackupWriter>,
    buffer: PendingBuffer,
    log: ExecutionLog,
}

impl Pipeline {
    pub fn new(config: OperatingConfig, backup: Arc<dyn BackupWriter>) -> Self {
        let shipper = Shipper::new(&config);
        Pipeline::with_shipper(config, shipper, backup)
    }

    pub fn with_shipper(
        config: OperatingConfig,
        shipper: Shipper,
        backup: Arc<dyn BackupWriter>,
    ) -> Self {
        Pipeline {
            config,
            shipper,
            backup,
            buffer: PendingBuffer::new(),
            log: ExecutionLog::new(),
        }
    }

    pub async fn run(mut self, records: Vec<Value>) -> InvocationResult {
        let now = Instant::now();
        if self.config.debug_enabled() {
            // the batch can be large, keep it out of the trace returned to the host
            match serde_json::to_string(&records) {
                Ok(data) => debug!("debug: request data: {data}"),
                Err(e) => debug!("debug: request data not printable: {e}"),
            }
            self.log.debug(format!("debug: received {} event hub messages", records.len()));
        }

        let received = records.len();
        let extracted = extract(records, &mut self.buffer, &mut self.log);
        self.log.info(format!(
            "Extracted {extracted} log records from {received} event hub messages"
        ));

        if self.buffer.is_empty() {
            self.log.info("No log records to ship");
            return InvocationResult {
                status_code: StatusCode::OK.as_u16(),
                logs: self.log.into_entries(),
                message: "No logs to send".to_string(),
            };
        }

        let outcome = self
            .shipper
            .ship(
                &mut self.buffer,
                &self.config,
                self.backup.as_ref(),
                &mut self.log,
            )
            .await;
        self.log.debug(format!(
            "Invocation finished in {} ms",
            now.elapsed().as_millis()
        ));

        InvocationResult {
            status_code: outcome.status.as_u16(),
            message: summarize(&outcome),
            logs: self.log.into_entries(),
        }
    }
}

fn summarize(outcome: &ShipmentOutcome) -> String {
    let status = outcome.status.as_u16();
    match &outcome.backup {
        BackupOutcome::NotNeeded => "Finished sending logs successfully".to_string(),
        BackupOutcome::Persisted(key) => {
            format!("Failed to send logs (status {status}), logs were written to backup blob {key}")
        }
        BackupOutcome::Skipped => format!("Failed to send logs (status {status}), logs were dropped"),
        BackupOutcome::Failed(_) => {
            format!("Failed to send logs (status {status}) and to back them up, logs were lost")
        }
    }
}

/// Runs one invocation end to end: validates the configuration found through
/// `lookup`, then ships `records`. Invalid configuration ends the invocation
/// with a 400 before any network activity.
pub async fn handle_invocation<F>(
    lookup: F,
    records: Vec<Value>,
    backup: Arc<dyn BackupWriter>,
) -> InvocationResult
where
    F: Fn(&str) -> Option<String>,
{
    match OperatingConfig::validate(lookup) {
        Ok(config) => Pipeline::new(config, backup).run(records).await,
        Err(e) => {
            let mut log = ExecutionLog::new();
            log.error(format!("Invalid configuration: {e}"));
            InvocationResult {
                status_code: StatusCode::BAD_REQUEST.as_u16(),
                logs: log.into_entries(),
                message: e.to_string(),
            }
        }
    }
}
