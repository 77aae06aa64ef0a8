// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use async_trait::async_trait;
use bytes::Bytes;
use eventhub_logs::{
    backup::BackupWriter,
    buffer::PendingBuffer,
    config::{OperatingConfig, OversizedPayloadPolicy, RetryStrategy},
    error::BackupError,
    execution_log::ExecutionLog,
    pipeline::Pipeline,
    shipper::{BackupOutcome, Shipper},
};
use mockito::{Matcher, Server};
use reqwest::StatusCode;
use serde_json::json;
use std::sync::{Arc, Mutex};
use std::time::Duration;

const TOKEN: &str = "abcdefghijklmnopqrstuvwxyzABCDEF";

/// Remembers every upload instead of talking to blob storage.
#[derive(Default)]
struct RecordingBackupWriter {
    uploads: Mutex<Vec<(Bytes, String)>>,
}

#[async_trait]
impl BackupWriter for RecordingBackupWriter {
    async fn persist(&self, raw: Bytes, connection: &str) -> Result<String, BackupError> {
        let mut uploads = self.uploads.lock().unwrap();
        uploads.push((raw, connection.to_string()));
        Ok(format!("logsbackup-{}", uploads.len()))
    }
}

impl RecordingBackupWriter {
    fn upload_count(&self) -> usize {
        self.uploads.lock().unwrap().len()
    }
}

fn test_config(listener_url: String, initial_backoff: Duration) -> OperatingConfig {
    OperatingConfig {
        token: TOKEN.to_string(),
        listener_url,
        debug: None,
        backup_connection: "UseDevelopmentStorage=true".to_string(),
        https_proxy: None,
        request_timeout: Duration::from_secs(5),
        retry_strategy: RetryStrategy {
            max_attempts: 4,
            initial_backoff,
        },
        max_payload_bytes: 10_000_000,
        oversized_payload_policy: OversizedPayloadPolicy::Drop,
    }
}

fn listener_query() -> Matcher {
    Matcher::AllOf(vec![
        Matcher::UrlEncoded("token".into(), TOKEN.into()),
        Matcher::UrlEncoded("type".into(), "eventhub".into()),
    ])
}

#[tokio::test]
async fn test_terminal_status_is_returned_and_buffer_cleared() {
    for code in [413_usize, 400, 500, 200, 403, 404] {
        let retried = matches!(code, 413 | 500);
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/")
            .match_query(listener_query())
            .match_header("Content-Encoding", "gzip")
            .with_status(code)
            .expect(if retried { 4 } else { 1 })
            .create_async()
            .await;

        let config = test_config(server.url(), Duration::from_millis(1));
        let backup = RecordingBackupWriter::default();
        let mut buffer = PendingBuffer::new();
        buffer.write(&vec![0_u8; 100]).unwrap();
        let mut log = ExecutionLog::new();

        let outcome = Shipper::new(&config)
            .ship(&mut buffer, &config, &backup, &mut log)
            .await;

        assert_eq!(outcome.status.as_u16() as usize, code);
        assert_eq!(buffer.len(), 0);
        assert_eq!(outcome.attempts.len(), if retried { 4 } else { 1 });
        if code == 200 {
            assert_eq!(outcome.backup, BackupOutcome::NotNeeded);
            assert_eq!(backup.upload_count(), 0);
        } else {
            assert!(matches!(outcome.backup, BackupOutcome::Persisted(_)));
            assert_eq!(backup.upload_count(), 1);
        }
        mock.assert_async().await;
    }
}

#[tokio::test]
async fn test_retries_with_exponential_backoff_until_success() {
    let mut server = Server::new_async().await;
    let failing = server
        .mock("POST", "/")
        .match_query(listener_query())
        .with_status(500)
        .expect(3)
        .create_async()
        .await;
    let succeeding = server
        .mock("POST", "/")
        .match_query(listener_query())
        .with_status(200)
        .expect(1)
        .create_async()
        .await;

    let backup = Arc::new(RecordingBackupWriter::default());
    let pipeline = Pipeline::new(
        test_config(server.url(), Duration::from_millis(2)),
        backup.clone(),
    );

    let result = pipeline
        .run(vec![
            json!({"message": "one"}),
            json!({"message": "two"}),
            json!({"message": "three"}),
        ])
        .await;

    assert_eq!(result.status_code, 200);
    assert_eq!(result.message, "Finished sending logs successfully");
    let retries: Vec<&String> = result
        .logs
        .iter()
        .filter(|entry| entry.starts_with("Failed to send logs, trying again in"))
        .collect();
    assert_eq!(
        retries,
        vec![
            "Failed to send logs, trying again in 2ms",
            "Failed to send logs, trying again in 4ms",
            "Failed to send logs, trying again in 8ms",
        ]
    );
    assert_eq!(backup.upload_count(), 0);
    failing.assert_async().await;
    succeeding.assert_async().await;
}

#[tokio::test]
async fn test_backoff_durations_are_recorded_per_attempt() {
    let mut server = Server::new_async().await;
    let failing = server
        .mock("POST", "/")
        .match_query(listener_query())
        .with_status(503)
        .expect(4)
        .create_async()
        .await;

    let config = test_config(server.url(), Duration::from_millis(2));
    let backup = RecordingBackupWriter::default();
    let mut buffer = PendingBuffer::new();
    buffer.write(&json!({"message": "hello"})).unwrap();
    let mut log = ExecutionLog::new();

    let outcome = Shipper::new(&config)
        .ship(&mut buffer, &config, &backup, &mut log)
        .await;

    assert_eq!(outcome.status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(
        outcome
            .attempts
            .iter()
            .map(|a| a.attempt_index)
            .collect::<Vec<_>>(),
        vec![0, 1, 2, 3]
    );
    assert_eq!(
        outcome.backoffs(),
        vec![
            Duration::from_millis(2),
            Duration::from_millis(4),
            Duration::from_millis(8),
        ]
    );
    assert_eq!(backup.upload_count(), 1);
    failing.assert_async().await;
}

#[tokio::test]
async fn test_unauthorized_is_not_retried_and_backed_up_once() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("POST", "/")
        .match_query(listener_query())
        .with_status(401)
        .expect(1)
        .create_async()
        .await;

    let backup = Arc::new(RecordingBackupWriter::default());
    let pipeline = Pipeline::new(
        test_config(server.url(), Duration::from_millis(2)),
        backup.clone(),
    );

    let result = pipeline
        .run(vec![json!({"records": [{"a": 1}, {"b": 2}]})])
        .await;

    assert_eq!(result.status_code, 401);
    assert!(result
        .logs
        .iter()
        .all(|entry| !entry.starts_with("Failed to send logs, trying again")));
    assert!(result
        .logs
        .contains(&"Got HTTP 401 Unauthorized, skip retry".to_string()));
    assert_eq!(
        result.message,
        "Failed to send logs (status 401), logs were written to backup blob logsbackup-1"
    );

    let uploads = backup.uploads.lock().unwrap();
    assert_eq!(uploads.len(), 1);
    assert_eq!(uploads[0].0, Bytes::from_static(b"{\"a\":1}\n{\"b\":2}\n"));
    assert_eq!(uploads[0].1, "UseDevelopmentStorage=true");
    mock.assert_async().await;
}
