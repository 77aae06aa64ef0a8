// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

/// Errors raised while resolving the operating configuration. Checked before any I/O.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Shipping token must be provided and contain at least 32 contiguous letters")]
    InvalidToken,

    #[error("{}", invalid_endpoint_message(.0.as_deref()))]
    InvalidEndpoint(Option<String>),

    #[error("Back up storage connection string must be provided")]
    MissingBackupConfig,
}

fn invalid_endpoint_message(url: Option<&str>) -> String {
    match url {
        Some(url) => format!("Listener url '{url}' is not a known ingestion endpoint"),
        None => "Listener url must be provided".to_string(),
    }
}

/// Per-record failure while turning a decoded record into a buffer line.
#[derive(Debug, thiserror::Error)]
pub enum SerializationError {
    #[error("Error getting record bytes: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("Error writing record bytes to buffer: {0}")]
    Append(#[from] std::io::Error),

    #[error("Malformed record: {0}")]
    Malformed(String),
}

/// Failure of the last-resort upload to the backup container.
#[derive(Debug, thiserror::Error)]
pub enum BackupError {
    #[error("Invalid backup storage connection string: {0}")]
    InvalidConnectionString(String),

    #[error("Failed to connect to backup storage: {0}")]
    Connection(#[source] object_store::Error),

    #[error("Failed to upload backup blob {key}: {source}")]
    Upload {
        key: String,
        #[source]
        source: object_store::Error,
    },
}
