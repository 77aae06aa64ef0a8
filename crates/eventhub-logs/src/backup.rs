// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Last resort storage for buffers the listener would not take.
//!
//! Blobs are written once into the `logsbackup` container and never read back
//! by this crate.

use async_trait::async_trait;
use bytes::Bytes;
use object_store::azure::{MicrosoftAzure, MicrosoftAzureBuilder};
use object_store::path::Path;
use object_store::{ObjectStore, PutPayload};
use tracing::debug;
use uuid::Uuid;

use crate::error::BackupError;

pub const BACKUP_CONTAINER: &str = "logsbackup";

const DEFAULT_ENDPOINT_SUFFIX: &str = "core.windows.net";

#[async_trait]
pub trait BackupWriter: Send + Sync {
    /// Uploads `raw` as a new blob and returns its key.
    async fn persist(&self, raw: Bytes, connection: &str) -> Result<String, BackupError>;
}

/// Writes backups to Azure Blob Storage, connecting with a storage account connection string.
#[derive(Debug, Default, Clone, Copy)]
pub struct AzureBlobBackupWriter;

#[async_trait]
impl BackupWriter for AzureBlobBackupWriter {
    async fn persist(&self, raw: Bytes, connection: &str) -> Result<String, BackupError> {
        let connection = StorageConnection::parse(connection)?;
        let store = connection.connect()?;
        upload(&store, raw).await
    }
}

/// Key of a new backup blob: the container name and a random integer.
pub fn backup_key() -> String {
    format!("{BACKUP_CONTAINER}-{}", Uuid::new_v4().as_u128())
}

/// Puts `raw` under a fresh [`backup_key`] in `store`.
pub async fn upload(store: &dyn ObjectStore, raw: Bytes) -> Result<String, BackupError> {
    let key = backup_key();
    let size = raw.len();
    store
        .put(&Path::from(key.as_str()), PutPayload::from(raw))
        .await
        .map_err(|source| BackupError::Upload {
            key: key.clone(),
            source,
        })?;
    debug!("Uploaded {size} bytes to backup blob {key}");
    Ok(key)
}

/// The parts of an Azure storage connection string needed to reach blob storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageConnection {
    pub account: Option<String>,
    pub access_key: Option<String>,
    pub blob_endpoint: Option<String>,
    pub use_emulator: bool,
}

impl StorageConnection {
    pub fn parse(connection: &str) -> Result<Self, BackupError> {
        let mut account = None;
        let mut access_key = None;
        let mut blob_endpoint = None;
        let mut protocol = "https".to_string();
        let mut endpoint_suffix = DEFAULT_ENDPOINT_SUFFIX.to_string();
        let mut use_emulator = false;

        for pair in connection.split(';').map(str::trim).filter(|p| !p.is_empty()) {
            // keys are base64 and may end with '=', only split on the first one
            let Some((key, value)) = pair.split_once('=') else {
                return Err(BackupError::InvalidConnectionString(format!(
                    "expected key=value, got {pair:?}"
                )));
            };
            match key.trim() {
                "AccountName" => account = Some(value.to_string()),
                "AccountKey" => access_key = Some(value.to_string()),
                "BlobEndpoint" => blob_endpoint = Some(value.trim_end_matches('/').to_string()),
                "DefaultEndpointsProtocol" => protocol = value.to_string(),
                "EndpointSuffix" => endpoint_suffix = value.to_string(),
                "UseDevelopmentStorage" => use_emulator = value.eq_ignore_ascii_case("true"),
                _ => {}
            }
        }

        if use_emulator {
            return Ok(StorageConnection {
                account,
                access_key,
                blob_endpoint,
                use_emulator,
            });
        }

        let Some(account_name) = account.as_deref() else {
            return Err(BackupError::InvalidConnectionString(
                "missing AccountName".to_string(),
            ));
        };
        if access_key.is_none() {
            return Err(BackupError::InvalidConnectionString(
                "missing AccountKey".to_string(),
            ));
        }
        if blob_endpoint.is_none()
            && (endpoint_suffix != DEFAULT_ENDPOINT_SUFFIX || protocol != "https")
        {
            blob_endpoint = Some(format!("{protocol}://{account_name}.blob.{endpoint_suffix}"));
        }

        Ok(StorageConnection {
            account,
            access_key,
            blob_endpoint,
            use_emulator,
        })
    }

    pub fn connect(&self) -> Result<MicrosoftAzure, BackupError> {
        let mut builder = MicrosoftAzureBuilder::new()
            .with_container_name(BACKUP_CONTAINER)
            .with_use_emulator(self.use_emulator);
        if let Some(account) = &self.account {
            builder = builder.with_account(account);
        }
        if let Some(access_key) = &self.access_key {
            builder = builder.with_access_key(access_key);
        }
        if let Some(endpoint) = &self.blob_endpoint {
            builder = builder
                .with_allow_http(endpoint.starts_with("http://"))
                .with_endpoint(endpoint.clone());
        }
        builder.build().map_err(BackupError::Connection)
    }
}
