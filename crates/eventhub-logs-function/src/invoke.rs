// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Azure Functions custom handler envelope.

use eventhub_logs::pipeline::InvocationResult;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

const RECORDS_KEY: &str = "records";

#[derive(Debug, thiserror::Error)]
pub enum InvokeError {
    #[error("Invalid invoke request: {0}")]
    Envelope(#[source] serde_json::Error),

    #[error("Invoke request has no \"records\" binding")]
    MissingRecords,

    #[error("Invalid event hub records: {0}")]
    Records(#[source] serde_json::Error),
}

/// Body the function host posts for an Event Hub trigger.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct InvokeRequest {
    #[serde(default)]
    pub data: Map<String, Value>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl InvokeRequest {
    pub fn parse(body: &[u8]) -> Result<Self, InvokeError> {
        serde_json::from_slice(body).map_err(InvokeError::Envelope)
    }

    /// Event Hub messages of the invocation. The host passes them either as a list
    /// or as a JSON encoded string of that list.
    pub fn into_records(mut self) -> Result<Vec<Value>, InvokeError> {
        match self.data.remove(RECORDS_KEY) {
            Some(Value::String(encoded)) => {
                serde_json::from_str(&encoded).map_err(InvokeError::Records)
            }
            Some(records) => serde_json::from_value(records).map_err(InvokeError::Records),
            None => Err(InvokeError::MissingRecords),
        }
    }
}

/// Body returned to the function host.
#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct InvokeResponse {
    pub outputs: Map<String, Value>,
    pub logs: Vec<String>,
    pub return_value: String,
}

impl From<InvocationResult> for InvokeResponse {
    fn from(result: InvocationResult) -> Self {
        let mut outputs = Map::new();
        outputs.insert("statusCode".to_string(), Value::from(result.status_code));
        InvokeResponse {
            outputs,
            logs: result.logs,
            return_value: result.message,
        }
    }
}
