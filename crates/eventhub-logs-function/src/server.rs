// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use bytes::Bytes;
use eventhub_logs::backup::BackupWriter;
use eventhub_logs::pipeline::handle_invocation;
use http_body_util::{BodyExt, Full};
use hyper::body::Body;
use hyper::header::CONTENT_TYPE;
use hyper::service::service_fn;
use hyper::{http, Method, Request, Response, StatusCode};
use serde_json::json;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info};

use crate::invoke::{InvokeError, InvokeRequest, InvokeResponse};

pub const LOGS_FUNCTION_PATH: &str = "/logs-function";

/// Environment lookup used to build each invocation's configuration.
pub type EnvLookup = Arc<dyn Fn(&str) -> Option<String> + Send + Sync>;

pub type HttpResponse = Response<Full<Bytes>>;

/// HTTP worker the function host forwards Event Hub triggers to.
#[derive(Clone)]
pub struct FunctionServer {
    pub backup: Arc<dyn BackupWriter>,
    pub env: EnvLookup,
}

impl FunctionServer {
    pub async fn serve(&self, addr: SocketAddr) -> Result<(), Box<dyn std::error::Error>> {
        let listener = tokio::net::TcpListener::bind(&addr).await?;
        info!("Listening on {addr}");

        let server = hyper::server::conn::http1::Builder::new();
        let mut joinset = tokio::task::JoinSet::new();

        loop {
            let conn = tokio::select! {
                con_res = listener.accept() => match con_res {
                    Err(e)
                        if matches!(
                            e.kind(),
                            io::ErrorKind::ConnectionAborted
                                | io::ErrorKind::ConnectionReset
                                | io::ErrorKind::ConnectionRefused
                        ) =>
                    {
                        continue;
                    }
                    Err(e) => {
                        error!("Server error: {e}");
                        return Err(e.into());
                    }
                    Ok((conn, _)) => conn,
                },
                finished = async {
                    match joinset.join_next().await {
                        Some(finished) => finished,
                        None => std::future::pending().await,
                    }
                } => match finished {
                    Err(e) if e.is_panic() => {
                        error!("Connection handler panicked: {:?}", e);
                        continue;
                    },
                    Ok(()) | Err(_) => continue,
                },
            };
            let conn = hyper_util::rt::TokioIo::new(conn);
            let server = server.clone();
            let handler = self.clone();
            let service = service_fn(move |req| {
                let handler = handler.clone();
                async move { handler.handle(req).await }
            });
            joinset.spawn(async move {
                if let Err(e) = server.serve_connection(conn, service).await {
                    error!("Connection error: {e}");
                }
            });
        }
    }

    pub async fn handle<B>(&self, req: Request<B>) -> http::Result<HttpResponse>
    where
        B: Body,
        B::Error: std::fmt::Display,
    {
        match (req.method(), req.uri().path()) {
            (&Method::POST, LOGS_FUNCTION_PATH) => {
                let body = match req.into_body().collect().await {
                    Ok(collected) => collected.to_bytes(),
                    Err(e) => {
                        return log_and_create_http_response(
                            &format!("Error reading invoke request: {e}"),
                            StatusCode::BAD_REQUEST,
                        )
                    }
                };
                self.invoke(&body).await
            }
            (_, LOGS_FUNCTION_PATH) => log_and_create_http_response(
                "Only POST is supported",
                StatusCode::METHOD_NOT_ALLOWED,
            ),
            _ => {
                let mut not_found = Response::default();
                *not_found.status_mut() = StatusCode::NOT_FOUND;
                Ok(not_found)
            }
        }
    }

    async fn invoke(&self, body: &[u8]) -> http::Result<HttpResponse> {
        let now = Instant::now();
        let records = match InvokeRequest::parse(body).and_then(InvokeRequest::into_records) {
            Ok(records) => records,
            Err(e @ InvokeError::Records(_)) => {
                return log_and_create_http_response(
                    &e.to_string(),
                    StatusCode::INTERNAL_SERVER_ERROR,
                )
            }
            Err(e) => return log_and_create_http_response(&e.to_string(), StatusCode::BAD_REQUEST),
        };

        let env = Arc::clone(&self.env);
        let result = handle_invocation(
            move |key: &str| (*env)(key),
            records,
            Arc::clone(&self.backup),
        )
        .await;
        debug!(
            "Invocation ended with status {} in {} ms",
            result.status_code,
            now.elapsed().as_millis()
        );

        let body = match serde_json::to_vec(&InvokeResponse::from(result)) {
            Ok(body) => body,
            Err(e) => {
                return log_and_create_http_response(
                    &format!("Error encoding invoke response: {e}"),
                    StatusCode::INTERNAL_SERVER_ERROR,
                )
            }
        };
        Response::builder()
            .status(StatusCode::OK)
            .header(CONTENT_TYPE, "application/json")
            .body(Full::new(Bytes::from(body)))
    }
}

/// Logs `message` and returns it as `{"message": ...}` with the given status.
pub fn log_and_create_http_response(
    message: &str,
    status: StatusCode,
) -> http::Result<HttpResponse> {
    if status.is_success() {
        debug!("{message}");
    } else {
        error!("{message}");
    }
    let body = json!({ "message": message }).to_string();
    Response::builder()
        .status(status)
        .header(CONTENT_TYPE, "application/json")
        .body(Full::new(Bytes::from(body)))
}
