// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

mod invoke;
mod server;

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::{env, sync::Arc};
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

use eventhub_logs::backup::AzureBlobBackupWriter;
use eventhub_logs::config::DEBUG_ENV;

use crate::server::FunctionServer;

const DEFAULT_WORKER_PORT: u16 = 8080;
const WORKER_HOST: IpAddr = IpAddr::V4(Ipv4Addr::UNSPECIFIED);

#[tokio::main]
pub async fn main() {
    let debug = env::var(DEBUG_ENV)
        .map(|val| val.trim().eq_ignore_ascii_case("true"))
        .unwrap_or(false);
    let log_level = env::var("LOG_LEVEL")
        .map(|val| val.to_lowercase())
        .unwrap_or_else(|_| if debug { "debug" } else { "info" }.to_string());

    let env_filter = format!("h2=off,hyper=off,rustls=off,{}", log_level);

    #[allow(clippy::expect_used)]
    let subscriber = tracing_subscriber::fmt::Subscriber::builder()
        .with_env_filter(
            EnvFilter::try_new(env_filter).expect("could not parse log level in configuration"),
        )
        .with_level(true)
        .with_thread_names(false)
        .with_thread_ids(false)
        .with_line_number(false)
        .with_file(false)
        .with_target(true)
        .without_time()
        .finish();

    #[allow(clippy::expect_used)]
    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    debug!("Logging subsystem enabled");

    // the custom handler variable replaced the http worker one, accept both
    let port = env::var("FUNCTIONS_CUSTOMHANDLER_PORT")
        .or_else(|_| env::var("FUNCTIONS_HTTPWORKER_PORT"))
        .ok()
        .and_then(|port| match port.parse::<u16>() {
            Ok(port) => Some(port),
            Err(e) => {
                error!("Invalid worker port {port:?}: {e}, using {DEFAULT_WORKER_PORT}");
                None
            }
        })
        .unwrap_or(DEFAULT_WORKER_PORT);

    let server = FunctionServer {
        backup: Arc::new(AzureBlobBackupWriter),
        // configuration is re-read from the environment on every invocation
        env: Arc::new(|key: &str| env::var(key).ok()),
    };

    info!("Starting Event Hub logs function on port {port}");
    if let Err(e) = server.serve(SocketAddr::new(WORKER_HOST, port)).await {
        error!("Event Hub logs function stopped: {e}");
    }
}
