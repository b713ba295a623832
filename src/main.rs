// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! `cdc-forwarder` binary.
//!
//! Reads configuration from the environment, forwards until SIGINT/SIGTERM,
//! and exits:
//!
//! | Code | When |
//! |------|------|
//! | 0 | Stopped by signal, or the source ended the stream |
//! | 1 | Missing or invalid configuration (nothing was contacted) |
//! | 2 | Fatal connection or stream error |
//! | 130 | Second stop signal before cleanup finished |

use cdc_forwarder::coordinator::listen_for_signals;
use cdc_forwarder::{
    ForwarderConfig, ForwarderError, MongoBackend, ReplicationCoordinator, ShutdownSignal,
};
use std::process::ExitCode;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

const EXIT_CONFIG: u8 = 1;
const EXIT_FATAL: u8 = 2;
const EXIT_FORCED: i32 = 130;

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();

    let config = ForwarderConfig::from_env();
    if let Err(e) = config.validate() {
        error!(error = %e, "Invalid configuration");
        return ExitCode::from(EXIT_CONFIG);
    }

    let shutdown = ShutdownSignal::new();
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            match listen_for_signals(shutdown).await {
                Ok(()) => {
                    error!("Exiting without waiting for cleanup");
                    std::process::exit(EXIT_FORCED);
                }
                Err(e) => warn!(error = %e, "Failed to install signal handlers"),
            }
        });
    }

    let mut coordinator = ReplicationCoordinator::new(&config, MongoBackend::new());

    match coordinator.start_until(&shutdown).await {
        Ok(()) => {}
        Err(ForwarderError::Shutdown) => {
            coordinator.shutdown().await;
            info!("Forwarder stopped before it started");
            return ExitCode::SUCCESS;
        }
        Err(e) => {
            coordinator.shutdown().await;
            error!(error = %e, "Forwarder failed to start");
            return ExitCode::from(EXIT_FATAL);
        }
    }

    match coordinator.run(&shutdown).await {
        Ok(summary) => {
            info!(
                events = summary.events_processed,
                writes_failed = summary.writes_failed,
                last_cursor = ?summary.last_cursor.map(|c| c.to_string()),
                "Forwarder stopped"
            );
            ExitCode::SUCCESS
        }
        Err(e) => {
            let summary = coordinator.summary();
            error!(
                error = %e,
                events = summary.events_processed,
                writes_failed = summary.writes_failed,
                "Forwarder failed"
            );
            ExitCode::from(EXIT_FATAL)
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}
