// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Druckpost — print relay daemon.
//
// Entry point.  Initialises logging, loads `printer.config`, starts the relay
// and feeds it newline-delimited JSON payloads from stdin until a shutdown
// signal arrives.  The broker client is expected to write each message it
// receives as one line on our stdin.

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use druckpost_core::config::RelayConfig;
use druckpost_core::error::DruckpostError;
use druckpost_relay::{IngestAdapter, LinkStatus, RelayService};

/// Druckpost - relay print jobs to a receipt printer
#[derive(Parser, Debug)]
#[command(name = "druckpost")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// KEY=VALUE configuration file
    #[arg(long, value_name = "FILE", default_value = "printer.config")]
    config: PathBuf,

    /// Log filter used when RUST_LOG is not set
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&cli.log_level)),
        )
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), "Druckpost starting");

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(e) => {
            error!(error = %e, "failed to start async runtime");
            return ExitCode::FAILURE;
        }
    };
    let code = runtime.block_on(run(cli));
    // A pending stdin read cannot be cancelled; do not wait for it.
    runtime.shutdown_timeout(Duration::from_secs(1));
    code
}

async fn run(cli: Cli) -> ExitCode {
    let service = match RelayConfig::load(&cli.config).and_then(|c| RelayService::from_config(&c)) {
        Ok(service) => service,
        Err(e) => {
            error!(error = %e, config = %cli.config.display(), "startup failed");
            return ExitCode::FAILURE;
        }
    };

    let reader = spawn_stdin_source(service.ingest(), service.upstream());

    shutdown_signal().await;
    reader.abort();

    match service.stop().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "shutdown failed");
            ExitCode::FAILURE
        }
    }
}

/// Read one JSON payload per line from stdin.  The upstream link is up for
/// as long as stdin stays open.
fn spawn_stdin_source(ingest: IngestAdapter, upstream: LinkStatus) -> JoinHandle<()> {
    tokio::spawn(async move {
        upstream.set_connected(true);
        let mut lines = BufReader::new(tokio::io::stdin()).lines();

        loop {
            let line = match lines.next_line().await {
                Ok(Some(line)) => line,
                Ok(None) => {
                    info!("stdin closed");
                    break;
                }
                Err(e) => {
                    error!(error = %e, "reading stdin failed");
                    break;
                }
            };
            if line.trim().is_empty() {
                continue;
            }

            match ingest.handle_payload(line.as_bytes()).await {
                Ok(id) => debug!(job_id = %id, "payload accepted"),
                Err(DruckpostError::ShuttingDown) => break,
                // Already logged by the adapter.
                Err(_) => {}
            }
        }

        upstream.set_connected(false);
    })
}

/// Wait for Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received Ctrl+C, shutting down"),
        _ = terminate => info!("received SIGTERM, shutting down"),
    }
}
