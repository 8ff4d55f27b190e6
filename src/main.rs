//! csb-probe: a connection-reuse probe for the CSB1 protocol
//!
//! Opens one TCP connection and sends a sequence of requests on it, one at a
//! time, to find out exactly where the sequence stops:
//! - Every request answered
//! - Peer closed cleanly between requests (a per-connection cap at work)
//! - A broken, truncated, malformed, or late response
//!
//! Features:
//! - Echo, ping, and sysinfo requests
//! - Per-read/write and connect timeouts
//! - Optional pacing delay between requests
//! - Expected-cap verdict
//! - Configuration via CLI arguments or TOML file

mod config;
mod driver;
mod protocols;
mod report;
mod transport;

use bytes::Bytes;
use config::Config;
use driver::{CapVerdict, Driver, ExchangePlan, Termination};
use report::TracingReporter;
use std::process::ExitCode;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// Exit status for an interrupted run (128 + SIGINT).
const EXIT_INTERRUPTED: u8 = 130;

fn main() -> Result<ExitCode, Box<dyn std::error::Error>> {
    // Load configuration
    let config = Config::load()?;

    // Initialize logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    Ok(runtime.block_on(probe(config)))
}

/// Connect, run the sequence, and map the result to an exit status.
async fn probe(config: Config) -> ExitCode {
    info!(
        host = %config.host,
        port = config.port,
        count = config.count,
        kind = ?config.kind,
        delay_ms = config.delay.as_millis() as u64,
        timeout_ms = config.timeout.as_millis() as u64,
        "Connecting"
    );

    let stream = tokio::select! {
        result = transport::connect(&config.host, config.port, config.connect_timeout) => {
            match result {
                Ok(stream) => stream,
                Err(e) => {
                    error!(host = %config.host, port = config.port, error = %e, "Connect failed");
                    return ExitCode::FAILURE;
                }
            }
        }
        _ = interrupted() => {
            info!("Interrupted before connecting");
            return ExitCode::from(EXIT_INTERRUPTED);
        }
    };
    info!(
        count = config.count,
        "Connected, sending requests on one connection"
    );

    let plan = ExchangePlan {
        request_type: config.kind.message_type(),
        payload: Bytes::from(config.payload),
        count: config.count,
        delay: config.delay,
        io_timeout: config.timeout,
        max_payload: config.max_payload,
    };

    let mut reporter = TracingReporter::new(config.expect_cap);
    let mut driver = Driver::new(stream, plan);
    let report = driver.run(&mut reporter, interrupted()).await;

    let termination = report.termination();
    if termination == Termination::Interrupted {
        return ExitCode::from(EXIT_INTERRUPTED);
    }
    if let Some(cap) = config.expect_cap {
        return match report.cap_verdict(cap) {
            CapVerdict::Confirmed => ExitCode::SUCCESS,
            _ => ExitCode::FAILURE,
        };
    }
    match termination {
        Termination::Completed | Termination::PeerClosed => ExitCode::SUCCESS,
        Termination::Aborted(_) | Termination::Interrupted => ExitCode::FAILURE,
    }
}

/// Resolves on Ctrl-C. If the handler cannot be installed, never resolves.
async fn interrupted() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Cannot listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
}
