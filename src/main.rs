//! # Heartbeat Link
//!
//! Receive heartbeat telemetry from remote broadcast receivers.
//!
//! This application listens on the return link, decodes every burst of
//! heartbeat datagrams, and appends the decoded heartbeats to JSONL files.

use anyhow::Result;
use chrono::Utc;
use tracing::{debug, error, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

use heartbeat_link::codec::decoder::{decode_stream_now, ShortDatagramPolicy};
use heartbeat_link::config::{Config, LoggingConfig};
use heartbeat_link::serial::HeartbeatLink;
use heartbeat_link::telemetry::JsonlWriter;

/// Configuration file used when none is given on the command line
const DEFAULT_CONFIG_PATH: &str = "config/default.toml";

/// Number of decoded heartbeats between status log messages
const LOG_INTERVAL_HEARTBEATS: u64 = 100;

/// Running totals for status logging
#[derive(Debug, Default)]
struct ReceiveStats {
    bursts: u64,
    heartbeats: u64,
    discarded_bursts: u64,
    skipped_spans: u64,
    last_logged: u64,
}

/// Main entry point for Heartbeat Link
///
/// # Control Flow
///
/// 1. **Initialization**
///    - Load configuration (first argument, default `config/default.toml`)
///    - Set up logging (console, plus daily-rolling files when configured)
///    - Open the return link serial port
///    - Open the JSONL heartbeat sink when telemetry is enabled
///
/// 2. **Main Loop**
///    - Wait for the next burst of bytes on the link
///    - Decode it with the configured short-datagram policy
///    - Persist decoded heartbeats; log and drop malformed bursts
///    - Handle Ctrl+C for graceful shutdown
///
/// 3. **Graceful Shutdown**
///    - Flush the heartbeat sink
///    - Log totals
///
/// # Errors
///
/// Returns error if:
/// - The configuration cannot be loaded
/// - The serial port cannot be opened
/// - The heartbeat log directory cannot be created
///
/// # Examples
///
/// ```bash
/// cargo run --release -- config/default.toml
/// ```
#[tokio::main]
async fn main() -> Result<()> {
    let config_path = config_path(std::env::args());
    let config = Config::load(&config_path)?;

    let _log_guard = init_logging(&config.logging);

    info!("Heartbeat Link v{} starting...", env!("CARGO_PKG_VERSION"));
    info!("Loaded configuration from {}", config_path);

    let mut link = HeartbeatLink::open(&config.link)?;
    info!("Listening for heartbeats on {}", link.device_path());

    let mut sink = if config.telemetry.enabled {
        Some(JsonlWriter::new(&config.telemetry)?)
    } else {
        info!("Heartbeat persistence disabled");
        None
    };

    let policy = config.decoder.short_datagram_policy;
    let mut stats = ReceiveStats::default();

    info!("Press Ctrl+C to exit");

    loop {
        tokio::select! {
            burst = link.read_burst() => {
                match burst {
                    Ok(Some(bytes)) => handle_burst(&bytes, policy, sink.as_mut(), &mut stats),
                    Ok(None) => {
                        info!("Return link closed");
                        break;
                    }
                    Err(e) => {
                        error!("Return link failed: {}", e);
                        break;
                    }
                }
            }

            _ = tokio::signal::ctrl_c() => {
                info!("Received Ctrl+C, shutting down...");
                break;
            }
        }
    }

    if let Some(sink) = sink.as_mut() {
        sink.flush()?;
    }

    info!(
        "Total: {} bursts, {} heartbeats, {} bursts discarded, {} spans skipped",
        stats.bursts, stats.heartbeats, stats.discarded_bursts, stats.skipped_spans
    );

    Ok(())
}

/// Configuration path from the command line (program name first)
fn config_path(args: impl IntoIterator<Item = String>) -> String {
    args.into_iter()
        .nth(1)
        .unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string())
}

/// Initialize the tracing subscriber
///
/// The returned guard must live until shutdown so buffered file output is flushed.
fn init_logging(config: &LoggingConfig) -> Option<WorkerGuard> {
    let filter = EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into());
    let registry = tracing_subscriber::registry().with(filter).with(fmt::layer());

    match &config.log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, &config.file_prefix);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            registry
                .with(fmt::layer().with_writer(writer).with_ansi(false))
                .init();
            Some(guard)
        }
        None => {
            registry.init();
            None
        }
    }
}

/// Decode one received burst and persist its heartbeats
fn handle_burst(
    bytes: &[u8],
    policy: ShortDatagramPolicy,
    sink: Option<&mut JsonlWriter>,
    stats: &mut ReceiveStats,
) {
    stats.bursts += 1;

    let decoded = match decode_stream_now(bytes, policy) {
        Ok(decoded) => decoded,
        Err(e) => {
            warn!("Discarding {} byte burst: {}", bytes.len(), e);
            stats.discarded_bursts += 1;
            return;
        }
    };

    for span in &decoded.skipped {
        warn!("Skipped short datagram at bit {} ({} bits)", span.offset, span.bits);
    }
    stats.skipped_spans += decoded.skipped.len() as u64;

    debug!("Decoded {} heartbeats from {} byte burst", decoded.heartbeats.len(), bytes.len());
    stats.heartbeats += decoded.heartbeats.len() as u64;

    if let Some(sink) = sink {
        if let Err(e) = sink.write_batch(&decoded.heartbeats, Utc::now()) {
            error!("Failed to persist heartbeats: {}", e);
        }
    }

    if stats.heartbeats - stats.last_logged >= LOG_INTERVAL_HEARTBEATS {
        info!("Received {} heartbeats in {} bursts", stats.heartbeats, stats.bursts);
        stats.last_logged = stats.heartbeats;
    }
}
