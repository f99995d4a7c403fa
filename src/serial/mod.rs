//! # Serial Link Module
//!
//! Receives heartbeat streams from the return link.
//!
//! This module handles:
//! - Opening the serial port (8N1) at the configured baud rate
//! - Collecting received bytes into bursts separated by idle gaps
//! - Capping burst size so a chattering link cannot grow the buffer unbounded
//! - Cutting capped bursts on a datagram boundary
//!
//! Reconnection after a link failure is left to the caller.

use std::time::Duration;

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::time::timeout;
use tokio_serial::SerialPortBuilderExt;
use tracing::{debug, info, warn};

use crate::codec::decoder::find_markers;
use crate::codec::protocol::{DATAGRAM_BYTES, END_MARKER, MARKER_BYTES};
use crate::config::LinkConfig;
use crate::error::{HeartbeatError, Result};

/// Bytes requested from the reader per read call
const READ_CHUNK_BYTES: usize = 256;

/// Heartbeat return link
///
/// Wraps any async byte source; in production that is a serial port opened
/// with [`HeartbeatLink::open`].
pub struct HeartbeatLink<R> {
    /// Byte source
    reader: R,
    /// Device path (e.g., /dev/ttyUSB0)
    device_path: String,
    /// Silence that closes a burst
    idle_timeout: Duration,
    /// Largest burst handed to the decoder
    max_burst_bytes: usize,
    /// Bytes received for the burst in progress
    buffer: BytesMut,
}

impl<R> std::fmt::Debug for HeartbeatLink<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HeartbeatLink")
            .field("device_path", &self.device_path)
            .field("idle_timeout", &self.idle_timeout)
            .field("buffered", &self.buffer.len())
            .finish_non_exhaustive()
    }
}

impl HeartbeatLink<tokio_serial::SerialStream> {
    /// Open the serial port named in the link configuration
    ///
    /// # Errors
    ///
    /// Returns error if the port cannot be opened
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use heartbeat_link::config::Config;
    /// use heartbeat_link::serial::HeartbeatLink;
    ///
    /// fn main() -> anyhow::Result<()> {
    ///     let config = Config::load("config/default.toml")?;
    ///     let link = HeartbeatLink::open(&config.link)?;
    ///     println!("Listening on {}", link.device_path());
    ///     Ok(())
    /// }
    /// ```
    pub fn open(config: &LinkConfig) -> Result<Self> {
        Self::open_with_paths(&[config.port.as_str()], config)
    }

    /// Open the first serial port that succeeds from a list of candidates
    ///
    /// # Arguments
    ///
    /// * `paths` - Device paths to try (e.g., &["/dev/ttyUSB0"])
    /// * `config` - Baud rate and burst settings
    ///
    /// # Errors
    ///
    /// Returns `SerialPortNotFound` if none of the paths can be opened
    pub fn open_with_paths(paths: &[&str], config: &LinkConfig) -> Result<Self> {
        for path in paths {
            debug!("Trying to open serial port: {}", path);

            match Self::open_port(path, config.baud_rate) {
                Ok(port) => {
                    info!("Opened return link at {} ({} baud)", path, config.baud_rate);
                    return Ok(HeartbeatLink::new(
                        port,
                        *path,
                        Duration::from_millis(config.idle_timeout_ms),
                        config.max_burst_bytes,
                    ));
                }
                Err(e) => {
                    warn!("Failed to open {}: {}", path, e);
                    continue;
                }
            }
        }

        Err(HeartbeatError::SerialPortNotFound(paths.join(", ")))
    }

    fn open_port(path: &str, baud_rate: u32) -> Result<tokio_serial::SerialStream> {
        let port = tokio_serial::new(path, baud_rate)
            .data_bits(tokio_serial::DataBits::Eight)
            .parity(tokio_serial::Parity::None)
            .stop_bits(tokio_serial::StopBits::One)
            .flow_control(tokio_serial::FlowControl::None)
            .open_native_async()
            .map_err(|e| HeartbeatError::Serial(format!("Failed to open {}: {}", path, e)))?;

        Ok(port)
    }
}

impl<R: AsyncRead + Unpin> HeartbeatLink<R> {
    /// Wrap an async byte source
    ///
    /// `max_burst_bytes` is raised to one datagram if smaller.
    pub fn new(
        reader: R,
        device_path: impl Into<String>,
        idle_timeout: Duration,
        max_burst_bytes: usize,
    ) -> Self {
        let max_burst_bytes = max_burst_bytes.max(DATAGRAM_BYTES);

        Self {
            reader,
            device_path: device_path.into(),
            idle_timeout,
            max_burst_bytes,
            buffer: BytesMut::with_capacity(max_burst_bytes),
        }
    }

    /// Wait for the next burst of bytes
    ///
    /// Waits indefinitely for the first byte, then keeps reading until the
    /// link has been silent for the idle timeout, `max_burst_bytes` have
    /// accumulated, or the source reaches end of file. A capped burst ends
    /// after the last end marker within the cap; the bytes after it are kept
    /// for the next burst. Cancel-safe: bytes already received stay
    /// buffered if the returned future is dropped.
    ///
    /// # Returns
    ///
    /// * `Result<Option<Bytes>>` - The burst, or `None` once the source is
    ///   exhausted and nothing is buffered
    ///
    /// # Errors
    ///
    /// Returns `Serial` if the underlying read fails
    pub async fn read_burst(&mut self) -> Result<Option<Bytes>> {
        let mut chunk = [0u8; READ_CHUNK_BYTES];

        loop {
            if self.buffer.len() >= self.max_burst_bytes {
                let cut = self.capped_burst_len();
                debug!("Burst reached {} byte cap, closing at {}", self.max_burst_bytes, cut);
                return Ok(Some(self.buffer.split_to(cut).freeze()));
            }

            let read = if self.buffer.is_empty() {
                self.reader.read(&mut chunk).await
            } else {
                match timeout(self.idle_timeout, self.reader.read(&mut chunk)).await {
                    Ok(result) => result,
                    Err(_) => {
                        debug!("Link idle, closing {} byte burst", self.buffer.len());
                        return Ok(Some(self.buffer.split().freeze()));
                    }
                }
            };

            let count = read.map_err(|e| {
                HeartbeatError::Serial(format!("Failed to read from {}: {}", self.device_path, e))
            })?;

            if count == 0 {
                if self.buffer.is_empty() {
                    return Ok(None);
                }
                return Ok(Some(self.buffer.split().freeze()));
            }

            self.buffer.extend_from_slice(&chunk[..count]);
        }
    }

    /// Length of a burst that hit the cap
    ///
    /// Without an end marker inside the cap, falls back to the largest whole
    /// number of datagrams.
    fn capped_burst_len(&self) -> usize {
        let window = &self.buffer[..self.max_burst_bytes];

        match find_markers(window, &END_MARKER).last() {
            Some(offset) => offset / 8 + MARKER_BYTES,
            None => self.max_burst_bytes - self.max_burst_bytes % DATAGRAM_BYTES,
        }
    }

    /// Get the device path of the link
    pub fn device_path(&self) -> &str {
        &self.device_path
    }
}
