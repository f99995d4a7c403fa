//! Rotating JSONL writer for decoded heartbeats.

use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use super::types::StoredHeartbeat;
use crate::codec::protocol::Heartbeat;
use crate::config::TelemetryConfig;
use crate::error::Result;

/// File name prefix for heartbeat logs
const FILE_PREFIX: &str = "heartbeats-";

/// File name extension for heartbeat logs
const FILE_EXTENSION: &str = ".jsonl";

/// Appends heartbeats to JSONL files, rotating and pruning as it goes
///
/// File names lead with a sequence number that continues from the highest
/// one already in the directory, followed by the creation time. Retention
/// orders files by that sequence, so a restart never ranks its new file
/// behind an earlier run's.
#[derive(Debug)]
pub struct JsonlWriter {
    dir: PathBuf,
    max_records_per_file: usize,
    max_files_to_keep: usize,
    current: Option<BufWriter<File>>,
    current_path: Option<PathBuf>,
    records_in_file: usize,
    sequence: u64,
}

impl JsonlWriter {
    /// Create a writer from the telemetry configuration
    ///
    /// # Errors
    ///
    /// Returns error if the log directory cannot be created
    pub fn new(config: &TelemetryConfig) -> Result<Self> {
        Self::with_limits(
            &config.log_dir,
            config.max_records_per_file,
            config.max_files_to_keep,
        )
    }

    /// Create a writer with explicit rotation limits
    pub fn with_limits<P: AsRef<Path>>(
        dir: P,
        max_records_per_file: usize,
        max_files_to_keep: usize,
    ) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        let sequence = next_sequence(&dir)?;
        debug!("Heartbeat logs in {} continue at sequence {}", dir.display(), sequence);

        Ok(Self {
            dir,
            max_records_per_file: max_records_per_file.max(1),
            max_files_to_keep: max_files_to_keep.max(1),
            current: None,
            current_path: None,
            records_in_file: 0,
            sequence,
        })
    }

    /// Append one record, rotating first if the current file is full
    ///
    /// # Errors
    ///
    /// Returns error on serialization or file I/O failure
    pub fn write(&mut self, record: &StoredHeartbeat) -> Result<()> {
        if self.current.is_none() || self.records_in_file >= self.max_records_per_file {
            self.rotate()?;
        }

        let line = serde_json::to_string(record)?;
        if let Some(writer) = self.current.as_mut() {
            writer.write_all(line.as_bytes())?;
            writer.write_all(b"\n")?;
        }
        self.records_in_file += 1;

        Ok(())
    }

    /// Append every heartbeat of a decoded burst and flush
    ///
    /// # Returns
    ///
    /// * `Result<usize>` - Number of records written
    pub fn write_batch(&mut self, heartbeats: &[Heartbeat], reported: DateTime<Utc>) -> Result<usize> {
        for heartbeat in heartbeats {
            self.write(&StoredHeartbeat::new(heartbeat.clone(), reported))?;
        }
        self.flush()?;

        Ok(heartbeats.len())
    }

    /// Flush buffered records to disk
    pub fn flush(&mut self) -> Result<()> {
        if let Some(writer) = self.current.as_mut() {
            writer.flush()?;
        }
        Ok(())
    }

    /// Path of the file currently being written, if any
    pub fn current_path(&self) -> Option<&Path> {
        self.current_path.as_deref()
    }

    fn rotate(&mut self) -> Result<()> {
        self.flush()?;

        let name = format!(
            "{}{:010}-{}{}",
            FILE_PREFIX,
            self.sequence,
            Utc::now().format("%Y%m%dT%H%M%S"),
            FILE_EXTENSION
        );
        let path = self.dir.join(name);
        self.sequence += 1;

        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        info!("Writing heartbeats to {}", path.display());

        self.current = Some(BufWriter::new(file));
        self.current_path = Some(path);
        self.records_in_file = 0;

        self.prune()
    }

    /// Remove the oldest log files beyond the retention limit
    ///
    /// The open file always counts toward the limit and is never removed.
    fn prune(&self) -> Result<()> {
        let mut files: Vec<(u64, PathBuf)> = heartbeat_logs(&self.dir)?
            .into_iter()
            .filter(|(_, path)| Some(path.as_path()) != self.current_path.as_deref())
            .collect();

        let keep = self.max_files_to_keep.saturating_sub(1);
        if files.len() <= keep {
            return Ok(());
        }

        files.sort();
        let excess = files.len() - keep;
        for (_, path) in files.iter().take(excess) {
            match fs::remove_file(path) {
                Ok(()) => debug!("Removed old heartbeat log {}", path.display()),
                Err(e) => warn!("Failed to remove {}: {}", path.display(), e),
            }
        }

        Ok(())
    }
}

impl Drop for JsonlWriter {
    fn drop(&mut self) {
        if let Err(e) = self.flush() {
            warn!("Failed to flush heartbeat log on close: {}", e);
        }
    }
}

/// Sequence number of a heartbeat log file, `None` for any other file
fn log_sequence(path: &Path) -> Option<u64> {
    let name = path.file_name()?.to_str()?;
    let stem = name.strip_prefix(FILE_PREFIX)?.strip_suffix(FILE_EXTENSION)?;
    let (sequence, _created) = stem.split_once('-')?;
    sequence.parse().ok()
}

fn is_heartbeat_log(path: &Path) -> bool {
    log_sequence(path).is_some()
}

fn heartbeat_logs(dir: &Path) -> Result<Vec<(u64, PathBuf)>> {
    Ok(fs::read_dir(dir)?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter_map(|path| log_sequence(&path).map(|sequence| (sequence, path)))
        .collect())
}

fn next_sequence(dir: &Path) -> Result<u64> {
    Ok(heartbeat_logs(dir)?
        .into_iter()
        .map(|(sequence, _)| sequence + 1)
        .max()
        .unwrap_or(0))
}
