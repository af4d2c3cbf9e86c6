//! Raw snapshot archive.
//!
//! Accepted snapshots are appended, as their original report lines, to one
//! log file per run. The archive is best effort: write failures are logged
//! and the pipeline carries on.

use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::Local;
use tracing::{info, warn};

use crate::storage::model::RawSnapshot;

/// Receives the raw lines of every accepted snapshot.
pub trait SnapshotSink {
    fn record(&mut self, snapshot: &RawSnapshot);
}

/// Appends snapshots to `<dir>/top_<YYYYmmdd.HHMMSS>.log`.
pub struct FileArchive {
    path: PathBuf,
    writer: BufWriter<File>,
    max_lines: usize,
    failures: u64,
}

impl FileArchive {
    /// Creates the archive directory if needed and opens a new log file
    /// stamped with the current local time.
    pub fn create(dir: &Path, max_lines: usize) -> io::Result<Self> {
        std::fs::create_dir_all(dir)?;
        let name = format!("top_{}.log", Local::now().format("%Y%m%d.%H%M%S"));
        Self::open(&dir.join(name), max_lines)
    }

    /// Opens `path` for appending.
    pub fn open(path: &Path, max_lines: usize) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        info!(path = %path.display(), "archiving snapshots");
        Ok(Self {
            path: path.to_path_buf(),
            writer: BufWriter::new(file),
            max_lines,
            failures: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of snapshots that could not be written.
    pub fn failures(&self) -> u64 {
        self.failures
    }

    fn write_snapshot(&mut self, snapshot: &RawSnapshot) -> io::Result<()> {
        for line in snapshot.lines.iter().take(self.max_lines) {
            writeln!(self.writer, "{}", line)?;
        }
        self.writer.flush()
    }
}

impl SnapshotSink for FileArchive {
    fn record(&mut self, snapshot: &RawSnapshot) {
        if let Err(e) = self.write_snapshot(snapshot) {
            self.failures += 1;
            warn!(path = %self.path.display(), error = %e, "failed to archive snapshot");
        }
    }
}
