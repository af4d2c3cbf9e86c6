//! Replay provider for recorded report files.

use std::path::Path;

use tracing::info;

use crate::collector::SnapshotAssembler;
use crate::storage::model::RawSnapshot;

use super::{ProviderError, SnapshotProvider};

/// Provider over a report file that was read and split in one pass.
///
/// Snapshots are delimited purely by boundary lines; the trailing block is
/// the last snapshot.
pub struct ReplayProvider {
    snapshots: Vec<RawSnapshot>,
    /// Index of the next snapshot to hand out.
    cursor: usize,
    overflows: u64,
}

impl ReplayProvider {
    /// Reads the whole file at `path` and splits it into snapshots.
    pub fn from_path(
        path: impl AsRef<Path>,
        max_pending_lines: usize,
    ) -> Result<Self, ProviderError> {
        let path = path.as_ref();
        let bytes = std::fs::read(path)
            .map_err(|e| ProviderError::Io(format!("{}: {}", path.display(), e)))?;
        let text = String::from_utf8_lossy(&bytes);
        let provider = Self::from_lines(
            text.lines().map(|line| line.trim_end().to_string()).collect(),
            max_pending_lines,
        );

        if provider.is_empty() {
            return Err(ProviderError::NoData(format!(
                "no report lines in {}",
                path.display()
            )));
        }
        info!(
            path = %path.display(),
            snapshots = provider.len(),
            "loaded report file"
        );
        Ok(provider)
    }

    pub fn from_lines(lines: Vec<String>, max_pending_lines: usize) -> Self {
        let mut assembler = SnapshotAssembler::replay(lines.into_iter(), max_pending_lines);
        let snapshots: Vec<RawSnapshot> = assembler.by_ref().collect();
        Self {
            snapshots,
            cursor: 0,
            overflows: assembler.overflows(),
        }
    }

    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }

    /// Number of snapshots handed out so far.
    pub fn position(&self) -> usize {
        self.cursor
    }

    /// Pending buffers discarded while splitting the file.
    pub fn overflows(&self) -> u64 {
        self.overflows
    }
}

impl SnapshotProvider for ReplayProvider {
    fn current(&self) -> Option<&RawSnapshot> {
        self.cursor
            .checked_sub(1)
            .and_then(|i| self.snapshots.get(i))
    }

    fn advance(&mut self) -> Option<&RawSnapshot> {
        if self.cursor < self.snapshots.len() {
            self.cursor += 1;
            self.snapshots.get(self.cursor - 1)
        } else {
            None
        }
    }

    fn is_live(&self) -> bool {
        false
    }

    fn is_exhausted(&self) -> bool {
        self.cursor >= self.snapshots.len()
    }

    fn last_error(&self) -> Option<&ProviderError> {
        None
    }
}
