//! Provider abstraction for snapshot sources.
//!
//! The pipeline pulls raw snapshots through [`SnapshotProvider`] without
//! knowing whether they come from a running command or a recorded file:
//! - `LiveProvider`: lines streamed from a long-running report command
//! - `ReplayProvider`: a report file read and split up front

mod live;
mod replay;

pub use live::LiveProvider;
pub use replay::ReplayProvider;

use crate::collector::FeedEnd;
use crate::storage::model::RawSnapshot;

/// Error types that can occur while obtaining snapshots.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderError {
    /// I/O error while reading a report file.
    Io(String),
    /// The report command could not be started.
    Spawn(String),
    /// The report command's output could not be read.
    Feed(String),
    /// The source holds no snapshot at all.
    NoData(String),
}

impl std::fmt::Display for ProviderError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProviderError::Io(msg) => write!(f, "I/O error: {}", msg),
            ProviderError::Spawn(msg) => write!(f, "Spawn error: {}", msg),
            ProviderError::Feed(msg) => write!(f, "Feed error: {}", msg),
            ProviderError::NoData(msg) => write!(f, "No data: {}", msg),
        }
    }
}

impl std::error::Error for ProviderError {}

impl ProviderError {
    /// Maps an abnormal end of the live feed to an error, if it is one.
    pub fn from_feed_end(end: &FeedEnd) -> Option<Self> {
        match end {
            FeedEnd::SpawnFailed(msg) => Some(ProviderError::Spawn(msg.clone())),
            FeedEnd::ReadFailed(msg) => Some(ProviderError::Feed(msg.clone())),
            FeedEnd::Exited(status) if !status.success() => {
                Some(ProviderError::Feed(format!("command exited ({})", status)))
            }
            _ => None,
        }
    }
}

/// Abstraction for snapshot sources.
///
/// The trait is object-safe and designed to be used with `Box<dyn SnapshotProvider>`.
pub trait SnapshotProvider {
    /// Returns the snapshot produced by the last `advance()`, if any.
    fn current(&self) -> Option<&RawSnapshot>;

    /// Moves to the next complete snapshot.
    ///
    /// - In live mode: blocks until the feed delivers one
    /// - In replay mode: steps through the recorded snapshots
    ///
    /// Returns `None` once the source is exhausted; it never yields again
    /// after that (check `last_error()` for why).
    fn advance(&mut self) -> Option<&RawSnapshot>;

    /// Returns `true` if snapshots come from a running command.
    fn is_live(&self) -> bool;

    /// Returns `true` once `advance()` has returned `None`.
    fn is_exhausted(&self) -> bool;

    /// Returns the error that ended the source, if any.
    fn last_error(&self) -> Option<&ProviderError>;

    /// Asks the source to stop producing. A blocked `advance()` returns `None`.
    fn stop(&mut self) {}
}
