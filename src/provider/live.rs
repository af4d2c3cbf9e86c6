//! Live provider: snapshots assembled from a running report command.

use std::process::Command;

use crate::collector::{FeedOptions, FeedReceiver, FeedStopHandle, LiveFeed, SnapshotAssembler};
use crate::config::MonitorConfig;
use crate::storage::model::RawSnapshot;
use crate::util::CancellationToken;

use super::{ProviderError, SnapshotProvider};

/// Provider for live data from a long-running report command.
///
/// The command runs on its own producer thread; `advance()` blocks on the
/// line channel until the next snapshot boundary or the end of the feed.
pub struct LiveProvider {
    // Dropped before `feed`, so a producer blocked on a full channel sees
    // the disconnect and the feed's join cannot hang.
    assembler: SnapshotAssembler<FeedReceiver>,
    current: Option<RawSnapshot>,
    last_error: Option<ProviderError>,
    feed: LiveFeed,
}

impl LiveProvider {
    /// Runs `command_line` through the shell and starts reading its output.
    pub fn spawn(command_line: &str, config: &MonitorConfig, cancel: CancellationToken) -> Self {
        let (feed, receiver) = LiveFeed::spawn_shell(command_line, FeedOptions::from_config(config), cancel);
        Self::from_feed(feed, receiver, config)
    }

    /// Starts `command` directly, without a shell.
    pub fn from_command(command: Command, config: &MonitorConfig, cancel: CancellationToken) -> Self {
        let (feed, receiver) = LiveFeed::spawn(command, FeedOptions::from_config(config), cancel);
        Self::from_feed(feed, receiver, config)
    }

    fn from_feed(feed: LiveFeed, receiver: FeedReceiver, config: &MonitorConfig) -> Self {
        Self {
            assembler: SnapshotAssembler::live(receiver, config.max_pending_lines),
            current: None,
            last_error: None,
            feed,
        }
    }

    /// Handle that stops the feed while `advance()` is blocked on another thread.
    pub fn stop_handle(&self) -> FeedStopHandle {
        self.feed.stop_handle()
    }

    /// Feed lines cut to `max_line_bytes`.
    pub fn truncated_lines(&self) -> u64 {
        self.feed.truncated_lines()
    }

    /// Pending buffers discarded for lack of a boundary.
    pub fn overflows(&self) -> u64 {
        self.assembler.overflows()
    }
}

impl SnapshotProvider for LiveProvider {
    fn current(&self) -> Option<&RawSnapshot> {
        self.current.as_ref()
    }

    fn advance(&mut self) -> Option<&RawSnapshot> {
        match self.assembler.next_snapshot() {
            Some(snapshot) => {
                self.current = Some(snapshot);
                self.current.as_ref()
            }
            None => {
                if self.last_error.is_none() {
                    self.last_error = self
                        .assembler
                        .end_reason()
                        .and_then(ProviderError::from_feed_end);
                }
                None
            }
        }
    }

    fn is_live(&self) -> bool {
        true
    }

    fn is_exhausted(&self) -> bool {
        self.assembler.is_finished()
    }

    fn last_error(&self) -> Option<&ProviderError> {
        self.last_error.as_ref()
    }

    fn stop(&mut self) {
        self.feed.stop();
    }
}
