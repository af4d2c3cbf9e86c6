//! Snapshot assembler: groups a stream of report lines into snapshots.
//!
//! The memory line (`Mem: ...`) starts every snapshot. Seeing one while
//! lines are pending closes the pending snapshot (the boundary line itself
//! opens the next one). Lines are pulled one at a time from a
//! [`LineSource`], which may block; the stream ends only on an explicit
//! [`FeedEvent::End`].
//!
//! ```text
//!            line (not boundary)
//!   ┌──────┐ ─────────────────────► ┌────────────┐ ◄─┐ line
//!   │ Idle │                        │ Collecting │ ──┘
//!   └──────┘ ◄── End ────────────── └────────────┘ ──► boundary: emit, restart
//! ```

use tracing::{debug, warn};

use crate::collector::feed::{FeedEnd, FeedEvent};
use crate::collector::report::is_boundary_line;
use crate::storage::model::RawSnapshot;

/// Anything that yields report lines followed by one end marker.
pub trait LineSource {
    /// Returns the next line, blocking if none is available yet.
    ///
    /// After an [`FeedEvent::End`] no further lines follow.
    fn next_event(&mut self) -> FeedEvent;
}

/// In-memory lines (replay of a file already read).
impl LineSource for std::vec::IntoIter<String> {
    fn next_event(&mut self) -> FeedEvent {
        match self.next() {
            Some(line) => FeedEvent::Line(line),
            None => FeedEvent::End(FeedEnd::EndOfFile),
        }
    }
}

/// How boundaries and the end of input are treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssemblyMode {
    /// A running feed: a boundary only closes a snapshot once `min_lines`
    /// lines are pending, and a partial snapshot at the end is discarded.
    Live { min_lines: usize },
    /// A complete file: every boundary closes, the trailing lines are the
    /// last snapshot.
    Replay,
}

/// Minimum pending lines before a live boundary is honored.
pub const LIVE_MIN_LINES: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssemblerState {
    /// Between snapshots, nothing pending.
    Idle,
    /// Accumulating lines of the current snapshot.
    Collecting,
}

pub struct SnapshotAssembler<S> {
    source: S,
    mode: AssemblyMode,
    pending: Vec<String>,
    max_pending_lines: usize,
    end: Option<FeedEnd>,
    /// Pending buffers thrown away because they hit `max_pending_lines`.
    overflows: u64,
}

impl<S: LineSource> SnapshotAssembler<S> {
    pub fn new(source: S, mode: AssemblyMode, max_pending_lines: usize) -> Self {
        Self {
            source,
            mode,
            pending: Vec::new(),
            max_pending_lines: max_pending_lines.max(1),
            end: None,
            overflows: 0,
        }
    }

    pub fn live(source: S, max_pending_lines: usize) -> Self {
        Self::new(
            source,
            AssemblyMode::Live {
                min_lines: LIVE_MIN_LINES,
            },
            max_pending_lines,
        )
    }

    pub fn replay(source: S, max_pending_lines: usize) -> Self {
        Self::new(source, AssemblyMode::Replay, max_pending_lines)
    }

    /// Blocks until the next complete snapshot, or returns `None` once the
    /// source has ended.
    pub fn next_snapshot(&mut self) -> Option<RawSnapshot> {
        if self.end.is_some() {
            return None;
        }

        loop {
            match self.source.next_event() {
                FeedEvent::Line(line) => {
                    if is_boundary_line(&line) && self.boundary_closes() {
                        let lines = std::mem::replace(&mut self.pending, vec![line]);
                        return Some(RawSnapshot::new(lines));
                    }
                    if self.pending.len() >= self.max_pending_lines {
                        self.overflows += 1;
                        warn!(
                            lines = self.pending.len(),
                            "no snapshot boundary within limit, discarding pending lines"
                        );
                        self.pending.clear();
                    }
                    self.pending.push(line);
                }
                FeedEvent::End(end) => {
                    debug!(reason = %end, pending = self.pending.len(), "line source ended");
                    self.end = Some(end);
                    let lines = std::mem::take(&mut self.pending);
                    return match self.mode {
                        AssemblyMode::Replay if !lines.is_empty() => Some(RawSnapshot::new(lines)),
                        _ => None,
                    };
                }
            }
        }
    }

    fn boundary_closes(&self) -> bool {
        match self.mode {
            AssemblyMode::Replay => !self.pending.is_empty(),
            AssemblyMode::Live { min_lines } => self.pending.len() >= min_lines.max(1),
        }
    }

    pub fn state(&self) -> AssemblerState {
        if self.pending.is_empty() {
            AssemblerState::Idle
        } else {
            AssemblerState::Collecting
        }
    }

    pub fn mode(&self) -> AssemblyMode {
        self.mode
    }

    /// Why the source ended, once it has.
    pub fn end_reason(&self) -> Option<&FeedEnd> {
        self.end.as_ref()
    }

    pub fn is_finished(&self) -> bool {
        self.end.is_some()
    }

    pub fn overflows(&self) -> u64 {
        self.overflows
    }
}

impl<S: LineSource> Iterator for SnapshotAssembler<S> {
    type Item = RawSnapshot;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_snapshot()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::feed::feed_channel;
    use crate::collector::mock::{ReportFixture, report_text, timestamp_at};

    fn lines(text: &str) -> std::vec::IntoIter<String> {
        text.lines()
            .map(str::to_string)
            .collect::<Vec<_>>()
            .into_iter()
    }

    fn fixtures(n: u32) -> Vec<ReportFixture> {
        (0..n)
            .map(|i| ReportFixture::new(timestamp_at(i)).process("sh", 1.0))
            .collect()
    }

    #[test]
    fn test_replay_splits_on_boundaries() {
        let fixtures = fixtures(3);
        let assembler = SnapshotAssembler::replay(lines(&report_text(&fixtures)), 1000);

        let snapshots: Vec<RawSnapshot> = assembler.collect();
        assert_eq!(snapshots.len(), 3);
        for (snapshot, fixture) in snapshots.iter().zip(&fixtures) {
            assert_eq!(snapshot.lines, fixture.lines());
            assert!(snapshot.lines[0].starts_with("Mem:"));
        }
    }

    #[test]
    fn test_replay_emits_leading_partial_block() {
        let text = format!("tail of earlier snapshot\n{}", report_text(&fixtures(1)));
        let snapshots: Vec<RawSnapshot> = SnapshotAssembler::replay(lines(&text), 1000).collect();

        assert_eq!(snapshots.len(), 2);
        assert_eq!(snapshots[0].lines, vec!["tail of earlier snapshot"]);
    }

    #[test]
    fn test_live_holds_back_last_snapshot_until_next_boundary() {
        let text = report_text(&fixtures(2));
        let mut assembler = SnapshotAssembler::live(lines(&text), 1000);

        let first = assembler.next_snapshot().unwrap();
        assert_eq!(first.lines, fixtures(1)[0].lines());
        assert_eq!(assembler.state(), AssemblerState::Collecting);

        // The second snapshot never sees a closing boundary.
        assert!(assembler.next_snapshot().is_none());
        assert_eq!(assembler.end_reason(), Some(&FeedEnd::EndOfFile));
        assert_eq!(assembler.state(), AssemblerState::Idle);
    }

    #[test]
    fn test_live_guard_ignores_early_boundary() {
        let text = "junk\nMem: first\nCPU: x\nMem: second\n";
        let mut assembler = SnapshotAssembler::live(lines(text), 1000);

        // One pending line is below the guard: "Mem: first" joins it.
        let snapshot = assembler.next_snapshot().unwrap();
        assert_eq!(snapshot.lines, vec!["junk", "Mem: first", "CPU: x"]);
    }

    #[test]
    fn test_live_sentinel_without_boundary_yields_nothing() {
        let (tx, receiver) = feed_channel(8);
        for line in ["CPU: a", "Load average: b", "  PID  PPID"] {
            tx.send(FeedEvent::Line(line.to_string())).unwrap();
        }
        tx.send(FeedEvent::End(FeedEnd::Cancelled)).unwrap();

        let mut assembler = SnapshotAssembler::live(receiver, 1000);
        assert!(assembler.next_snapshot().is_none());
        assert!(assembler.is_finished());
        assert!(assembler.next_snapshot().is_none());
    }

    #[test]
    fn test_pending_buffer_is_bounded() {
        let mut text = String::from("Mem: start\n");
        for i in 0..10 {
            text.push_str(&format!("line {}\n", i));
        }
        text.push_str("Mem: next\n");

        let mut assembler = SnapshotAssembler::replay(lines(&text), 4);
        let snapshot = assembler.next_snapshot().unwrap();
        assert!(snapshot.len() <= 4);
        assert_eq!(snapshot.lines.last().unwrap(), "line 9");
        assert!(assembler.overflows() > 0);
    }

    #[test]
    fn test_snapshots_flow_through_channel_across_threads() {
        let (tx, receiver) = feed_channel(2);
        let text = report_text(&fixtures(4));
        let producer = std::thread::spawn(move || {
            for line in text.lines() {
                tx.send(FeedEvent::Line(line.to_string())).unwrap();
            }
            tx.send(FeedEvent::End(FeedEnd::EndOfFile)).unwrap();
        });

        let snapshots: Vec<RawSnapshot> = SnapshotAssembler::live(receiver, 1000).collect();
        producer.join().unwrap();

        // The fourth snapshot has no closing boundary in live mode.
        assert_eq!(snapshots.len(), 3);
        for (snapshot, fixture) in snapshots.iter().zip(fixtures(3)) {
            assert_eq!(snapshot.lines, fixture.lines());
        }
    }
}
