//! Live report feed: runs a long-lived command and streams its output lines.
//!
//! The producer thread reads the child's stdout line by line and publishes
//! each line on a bounded channel. Whatever ends the stream (child exit,
//! read error, spawn failure, cancellation) the last message on the channel
//! is a single [`FeedEvent::End`], so the consumer never waits forever.
//!
//! The child runs in its own process group. Stopping the feed, or
//! cancelling its token, kills the whole group, so a shell pipeline cannot
//! keep the output pipe open behind the shell's back.

use std::io::{self, BufRead, BufReader, ErrorKind, Read};
use std::process::{Child, ChildStdout, Command, ExitStatus, Stdio};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, SyncSender};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::collector::assembler::LineSource;
use crate::config::MonitorConfig;
use crate::util::CancellationToken;

/// Interval between exit checks while waiting for the child.
const REAP_POLL: Duration = Duration::from_millis(20);

/// Why the line stream ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedEnd {
    /// The child closed its output and exited.
    Exited(ExitStatus),
    /// Stopped through the cancellation token.
    Cancelled,
    /// The command could not be started.
    SpawnFailed(String),
    /// Reading the child's output failed.
    ReadFailed(String),
    /// The other side of the channel went away without an end marker.
    Disconnected,
    /// A replayed file was consumed completely.
    EndOfFile,
}

impl std::fmt::Display for FeedEnd {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FeedEnd::Exited(status) => write!(f, "command exited ({})", status),
            FeedEnd::Cancelled => write!(f, "cancelled"),
            FeedEnd::SpawnFailed(msg) => write!(f, "failed to start command: {}", msg),
            FeedEnd::ReadFailed(msg) => write!(f, "failed to read command output: {}", msg),
            FeedEnd::Disconnected => write!(f, "feed disconnected"),
            FeedEnd::EndOfFile => write!(f, "end of file"),
        }
    }
}

/// One message on the producer → consumer channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedEvent {
    Line(String),
    End(FeedEnd),
}

/// Channel and line limits of a live feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeedOptions {
    /// Lines buffered between producer and consumer.
    pub channel_capacity: usize,
    /// Longer lines are cut to this many bytes; the rest is discarded.
    pub max_line_bytes: usize,
}

impl Default for FeedOptions {
    fn default() -> Self {
        Self::from_config(&MonitorConfig::default())
    }
}

impl FeedOptions {
    pub fn from_config(config: &MonitorConfig) -> Self {
        Self {
            channel_capacity: config.channel_capacity,
            max_line_bytes: config.max_line_bytes,
        }
    }
}

/// Creates the bounded line channel.
pub fn feed_channel(capacity: usize) -> (SyncSender<FeedEvent>, FeedReceiver) {
    let (tx, rx) = mpsc::sync_channel(capacity);
    (tx, FeedReceiver { rx, end: None })
}

/// Consumer end of the line channel.
///
/// After the end marker has been received, every further read returns it
/// again without blocking.
pub struct FeedReceiver {
    rx: Receiver<FeedEvent>,
    end: Option<FeedEnd>,
}

impl LineSource for FeedReceiver {
    fn next_event(&mut self) -> FeedEvent {
        if let Some(end) = &self.end {
            return FeedEvent::End(end.clone());
        }
        let event = self
            .rx
            .recv()
            .unwrap_or(FeedEvent::End(FeedEnd::Disconnected));
        if let FeedEvent::End(end) = &event {
            self.end = Some(end.clone());
        }
        event
    }
}

/// Cloneable handle that stops a [`LiveFeed`] from any thread.
#[derive(Debug, Clone)]
pub struct FeedStopHandle {
    child: Arc<Mutex<Option<Child>>>,
    cancel: CancellationToken,
}

impl FeedStopHandle {
    /// Cancels the feed's token and kills the child's process group. The
    /// producer still publishes the end marker.
    pub fn stop(&self) {
        self.cancel.cancel();
        kill_child(&self.child);
    }
}

/// Owns the external command and its producer thread.
///
/// Dropping the feed stops it and joins the producer thread.
pub struct LiveFeed {
    stopper: FeedStopHandle,
    truncated: Arc<AtomicU64>,
    handle: Option<JoinHandle<()>>,
}

impl LiveFeed {
    /// Runs `command_line` through `sh -c`, with stderr of every part of
    /// the command merged into stdout.
    pub fn spawn_shell(
        command_line: &str,
        options: FeedOptions,
        cancel: CancellationToken,
    ) -> (Self, FeedReceiver) {
        let mut command = Command::new("sh");
        command
            .arg("-c")
            .arg(format!("exec 2>&1\n{}", command_line));
        Self::spawn(command, options, cancel)
    }

    /// Starts `command` with a piped stdout and begins streaming its lines.
    ///
    /// A spawn failure is reported on the channel as [`FeedEnd::SpawnFailed`].
    pub fn spawn(
        mut command: Command,
        options: FeedOptions,
        cancel: CancellationToken,
    ) -> (Self, FeedReceiver) {
        let (tx, receiver) = feed_channel(options.channel_capacity);
        command.stdin(Stdio::null()).stdout(Stdio::piped());
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            command.process_group(0);
        }

        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(e) => {
                error!(error = %e, "failed to spawn feed command");
                let _ = tx.send(FeedEvent::End(FeedEnd::SpawnFailed(e.to_string())));
                return (Self::finished(cancel), receiver);
            }
        };
        let Some(stdout) = child.stdout.take() else {
            kill_process(&mut child);
            let _ = child.wait();
            let _ = tx.send(FeedEvent::End(FeedEnd::SpawnFailed(
                "child stdout not captured".to_string(),
            )));
            return (Self::finished(cancel), receiver);
        };
        info!(pid = child.id(), "feed command started");

        let child = Arc::new(Mutex::new(Some(child)));
        let watched = Arc::downgrade(&child);
        cancel.on_cancel(move || {
            if let Some(child) = watched.upgrade() {
                kill_child(&child);
            }
        });

        let truncated = Arc::new(AtomicU64::new(0));
        let producer_child = Arc::clone(&child);
        let producer_cancel = cancel.clone();
        let producer_truncated = Arc::clone(&truncated);
        let max_line_bytes = options.max_line_bytes.max(1);
        let handle = thread::spawn(move || {
            let end = pump_lines(
                stdout,
                &tx,
                &producer_cancel,
                max_line_bytes,
                &producer_truncated,
            );
            let end = reap_child(&producer_child, end, &producer_cancel);
            match &end {
                FeedEnd::Exited(status) if status.success() => info!(%status, "feed ended"),
                FeedEnd::Cancelled | FeedEnd::Disconnected => debug!(reason = %end, "feed stopped"),
                _ => warn!(reason = %end, "feed ended abnormally"),
            }
            let _ = tx.send(FeedEvent::End(end));
        });

        (
            Self {
                stopper: FeedStopHandle { child, cancel },
                truncated,
                handle: Some(handle),
            },
            receiver,
        )
    }

    fn finished(cancel: CancellationToken) -> Self {
        Self {
            stopper: FeedStopHandle {
                child: Arc::new(Mutex::new(None)),
                cancel,
            },
            truncated: Arc::new(AtomicU64::new(0)),
            handle: None,
        }
    }

    pub fn stop(&self) {
        self.stopper.stop();
    }

    pub fn stop_handle(&self) -> FeedStopHandle {
        self.stopper.clone()
    }

    /// Lines cut to `max_line_bytes` so far.
    pub fn truncated_lines(&self) -> u64 {
        self.truncated.load(Ordering::Relaxed)
    }

    /// Returns true once the producer thread has exited.
    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().is_none_or(|h| h.is_finished())
    }
}

impl Drop for LiveFeed {
    fn drop(&mut self) {
        self.stop();
        if let Some(handle) = self.handle.take()
            && handle.join().is_err()
        {
            error!("feed producer thread panicked");
        }
    }
}

/// Forwards lines until EOF, a read error, cancellation or a closed channel.
///
/// Returns `None` on a plain EOF; the exit status decides the end reason then.
fn pump_lines(
    stdout: ChildStdout,
    tx: &SyncSender<FeedEvent>,
    cancel: &CancellationToken,
    max_line_bytes: usize,
    truncated: &AtomicU64,
) -> Option<FeedEnd> {
    let mut reader = BufReader::new(stdout);
    let mut buf = Vec::new();
    loop {
        if cancel.is_cancelled() {
            return Some(FeedEnd::Cancelled);
        }
        buf.clear();
        match read_line_bounded(&mut reader, &mut buf, max_line_bytes) {
            Ok((0, _)) if cancel.is_cancelled() => return Some(FeedEnd::Cancelled),
            Ok((0, _)) => return None,
            Ok((_, cut)) => {
                if cut {
                    let total = truncated.fetch_add(1, Ordering::Relaxed) + 1;
                    warn!(max_line_bytes, truncated = total, "feed line too long, truncated");
                }
                let line = String::from_utf8_lossy(&buf).trim_end().to_string();
                if tx.send(FeedEvent::Line(line)).is_err() {
                    return Some(FeedEnd::Disconnected);
                }
            }
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Some(FeedEnd::ReadFailed(e.to_string())),
        }
    }
}

/// Reads one line of at most `max` bytes into `buf`.
///
/// Returns the bytes kept and whether the line was cut; the remainder of a
/// cut line is consumed and dropped.
fn read_line_bounded<R: BufRead>(
    reader: &mut R,
    buf: &mut Vec<u8>,
    max: usize,
) -> io::Result<(usize, bool)> {
    let n = reader.by_ref().take(max as u64).read_until(b'\n', buf)?;
    if n < max || buf.last() == Some(&b'\n') {
        return Ok((n, false));
    }
    // A line of exactly `max` bytes is only cut if content follows.
    let mut rest = Vec::new();
    let mut dropped = 0;
    loop {
        rest.clear();
        let skipped = reader.by_ref().take(max as u64).read_until(b'\n', &mut rest)?;
        dropped += rest.iter().filter(|&&b| b != b'\n' && b != b'\r').count();
        if skipped == 0 || rest.last() == Some(&b'\n') {
            return Ok((n, dropped > 0));
        }
    }
}

/// Kills the child's process group, if the child has not been reaped yet.
fn kill_child(child: &Mutex<Option<Child>>) {
    let mut guard = child.lock().unwrap_or_else(PoisonError::into_inner);
    if let Some(process) = guard.as_mut() {
        kill_process(process);
    }
}

fn kill_process(process: &mut Child) {
    #[cfg(unix)]
    {
        use nix::sys::signal::{Signal, killpg};
        use nix::unistd::Pid;
        // The child leads its own group; this reaches every process of a pipeline.
        if let Ok(pid) = i32::try_from(process.id()) {
            let _ = killpg(Pid::from_raw(pid), Signal::SIGKILL);
        }
    }
    let _ = process.kill();
}

/// Waits for the child without holding its lock, so `stop()` can still
/// kill it. A feed cancelled meanwhile ends as [`FeedEnd::Cancelled`].
fn reap_child(
    child: &Mutex<Option<Child>>,
    end: Option<FeedEnd>,
    cancel: &CancellationToken,
) -> FeedEnd {
    let mut end = end;
    loop {
        if end.is_none() && cancel.is_cancelled() {
            end = Some(FeedEnd::Cancelled);
        }
        let mut guard = child.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(process) = guard.as_mut() else {
            return end.unwrap_or(FeedEnd::Cancelled);
        };
        if end.is_some() {
            kill_process(process);
        }
        match process.try_wait() {
            Ok(Some(status)) => {
                guard.take();
                return end.unwrap_or(FeedEnd::Exited(status));
            }
            Ok(None) => {}
            Err(e) => {
                guard.take();
                return end.unwrap_or(FeedEnd::ReadFailed(e.to_string()));
            }
        }
        drop(guard);
        thread::sleep(REAP_POLL);
    }
}

#[cfg(test)]
mod tests {
    use std::time::Instant;

    use super::*;

    fn options(channel_capacity: usize) -> FeedOptions {
        FeedOptions {
            channel_capacity,
            ..FeedOptions::default()
        }
    }

    fn drain(receiver: &mut FeedReceiver) -> (Vec<String>, FeedEnd) {
        let mut lines = Vec::new();
        loop {
            match receiver.next_event() {
                FeedEvent::Line(line) => lines.push(line),
                FeedEvent::End(end) => return (lines, end),
            }
        }
    }

    #[test]
    fn test_streams_lines_then_exit() {
        let cancel = CancellationToken::new();
        let (_feed, mut receiver) =
            LiveFeed::spawn_shell("printf 'Mem: a\\nCPU: b  \\n\\nlast'", options(4), cancel);

        let (lines, end) = drain(&mut receiver);
        assert_eq!(lines, vec!["Mem: a", "CPU: b", "", "last"]);
        assert!(matches!(end, FeedEnd::Exited(status) if status.success()));
    }

    #[test]
    fn test_stderr_is_merged() {
        let (_feed, mut receiver) =
            LiveFeed::spawn_shell("sh -c 'echo oops >&2'", options(4), CancellationToken::new());

        let (lines, _) = drain(&mut receiver);
        assert_eq!(lines, vec!["oops"]);
    }

    #[test]
    fn test_stderr_of_every_pipeline_stage_is_merged() {
        let (_feed, mut receiver) = LiveFeed::spawn_shell(
            "echo first >&2 | sh -c 'cat; echo second >&2'",
            options(4),
            CancellationToken::new(),
        );

        let (mut lines, _) = drain(&mut receiver);
        lines.sort();
        assert_eq!(lines, vec!["first", "second"]);
    }

    #[test]
    fn test_nonzero_exit_is_reported() {
        let (_feed, mut receiver) =
            LiveFeed::spawn_shell("sh -c 'echo x; exit 3'", options(4), CancellationToken::new());

        let (lines, end) = drain(&mut receiver);
        assert_eq!(lines, vec!["x"]);
        assert!(matches!(end, FeedEnd::Exited(status) if status.code() == Some(3)));
    }

    #[test]
    fn test_spawn_failure_sends_end() {
        let command = Command::new("/nonexistent/toptrace-feed");
        let (feed, mut receiver) = LiveFeed::spawn(command, options(4), CancellationToken::new());

        assert!(matches!(receiver.next_event(), FeedEvent::End(FeedEnd::SpawnFailed(_))));
        assert!(feed.is_finished());
    }

    #[test]
    fn test_stop_kills_silent_command() {
        let cancel = CancellationToken::new();
        let (feed, mut receiver) = LiveFeed::spawn_shell("sleep 30", options(4), cancel.clone());

        feed.stop();
        assert!(cancel.is_cancelled());
        assert_eq!(receiver.next_event(), FeedEvent::End(FeedEnd::Cancelled));
    }

    #[test]
    fn test_cancelling_token_ends_silent_feed() {
        let cancel = CancellationToken::new();
        let (_feed, mut receiver) = LiveFeed::spawn_shell("sleep 30", options(4), cancel.clone());

        let started = Instant::now();
        cancel.cancel();
        assert_eq!(receiver.next_event(), FeedEvent::End(FeedEnd::Cancelled));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn test_stop_kills_whole_pipeline() {
        let (feed, mut receiver) =
            LiveFeed::spawn_shell("sleep 30 | cat", options(4), CancellationToken::new());

        let started = Instant::now();
        feed.stop();
        assert_eq!(receiver.next_event(), FeedEvent::End(FeedEnd::Cancelled));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn test_stop_handle_from_another_thread() {
        let (feed, mut receiver) =
            LiveFeed::spawn_shell("sleep 30", options(4), CancellationToken::new());
        let stopper = feed.stop_handle();

        let remote = std::thread::spawn(move || stopper.stop());
        assert_eq!(receiver.next_event(), FeedEvent::End(FeedEnd::Cancelled));
        remote.join().unwrap();
        drop(feed);
    }

    #[test]
    fn test_long_lines_are_truncated() {
        let options = FeedOptions {
            channel_capacity: 4,
            max_line_bytes: 4,
        };
        let (feed, mut receiver) = LiveFeed::spawn_shell(
            "printf 'abcdefghij\\nok\\nwxyz\\n'",
            options,
            CancellationToken::new(),
        );

        let (lines, _) = drain(&mut receiver);
        assert_eq!(lines, vec!["abcd", "ok", "wxyz"]);
        assert_eq!(feed.truncated_lines(), 1);
    }

    #[test]
    fn test_read_line_bounded() {
        let mut reader = io::Cursor::new(b"0123456789\nab\n".to_vec());
        let mut buf = Vec::new();

        assert_eq!(read_line_bounded(&mut reader, &mut buf, 4).unwrap(), (4, true));
        assert_eq!(buf, b"0123");
        buf.clear();
        assert_eq!(read_line_bounded(&mut reader, &mut buf, 4).unwrap(), (3, false));
        assert_eq!(buf, b"ab\n");
        buf.clear();
        assert_eq!(read_line_bounded(&mut reader, &mut buf, 4).unwrap(), (0, false));
    }

    #[test]
    fn test_end_is_sticky() {
        let (tx, mut receiver) = feed_channel(4);
        tx.send(FeedEvent::Line("one".into())).unwrap();
        tx.send(FeedEvent::End(FeedEnd::EndOfFile)).unwrap();
        drop(tx);

        assert_eq!(receiver.next_event(), FeedEvent::Line("one".into()));
        assert_eq!(receiver.next_event(), FeedEvent::End(FeedEnd::EndOfFile));
        assert_eq!(receiver.next_event(), FeedEvent::End(FeedEnd::EndOfFile));
    }

    #[test]
    fn test_dropped_sender_reads_as_disconnected() {
        let (tx, mut receiver) = feed_channel(4);
        drop(tx);
        assert_eq!(receiver.next_event(), FeedEvent::End(FeedEnd::Disconnected));
    }
}
