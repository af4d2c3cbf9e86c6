//! Consumer loop: provider → parser → archive → store.
//!
//! Each tick pulls one raw snapshot, parses it and appends the result to
//! the shared store. Bad lines and snapshots without a timestamp are
//! absorbed here; only a store inconsistency stops the loop with an error.

use tracing::{debug, error, info, warn};

use crate::collector::{SnapshotError, SnapshotParser};
use crate::config::MonitorConfig;
use crate::provider::SnapshotProvider;
use crate::storage::{AppendOutcome, SharedStore, SnapshotSink, StoreError};
use crate::util::CancellationToken;

/// Running counters of one pipeline.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PipelineStats {
    pub snapshots_accepted: u64,
    pub snapshots_dropped: u64,
    pub malformed_lines: u64,
    pub observations_stored: u64,
    pub observations_filtered: u64,
}

/// Result of one [`Pipeline::tick`].
#[derive(Debug, Clone, PartialEq)]
pub enum Tick {
    /// A snapshot was parsed and appended under `timestamp`.
    Stored {
        timestamp: String,
        outcome: AppendOutcome,
    },
    /// A snapshot was dropped without touching the store.
    Dropped(SnapshotError),
    /// The source is exhausted or the pipeline was cancelled.
    Finished,
}

pub struct Pipeline {
    provider: Box<dyn SnapshotProvider + Send>,
    parser: SnapshotParser,
    store: SharedStore,
    archive: Option<Box<dyn SnapshotSink + Send>>,
    cancel: CancellationToken,
    stats: PipelineStats,
}

impl Pipeline {
    pub fn new(
        provider: Box<dyn SnapshotProvider + Send>,
        config: &MonitorConfig,
        store: SharedStore,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            provider,
            parser: SnapshotParser::new(config),
            store,
            archive: None,
            cancel,
            stats: PipelineStats::default(),
        }
    }

    /// Archives the raw lines of every accepted snapshot to `sink`.
    pub fn with_archive(mut self, sink: Box<dyn SnapshotSink + Send>) -> Self {
        self.archive = Some(sink);
        self
    }

    /// Processes the next snapshot, blocking until the provider has one.
    pub fn tick(&mut self) -> Result<Tick, StoreError> {
        if self.cancel.is_cancelled() {
            self.provider.stop();
            return Ok(Tick::Finished);
        }
        let Some(snapshot) = self.provider.advance() else {
            return Ok(Tick::Finished);
        };

        let parsed = match self.parser.parse(snapshot) {
            Ok(parsed) => parsed,
            Err(e) => {
                warn!(error = %e, "dropping snapshot");
                self.stats.snapshots_dropped += 1;
                return Ok(Tick::Dropped(e));
            }
        };
        self.stats.malformed_lines += parsed.malformed_lines as u64;

        if let Some(archive) = self.archive.as_mut() {
            archive.record(snapshot);
        }

        let outcome = self.store.append(&parsed.timestamp, &parsed.observations)?;
        self.stats.snapshots_accepted += 1;
        self.stats.observations_stored += outcome.stored as u64;
        self.stats.observations_filtered += outcome.filtered as u64;
        debug!(
            timestamp = %parsed.timestamp,
            stored = outcome.stored,
            created = outcome.created.len(),
            removed = outcome.removed.len(),
            "snapshot stored"
        );

        Ok(Tick::Stored {
            timestamp: parsed.timestamp,
            outcome,
        })
    }

    /// Ticks until the source ends or the pipeline is cancelled.
    pub fn run(&mut self) -> Result<PipelineStats, StoreError> {
        info!(live = self.provider.is_live(), "pipeline started");
        loop {
            match self.tick() {
                Ok(Tick::Finished) => break,
                Ok(_) => {}
                Err(e) => {
                    error!(error = %e, "store invariant violated, stopping pipeline");
                    self.provider.stop();
                    return Err(e);
                }
            }
        }

        if let Some(e) = self.provider.last_error() {
            warn!(error = %e, "snapshot source failed");
        }
        info!(
            accepted = self.stats.snapshots_accepted,
            dropped = self.stats.snapshots_dropped,
            malformed = self.stats.malformed_lines,
            "pipeline finished"
        );
        Ok(self.stats.clone())
    }

    pub fn stats(&self) -> &PipelineStats {
        &self.stats
    }

    pub fn store(&self) -> &SharedStore {
        &self.store
    }

    pub fn provider(&self) -> &dyn SnapshotProvider {
        self.provider.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use std::process::Command;
    use std::sync::{Arc, Mutex};
    use std::time::{Duration, Instant};

    use super::*;
    use crate::collector::mock::{ReportFixture, report_text, timestamp_at};
    use crate::provider::{LiveProvider, ReplayProvider};
    use crate::storage::{FileArchive, RawSnapshot, TOTAL_CPU_KEY, TimeSeriesStore};

    fn shared_store(config: &MonitorConfig) -> SharedStore {
        SharedStore::new(TimeSeriesStore::new(
            config.max_data_points,
            config.selection_filter(),
        ))
    }

    fn replay(text: &str) -> Box<ReplayProvider> {
        Box::new(ReplayProvider::from_lines(
            text.lines().map(str::to_string).collect(),
            4096,
        ))
    }

    #[derive(Clone, Default)]
    struct RecordingSink(Arc<Mutex<Vec<RawSnapshot>>>);

    impl SnapshotSink for RecordingSink {
        fn record(&mut self, snapshot: &RawSnapshot) {
            self.0.lock().unwrap().push(snapshot.clone());
        }
    }

    #[test]
    fn test_single_snapshot_total_cpu() {
        let config = MonitorConfig::default();
        let store = shared_store(&config);
        let text = report_text(&[ReportFixture::new("10:00:00").idle(80.0)]);
        let mut pipeline = Pipeline::new(replay(&text), &config, store.clone(), CancellationToken::new());

        let stats = pipeline.run().unwrap();
        assert_eq!(stats.snapshots_accepted, 1);
        let view = store.snapshot();
        let cpu = view.total_cpu().unwrap();
        assert_eq!(cpu.points[0].value, 24.0);
        assert_eq!(cpu.points[0].timestamp, "10:00:00");
    }

    #[test]
    fn test_garbage_line_does_not_spoil_snapshot() {
        let config = MonitorConfig::default();
        let store = shared_store(&config);
        let mut lines = ReportFixture::new("10:00:00")
            .process("/usr/bin/weston --tty=1", 3.0)
            .lines();
        lines.insert(4, "garbage data here".to_string());
        let provider = Box::new(ReplayProvider::from_lines(lines, 4096));
        let mut pipeline = Pipeline::new(provider, &config, store.clone(), CancellationToken::new());

        let stats = pipeline.run().unwrap();
        assert_eq!(stats.malformed_lines, 1);
        let view = store.snapshot();
        let keys: Vec<&str> = view.keys().collect();
        assert_eq!(keys, vec![TOTAL_CPU_KEY, "weston"]);
    }

    #[test]
    fn test_window_after_sixty_one_snapshots() {
        let config = MonitorConfig::default();
        let store = shared_store(&config);
        let fixtures: Vec<ReportFixture> = (0..61)
            .map(|i| {
                ReportFixture::new(timestamp_at(i))
                    .idle(50.0)
                    .process("/usr/bin/weston", 5.0)
                    .process("prank", 50.0)
            })
            .collect();
        let mut pipeline = Pipeline::new(
            replay(&report_text(&fixtures)),
            &config,
            store.clone(),
            CancellationToken::new(),
        );

        let stats = pipeline.run().unwrap();
        assert_eq!(stats.snapshots_accepted, 61);
        assert_eq!(stats.observations_filtered, 61);

        let view = store.snapshot();
        assert_eq!(view.len(), 2);
        assert!(view.get("prank").is_none());
        for series in view.iter() {
            assert_eq!(series.len(), 60);
            assert_eq!(series.first().unwrap().timestamp, timestamp_at(1));
        }
    }

    #[test]
    fn test_snapshot_without_load_line_is_dropped() {
        let config = MonitorConfig::default();
        let store = shared_store(&config);
        let mut lines = ReportFixture::new("10:00:00").process("sh", 2.0).lines();
        lines.remove(2);
        let provider = Box::new(ReplayProvider::from_lines(lines, 4096));
        let mut pipeline = Pipeline::new(provider, &config, store.clone(), CancellationToken::new());

        assert!(matches!(
            pipeline.tick().unwrap(),
            Tick::Dropped(SnapshotError::MissingTimestamp { .. })
        ));
        assert_eq!(pipeline.tick().unwrap(), Tick::Finished);
        assert_eq!(pipeline.stats().snapshots_dropped, 1);
        assert!(store.snapshot().is_empty());
    }

    #[test]
    fn test_archive_receives_accepted_snapshots_only() {
        let config = MonitorConfig::default();
        let sink = RecordingSink::default();
        let mut dropped = ReportFixture::new("10:00:01").lines();
        dropped.remove(2);
        let mut lines = ReportFixture::new("10:00:00").lines();
        lines.extend(dropped);

        let provider = Box::new(ReplayProvider::from_lines(lines, 4096));
        let mut pipeline = Pipeline::new(
            provider,
            &config,
            shared_store(&config),
            CancellationToken::new(),
        )
        .with_archive(Box::new(sink.clone()));
        pipeline.run().unwrap();

        let recorded = sink.0.lock().unwrap();
        assert_eq!(recorded.len(), 1);
        assert!(recorded[0].lines[2].ends_with("10:00:00"));
    }

    #[test]
    fn test_replay_file_with_file_archive() {
        let dir = tempfile::tempdir().unwrap();
        let report = dir.path().join("top.log");
        let fixtures: Vec<ReportFixture> = (0..3)
            .map(|i| ReportFixture::new(timestamp_at(i)).process("adbd", 1.0))
            .collect();
        std::fs::write(&report, report_text(&fixtures)).unwrap();

        let config = MonitorConfig {
            archive_max_lines: 2,
            ..MonitorConfig::default()
        };
        let archive = FileArchive::create(&dir.path().join("archive"), config.archive_max_lines).unwrap();
        let archive_path = archive.path().to_path_buf();
        let provider = Box::new(ReplayProvider::from_path(&report, config.max_pending_lines).unwrap());
        let store = shared_store(&config);
        let mut pipeline = Pipeline::new(provider, &config, store.clone(), CancellationToken::new())
            .with_archive(Box::new(archive));

        let stats = pipeline.run().unwrap();
        assert_eq!(stats.snapshots_accepted, 3);
        assert_eq!(store.snapshot().get("adbd").unwrap().len(), 3);

        drop(pipeline);
        let archived = std::fs::read_to_string(archive_path).unwrap();
        assert_eq!(archived.lines().count(), 6);
    }

    #[test]
    fn test_live_feed_end_to_end() {
        let fixtures: Vec<ReportFixture> = (0..4)
            .map(|i| ReportFixture::new(timestamp_at(i)).process("weston", 2.0))
            .collect();
        let mut command = Command::new("printf");
        command.arg("%s").arg(report_text(&fixtures));

        let config = MonitorConfig::default();
        let store = shared_store(&config);
        let cancel = CancellationToken::new();
        let provider = Box::new(LiveProvider::from_command(command, &config, cancel.clone()));
        let mut pipeline = Pipeline::new(provider, &config, store.clone(), cancel);

        let stats = pipeline.run().unwrap();
        // The trailing snapshot is incomplete in live mode and never stored.
        assert_eq!(stats.snapshots_accepted, 3);
        assert_eq!(store.snapshot().get("weston").unwrap().len(), 3);
    }

    #[test]
    fn test_feed_ending_without_boundary_leaves_store_untouched() {
        let mut command = Command::new("printf");
        command.arg("CPU: x\nLoad average: y\n  PID PPID\n");

        let config = MonitorConfig::default();
        let store = shared_store(&config);
        let provider = Box::new(LiveProvider::from_command(
            command,
            &config,
            CancellationToken::new(),
        ));
        let mut pipeline = Pipeline::new(provider, &config, store.clone(), CancellationToken::new());

        let stats = pipeline.run().unwrap();
        assert_eq!(stats, PipelineStats::default());
        assert!(store.snapshot().is_empty());
    }

    #[test]
    fn test_cancel_stops_live_pipeline() {
        let config = MonitorConfig::default();
        let cancel = CancellationToken::new();
        let provider = Box::new(LiveProvider::spawn("sleep 30", &config, cancel.clone()));
        let stopper = provider.stop_handle();
        let mut pipeline = Pipeline::new(provider, &config, shared_store(&config), cancel);

        let consumer = std::thread::spawn(move || pipeline.run());
        stopper.stop();
        let stats = consumer.join().unwrap().unwrap();
        assert_eq!(stats.snapshots_accepted, 0);
    }

    #[test]
    fn test_cancelling_token_ends_silent_live_pipeline() {
        let config = MonitorConfig::default();
        let cancel = CancellationToken::new();
        let provider = Box::new(LiveProvider::spawn("sleep 30", &config, cancel.clone()));
        let mut pipeline = Pipeline::new(provider, &config, shared_store(&config), cancel.clone());

        let consumer = std::thread::spawn(move || pipeline.run());
        std::thread::sleep(Duration::from_millis(200));
        let cancelled_at = Instant::now();
        cancel.cancel();
        let stats = consumer.join().unwrap().unwrap();
        assert!(cancelled_at.elapsed() < Duration::from_secs(5));
        assert_eq!(stats.snapshots_accepted, 0);
    }

    #[test]
    fn test_cancelled_before_tick() {
        let config = MonitorConfig::default();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let text = report_text(&[ReportFixture::new("10:00:00")]);
        let store = shared_store(&config);
        let mut pipeline = Pipeline::new(replay(&text), &config, store.clone(), cancel);

        assert_eq!(pipeline.tick().unwrap(), Tick::Finished);
        assert!(store.snapshot().is_empty());
    }
}
