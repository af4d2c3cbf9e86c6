//! Snapshot parser: one assembled snapshot in, timestamped observations out.
//!
//! Each line is dispatched by [`classify_line`] to its extractor. The CPU line
//! yields the synthetic `"Total CPU"` observation, the load line yields the
//! timestamp, process rows yield one observation each after the per-snapshot
//! cap and the activity threshold are applied. Rows that fail to parse are
//! skipped and counted.

use tracing::debug;

use crate::collector::report::{
    LineKind, classify_line, parse_cpu_line, parse_load_line, parse_mem_line, parse_process_line,
};
use crate::config::MonitorConfig;
use crate::storage::model::{
    CpuRecord, LoadRecord, MemoryRecord, Observation, RawSnapshot, TOTAL_CPU_KEY,
};

/// Reason a whole snapshot was dropped.
#[derive(Debug, Clone, PartialEq)]
pub enum SnapshotError {
    /// No parseable load line, so there is no timestamp to store under.
    MissingTimestamp { lines: usize },
}

impl std::fmt::Display for SnapshotError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SnapshotError::MissingTimestamp { lines } => {
                write!(f, "snapshot of {} lines has no load line", lines)
            }
        }
    }
}

impl std::error::Error for SnapshotError {}

/// Result of parsing one snapshot.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ParsedSnapshot {
    /// Timestamp from the load line; stamps every observation below.
    pub timestamp: String,
    /// `"Total CPU"` first (when a CPU line was present), then processes in row order.
    pub observations: Vec<Observation>,
    pub memory: Option<MemoryRecord>,
    pub cpu: Option<CpuRecord>,
    pub load: Option<LoadRecord>,
    /// Lines of a known kind that failed structural matching.
    pub malformed_lines: usize,
}

impl ParsedSnapshot {
    /// Number of accepted process observations (everything except `"Total CPU"`).
    pub fn process_count(&self) -> usize {
        self.observations
            .iter()
            .filter(|o| o.key != TOTAL_CPU_KEY)
            .count()
    }
}

/// Stateless parser configured with the process cap, threshold and CPU offset.
#[derive(Debug, Clone)]
pub struct SnapshotParser {
    max_process_num: usize,
    min_cpu: f64,
    cpu_offset: f64,
}

impl SnapshotParser {
    pub fn new(config: &MonitorConfig) -> Self {
        Self {
            max_process_num: config.max_process_num,
            min_cpu: config.min_cpu,
            cpu_offset: config.cpu_offset,
        }
    }

    pub fn parse(&self, snapshot: &RawSnapshot) -> Result<ParsedSnapshot, SnapshotError> {
        let mut parsed = ParsedSnapshot::default();
        let mut processes = 0usize;

        for line in &snapshot.lines {
            let line = line.trim();
            match classify_line(line) {
                LineKind::Blank | LineKind::Header => {}
                LineKind::Memory => match parse_mem_line(line) {
                    Ok(mem) => parsed.memory = Some(mem),
                    Err(e) => skip_line(&mut parsed, line, &e),
                },
                LineKind::Cpu => match parse_cpu_line(line) {
                    // One "Total CPU" point per snapshot; later CPU lines are ignored.
                    Ok(cpu) if parsed.cpu.is_none() => {
                        parsed.observations.insert(
                            0,
                            Observation::new(TOTAL_CPU_KEY, cpu.total(self.cpu_offset)),
                        );
                        parsed.cpu = Some(cpu);
                    }
                    Ok(_) => {}
                    Err(e) => skip_line(&mut parsed, line, &e),
                },
                LineKind::Load => match parse_load_line(line) {
                    Ok(load) if parsed.load.is_none() => parsed.load = Some(load),
                    Ok(_) => {}
                    Err(e) => skip_line(&mut parsed, line, &e),
                },
                LineKind::Process => {
                    // Rows past the cap are dropped in row order, unparsed.
                    if processes >= self.max_process_num {
                        continue;
                    }
                    match parse_process_line(line) {
                        Ok(process) if process.cpu_percent > self.min_cpu => {
                            parsed
                                .observations
                                .push(Observation::new(process.command, process.cpu_percent));
                            processes += 1;
                        }
                        Ok(_) => {}
                        Err(e) => skip_line(&mut parsed, line, &e),
                    }
                }
            }
        }

        match &parsed.load {
            Some(load) => {
                parsed.timestamp = load.timestamp.clone();
                Ok(parsed)
            }
            None => Err(SnapshotError::MissingTimestamp {
                lines: snapshot.len(),
            }),
        }
    }
}

fn skip_line(parsed: &mut ParsedSnapshot, line: &str, error: &dyn std::error::Error) {
    parsed.malformed_lines += 1;
    debug!(line, error = %error, "skipping malformed line");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::mock::{ReportFixture, process_row};

    fn parser() -> SnapshotParser {
        SnapshotParser::new(&MonitorConfig::default())
    }

    fn raw(text: &str) -> RawSnapshot {
        RawSnapshot::new(text.lines().map(str::to_string).collect())
    }

    #[test]
    fn test_total_cpu_from_idle() {
        let snapshot = ReportFixture::new("10:00:00").idle(80.0).build();
        let parsed = parser().parse(&snapshot).unwrap();

        assert_eq!(parsed.timestamp, "10:00:00");
        assert_eq!(parsed.observations[0], Observation::new(TOTAL_CPU_KEY, 24.0));
        assert!(parsed.memory.is_some());
        assert_eq!(parsed.load.as_ref().unwrap().timestamp, "10:00:00");
    }

    #[test]
    fn test_process_rows_become_observations() {
        let snapshot = ReportFixture::new("10:00:00")
            .process("/usr/bin/weston --idle-time=0", 12.5)
            .process("adbd", 1.0)
            .build();
        let parsed = parser().parse(&snapshot).unwrap();

        assert_eq!(parsed.observations.len(), 3);
        assert_eq!(
            parsed.observations[1],
            Observation::new("/usr/bin/weston --idle-time=0", 12.5)
        );
        assert_eq!(parsed.observations[2], Observation::new("adbd", 1.0));
        assert_eq!(parsed.process_count(), 2);
    }

    #[test]
    fn test_process_cap_drops_rows_in_order() {
        let mut fixture = ReportFixture::new("10:00:00");
        for i in 0..8 {
            // Later rows are busier; the cap is by row order, not rank.
            fixture = fixture.process(&format!("proc{}", i), 1.0 + i as f64);
        }
        let parsed = parser().parse(&fixture.build()).unwrap();

        assert_eq!(parsed.process_count(), 5);
        let keys: Vec<&str> = parsed.observations[1..]
            .iter()
            .map(|o| o.key.as_str())
            .collect();
        assert_eq!(keys, vec!["proc0", "proc1", "proc2", "proc3", "proc4"]);
    }

    #[test]
    fn test_threshold_drops_idle_processes() {
        let snapshot = ReportFixture::new("10:00:00")
            .process("idle_daemon", 0.06)
            .process("quiet", 0.0)
            .process("busy", 0.07)
            .build();
        let parsed = parser().parse(&snapshot).unwrap();

        assert_eq!(parsed.process_count(), 1);
        assert_eq!(parsed.observations[1].key, "busy");
        assert!(parsed.observations[1..].iter().all(|o| o.value > 0.06));
    }

    #[test]
    fn test_below_threshold_rows_do_not_consume_cap() {
        let config = MonitorConfig {
            max_process_num: 1,
            ..MonitorConfig::default()
        };
        let snapshot = ReportFixture::new("10:00:00")
            .process("quiet", 0.01)
            .process("busy", 3.0)
            .build();
        let parsed = SnapshotParser::new(&config).parse(&snapshot).unwrap();

        assert_eq!(parsed.process_count(), 1);
        assert_eq!(parsed.observations[1].key, "busy");
    }

    #[test]
    fn test_garbage_line_is_skipped() {
        let mut snapshot = ReportFixture::new("10:00:00")
            .process("weston", 4.0)
            .build();
        snapshot.lines.insert(3, "garbage data here".to_string());
        let parsed = parser().parse(&snapshot).unwrap();

        assert_eq!(parsed.malformed_lines, 1);
        assert_eq!(parsed.observations.len(), 2);
        assert_eq!(parsed.observations[1].key, "weston");
    }

    #[test]
    fn test_missing_load_line_drops_snapshot() {
        let snapshot = raw(&format!(
            "Mem: 1K used, 2K free, 0K shrd, 0K buff, 0K cached\n\
             CPU:  1.0% usr  1.0% sys  0.0% nic 98.0% idle  0.0% io  0.0% irq  0.0% sirq  0.0% st\n\
             {}",
            process_row(1, "init", 1.0)
        ));
        let err = parser().parse(&snapshot).unwrap_err();
        assert_eq!(err, SnapshotError::MissingTimestamp { lines: 3 });
    }

    #[test]
    fn test_snapshot_without_cpu_line_has_no_total() {
        let snapshot = raw(&format!(
            "Load average: 0.10 0.20 0.30 1/100 200, 09:00:01\n{}",
            process_row(1, "init", 1.0)
        ));
        let parsed = parser().parse(&snapshot).unwrap();

        assert!(parsed.cpu.is_none());
        assert_eq!(parsed.observations, vec![Observation::new("init", 1.0)]);
    }

    #[test]
    fn test_truncated_cpu_line_counts_as_malformed() {
        let snapshot = raw(
            "Mem: 1K used, 2K free, 0K shrd, 0K buff, 0K cached\n\
             CPU:  1.0% usr  1.0% sys\n\
             Load average: 0.10 0.20 0.30 1/100 200, 09:00:01",
        );
        let parsed = parser().parse(&snapshot).unwrap();

        assert_eq!(parsed.malformed_lines, 1);
        assert!(parsed.observations.is_empty());
    }
}
