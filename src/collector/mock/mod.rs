//! Report fixtures for testing.
//!
//! Builds realistic `top -b` snapshots without a live device, the same
//! way for parser, assembler, store and pipeline tests.

use crate::storage::model::RawSnapshot;

mod scenarios;

pub use scenarios::{report_text, timestamp_at};

/// Builder for one snapshot of report text.
#[derive(Debug, Clone)]
pub struct ReportFixture {
    timestamp: String,
    idle: f64,
    processes: Vec<(String, f64)>,
}

impl ReportFixture {
    /// A mostly idle system (90% idle) with no process rows.
    pub fn new(timestamp: impl Into<String>) -> Self {
        Self {
            timestamp: timestamp.into(),
            idle: 90.0,
            processes: Vec::new(),
        }
    }

    pub fn idle(mut self, idle: f64) -> Self {
        self.idle = idle;
        self
    }

    /// Appends a process row with the given command line and `%CPU`.
    pub fn process(mut self, command: &str, cpu_percent: f64) -> Self {
        self.processes.push((command.to_string(), cpu_percent));
        self
    }

    /// Report lines: memory, CPU, load, blank, header, then process rows.
    pub fn lines(&self) -> Vec<String> {
        let busy = 100.0 - self.idle;
        let mut lines = vec![
            "Mem: 1822748K used, 148812K free, 10244K shrd, 61276K buff, 809216K cached".to_string(),
            format!(
                "CPU: {}% usr   0.0% sys   0.0% nic {}% idle   0.0% io   0.0% irq   0.0% sirq   0.0% st",
                busy, self.idle
            ),
            format!("Load average: 1.52 1.48 1.40 3/412 28761, {}", self.timestamp),
            String::new(),
            "  PID  PPID USER     STAT   VSZ %VSZ CPU %CPU COMMAND".to_string(),
        ];
        for (i, (command, cpu)) in self.processes.iter().enumerate() {
            lines.push(process_row(1000 + i as u32, command, *cpu));
        }
        lines
    }

    pub fn build(&self) -> RawSnapshot {
        RawSnapshot::new(self.lines())
    }
}

/// One process table row in the report's column layout.
pub fn process_row(pid: u32, command: &str, cpu_percent: f64) -> String {
    format!(
        "{:5}     1 root     S     123m  1.2   0 {:>4} {}",
        pid, cpu_percent, command
    )
}
