//! Typed records extracted from one report snapshot.
//!
//! Records are immutable values built once per snapshot by the
//! extractors in [`crate::collector::report`].

use serde::{Deserialize, Serialize};

/// Series key of the synthetic whole-system CPU observation.
pub const TOTAL_CPU_KEY: &str = "Total CPU";

/// Memory summary line.
///
/// Source: `Mem: 123456K used, 654321K free, 0K shrd, 1024K buff, 40960K cached`
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq, Eq, Default)]
pub struct MemoryRecord {
    /// Used memory (KiB).
    pub used: u64,
    /// Free memory (KiB).
    pub free: u64,
    /// Shared memory (KiB).
    pub shared: u64,
    /// Buffers (KiB).
    pub buffers: u64,
    /// Page cache (KiB).
    pub cached: u64,
}

/// CPU summary line, percentages in `[0, 100]`.
///
/// Source: `CPU:  10.5% usr  5.2% sys  0.0% nic 80.0% idle  2.1% io  0.0% irq  2.2% sirq  0.0% st`
///
/// The fields need not sum to exactly 100.
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq, Default)]
pub struct CpuRecord {
    pub user: f64,
    pub system: f64,
    pub nice: f64,
    pub idle: f64,
    pub io: f64,
    pub irq: f64,
    pub softirq: f64,
    pub steal: f64,
}

impl CpuRecord {
    /// Whole-system busy percentage: `100 - idle + offset`, rounded to 2 decimals.
    pub fn total(&self, offset: f64) -> f64 {
        round2(100.0 - self.idle + offset)
    }
}

/// Load line.
///
/// Source: `Load average: 0.52 0.48 0.40 2/312 4567, 12:01:05`
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq, Default)]
pub struct LoadRecord {
    pub load1: f64,
    pub load5: f64,
    pub load15: f64,
    /// Runnable processes.
    pub runnable: u32,
    /// Total processes.
    pub total: u32,
    pub highest_pid: u32,
    /// Wall-clock label of the sampling instant (`HH:MM:SS`).
    pub timestamp: String,
}

/// One row of the process table.
///
/// Source: ` 1234     1 root     S     123m  1.2   0  5.3 /usr/bin/weston --idle`
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq, Default)]
pub struct ProcessRecord {
    pub pid: u32,
    pub parent_pid: u32,
    pub user: String,
    pub state: String,
    /// Virtual size (KiB), decoded from the `VSZ` column (`k`/`m`/`g` suffixes).
    pub virtual_size_kb: u64,
    pub virtual_size_percent: f64,
    /// Processor the task last ran on / CPU tick column.
    pub cpu_time_ticks: u64,
    pub cpu_percent: f64,
    /// Full command line, arguments included.
    pub command: String,
}

/// A `(series key, value)` pair derived from one record.
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
pub struct Observation {
    pub key: String,
    pub value: f64,
}

impl Observation {
    pub fn new(key: impl Into<String>, value: f64) -> Self {
        Self {
            key: key.into(),
            value,
        }
    }
}

/// The ordered raw lines of one sampling instant, as emitted by the assembler.
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub struct RawSnapshot {
    pub lines: Vec<String>,
}

impl RawSnapshot {
    pub fn new(lines: Vec<String>) -> Self {
        Self { lines }
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }
}

pub(crate) fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
