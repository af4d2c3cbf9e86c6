//! Parsers for the lines of a `top -b` style report.
//!
//! These are pure functions that turn one trimmed line into a typed record.
//! Matching is structural: whitespace-separated tokens, each checked for its
//! expected literal or numeric shape. No regular expressions are involved.

use crate::storage::model::{CpuRecord, LoadRecord, MemoryRecord, ProcessRecord};

/// A report line that matched its prefix but not its format.
#[derive(Debug, Clone, PartialEq)]
pub struct ParseError {
    /// Which parser rejected the line.
    pub kind: LineKind,
    pub message: String,
}

impl ParseError {
    pub fn new(kind: LineKind, msg: impl Into<String>) -> Self {
        Self {
            kind,
            message: msg.into(),
        }
    }
}

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "bad {} line: {}", self.kind, self.message)
    }
}

impl std::error::Error for ParseError {}

const MEM_PREFIX: &str = "Mem:";
const CPU_PREFIX: &str = "CPU:";
const LOAD_PREFIX: &str = "Load average:";
const HEADER_PREFIX: &str = "PID";

/// Kind of a report line, decided by a cheap prefix test.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineKind {
    Memory,
    Cpu,
    Load,
    /// Process table column titles (`PID  PPID USER ...`).
    Header,
    Blank,
    /// Anything else is a candidate process row.
    Process,
}

impl std::fmt::Display for LineKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            LineKind::Memory => "memory",
            LineKind::Cpu => "cpu",
            LineKind::Load => "load",
            LineKind::Header => "header",
            LineKind::Blank => "blank",
            LineKind::Process => "process",
        };
        f.write_str(name)
    }
}

/// Classifies a line by prefix. Leading whitespace is ignored.
pub fn classify_line(line: &str) -> LineKind {
    let line = line.trim();
    if line.is_empty() {
        LineKind::Blank
    } else if line.starts_with(MEM_PREFIX) {
        LineKind::Memory
    } else if line.starts_with(CPU_PREFIX) {
        LineKind::Cpu
    } else if line.starts_with(LOAD_PREFIX) {
        LineKind::Load
    } else if line.starts_with(HEADER_PREFIX) {
        LineKind::Header
    } else {
        LineKind::Process
    }
}

/// Returns true for the memory line that starts every snapshot.
pub fn is_boundary_line(line: &str) -> bool {
    line.trim_start().starts_with(MEM_PREFIX)
}

/// Parses the memory line.
///
/// Format: `Mem: <n>K used, <n>K free, <n>K shrd, <n>K buff, <n>K cached`
pub fn parse_mem_line(line: &str) -> Result<MemoryRecord, ParseError> {
    let rest = line
        .trim()
        .strip_prefix(MEM_PREFIX)
        .ok_or_else(|| ParseError::new(LineKind::Memory, "missing 'Mem:' prefix"))?;
    let parts: Vec<&str> = rest.split_whitespace().collect();
    if parts.len() < 10 {
        return Err(ParseError::new(LineKind::Memory, format!(
            "not enough fields in memory line: expected 10, got {}",
            parts.len()
        )));
    }

    let field = |idx: usize, label: &str| -> Result<u64, ParseError> {
        let found = parts[idx * 2 + 1].trim_end_matches(',');
        if found != label {
            return Err(ParseError::new(LineKind::Memory, format!(
                "expected '{}' at position {}, got '{}'",
                label, idx, found
            )));
        }
        parts[idx * 2]
            .strip_suffix('K')
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| ParseError::new(LineKind::Memory, format!("invalid {}", label)))
    };

    Ok(MemoryRecord {
        used: field(0, "used")?,
        free: field(1, "free")?,
        shared: field(2, "shrd")?,
        buffers: field(3, "buff")?,
        cached: field(4, "cached")?,
    })
}

/// Parses the CPU line.
///
/// Format: `CPU: <f>% usr <f>% sys <f>% nic <f>% idle <f>% io <f>% irq <f>% sirq <f>% st`
pub fn parse_cpu_line(line: &str) -> Result<CpuRecord, ParseError> {
    let rest = line
        .trim()
        .strip_prefix(CPU_PREFIX)
        .ok_or_else(|| ParseError::new(LineKind::Cpu, "missing 'CPU:' prefix"))?;
    let parts: Vec<&str> = rest.split_whitespace().collect();
    if parts.len() < 16 {
        return Err(ParseError::new(LineKind::Cpu, format!(
            "not enough fields in cpu line: expected 16, got {}",
            parts.len()
        )));
    }

    let field = |idx: usize, label: &str| -> Result<f64, ParseError> {
        if parts[idx * 2 + 1] != label {
            return Err(ParseError::new(LineKind::Cpu, format!(
                "expected '{}' at position {}, got '{}'",
                label,
                idx,
                parts[idx * 2 + 1]
            )));
        }
        parts[idx * 2]
            .strip_suffix('%')
            .and_then(parse_unsigned_float)
            .ok_or_else(|| ParseError::new(LineKind::Cpu, format!("invalid {}", label)))
    };

    Ok(CpuRecord {
        user: field(0, "usr")?,
        system: field(1, "sys")?,
        nice: field(2, "nic")?,
        idle: field(3, "idle")?,
        io: field(4, "io")?,
        irq: field(5, "irq")?,
        softirq: field(6, "sirq")?,
        steal: field(7, "st")?,
    })
}

/// Parses the load line.
///
/// Format: `Load average: <f> <f> <f> <running>/<total> <last_pid>, <HH:MM:SS>`
pub fn parse_load_line(line: &str) -> Result<LoadRecord, ParseError> {
    let rest = line
        .trim()
        .strip_prefix(LOAD_PREFIX)
        .ok_or_else(|| ParseError::new(LineKind::Load, "missing 'Load average:' prefix"))?;
    let parts: Vec<&str> = rest.split_whitespace().collect();
    if parts.len() < 6 {
        return Err(ParseError::new(LineKind::Load, format!(
            "not enough fields in load line: expected 6, got {}",
            parts.len()
        )));
    }

    let load = |idx: usize, name: &str| -> Result<f64, ParseError> {
        parse_unsigned_float(parts[idx])
            .ok_or_else(|| ParseError::new(LineKind::Load, format!("invalid {}", name)))
    };

    // Format: running/total
    let (runnable, total) = parts[3]
        .split_once('/')
        .and_then(|(r, t)| Some((r.parse::<u32>().ok()?, t.parse::<u32>().ok()?)))
        .ok_or_else(|| ParseError::new(LineKind::Load, "invalid running/total"))?;

    let highest_pid = parts[4]
        .strip_suffix(',')
        .and_then(|s| s.parse::<u32>().ok())
        .ok_or_else(|| ParseError::new(LineKind::Load, "invalid last pid"))?;

    let timestamp = parts[5];
    if !timestamp.chars().all(|c| c.is_ascii_digit() || c == ':') {
        return Err(ParseError::new(
            LineKind::Load,
            format!("invalid timestamp '{}'", timestamp),
        ));
    }

    Ok(LoadRecord {
        load1: load(0, "load1")?,
        load5: load(1, "load5")?,
        load15: load(2, "load15")?,
        runnable,
        total,
        highest_pid,
        timestamp: timestamp.to_string(),
    })
}

/// Parses one row of the process table.
///
/// Format: `PID PPID USER STAT VSZ %VSZ CPU %CPU COMMAND...`
///
/// The command is everything after the eighth column, internal spaces kept.
pub fn parse_process_line(line: &str) -> Result<ProcessRecord, ParseError> {
    let mut rest = line.trim();
    let mut fields: [&str; 8] = [""; 8];
    for (idx, slot) in fields.iter_mut().enumerate() {
        let (token, tail) = next_token(rest)
            .ok_or_else(|| {
                ParseError::new(LineKind::Process, format!("missing column {} in process row", idx))
            })?;
        *slot = token;
        rest = tail;
    }

    let command = rest.trim();
    if command.is_empty() {
        return Err(ParseError::new(LineKind::Process, "missing command in process row"));
    }

    let parse_u32 = |idx: usize, name: &str| -> Result<u32, ParseError> {
        fields[idx]
            .parse()
            .map_err(|_| ParseError::new(LineKind::Process, format!("invalid {}", name)))
    };
    let parse_f64 = |idx: usize, name: &str| -> Result<f64, ParseError> {
        parse_unsigned_float(fields[idx])
            .ok_or_else(|| ParseError::new(LineKind::Process, format!("invalid {}", name)))
    };

    Ok(ProcessRecord {
        pid: parse_u32(0, "pid")?,
        parent_pid: parse_u32(1, "ppid")?,
        user: fields[2].to_string(),
        state: fields[3].to_string(),
        virtual_size_kb: parse_size_kb(fields[4])
            .ok_or_else(|| {
                ParseError::new(LineKind::Process, format!("invalid vsz '{}'", fields[4]))
            })?,
        virtual_size_percent: parse_f64(5, "%vsz")?,
        cpu_time_ticks: fields[6]
            .parse()
            .map_err(|_| ParseError::new(LineKind::Process, "invalid cpu"))?,
        cpu_percent: parse_f64(7, "%cpu")?,
        command: command.to_string(),
    })
}

/// Splits off the first whitespace-delimited token.
fn next_token(s: &str) -> Option<(&str, &str)> {
    let s = s.trim_start();
    if s.is_empty() {
        return None;
    }
    match s.find(char::is_whitespace) {
        Some(end) => Some((&s[..end], &s[end..])),
        None => Some((s, "")),
    }
}

/// Parses `[0-9.]+` only: no sign, exponent, `inf` or `nan`.
fn parse_unsigned_float(s: &str) -> Option<f64> {
    if s.is_empty() || !s.chars().all(|c| c.is_ascii_digit() || c == '.') {
        return None;
    }
    s.parse().ok()
}

/// Decodes a `VSZ` column: plain KiB, or a `k`/`m`/`g` suffixed amount.
fn parse_size_kb(s: &str) -> Option<u64> {
    let (num, multiplier) = match s.char_indices().last()? {
        (i, 'k' | 'K') => (&s[..i], 1),
        (i, 'm' | 'M') => (&s[..i], 1024),
        (i, 'g' | 'G') => (&s[..i], 1024 * 1024),
        _ => (s, 1),
    };
    let value = parse_unsigned_float(num)?;
    Some((value * multiplier as f64).round() as u64)
}
