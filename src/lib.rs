//! toptrace - process activity time series from `top -b` style reports.
//!
//! Reads a periodic report either from a recorded file or from a running
//! command, splits it into snapshots, parses each snapshot into
//! observations and keeps a bounded, time-aligned history per process.
//!
//! - [`collector`]: line feed, snapshot assembly, parsing, label policy
//! - [`storage`]: records, the time store and the raw snapshot archive
//! - [`provider`]: live and replay snapshot sources
//! - [`pipeline`]: the consumer loop tying them together

pub mod collector;
pub mod config;
pub mod pipeline;
pub mod provider;
pub mod storage;
pub mod util;

pub use config::MonitorConfig;
pub use pipeline::{Pipeline, PipelineStats, Tick};
