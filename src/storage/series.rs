//! Bounded multi-series time store.
//!
//! Every accepted observation is normalized, filtered, and appended to its
//! series under the snapshot timestamp. The `"Total CPU"` series is the
//! authoritative clock: once it grows past `max_points` its oldest point is
//! evicted and every other series is trimmed to the same window. Series
//! trimmed to nothing are removed.
//!
//! Points carry the arrival sequence number of the append that produced
//! them. Window alignment compares sequence numbers, not the report's
//! wall-clock labels, so a wrap at midnight cannot evict fresh points.

use std::collections::VecDeque;
use std::sync::{Arc, PoisonError, RwLock};

use serde::Serialize;

use crate::collector::filter::SelectionFilter;
use crate::collector::normalize::normalize_label;
use crate::storage::model::{Observation, TOTAL_CPU_KEY, round2};
use crate::util::seconds_behind;

/// Internal store inconsistency. Indicates a bug, never bad input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The authoritative series was empty while trimming the window.
    EmptyAuthoritativeSeries,
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::EmptyAuthoritativeSeries => {
                write!(f, "authoritative series '{}' is empty", TOTAL_CPU_KEY)
            }
        }
    }
}

impl std::error::Error for StoreError {}

/// Explicit commands accepted by the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreCommand {
    /// Drop every series (user-triggered reset).
    Clear,
}

/// What one [`TimeSeriesStore::append`] did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AppendOutcome {
    /// Points appended (after merging duplicate keys).
    pub stored: usize,
    /// Observations rejected by normalization or the selection filter.
    pub filtered: usize,
    /// Keys that got a new series.
    pub created: Vec<String>,
    /// Keys whose series were trimmed to nothing and removed.
    pub removed: Vec<String>,
    /// Whether the authoritative window moved.
    pub evicted: bool,
}

#[derive(Debug, Clone)]
struct Point {
    seq: u64,
    timestamp: String,
    value: f64,
}

#[derive(Debug, Clone)]
struct Series {
    key: String,
    points: VecDeque<Point>,
}

impl Series {
    fn pop_before(&mut self, seq: u64) {
        while self.points.front().is_some_and(|p| p.seq < seq) {
            self.points.pop_front();
        }
    }

    fn cap(&mut self, max_points: usize) {
        while self.points.len() > max_points {
            self.points.pop_front();
        }
    }

    fn view(&self) -> SeriesView {
        SeriesView {
            key: self.key.clone(),
            points: self
                .points
                .iter()
                .map(|p| DataPoint {
                    timestamp: p.timestamp.clone(),
                    value: p.value,
                })
                .collect(),
        }
    }
}

/// Per-key bounded history, series kept in first-seen order.
#[derive(Debug, Clone)]
pub struct TimeSeriesStore {
    series: Vec<Series>,
    max_points: usize,
    filter: SelectionFilter,
    next_seq: u64,
}

impl TimeSeriesStore {
    pub fn new(max_points: usize, filter: SelectionFilter) -> Self {
        Self {
            series: Vec::new(),
            max_points: max_points.max(1),
            filter,
            next_seq: 0,
        }
    }

    /// Appends one snapshot's observations under `timestamp`.
    ///
    /// Keys are normalized and filtered first; observations whose keys
    /// collapse to the same series are summed into one point.
    pub fn append(
        &mut self,
        timestamp: &str,
        observations: &[Observation],
    ) -> Result<AppendOutcome, StoreError> {
        let seq = self.next_seq;
        self.next_seq += 1;

        let mut outcome = AppendOutcome::default();
        let mut batch: Vec<(String, f64)> = Vec::with_capacity(observations.len());
        for observation in observations {
            let key = normalize_label(&observation.key);
            if key.is_empty() || !self.filter.accepts(&key) {
                outcome.filtered += 1;
                continue;
            }
            match batch.iter_mut().find(|(k, _)| *k == key) {
                Some((_, value)) => *value += observation.value,
                None => batch.push((key, observation.value)),
            }
        }

        for (key, value) in batch {
            let point = Point {
                seq,
                timestamp: timestamp.to_string(),
                value,
            };
            match self.series.iter_mut().find(|s| s.key == key) {
                Some(series) => series.points.push_back(point),
                None => {
                    outcome.created.push(key.clone());
                    self.series.push(Series {
                        key,
                        points: VecDeque::from([point]),
                    });
                }
            }
            outcome.stored += 1;
        }

        self.enforce_window(&mut outcome)?;
        Ok(outcome)
    }

    fn enforce_window(&mut self, outcome: &mut AppendOutcome) -> Result<(), StoreError> {
        let max_points = self.max_points;
        if let Some(authoritative) = self.series.iter_mut().find(|s| s.key == TOTAL_CPU_KEY)
            && authoritative.points.len() > max_points
        {
            authoritative.cap(max_points);
            let oldest = authoritative
                .points
                .front()
                .map(|p| p.seq)
                .ok_or(StoreError::EmptyAuthoritativeSeries)?;
            for series in &mut self.series {
                series.pop_before(oldest);
            }
            outcome.evicted = true;
        }

        // Series fed by snapshots without a CPU line can outrun the window.
        for series in &mut self.series {
            series.cap(max_points);
        }

        self.series.retain(|series| {
            if series.points.is_empty() {
                outcome.removed.push(series.key.clone());
                false
            } else {
                true
            }
        });
        Ok(())
    }

    /// Copies the current series into an isolated read view.
    pub fn snapshot(&self) -> StoreView {
        StoreView {
            series: self.series.iter().map(Series::view).collect(),
        }
    }

    pub fn clear(&mut self) {
        self.series.clear();
    }

    pub fn apply(&mut self, command: StoreCommand) {
        match command {
            StoreCommand::Clear => self.clear(),
        }
    }

    pub fn len(&self) -> usize {
        self.series.len()
    }

    pub fn is_empty(&self) -> bool {
        self.series.is_empty()
    }

    pub fn max_points(&self) -> usize {
        self.max_points
    }
}

/// Store shared between the consumer thread (writer) and readers.
///
/// A panic while holding the lock does not make the store unusable; the
/// data is consistent after every completed operation.
#[derive(Debug, Clone)]
pub struct SharedStore {
    inner: Arc<RwLock<TimeSeriesStore>>,
}

impl SharedStore {
    pub fn new(store: TimeSeriesStore) -> Self {
        Self {
            inner: Arc::new(RwLock::new(store)),
        }
    }

    pub fn append(
        &self,
        timestamp: &str,
        observations: &[Observation],
    ) -> Result<AppendOutcome, StoreError> {
        self.inner
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .append(timestamp, observations)
    }

    pub fn snapshot(&self) -> StoreView {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .snapshot()
    }

    pub fn apply(&self, command: StoreCommand) {
        self.inner
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .apply(command);
    }

    pub fn clear(&self) {
        self.apply(StoreCommand::Clear);
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DataPoint {
    pub timestamp: String,
    pub value: f64,
}

/// Read-only copy of one series.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SeriesView {
    pub key: String,
    pub points: Vec<DataPoint>,
}

impl SeriesView {
    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn first(&self) -> Option<&DataPoint> {
        self.points.first()
    }

    pub fn last(&self) -> Option<&DataPoint> {
        self.points.last()
    }

    /// Mean of the last `n` values, rounded to 2 decimals.
    pub fn recent_average(&self, n: usize) -> Option<f64> {
        let n = n.min(self.points.len());
        if n == 0 {
            return None;
        }
        let sum: f64 = self.points[self.points.len() - n..]
            .iter()
            .map(|p| p.value)
            .sum();
        Some(round2(sum / n as f64))
    }

    /// Seconds this series' last point trails `reference` (an `HH:MM:SS` label).
    pub fn lag_seconds(&self, reference: &str) -> Option<i64> {
        seconds_behind(&self.last()?.timestamp, reference)
    }
}

/// Ordering-stable copy of the whole store, series in first-seen order.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StoreView {
    pub series: Vec<SeriesView>,
}

impl StoreView {
    pub fn get(&self, key: &str) -> Option<&SeriesView> {
        self.series.iter().find(|s| s.key == key)
    }

    pub fn total_cpu(&self) -> Option<&SeriesView> {
        self.get(TOTAL_CPU_KEY)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.series.iter().map(|s| s.key.as_str())
    }

    pub fn iter(&self) -> std::slice::Iter<'_, SeriesView> {
        self.series.iter()
    }

    pub fn len(&self) -> usize {
        self.series.len()
    }

    pub fn is_empty(&self) -> bool {
        self.series.is_empty()
    }

    /// Series whose last point trails the authoritative series by more than
    /// `max_lag` seconds.
    pub fn lagging(&self, max_lag: i64) -> Vec<(&str, i64)> {
        let Some(reference) = self.total_cpu().and_then(SeriesView::last) else {
            return Vec::new();
        };
        self.series
            .iter()
            .filter(|s| s.key != TOTAL_CPU_KEY)
            .filter_map(|s| {
                let lag = s.lag_seconds(&reference.timestamp)?;
                (lag > max_lag).then_some((s.key.as_str(), lag))
            })
            .collect()
    }
}
