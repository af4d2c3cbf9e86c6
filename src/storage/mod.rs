//! Snapshot records, the in-memory time store and the raw snapshot archive.

pub mod archive;
pub mod model;
pub mod series;

pub use archive::{FileArchive, SnapshotSink};
pub use model::{Observation, RawSnapshot, TOTAL_CPU_KEY};
pub use series::{
    AppendOutcome, DataPoint, SeriesView, SharedStore, StoreCommand, StoreError, StoreView,
    TimeSeriesStore,
};
