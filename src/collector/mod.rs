//! Report collection: from raw `top -b` lines to timestamped observations.
//!
//! ```text
//! LiveFeed ──lines──► SnapshotAssembler ──RawSnapshot──► SnapshotParser ──► observations
//!  (or a file)           (boundaries)                   (report extractors)
//! ```

pub mod assembler;
pub mod feed;
pub mod filter;
pub mod mock;
pub mod normalize;
pub mod parser;
pub mod report;

pub use assembler::{AssemblerState, AssemblyMode, LineSource, SnapshotAssembler};
pub use feed::{
    FeedEnd, FeedEvent, FeedOptions, FeedReceiver, FeedStopHandle, LiveFeed, feed_channel,
};
pub use filter::SelectionFilter;
pub use normalize::normalize_label;
pub use parser::{ParsedSnapshot, SnapshotError, SnapshotParser};
pub use report::{LineKind, ParseError, classify_line};
