//! Utility modules for toptrace.

mod cancel;
mod clock;

pub use cancel::CancellationToken;
pub use clock::{ClockParseError, parse_clock, seconds_behind};
