//! Timestamp helpers and the clock abstraction.
//!
//! Every phase reads "now" through a [`Clock`] so timeout behavior can be
//! exercised without waiting on the wall clock.

pub mod clock;
pub mod timestamps;

pub use clock::{Clock, FakeClock, SharedClock, SystemClock};
pub use timestamps::{format_stamp, now_utc, parse_stamp, Timestamp, TimestampError};
