//! Human readable calendar breakdowns of record timestamps.
//!
//! The transport itself never inspects timestamps; these breakdowns exist
//! for the formatting layer above it, which stamps records on the producer
//! side and renders them on the backend thread.

use core::fmt::Display;

use clocksource::precise::UnixInstant;
use time::{OffsetDateTime, UtcOffset};

/// A calendar breakdown of a wall-clock timestamp.
#[derive(Copy, Clone, Debug, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct DateTime {
    dt: OffsetDateTime,
}

impl DateTime {
    /// Breakdown of `instant` in the local timezone when the offset can be
    /// determined, in UTC otherwise. Thread-safe and re-entrant: no global
    /// timezone state is mutated.
    pub fn local_from(instant: UnixInstant) -> Self {
        let utc = Self::from(instant);

        match UtcOffset::current_local_offset() {
            Ok(offset) => DateTime {
                dt: utc.dt.to_offset(offset),
            },
            Err(_) => utc,
        }
    }

    /// Breakdown of a raw count of seconds since the epoch, in UTC.
    ///
    /// Panics if the timestamp lies beyond the representable calendar
    /// range (past the year 9999).
    pub fn from_secs(epoch_seconds: u64) -> Self {
        DateTime {
            dt: OffsetDateTime::from_unix_timestamp(epoch_seconds as i64).unwrap(),
        }
    }
}

impl Display for DateTime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::result::Result<(), std::fmt::Error> {
        let date = self.dt.date();
        let time = self.dt.time();
        let (off_h, off_m, _) = self.dt.offset().as_hms();
        write!(
            f,
            "{:04}-{:02}-{:02}T{:02}:{:02}:{:02}.{:03}{:+03}:{:02}",
            date.year(),
            date.month() as u8,
            date.day(),
            time.hour(),
            time.minute(),
            time.second(),
            time.millisecond(),
            off_h,
            off_m.unsigned_abs(),
        )
    }
}

impl From<UnixInstant> for DateTime {
    fn from(other: UnixInstant) -> Self {
        let ns = other.duration_since(UnixInstant::EPOCH).as_nanos();

        DateTime {
            dt: OffsetDateTime::from_unix_timestamp_nanos(ns as i128).unwrap(),
        }
    }
}
