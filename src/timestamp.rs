//! UTC timestamps with nanosecond precision.
//!
//! [`Timestamp`] is used for package last-modified dates and for the
//! modification time captured alongside each backup, so that a reverted file
//! gets its original mtime back.
//!
//! # Example
//!
//! ```rust
//! use modstack::Timestamp;
//!
//! let ts = Timestamp::from_unix_secs_nanos(1_700_000_000, 250_000_000).unwrap();
//! assert_eq!(ts.as_unix_secs(), 1_700_000_000);
//! assert_eq!(ts.to_string(), "2023-11-14T22:13:20.25Z");
//! ```

use std::fmt;
use std::fs::Metadata;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use filetime::FileTime;
use serde::{Deserialize, Serialize};

const NANOS_PER_SECOND: u32 = 1_000_000_000;
const SECONDS_PER_DAY: i64 = 86_400;

/// A point in time, stored as seconds and nanoseconds since the Unix epoch.
///
/// `nanos` is always in `0..1_000_000_000`, also for times before the epoch,
/// so the derived ordering is chronological.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub struct Timestamp {
    secs: i64,
    nanos: u32,
}

impl Timestamp {
    /// Returns the current time.
    pub fn now() -> Self {
        Self::from_system_time(SystemTime::now()).unwrap_or_default()
    }

    /// Creates a timestamp from whole Unix seconds.
    #[inline]
    pub const fn from_unix_secs(secs: i64) -> Self {
        Self { secs, nanos: 0 }
    }

    /// Creates a timestamp from Unix seconds and a sub-second part.
    ///
    /// Returns `None` if `nanos` is not below one second.
    pub fn from_unix_secs_nanos(secs: i64, nanos: u32) -> Option<Self> {
        if nanos >= NANOS_PER_SECOND {
            return None;
        }
        Some(Self { secs, nanos })
    }

    /// Creates a timestamp from a `SystemTime`.
    ///
    /// Returns `None` if the time is outside the representable range.
    pub fn from_system_time(time: SystemTime) -> Option<Self> {
        match time.duration_since(UNIX_EPOCH) {
            Ok(duration) => Some(Self {
                secs: i64::try_from(duration.as_secs()).ok()?,
                nanos: duration.subsec_nanos(),
            }),
            Err(e) => {
                let duration = e.duration();
                let mut secs = -i64::try_from(duration.as_secs()).ok()?;
                let mut nanos = duration.subsec_nanos();
                if nanos > 0 {
                    secs = secs.checked_sub(1)?;
                    nanos = NANOS_PER_SECOND - nanos;
                }
                Some(Self { secs, nanos })
            }
        }
    }

    /// Returns the modification time recorded in file metadata.
    pub fn modified(metadata: &Metadata) -> Self {
        Self::from(FileTime::from_last_modification_time(metadata))
    }

    /// Returns the whole Unix seconds, rounded towards negative infinity.
    #[inline]
    pub const fn as_unix_secs(&self) -> i64 {
        self.secs
    }

    /// Returns the sub-second part in nanoseconds.
    #[inline]
    pub const fn sub_second_nanos(&self) -> u32 {
        self.nanos
    }

    /// Returns the timestamp as Unix nanoseconds.
    pub fn as_unix_nanos(&self) -> i128 {
        self.secs as i128 * NANOS_PER_SECOND as i128 + self.nanos as i128
    }

    /// Converts to a `SystemTime`.
    pub fn as_system_time(&self) -> SystemTime {
        if self.secs >= 0 {
            UNIX_EPOCH + Duration::new(self.secs as u64, self.nanos)
        } else {
            UNIX_EPOCH - Duration::from_secs(self.secs.unsigned_abs())
                + Duration::new(0, self.nanos)
        }
    }

    /// Converts to a [`FileTime`] for setting file modification times.
    pub fn to_file_time(&self) -> FileTime {
        FileTime::from_unix_time(self.secs, self.nanos)
    }
}

impl From<FileTime> for Timestamp {
    fn from(ft: FileTime) -> Self {
        Self {
            secs: ft.unix_seconds(),
            nanos: ft.nanoseconds(),
        }
    }
}

impl From<Timestamp> for SystemTime {
    fn from(ts: Timestamp) -> SystemTime {
        ts.as_system_time()
    }
}

/// Converts days since 1970-01-01 to a (year, month, day) civil date.
fn civil_from_days(days: i64) -> (i64, u32, u32) {
    let z = days + 719_468;
    let era = z.div_euclid(146_097);
    let doe = z.rem_euclid(146_097);
    let yoe = (doe - doe / 1460 + doe / 36_524 - doe / 146_096) / 365;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let day = (doy - (153 * mp + 2) / 5 + 1) as u32;
    let month = (if mp < 10 { mp + 3 } else { mp - 9 }) as u32;
    let year = yoe + era * 400 + if month <= 2 { 1 } else { 0 };
    (year, month, day)
}

/// Formats as RFC 3339 in UTC, trimming trailing zeros of the fraction.
impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let days = self.secs.div_euclid(SECONDS_PER_DAY);
        let rem = self.secs.rem_euclid(SECONDS_PER_DAY);
        let (year, month, day) = civil_from_days(days);
        write!(
            f,
            "{:04}-{:02}-{:02}T{:02}:{:02}:{:02}",
            year,
            month,
            day,
            rem / 3600,
            (rem % 3600) / 60,
            rem % 60
        )?;
        if self.nanos > 0 {
            let fraction = format!("{:09}", self.nanos);
            write!(f, ".{}", fraction.trim_end_matches('0'))?;
        }
        write!(f, "Z")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unix_epoch() {
        let ts = Timestamp::default();
        assert_eq!(ts.as_unix_secs(), 0);
        assert_eq!(ts.as_unix_nanos(), 0);
        assert_eq!(ts.as_system_time(), UNIX_EPOCH);
        assert_eq!(ts.to_string(), "1970-01-01T00:00:00Z");
    }

    #[test]
    fn test_invalid_nanos() {
        assert!(Timestamp::from_unix_secs_nanos(0, NANOS_PER_SECOND).is_none());
    }

    #[test]
    fn test_roundtrip_system_time() {
        let original = UNIX_EPOCH + Duration::new(1_234_567_890, 123_456_789);
        let ts = Timestamp::from_system_time(original).unwrap();
        assert_eq!(ts.as_system_time(), original);
    }

    #[test]
    fn test_before_epoch_normalized() {
        let original = UNIX_EPOCH - Duration::new(1, 500_000_000);
        let ts = Timestamp::from_system_time(original).unwrap();
        assert_eq!(ts.as_unix_secs(), -2);
        assert_eq!(ts.sub_second_nanos(), 500_000_000);
        assert_eq!(ts.as_system_time(), original);
        assert!(ts < Timestamp::default());
    }

    #[test]
    fn test_file_time_roundtrip() {
        let ts = Timestamp::from_unix_secs_nanos(1_600_000_000, 42).unwrap();
        assert_eq!(Timestamp::from(ts.to_file_time()), ts);
    }

    #[test]
    fn test_display() {
        let ts = Timestamp::from_unix_secs(951_782_400);
        assert_eq!(ts.to_string(), "2000-02-29T00:00:00Z");

        let ts = Timestamp::from_unix_secs_nanos(86_399, 1_000).unwrap();
        assert_eq!(ts.to_string(), "1970-01-01T23:59:59.000001Z");

        let ts = Timestamp::from_unix_secs(-1);
        assert_eq!(ts.to_string(), "1969-12-31T23:59:59Z");
    }

    #[test]
    fn test_serde() {
        let ts = Timestamp::from_unix_secs_nanos(10, 5).unwrap();
        let json = serde_json::to_string(&ts).unwrap();
        assert_eq!(json, r#"{"secs":10,"nanos":5}"#);
        let back: Timestamp = serde_json::from_str(&json).unwrap();
        assert_eq!(back, ts);
    }
}
