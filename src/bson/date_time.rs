use crate::{Error, Result};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// Ticks (100 ns) between 0001-01-01 and 1970-01-01.
const UNIX_EPOCH_TICKS: u64 = 621_355_968_000_000_000;
const TICKS_PER_MILLISECOND: u64 = 10_000;
/// 9999-12-31T23:59:59.999
const MAX_TICKS: u64 = 3_155_378_975_999_990_000;

/// UTC timestamp with 100 ns internal resolution, serialized at
/// millisecond precision (unix milliseconds on the wire).
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DateTime {
    ticks: u64,
}

impl DateTime {
    pub fn now() -> Self {
        let ticks = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| UNIX_EPOCH_TICKS + d.as_nanos() as u64 / 100)
            .unwrap_or(UNIX_EPOCH_TICKS);
        DateTime { ticks }
    }

    pub fn from_ticks(ticks: u64) -> Result<Self> {
        if ticks > MAX_TICKS {
            return Err(Error::datetime_overflow());
        }
        Ok(DateTime { ticks })
    }

    pub fn from_unix_milliseconds(millis: i64) -> Result<Self> {
        let ticks = (UNIX_EPOCH_TICKS as i64)
            .checked_add(millis.checked_mul(TICKS_PER_MILLISECOND as i64).ok_or_else(
                Error::datetime_overflow,
            )?)
            .ok_or_else(Error::datetime_overflow)?;
        if ticks < 0 {
            return Err(Error::datetime_overflow());
        }
        Self::from_ticks(ticks as u64)
    }

    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    pub fn as_unix_milliseconds(&self) -> i64 {
        (self.ticks as i64 - UNIX_EPOCH_TICKS as i64) / TICKS_PER_MILLISECOND as i64
    }

    /// Drops sub-millisecond resolution; the serialized form keeps only
    /// milliseconds, so values meant to round-trip should be truncated.
    pub fn truncate_to_milliseconds(&self) -> Self {
        DateTime {
            ticks: self.ticks / TICKS_PER_MILLISECOND * TICKS_PER_MILLISECOND,
        }
    }
}

impl fmt::Debug for DateTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DateTime({} ms unix)", self.as_unix_milliseconds())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unix_millis_roundtrip() {
        let dt = DateTime::from_unix_milliseconds(1_700_000_000_123).unwrap();
        assert_eq!(dt.as_unix_milliseconds(), 1_700_000_000_123);
    }

    #[test]
    fn truncation_keeps_millis() {
        let now = DateTime::now();
        let truncated = now.truncate_to_milliseconds();
        assert_eq!(
            truncated.as_unix_milliseconds(),
            now.as_unix_milliseconds()
        );
        assert!(truncated <= now);
    }

    #[test]
    fn overflow_is_rejected() {
        assert!(DateTime::from_ticks(u64::MAX).is_err());
    }
}
