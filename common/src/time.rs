use std::{
    ops::Add,
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use anyhow::Context;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{de, Deserialize, Deserializer, Serialize};

/// The number of milliseconds since the [`UNIX_EPOCH`].
///
/// - Internally represented by a non-negative [`i64`] to ease
///   interoperability with stores and platforms which don't support unsigned
///   ints.
/// - Can represent any time from January 1st, 1970 00:00:00.000 UTC to
///   roughly 292 million years in the future.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize)]
pub struct TimestampMs(i64);

impl TimestampMs {
    /// Creates a new [`TimestampMs`] from the current [`SystemTime`].
    ///
    /// Panics if the current time is not within bounds.
    pub fn now() -> Self {
        Self::try_from(SystemTime::now()).unwrap()
    }

    /// Returns the contained [`i64`].
    pub fn as_i64(self) -> i64 {
        self.0
    }

    /// Constructs a [`TimestampMs`] from an [`i64`] previously read out of a
    /// store. Errors on negative values.
    pub fn try_from_i64(value: i64) -> anyhow::Result<Self> {
        if value >= 0 {
            Ok(Self(value))
        } else {
            Err(anyhow::anyhow!("Unix timestamp must be non-negative"))
        }
    }

    /// The duration elapsed since `earlier`, or [`Duration::ZERO`] if
    /// `earlier` is in the future.
    pub fn saturating_duration_since(self, earlier: Self) -> Duration {
        let millis = self.0.saturating_sub(earlier.0);
        Duration::from_millis(u64::try_from(millis).unwrap_or(0))
    }

    /// This timestamp minus `duration`, clamped at the epoch.
    pub fn saturating_sub(self, duration: Duration) -> Self {
        let millis = i64::try_from(duration.as_millis()).unwrap_or(i64::MAX);
        Self(self.0.saturating_sub(millis).max(0))
    }

    /// Whether this timestamp is more than `age` before `now`.
    pub fn is_older_than(self, now: Self, age: Duration) -> bool {
        self < now.saturating_sub(age)
    }

    /// The UTC calendar date containing this timestamp.
    pub fn utc_date(self) -> NaiveDate {
        DateTime::<Utc>::from_timestamp_millis(self.0)
            .expect("Non-negative ms timestamp is always in chrono range")
            .date_naive()
    }
}

/// Get a [`SystemTime`] corresponding to this timestamp.
impl From<TimestampMs> for SystemTime {
    fn from(timestamp: TimestampMs) -> Self {
        let timestamp_u64 = u64::try_from(timestamp.0)
            .expect("Non-negative invariant was violated");
        UNIX_EPOCH + Duration::from_millis(timestamp_u64)
    }
}

/// Attempts to convert a [`SystemTime`] into a [`TimestampMs`].
///
/// Returns an error if the [`SystemTime`] is not within bounds.
impl TryFrom<SystemTime> for TimestampMs {
    type Error = anyhow::Error;
    fn try_from(system_time: SystemTime) -> anyhow::Result<Self> {
        system_time
            .duration_since(UNIX_EPOCH)
            .map(|duration| duration.as_millis())
            .map(i64::try_from)
            .map(|res| res.map(Self))
            .context("Current time is before January 1st, 1970")?
            .context("Current time is more than 292 million years past epoch")
    }
}

impl Add<Duration> for TimestampMs {
    type Output = Self;
    fn add(self, duration: Duration) -> Self {
        let millis = i64::try_from(duration.as_millis())
            .expect("Duration too large to add to a timestamp");
        Self(self.0.checked_add(millis).expect("Timestamp overflowed"))
    }
}

/// Enforces that the inner [`i64`] is non-negative.
impl<'de> Deserialize<'de> for TimestampMs {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = i64::deserialize(deserializer)?;
        if value >= 0 {
            Ok(TimestampMs(value))
        } else {
            Err(de::Error::invalid_value(
                de::Unexpected::Signed(value),
                &"Unix timestamp must be non-negative",
            ))
        }
    }
}

#[cfg(any(test, feature = "test-utils"))]
mod arbitrary_impl {
    use proptest::{
        arbitrary::Arbitrary,
        strategy::{BoxedStrategy, Strategy},
    };

    use super::*;

    impl Arbitrary for TimestampMs {
        type Parameters = ();
        type Strategy = BoxedStrategy<Self>;
        fn arbitrary_with(_args: Self::Parameters) -> Self::Strategy {
            (0..i64::MAX).prop_map(TimestampMs).boxed()
        }
    }
}

#[cfg(test)]
mod test {
    use crate::test_utils::roundtrip;

    use super::*;

    #[test]
    fn timestamp_serde_roundtrip() {
        roundtrip::json_string_roundtrip_proptest::<TimestampMs>();
    }

    #[test]
    fn deserialize_rejects_negative() {
        assert!(serde_json::from_str::<TimestampMs>("-1").is_err());
        assert!(serde_json::from_str::<TimestampMs>("0").is_ok());
    }

    #[test]
    fn saturating_math() {
        let t0 = TimestampMs(10_000);
        let t1 = TimestampMs(25_000);
        assert_eq!(
            t1.saturating_duration_since(t0),
            Duration::from_secs(15)
        );
        assert_eq!(t0.saturating_duration_since(t1), Duration::ZERO);
        assert_eq!(t0.saturating_sub(Duration::from_secs(60)), TimestampMs(0));
        assert!(t0.is_older_than(t1, Duration::from_secs(10)));
        assert!(!t0.is_older_than(t1, Duration::from_secs(20)));
    }

    #[test]
    fn utc_date_of_epoch() {
        let date = TimestampMs(0).utc_date();
        assert_eq!(date, NaiveDate::from_ymd_opt(1970, 1, 1).unwrap());
    }
}
