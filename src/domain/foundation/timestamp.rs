//! Timestamp value object for immutable points in time.

use chrono::{DateTime, Duration, Months, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// Immutable point in time, always UTC.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timestamp(DateTime<Utc>);

impl Timestamp {
    /// Creates a timestamp for the current moment.
    pub fn now() -> Self {
        Self(Utc::now())
    }

    /// Creates a timestamp from a DateTime<Utc>.
    pub fn from_datetime(dt: DateTime<Utc>) -> Self {
        Self(dt)
    }

    /// Returns the inner DateTime.
    pub fn as_datetime(&self) -> &DateTime<Utc> {
        &self.0
    }

    /// Creates a timestamp from Unix seconds, if representable.
    pub fn from_unix_secs(secs: i64) -> Option<Self> {
        Utc.timestamp_opt(secs, 0).single().map(Self)
    }

    /// Returns the timestamp as Unix seconds.
    pub fn as_unix_secs(&self) -> i64 {
        self.0.timestamp()
    }

    /// Checks if this timestamp is before another.
    pub fn is_before(&self, other: &Timestamp) -> bool {
        self.0 < other.0
    }

    /// Returns the duration from another timestamp to this one.
    ///
    /// Negative if `other` is after `self`.
    pub fn duration_since(&self, other: &Timestamp) -> Duration {
        self.0.signed_duration_since(other.0)
    }

    /// Adds whole days. Negative values subtract.
    pub fn add_days(&self, days: i64) -> Self {
        Self(self.0 + Duration::days(days))
    }

    pub fn add_seconds(&self, secs: i64) -> Self {
        Self(self.0 + Duration::seconds(secs))
    }

    /// Adds calendar months, clamping to the last day of shorter months
    /// (Jan 31 + 1 month = Feb 28/29). Out-of-range results leave the value unchanged.
    pub fn add_months(&self, months: u32) -> Self {
        Self(
            self.0
                .checked_add_months(Months::new(months))
                .unwrap_or(self.0),
        )
    }

    /// Subtracts a std duration (used for staleness and retention cutoffs).
    pub fn minus(&self, duration: std::time::Duration) -> Self {
        let delta = Duration::from_std(duration).unwrap_or_else(|_| Duration::days(365_000));
        Self(self.0.checked_sub_signed(delta).unwrap_or(self.0))
    }
}

impl Default for Timestamp {
    fn default() -> Self {
        Self::now()
    }
}

impl From<DateTime<Utc>> for Timestamp {
    fn from(dt: DateTime<Utc>) -> Self {
        Self(dt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Datelike;

    fn at(rfc3339: &str) -> Timestamp {
        Timestamp::from_datetime(
            DateTime::parse_from_rfc3339(rfc3339)
                .unwrap()
                .with_timezone(&Utc),
        )
    }

    #[test]
    fn add_months_moves_calendar_month() {
        let start = at("2024-03-15T10:00:00Z");
        let end = start.add_months(1);
        assert_eq!(end, at("2024-04-15T10:00:00Z"));
    }

    #[test]
    fn add_months_clamps_end_of_month() {
        let start = at("2024-01-31T00:00:00Z");
        let end = start.add_months(1);
        assert_eq!(end.as_datetime().month(), 2);
        assert_eq!(end.as_datetime().day(), 29);
    }

    #[test]
    fn add_twelve_months_is_one_year() {
        let start = at("2023-06-01T08:30:00Z");
        assert_eq!(start.add_months(12), at("2024-06-01T08:30:00Z"));
    }

    #[test]
    fn minus_subtracts_std_duration() {
        let now = at("2024-01-01T00:05:00Z");
        let earlier = now.minus(std::time::Duration::from_secs(300));
        assert_eq!(earlier, at("2024-01-01T00:00:00Z"));
    }

    #[test]
    fn unix_secs_roundtrip() {
        let ts = Timestamp::from_unix_secs(1_705_276_800).unwrap();
        assert_eq!(ts.as_unix_secs(), 1_705_276_800);
        assert_eq!(ts.as_datetime().year(), 2024);
    }

    #[test]
    fn ordering_and_is_before() {
        let a = at("2024-01-01T00:00:00Z");
        let b = a.add_days(1);
        assert!(a.is_before(&b));
        assert!(a < b);
        assert_eq!(b.duration_since(&a), Duration::days(1));
    }

    #[test]
    fn serializes_as_rfc3339_string() {
        let json = serde_json::to_string(&at("2024-01-15T10:30:00Z")).unwrap();
        assert!(json.contains("2024-01-15T10:30:00"));
    }
}
