//! Time-bucketing: maps a timestamp to the start of its enclosing bucket and
//! enumerates bucket boundaries over an interval.

use crate::types::{Interval, Timestamp};
use serde::{Deserialize, Serialize};

pub const MS_PER_SECOND: u64 = 1_000;
pub const MS_PER_MINUTE: u64 = 60 * MS_PER_SECOND;
pub const MS_PER_HOUR: u64 = 60 * MS_PER_MINUTE;
pub const MS_PER_DAY: u64 = 24 * MS_PER_HOUR;

/// Time granularity for bucketing rows. `All` collapses the whole queried
/// interval into a single bucket keyed by the interval start.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Granularity {
    All,
    Second,
    Minute,
    Hour,
    Day,
}

impl Granularity {
    /// Bucket width in milliseconds; `None` for [`Granularity::All`].
    pub fn width_ms(&self) -> Option<u64> {
        match self {
            Granularity::All => None,
            Granularity::Second => Some(MS_PER_SECOND),
            Granularity::Minute => Some(MS_PER_MINUTE),
            Granularity::Hour => Some(MS_PER_HOUR),
            Granularity::Day => Some(MS_PER_DAY),
        }
    }

    /// Start of the epoch-aligned bucket containing `ts`.
    ///
    /// For `All` the bucket is not epoch-aligned (it spans the queried
    /// interval), so the timestamp is returned unchanged; callers key `All`
    /// buckets by interval start via [`Granularity::buckets`].
    pub fn bucket_start(&self, ts: Timestamp) -> Timestamp {
        match self.width_ms() {
            Some(w) => ts - ts % w,
            None => ts,
        }
    }

    /// Enumerates the buckets intersecting `interval`, ascending.
    ///
    /// Buckets are epoch-aligned, contiguous and non-overlapping; the first
    /// and last are clipped to `interval` so the union of the yielded
    /// intervals covers exactly `interval`.
    pub fn buckets(&self, interval: Interval) -> BucketIter {
        if interval.is_empty() {
            return BucketIter {
                next_start: interval.start,
                end: interval.start,
                width: None,
            };
        }
        BucketIter {
            next_start: interval.start,
            end: interval.end,
            width: self.width_ms(),
        }
    }
}

/// Iterator over clipped bucket intervals, ascending.
#[derive(Debug, Clone)]
pub struct BucketIter {
    next_start: Timestamp,
    end: Timestamp,
    width: Option<u64>,
}

impl Iterator for BucketIter {
    type Item = Interval;

    fn next(&mut self) -> Option<Interval> {
        if self.next_start >= self.end {
            return None;
        }
        let start = self.next_start;
        let bucket_end = match self.width {
            // Aligned boundary strictly after `start`.
            Some(w) => ((start / w) + 1) * w,
            None => self.end,
        };
        let end = bucket_end.min(self.end);
        self.next_start = end;
        Some(Interval::new(start, end))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bucket_start_truncates_to_day() {
        let day3 = 3 * MS_PER_DAY;
        assert_eq!(Granularity::Day.bucket_start(day3), day3);
        assert_eq!(Granularity::Day.bucket_start(day3 + 123), day3);
        assert_eq!(Granularity::Day.bucket_start(day3 + MS_PER_DAY - 1), day3);
    }

    #[test]
    fn buckets_cover_interval_contiguously() {
        let interval = Interval::new(MS_PER_DAY / 2, 3 * MS_PER_DAY + 17);
        let buckets: Vec<_> = Granularity::Day.buckets(interval).collect();
        assert_eq!(
            buckets,
            vec![
                Interval::new(MS_PER_DAY / 2, MS_PER_DAY),
                Interval::new(MS_PER_DAY, 2 * MS_PER_DAY),
                Interval::new(2 * MS_PER_DAY, 3 * MS_PER_DAY),
                Interval::new(3 * MS_PER_DAY, 3 * MS_PER_DAY + 17),
            ]
        );
        // Contiguous and non-overlapping.
        for pair in buckets.windows(2) {
            assert_eq!(pair[0].end, pair[1].start);
        }
        assert_eq!(buckets.first().unwrap().start, interval.start);
        assert_eq!(buckets.last().unwrap().end, interval.end);
    }

    #[test]
    fn all_granularity_is_a_single_bucket() {
        let interval = Interval::new(5, 10 * MS_PER_DAY);
        let buckets: Vec<_> = Granularity::All.buckets(interval).collect();
        assert_eq!(buckets, vec![interval]);
    }

    #[test]
    fn aligned_interval_yields_exact_buckets() {
        let interval = Interval::new(0, 2 * MS_PER_HOUR);
        let buckets: Vec<_> = Granularity::Hour.buckets(interval).collect();
        assert_eq!(buckets.len(), 2);
        assert_eq!(buckets[0], Interval::new(0, MS_PER_HOUR));
        assert_eq!(buckets[1], Interval::new(MS_PER_HOUR, 2 * MS_PER_HOUR));
    }

    #[test]
    fn empty_interval_yields_no_buckets() {
        let interval = Interval::new(100, 100);
        assert_eq!(Granularity::Day.buckets(interval).count(), 0);
        assert_eq!(Granularity::All.buckets(interval).count(), 0);
    }
}
