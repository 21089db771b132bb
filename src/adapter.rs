//! Storage adapters: drive either segment variant through the shared
//! [`Cursor`] contract. The cursor itself is one small state object over a
//! `ColumnAccess` view; only the row-selection strategy differs between
//! variants — bitmap set-algebra for immutable segments, row-by-row
//! predicates for mutable snapshots.

use crate::filter::Filter;
use crate::granularity::Granularity;
use crate::immutable::ImmutableSegment;
use crate::mutable::{MutableData, MutableSegment};
use crate::segment::{ColumnAccess, Cursor, CursorSeq, StorageAdapter};
use crate::types::{DictId, Interval, Timestamp};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Cursor over one bucket's rows of a single column view.
pub struct SegmentCursor<A: ColumnAccess> {
    access: A,
    bucket: Interval,
    rows: Vec<u32>,
    pos: Option<usize>,
}

impl<A: ColumnAccess> SegmentCursor<A> {
    fn new(access: A, bucket: Interval, rows: Vec<u32>) -> Self {
        SegmentCursor {
            access,
            bucket,
            rows,
            pos: None,
        }
    }

    fn current(&self) -> usize {
        let pos = self.pos.expect("cursor is not positioned on a row");
        assert!(pos < self.rows.len(), "cursor advanced past its last row");
        self.rows[pos] as usize
    }
}

impl<A: ColumnAccess> Cursor for SegmentCursor<A> {
    fn advance(&mut self) -> bool {
        let next = match self.pos {
            None => 0,
            Some(p) => p.saturating_add(1).min(self.rows.len()),
        };
        self.pos = Some(next);
        next < self.rows.len()
    }

    fn bucket(&self) -> Interval {
        self.bucket
    }

    fn row_timestamp(&self) -> Timestamp {
        self.access.row_timestamp(self.current())
    }

    fn dimension_ids(&self, dimension: &str) -> &[DictId] {
        self.access.dimension_ids(self.current(), dimension)
    }

    fn dimension_value(&self, dimension: &str, id: DictId) -> Option<Arc<str>> {
        self.access.dimension_value(dimension, id)
    }

    fn metric_long(&self, metric: &str) -> i64 {
        self.access.metric_long(self.current(), metric)
    }

    fn metric_double(&self, metric: &str) -> f64 {
        self.access.metric_double(self.current(), metric)
    }
}

/// Partitions matching rows into granularity buckets in one pass.
///
/// Buckets are keyed by their epoch-aligned start (for `All`, by the query
/// interval itself) so that per-segment partial results for the same query
/// share bucket keys regardless of how each segment's data clips the
/// interval. Every bucket in the effective range yields an entry, matching
/// rows or not, ascending.
fn partition_rows<A: ColumnAccess>(
    access: &A,
    query: Interval,
    effective: Interval,
    granularity: Granularity,
    matches: impl Fn(usize) -> bool,
) -> Vec<(Interval, Vec<u32>)> {
    match granularity.width_ms() {
        None => {
            let rows = (0..access.row_count())
                .filter(|&row| effective.contains(access.row_timestamp(row)) && matches(row))
                .map(|row| row as u32)
                .collect();
            vec![(query, rows)]
        }
        Some(width) => {
            let mut by_bucket: BTreeMap<Timestamp, Vec<u32>> = BTreeMap::new();
            for row in 0..access.row_count() {
                let ts = access.row_timestamp(row);
                if effective.contains(ts) && matches(row) {
                    by_bucket
                        .entry(granularity.bucket_start(ts))
                        .or_default()
                        .push(row as u32);
                }
            }

            let mut buckets = Vec::new();
            let mut start = granularity.bucket_start(effective.start);
            while start < effective.end {
                let rows = by_bucket.remove(&start).unwrap_or_default();
                buckets.push((Interval::new(start, start + width), rows));
                start += width;
            }
            buckets
        }
    }
}

fn cursor_seq<A>(access: A, buckets: Vec<(Interval, Vec<u32>)>) -> CursorSeq
where
    A: ColumnAccess + Clone + 'static,
{
    Box::new(buckets.into_iter().map(move |(bucket, rows)| {
        Box::new(SegmentCursor::new(access.clone(), bucket, rows)) as Box<dyn Cursor>
    }))
}

/// Adapter over a mutable segment. Each `make_cursors` call captures one
/// committed snapshot; filters are evaluated per row (mutable segments carry
/// no bitmap indexes).
#[derive(Debug, Clone)]
pub struct MutableStorageAdapter {
    segment: Arc<MutableSegment>,
}

impl MutableStorageAdapter {
    pub fn new(segment: Arc<MutableSegment>) -> Self {
        MutableStorageAdapter { segment }
    }
}

impl StorageAdapter for MutableStorageAdapter {
    fn interval(&self) -> Option<Interval> {
        self.segment.interval()
    }

    fn row_count(&self) -> usize {
        self.segment.row_count()
    }

    fn make_cursors(
        &self,
        interval: Interval,
        granularity: Granularity,
        filter: Option<&Filter>,
    ) -> CursorSeq {
        let snapshot: Arc<MutableData> = self.segment.snapshot();
        let effective = match snapshot.interval().and_then(|si| interval.intersect(&si)) {
            Some(effective) => effective,
            None => return Box::new(std::iter::empty()),
        };
        let filter = filter.cloned();
        let buckets = partition_rows(&snapshot, interval, effective, granularity, |row| {
            filter.as_ref().map_or(true, |f| f.matches_row(&snapshot, row))
        });
        cursor_seq(snapshot, buckets)
    }
}

/// Adapter over an immutable segment. Filters are evaluated once by bitmap
/// set-algebra over the inverted indexes — the performance-critical path the
/// bitmap index exists for.
#[derive(Debug, Clone)]
pub struct ImmutableStorageAdapter {
    segment: Arc<ImmutableSegment>,
}

impl ImmutableStorageAdapter {
    pub fn new(segment: Arc<ImmutableSegment>) -> Self {
        ImmutableStorageAdapter { segment }
    }

    pub fn segment(&self) -> &Arc<ImmutableSegment> {
        &self.segment
    }
}

impl StorageAdapter for ImmutableStorageAdapter {
    fn interval(&self) -> Option<Interval> {
        self.segment.interval()
    }

    fn row_count(&self) -> usize {
        self.segment.row_count()
    }

    fn make_cursors(
        &self,
        interval: Interval,
        granularity: Granularity,
        filter: Option<&Filter>,
    ) -> CursorSeq {
        let effective = match self
            .segment
            .interval()
            .and_then(|si| interval.intersect(&si))
        {
            Some(effective) => effective,
            None => return Box::new(std::iter::empty()),
        };
        let selected = filter.map(|f| f.evaluate_bitmap(&self.segment));
        let buckets = partition_rows(&self.segment, interval, effective, granularity, |row| {
            selected.as_ref().map_or(true, |b| b.contains(row as u32))
        });
        cursor_seq(Arc::clone(&self.segment), buckets)
    }
}
