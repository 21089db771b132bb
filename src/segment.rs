//! Segment contracts: the uniform read interface both segment variants
//! satisfy. A `StorageAdapter` turns an interval + granularity + filter into
//! an ascending sequence of per-bucket [`Cursor`]s; `ColumnAccess` is the
//! row-addressed accessor surface the shared cursor and the per-row filter
//! path are written against.

use crate::filter::Filter;
use crate::granularity::Granularity;
use crate::types::{DictId, Interval, Timestamp};
use std::sync::Arc;

/// Row-addressed access to one consistent view of a segment's columns.
///
/// Implemented by immutable segments and by mutable-segment snapshots; all
/// methods address committed rows of that view only.
pub trait ColumnAccess: Send + Sync {
    fn row_count(&self) -> usize;

    fn row_timestamp(&self, row: usize) -> Timestamp;

    /// Dictionary ids of `dimension` in `row`; empty when the row carries no
    /// value or the segment lacks the dimension.
    fn dimension_ids(&self, row: usize, dimension: &str) -> &[DictId];

    /// Id of `value` in the dimension's dictionary, if present.
    fn dimension_lookup_id(&self, dimension: &str, value: &str) -> Option<DictId>;

    /// Value for a dictionary id; `None` when the segment lacks the
    /// dimension. An out-of-range id for an existing dimension panics
    /// (invariant violation).
    fn dimension_value(&self, dimension: &str, id: DictId) -> Option<Arc<str>>;

    /// Metric value coerced to long; 0 when the segment lacks the metric.
    fn metric_long(&self, row: usize, metric: &str) -> i64;

    /// Metric value coerced to double; 0.0 when the segment lacks the metric.
    fn metric_double(&self, row: usize, metric: &str) -> f64;
}

/// Forward-only iteration handle over one time bucket's rows.
///
/// A cursor starts positioned before its first row; `advance` moves to the
/// next matching row and returns `false` at the end. Row accessors are valid
/// only after `advance` has returned `true`. Dropping a cursor mid-scan has
/// no side effects; a fresh cursor sequence restarts the scan.
pub trait Cursor: Send {
    fn advance(&mut self) -> bool;

    /// The bucket this cursor scans. Every offered row's timestamp falls in
    /// this interval; the bucket start keys the result row.
    fn bucket(&self) -> Interval;

    /// Timestamp of the current row.
    fn row_timestamp(&self) -> Timestamp;

    /// Dictionary ids of `dimension` in the current row.
    fn dimension_ids(&self, dimension: &str) -> &[DictId];

    /// Resolves an id against the cursor's dictionary snapshot.
    fn dimension_value(&self, dimension: &str, id: DictId) -> Option<Arc<str>>;

    /// Resolved values of `dimension` in the current row.
    fn dimension_values(&self, dimension: &str) -> Vec<Arc<str>> {
        self.dimension_ids(dimension)
            .iter()
            .filter_map(|&id| self.dimension_value(dimension, id))
            .collect()
    }

    /// Current row's metric coerced to long.
    fn metric_long(&self, metric: &str) -> i64;

    /// Current row's metric coerced to double.
    fn metric_double(&self, metric: &str) -> f64;
}

/// Lazy, ascending sequence of per-bucket cursors.
pub type CursorSeq = Box<dyn Iterator<Item = Box<dyn Cursor>> + Send>;

/// Uniform read interface over a segment.
pub trait StorageAdapter: Send + Sync {
    /// Time interval covered by the segment's rows; `None` when empty.
    fn interval(&self) -> Option<Interval>;

    fn row_count(&self) -> usize;

    /// One cursor per granularity bucket intersecting `interval` and the
    /// segment's own interval, ascending. Buckets with no matching rows still
    /// yield a cursor. Filters select the same logical row set on both
    /// segment variants; a filter naming a dimension the segment lacks
    /// matches no rows.
    fn make_cursors(
        &self,
        interval: Interval,
        granularity: Granularity,
        filter: Option<&Filter>,
    ) -> CursorSeq;
}
