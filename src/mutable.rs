//! Mutable segment: the append-only ingestion path. One writer appends rows
//! while any number of cursors read a consistent snapshot.

use crate::column::MetricColumn;
use crate::dictionary::MutableDictionary;
use crate::error::{Error, Result};
use crate::segment::ColumnAccess;
use crate::telemetry::{core_metrics, noop_event_listener, CoreEvent, CoreEventListener};
use crate::types::{DictId, Interval, Row, Timestamp};
use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

/// One dimension's state inside a mutable segment: a first-seen dictionary
/// and the per-row id lists (empty list for rows without the dimension).
#[derive(Debug, Clone, Default)]
pub(crate) struct DimensionData {
    pub(crate) dict: MutableDictionary,
    pub(crate) rows: Vec<Vec<DictId>>,
}

/// Immutable snapshot of a mutable segment's committed columns.
///
/// Cursors hold an `Arc` of this; the writer never mutates a snapshot that a
/// reader can still observe (copy-on-write below).
#[derive(Debug, Clone, Default)]
pub struct MutableData {
    pub(crate) timestamps: Vec<Timestamp>,
    pub(crate) dimensions: BTreeMap<String, DimensionData>,
    pub(crate) metrics: BTreeMap<String, MetricColumn>,
    pub(crate) min_ts: Timestamp,
    pub(crate) max_ts: Timestamp,
}

impl MutableData {
    pub fn row_count(&self) -> usize {
        self.timestamps.len()
    }

    pub fn interval(&self) -> Option<Interval> {
        if self.timestamps.is_empty() {
            None
        } else {
            Some(Interval::new(self.min_ts, self.max_ts + 1))
        }
    }
}

/// Append-only row store indexed by insertion order.
///
/// Concurrency contract: a single ingesting writer with many concurrent
/// readers. Committed data lives in an `Arc<MutableData>` behind a `RwLock`;
/// `add` clones the data lazily (`Arc::make_mut`) only when a snapshot is
/// outstanding, so a reader's snapshot is never mutated and readers hold no
/// lock while scanning. A cursor therefore sees exactly the rows committed
/// before it started, never a partially-written row, and never a reordering.
#[derive(Debug)]
pub struct MutableSegment {
    data: RwLock<Arc<MutableData>>,
    listener: Arc<dyn CoreEventListener>,
}

impl Default for MutableSegment {
    fn default() -> Self {
        Self::new()
    }
}

impl MutableSegment {
    pub fn new() -> Self {
        Self::with_listener(noop_event_listener())
    }

    pub fn with_listener(listener: Arc<dyn CoreEventListener>) -> Self {
        MutableSegment {
            data: RwLock::new(Arc::new(MutableData::default())),
            listener,
        }
    }

    /// Appends one row, returning its committed row offset.
    ///
    /// A metric name reused with an incompatible numeric kind rejects the
    /// whole row with [`Error::SchemaConflict`] and leaves the segment
    /// untouched; ingestion of subsequent rows continues.
    pub fn add(&self, row: &Row) -> Result<usize> {
        let mut guard = self.data.write()?;

        // Validate before mutating anything so a rejected row has no partial
        // effects (not even dictionary growth).
        for (name, value) in &row.metrics {
            if let Some(column) = guard.metrics.get(name) {
                if column.kind() != value.kind() {
                    let err = Error::SchemaConflict {
                        metric: name.clone(),
                        expected: column.kind(),
                        actual: value.kind(),
                    };
                    self.listener.on_event(CoreEvent::RowRejected {
                        metric: name.clone(),
                        expected: column.kind(),
                        actual: value.kind(),
                    });
                    core_metrics::increment(core_metrics::INGEST_REJECTED_ROWS, 1);
                    return Err(err);
                }
            }
        }

        let data = Arc::make_mut(&mut *guard);
        let offset = data.timestamps.len();

        // Columns first seen now are backfilled so row counts stay uniform.
        for name in row.dimensions.keys() {
            data.dimensions
                .entry(name.clone())
                .or_insert_with(|| DimensionData {
                    dict: MutableDictionary::new(),
                    rows: vec![Vec::new(); offset],
                });
        }
        for (name, value) in &row.metrics {
            data.metrics.entry(name.clone()).or_insert_with(|| {
                let mut column = MetricColumn::new(value.kind());
                for _ in 0..offset {
                    column.push_zero();
                }
                column
            });
        }

        for (name, dim) in data.dimensions.iter_mut() {
            match row.dimensions.get(name) {
                Some(values) => {
                    let ids = values.iter().map(|v| dim.dict.add_or_get(v)).collect();
                    dim.rows.push(ids);
                }
                None => dim.rows.push(Vec::new()),
            }
        }
        for (name, column) in data.metrics.iter_mut() {
            match row.metrics.get(name) {
                Some(&value) => column.push(value),
                None => column.push_zero(),
            }
        }

        data.timestamps.push(row.timestamp);
        if offset == 0 {
            data.min_ts = row.timestamp;
            data.max_ts = row.timestamp;
        } else {
            data.min_ts = data.min_ts.min(row.timestamp);
            data.max_ts = data.max_ts.max(row.timestamp);
        }

        core_metrics::increment(core_metrics::INGEST_ROWS, 1);
        Ok(offset)
    }

    /// Consistent view of everything committed so far. O(1); the writer pays
    /// for the isolation on its next `add`.
    pub fn snapshot(&self) -> Arc<MutableData> {
        self.data
            .read()
            .expect("mutable segment lock poisoned")
            .clone()
    }

    pub fn row_count(&self) -> usize {
        self.snapshot().row_count()
    }

    pub fn interval(&self) -> Option<Interval> {
        self.snapshot().interval()
    }

    pub(crate) fn listener(&self) -> &Arc<dyn CoreEventListener> {
        &self.listener
    }
}

const NO_IDS: &[DictId] = &[];

impl ColumnAccess for Arc<MutableData> {
    fn row_count(&self) -> usize {
        self.timestamps.len()
    }

    fn row_timestamp(&self, row: usize) -> Timestamp {
        self.timestamps[row]
    }

    fn dimension_ids(&self, row: usize, dimension: &str) -> &[DictId] {
        match self.dimensions.get(dimension) {
            Some(dim) => &dim.rows[row],
            None => NO_IDS,
        }
    }

    fn dimension_lookup_id(&self, dimension: &str, value: &str) -> Option<DictId> {
        self.dimensions.get(dimension)?.dict.lookup_id(value)
    }

    fn dimension_value(&self, dimension: &str, id: DictId) -> Option<Arc<str>> {
        self.dimensions
            .get(dimension)
            .map(|dim| Arc::clone(dim.dict.lookup_value(id)))
    }

    fn metric_long(&self, row: usize, metric: &str) -> i64 {
        self.metrics.get(metric).map_or(0, |c| c.long_at(row))
    }

    fn metric_double(&self, row: usize, metric: &str) -> f64 {
        self.metrics.get(metric).map_or(0.0, |c| c.double_at(row))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::MetricValue;

    fn row(ts: Timestamp, provider: &str, index: i64) -> Row {
        Row::new(ts).dim("provider", provider).metric("index", index)
    }

    #[test]
    fn add_returns_insertion_offsets() {
        let segment = MutableSegment::new();
        assert_eq!(segment.add(&row(100, "a", 1)).unwrap(), 0);
        assert_eq!(segment.add(&row(50, "b", 2)).unwrap(), 1);
        assert_eq!(segment.add(&row(200, "a", 3)).unwrap(), 2);
        assert_eq!(segment.row_count(), 3);
        // Out-of-order timestamps widen the interval but keep insertion order.
        assert_eq!(segment.interval(), Some(Interval::new(50, 201)));
        let snap = segment.snapshot();
        assert_eq!(snap.timestamps, vec![100, 50, 200]);
    }

    #[test]
    fn schema_conflict_rejects_row_and_continues() {
        let segment = MutableSegment::new();
        segment.add(&row(1, "a", 10)).unwrap();

        let bad = Row::new(2).dim("provider", "b").metric("index", 1.5f64);
        let err = segment.add(&bad).unwrap_err();
        assert!(matches!(err, Error::SchemaConflict { ref metric, .. } if metric == "index"));

        // Nothing of the rejected row is visible, including its dictionary value.
        let snap = segment.snapshot();
        assert_eq!(snap.row_count(), 1);
        assert_eq!(snap.dimension_lookup_id("provider", "b"), None);

        // Ingestion continues with compatible rows.
        segment.add(&row(3, "b", 20)).unwrap();
        assert_eq!(segment.row_count(), 2);
    }

    #[test]
    fn late_columns_are_backfilled() {
        let segment = MutableSegment::new();
        segment.add(&Row::new(1).dim("provider", "a")).unwrap();
        segment
            .add(&Row::new(2).dim("quality", "premium").metric("index", 5i64))
            .unwrap();

        let snap = segment.snapshot();
        // Row 0 predates both the quality dimension and the index metric.
        assert_eq!(snap.dimension_ids(0, "quality"), NO_IDS);
        assert_eq!(snap.metric_long(0, "index"), 0);
        assert_eq!(snap.metric_long(1, "index"), 5);
        // Row 1 carries no provider.
        assert_eq!(snap.dimension_ids(1, "provider"), NO_IDS);
    }

    #[test]
    fn snapshot_is_isolated_from_later_writes() {
        let segment = MutableSegment::new();
        segment.add(&row(1, "a", 1)).unwrap();
        let snap = segment.snapshot();

        segment.add(&row(2, "b", 2)).unwrap();
        assert_eq!(snap.row_count(), 1);
        assert_eq!(snap.dimension_lookup_id("provider", "b"), None);
        assert_eq!(segment.row_count(), 2);
    }

    #[test]
    fn multi_value_dimension_rows() {
        let segment = MutableSegment::new();
        segment
            .add(&Row::new(1).dims("placementish", &["a", "preferred"]))
            .unwrap();
        let snap = segment.snapshot();
        let ids = snap.dimension_ids(0, "placementish");
        assert_eq!(ids.len(), 2);
        let values: Vec<_> = ids
            .iter()
            .map(|&id| snap.dimension_value("placementish", id).unwrap())
            .collect();
        assert_eq!(values[0].as_ref(), "a");
        assert_eq!(values[1].as_ref(), "preferred");
    }

    #[test]
    fn long_into_double_column_is_rejected() {
        let segment = MutableSegment::new();
        segment
            .add(&Row::new(1).metric("index", 1.5f64))
            .unwrap();
        let err = segment
            .add(&Row::new(2).metric("index", MetricValue::Long(2)))
            .unwrap_err();
        assert!(matches!(err, Error::SchemaConflict { .. }));
    }

    #[test]
    fn concurrent_reads_during_writes() {
        use std::thread;
        let segment = Arc::new(MutableSegment::new());
        let writer = {
            let segment = Arc::clone(&segment);
            thread::spawn(move || {
                for i in 0..500u64 {
                    segment.add(&row(i, "a", i as i64)).unwrap();
                }
            })
        };
        // Readers observe some committed prefix, never a torn row.
        for _ in 0..50 {
            let snap = segment.snapshot();
            let n = snap.row_count();
            for r in 0..n {
                assert_eq!(snap.row_timestamp(r), r as u64);
                assert_eq!(snap.metric_long(r, "index"), r as i64);
            }
        }
        writer.join().unwrap();
        assert_eq!(segment.row_count(), 500);
    }
}
