//! Immutable segment: the frozen, position-addressable columnar layout
//! produced by flushing a mutable segment or merging several immutable ones.
//! Dictionaries are strictly sorted and every dimension carries a bitmap
//! inverted index; neither is mutated after construction.

use crate::column::{DimensionColumn, MetricColumn};
use crate::dictionary::SortedDictionary;
use crate::error::{Error, Result};
use crate::mutable::{MutableData, MutableSegment};
use crate::segment::ColumnAccess;
use crate::telemetry::{core_metrics, CoreEvent};
use crate::types::{DictId, Interval, Timestamp};
use std::collections::BTreeMap;
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct ImmutableSegment {
    min_ts: Timestamp,
    max_ts: Timestamp,
    timestamps: Vec<Timestamp>,
    dimensions: BTreeMap<String, DimensionColumn>,
    metrics: BTreeMap<String, MetricColumn>,
}

impl ImmutableSegment {
    /// Freezes a mutable segment: per dimension, the first-seen dictionary is
    /// re-sorted lexicographically, every row's ids are remapped through the
    /// resulting permutation, and the bitmap index is built; metric columns
    /// are copied dense. Rows keep their original relative order — time
    /// ordering is the query layer's job, not storage's.
    pub fn flush(segment: &MutableSegment) -> ImmutableSegment {
        let data = segment.snapshot();
        let frozen = Self::from_snapshot(&data);
        segment.listener().on_event(CoreEvent::SegmentFlushed {
            rows: frozen.row_count(),
            dimensions: frozen.dimensions.len(),
        });
        core_metrics::increment(core_metrics::SEGMENTS_FLUSHED, 1);
        frozen
    }

    pub(crate) fn from_snapshot(data: &MutableData) -> ImmutableSegment {
        let mut dimensions = BTreeMap::new();
        for (name, dim) in &data.dimensions {
            let (dict, remap) = dim.dict.sorted();
            let rows = dim
                .rows
                .iter()
                .map(|ids| {
                    let mut mapped: Vec<DictId> =
                        ids.iter().map(|&id| remap[id as usize]).collect();
                    mapped.sort_unstable();
                    mapped.dedup();
                    mapped
                })
                .collect();
            dimensions.insert(name.clone(), DimensionColumn::new(dict, rows));
        }

        let segment = ImmutableSegment {
            min_ts: data.min_ts,
            max_ts: data.max_ts,
            timestamps: data.timestamps.clone(),
            dimensions,
            metrics: data.metrics.clone(),
        };
        segment.assert_invariants();
        segment
    }

    /// Merges segments into one whose dictionaries are globally sorted and
    /// whose bitmap indexes cover the concatenated row space, so further
    /// merges and queries behave exactly as against an originally-flushed
    /// segment.
    ///
    /// All inputs must share the same dimension and metric name sets (and
    /// metric kinds); a mismatch is [`Error::MergeIncompatibility`]. Rows are
    /// concatenated in input-list order, not re-sorted by time.
    pub fn merge(inputs: &[&ImmutableSegment]) -> Result<ImmutableSegment> {
        let first = *inputs.first().ok_or_else(|| Error::MergeIncompatibility {
            details: "no input segments".to_string(),
        })?;

        for (i, other) in inputs.iter().enumerate().skip(1) {
            check_same_names("dimension", i, first.dimension_names(), other.dimension_names())?;
            check_same_names("metric", i, first.metric_names(), other.metric_names())?;
            for (name, column) in &first.metrics {
                let kind = other.metrics[name].kind();
                if kind != column.kind() {
                    return Err(Error::MergeIncompatibility {
                        details: format!(
                            "metric '{}' is {} in segment 0 but {} in segment {}",
                            name,
                            column.kind(),
                            kind,
                            i
                        ),
                    });
                }
            }
        }

        let total_rows: usize = inputs.iter().map(|s| s.row_count()).sum();

        // Per dimension: k-way merge-join of the sorted per-segment
        // dictionaries, then remap each input's rows through its translation
        // table into the concatenated row space.
        let mut dimensions = BTreeMap::new();
        for name in first.dimension_names() {
            let dicts: Vec<&SortedDictionary> = inputs
                .iter()
                .map(|s| s.dimensions[name].dictionary())
                .collect();
            let (merged_dict, remaps) = SortedDictionary::merge(&dicts);

            let mut rows: Vec<Vec<DictId>> = Vec::with_capacity(total_rows);
            for (input, segment) in inputs.iter().enumerate() {
                let remap = &remaps[input];
                for ids in segment.dimensions[name].rows() {
                    let mut mapped: Vec<DictId> =
                        ids.iter().map(|&id| remap[id as usize]).collect();
                    // Translation preserves order within one input, but be
                    // explicit: row id lists stay sorted.
                    mapped.sort_unstable();
                    rows.push(mapped);
                }
            }
            dimensions.insert(name.to_string(), DimensionColumn::new(merged_dict, rows));
        }

        let mut metrics = BTreeMap::new();
        for (name, column) in &first.metrics {
            let mut merged = MetricColumn::new(column.kind());
            for segment in inputs {
                merged.extend_from(&segment.metrics[name]);
            }
            metrics.insert(name.clone(), merged);
        }

        let mut timestamps = Vec::with_capacity(total_rows);
        for segment in inputs {
            timestamps.extend_from_slice(&segment.timestamps);
        }

        let merged = ImmutableSegment {
            min_ts: timestamps.iter().min().copied().unwrap_or(0),
            max_ts: timestamps.iter().max().copied().unwrap_or(0),
            timestamps,
            dimensions,
            metrics,
        };
        merged.assert_invariants();

        core_metrics::increment(core_metrics::SEGMENTS_MERGED, 1);
        Ok(merged)
    }

    /// Reassembles a segment from its persisted parts. Callers (the
    /// persistence layer) validate shape before handing parts over.
    pub(crate) fn from_parts(
        min_ts: Timestamp,
        max_ts: Timestamp,
        timestamps: Vec<Timestamp>,
        dimensions: BTreeMap<String, DimensionColumn>,
        metrics: BTreeMap<String, MetricColumn>,
    ) -> ImmutableSegment {
        let segment = ImmutableSegment {
            min_ts,
            max_ts,
            timestamps,
            dimensions,
            metrics,
        };
        segment.assert_invariants();
        segment
    }

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

    pub fn timestamps(&self) -> &[Timestamp] {
        &self.timestamps
    }

    pub fn dimension(&self, name: &str) -> Option<&DimensionColumn> {
        self.dimensions.get(name)
    }

    pub fn dimension_names(&self) -> impl Iterator<Item = &str> + Clone {
        self.dimensions.keys().map(|s| s.as_str())
    }

    pub fn metric(&self, name: &str) -> Option<&MetricColumn> {
        self.metrics.get(name)
    }

    pub fn metric_names(&self) -> impl Iterator<Item = &str> + Clone {
        self.metrics.keys().map(|s| s.as_str())
    }

    pub(crate) fn dimension_columns(&self) -> &BTreeMap<String, DimensionColumn> {
        &self.dimensions
    }

    pub(crate) fn metric_columns(&self) -> &BTreeMap<String, MetricColumn> {
        &self.metrics
    }

    /// Structural invariants: uniform row count across every column, bitmap
    /// entries inside the row universe. Violations are framework bugs and
    /// abort rather than degrade.
    fn assert_invariants(&self) {
        let rows = self.timestamps.len();
        for (name, dim) in &self.dimensions {
            assert!(
                dim.rows().len() == rows,
                "row count invariant violated: dimension '{}' has {} rows, segment has {}",
                name,
                dim.rows().len(),
                rows
            );
            for id in 0..dim.cardinality() as DictId {
                if let Some(max) = dim.bitmap(id).max() {
                    assert!(
                        (max as usize) < rows,
                        "bitmap invariant violated: dimension '{}' id {} references row {} of {}",
                        name,
                        id,
                        max,
                        rows
                    );
                }
            }
        }
        for (name, column) in &self.metrics {
            assert!(
                column.len() == rows,
                "row count invariant violated: metric '{}' has {} rows, segment has {}",
                name,
                column.len(),
                rows
            );
        }
    }
}

fn check_same_names<'a>(
    what: &str,
    index: usize,
    a: impl Iterator<Item = &'a str> + Clone,
    b: impl Iterator<Item = &'a str> + Clone,
) -> Result<()> {
    if a.clone().eq(b.clone()) {
        return Ok(());
    }
    Err(Error::MergeIncompatibility {
        details: format!(
            "{} names differ between segment 0 [{}] and segment {} [{}]",
            what,
            a.collect::<Vec<_>>().join(", "),
            index,
            b.collect::<Vec<_>>().join(", "),
        ),
    })
}

const NO_IDS: &[DictId] = &[];

impl ColumnAccess for Arc<ImmutableSegment> {
    fn row_count(&self) -> usize {
        self.timestamps.len()
    }

    fn row_timestamp(&self, row: usize) -> Timestamp {
        self.timestamps[row]
    }

    fn dimension_ids(&self, row: usize, dimension: &str) -> &[DictId] {
        match self.dimensions.get(dimension) {
            Some(dim) => dim.row_ids(row),
            None => NO_IDS,
        }
    }

    fn dimension_lookup_id(&self, dimension: &str, value: &str) -> Option<DictId> {
        self.dimensions.get(dimension)?.dictionary().lookup_id(value)
    }

    fn dimension_value(&self, dimension: &str, id: DictId) -> Option<Arc<str>> {
        self.dimensions
            .get(dimension)
            .map(|dim| Arc::clone(dim.dictionary().lookup_value(id)))
    }

    fn metric_long(&self, row: usize, metric: &str) -> i64 {
        self.metrics.get(metric).map_or(0, |c| c.long_at(row))
    }

    fn metric_double(&self, row: usize, metric: &str) -> f64 {
        self.metrics.get(metric).map_or(0.0, |c| c.double_at(row))
    }
}
