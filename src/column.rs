//! Column storage: dense metric columns shared by both segment forms, and the
//! frozen dimension column (sorted dictionary + per-value bitmap index) used
//! by immutable segments.

use crate::dictionary::SortedDictionary;
use crate::types::{DictId, MetricValue, NumericKind};
use roaring::RoaringBitmap;

/// Dense per-row numeric column with a fixed kind.
#[derive(Debug, Clone, PartialEq)]
pub enum MetricColumn {
    Long(Vec<i64>),
    Double(Vec<f64>),
}

impl MetricColumn {
    pub fn new(kind: NumericKind) -> Self {
        match kind {
            NumericKind::Long => MetricColumn::Long(Vec::new()),
            NumericKind::Double => MetricColumn::Double(Vec::new()),
        }
    }

    pub fn kind(&self) -> NumericKind {
        match self {
            MetricColumn::Long(_) => NumericKind::Long,
            MetricColumn::Double(_) => NumericKind::Double,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            MetricColumn::Long(v) => v.len(),
            MetricColumn::Double(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Appends a value of the column's own kind.
    ///
    /// # Panics
    /// A kind mismatch here is an invariant violation; ingestion validates
    /// kinds before any column is touched.
    pub fn push(&mut self, value: MetricValue) {
        match (self, value) {
            (MetricColumn::Long(v), MetricValue::Long(x)) => v.push(x),
            (MetricColumn::Double(v), MetricValue::Double(x)) => v.push(x),
            (col, value) => panic!(
                "metric kind invariant violated: column is {}, value is {}",
                col.kind(),
                value.kind()
            ),
        }
    }

    /// Appends the kind's zero (rows that do not mention the metric).
    pub fn push_zero(&mut self) {
        match self {
            MetricColumn::Long(v) => v.push(0),
            MetricColumn::Double(v) => v.push(0.0),
        }
    }

    /// Appends all of `other`'s values; kinds must already match.
    pub fn extend_from(&mut self, other: &MetricColumn) {
        match (self, other) {
            (MetricColumn::Long(a), MetricColumn::Long(b)) => a.extend_from_slice(b),
            (MetricColumn::Double(a), MetricColumn::Double(b)) => a.extend_from_slice(b),
            (a, b) => panic!(
                "metric kind invariant violated in merge: {} vs {}",
                a.kind(),
                b.kind()
            ),
        }
    }

    pub fn long_at(&self, row: usize) -> i64 {
        match self {
            MetricColumn::Long(v) => v[row],
            MetricColumn::Double(v) => v[row] as i64,
        }
    }

    pub fn double_at(&self, row: usize) -> f64 {
        match self {
            MetricColumn::Long(v) => v[row] as f64,
            MetricColumn::Double(v) => v[row],
        }
    }
}

/// Frozen dimension column: a sorted dictionary, per-row (sorted) id lists,
/// and one bitmap of row offsets per dictionary id.
#[derive(Debug, Clone)]
pub struct DimensionColumn {
    dict: SortedDictionary,
    rows: Vec<Vec<DictId>>,
    bitmaps: Vec<RoaringBitmap>,
}

impl DimensionColumn {
    /// Builds the column from a sorted dictionary and per-row id lists,
    /// constructing the inverted index.
    ///
    /// # Panics
    /// A row id outside the dictionary is an invariant violation.
    pub(crate) fn new(dict: SortedDictionary, rows: Vec<Vec<DictId>>) -> Self {
        let bitmaps = build_bitmaps(dict.len(), &rows);
        DimensionColumn { dict, rows, bitmaps }
    }

    pub fn dictionary(&self) -> &SortedDictionary {
        &self.dict
    }

    pub fn cardinality(&self) -> usize {
        self.dict.len()
    }

    pub fn row_ids(&self, row: usize) -> &[DictId] {
        &self.rows[row]
    }

    pub fn rows(&self) -> &[Vec<DictId>] {
        &self.rows
    }

    /// Bitmap of row offsets holding dictionary id `id`.
    ///
    /// # Panics
    /// An out-of-range id is an invariant violation.
    pub fn bitmap(&self, id: DictId) -> &RoaringBitmap {
        &self.bitmaps[id as usize]
    }
}

/// Inverted index construction: one sorted row-offset bitmap per value id.
fn build_bitmaps(cardinality: usize, rows: &[Vec<DictId>]) -> Vec<RoaringBitmap> {
    let mut bitmaps = vec![RoaringBitmap::new(); cardinality];
    for (row, ids) in rows.iter().enumerate() {
        for &id in ids {
            assert!(
                (id as usize) < cardinality,
                "bitmap index invariant violated: id {} outside dictionary of {} values",
                id,
                cardinality
            );
            bitmaps[id as usize].insert(row as u32);
        }
    }
    bitmaps
}
