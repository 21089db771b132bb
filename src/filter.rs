//! Boolean predicate trees over dimension values.
//!
//! Against an immutable segment a filter is evaluated by bitmap set-algebra
//! (AND = intersection, OR = union, NOT = complement against the row
//! universe); against a mutable snapshot it is evaluated row by row. Both
//! paths select the same logical row set — the adapter contract's core
//! correctness property.

use crate::immutable::ImmutableSegment;
use crate::segment::ColumnAccess;
use roaring::RoaringBitmap;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Filter {
    /// Dimension equals a value.
    Selector { dimension: String, value: String },
    /// Dimension has a value in `[lower, upper)` (lexicographic); an
    /// unbounded side is open-ended.
    Range {
        dimension: String,
        lower: Option<String>,
        upper: Option<String>,
    },
    And { filters: Vec<Filter> },
    Or { filters: Vec<Filter> },
    Not { filter: Box<Filter> },
}

impl Filter {
    pub fn selector(dimension: &str, value: &str) -> Filter {
        Filter::Selector {
            dimension: dimension.to_string(),
            value: value.to_string(),
        }
    }

    pub fn range(dimension: &str, lower: Option<&str>, upper: Option<&str>) -> Filter {
        Filter::Range {
            dimension: dimension.to_string(),
            lower: lower.map(|s| s.to_string()),
            upper: upper.map(|s| s.to_string()),
        }
    }

    pub fn and(filters: Vec<Filter>) -> Filter {
        Filter::And { filters }
    }

    pub fn or(filters: Vec<Filter>) -> Filter {
        Filter::Or { filters }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn not(filter: Filter) -> Filter {
        Filter::Not {
            filter: Box::new(filter),
        }
    }

    /// Row set selected from an immutable segment, computed purely by bitmap
    /// set-algebra over the dimension inverted indexes.
    ///
    /// A filter naming a dimension the segment lacks contributes the empty
    /// set (so its negation contributes every row).
    pub fn evaluate_bitmap(&self, segment: &ImmutableSegment) -> RoaringBitmap {
        match self {
            Filter::Selector { dimension, value } => match segment
                .dimension(dimension)
                .and_then(|dim| dim.dictionary().lookup_id(value).map(|id| dim.bitmap(id)))
            {
                Some(bitmap) => bitmap.clone(),
                None => RoaringBitmap::new(),
            },
            Filter::Range {
                dimension,
                lower,
                upper,
            } => {
                let mut acc = RoaringBitmap::new();
                if let Some(dim) = segment.dimension(dimension) {
                    let ids = dim
                        .dictionary()
                        .id_range(lower.as_deref(), upper.as_deref());
                    for id in ids {
                        acc |= dim.bitmap(id);
                    }
                }
                acc
            }
            Filter::And { filters } => {
                let mut acc = row_universe(segment);
                for filter in filters {
                    acc &= filter.evaluate_bitmap(segment);
                }
                acc
            }
            Filter::Or { filters } => {
                let mut acc = RoaringBitmap::new();
                for filter in filters {
                    acc |= filter.evaluate_bitmap(segment);
                }
                acc
            }
            Filter::Not { filter } => row_universe(segment) - filter.evaluate_bitmap(segment),
        }
    }

    /// Row-by-row predicate evaluation against any column view. Must select
    /// the same rows as [`Filter::evaluate_bitmap`] for identical content.
    pub fn matches_row<A: ColumnAccess + ?Sized>(&self, access: &A, row: usize) -> bool {
        match self {
            Filter::Selector { dimension, value } => {
                match access.dimension_lookup_id(dimension, value) {
                    Some(id) => access.dimension_ids(row, dimension).contains(&id),
                    None => false,
                }
            }
            Filter::Range {
                dimension,
                lower,
                upper,
            } => access.dimension_ids(row, dimension).iter().any(|&id| {
                let v = match access.dimension_value(dimension, id) {
                    Some(v) => v,
                    None => return false,
                };
                let v = v.as_ref();
                lower.as_deref().map_or(true, |l| v >= l)
                    && upper.as_deref().map_or(true, |u| v < u)
            }),
            Filter::And { filters } => filters.iter().all(|f| f.matches_row(access, row)),
            Filter::Or { filters } => filters.iter().any(|f| f.matches_row(access, row)),
            Filter::Not { filter } => !filter.matches_row(access, row),
        }
    }
}

fn row_universe(segment: &ImmutableSegment) -> RoaringBitmap {
    let mut universe = RoaringBitmap::new();
    if segment.row_count() > 0 {
        universe.insert_range(0..segment.row_count() as u32);
    }
    universe
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mutable::MutableSegment;
    use crate::types::Row;
    use std::sync::Arc;

    /// provider/quality fixture: 4 rows over two dimensions.
    fn fixture() -> ImmutableSegment {
        let mutable = MutableSegment::new();
        let rows = [
            Row::new(1).dim("provider", "spot").dim("quality", "premium"),
            Row::new(2).dim("provider", "total").dim("quality", "mezzanine"),
            Row::new(3).dim("provider", "spot").dim("quality", "mezzanine"),
            Row::new(4).dim("provider", "upfront").dim("quality", "premium"),
        ];
        for row in &rows {
            mutable.add(row).unwrap();
        }
        ImmutableSegment::flush(&mutable)
    }

    fn rows_of(bitmap: &RoaringBitmap) -> Vec<u32> {
        bitmap.iter().collect()
    }

    /// Every filter case must agree between bitmap algebra and row scanning.
    fn check(filter: &Filter, segment: &ImmutableSegment, expected: &[u32]) {
        assert_eq!(rows_of(&filter.evaluate_bitmap(segment)), expected);
        let access = Arc::new(segment.clone());
        let scanned: Vec<u32> = (0..segment.row_count())
            .filter(|&r| filter.matches_row(&access, r))
            .map(|r| r as u32)
            .collect();
        assert_eq!(scanned, expected);
    }

    #[test]
    fn selector_selects_by_value() {
        let segment = fixture();
        check(&Filter::selector("provider", "spot"), &segment, &[0, 2]);
        check(&Filter::selector("provider", "nope"), &segment, &[]);
    }

    #[test]
    fn and_or_not_set_algebra() {
        let segment = fixture();
        check(
            &Filter::and(vec![
                Filter::selector("provider", "spot"),
                Filter::selector("quality", "mezzanine"),
            ]),
            &segment,
            &[2],
        );
        check(
            &Filter::or(vec![
                Filter::selector("provider", "total"),
                Filter::selector("provider", "upfront"),
            ]),
            &segment,
            &[1, 3],
        );
        check(
            &Filter::not(Filter::selector("quality", "premium")),
            &segment,
            &[1, 2],
        );
    }

    #[test]
    fn range_uses_dictionary_order() {
        let segment = fixture();
        // [spot, upfront) covers spot and total.
        check(
            &Filter::range("provider", Some("spot"), Some("upfront")),
            &segment,
            &[0, 1, 2],
        );
        check(&Filter::range("provider", Some("t"), None), &segment, &[1, 3]);
        check(&Filter::range("provider", None, Some("spot")), &segment, &[]);
    }

    #[test]
    fn absent_dimension_degrades_to_no_match() {
        let segment = fixture();
        check(&Filter::selector("country", "us"), &segment, &[]);
        // The complement of "nothing" is every row.
        check(
            &Filter::not(Filter::selector("country", "us")),
            &segment,
            &[0, 1, 2, 3],
        );
    }

    #[test]
    fn empty_combinators() {
        let segment = fixture();
        check(&Filter::and(vec![]), &segment, &[0, 1, 2, 3]);
        check(&Filter::or(vec![]), &segment, &[]);
    }

    #[test]
    fn multi_value_rows_match_any_value() {
        let mutable = MutableSegment::new();
        mutable
            .add(&Row::new(1).dims("placementish", &["a", "preferred"]))
            .unwrap();
        mutable
            .add(&Row::new(2).dims("placementish", &["b", "preferred"]))
            .unwrap();
        let segment = ImmutableSegment::flush(&mutable);

        check(&Filter::selector("placementish", "a"), &segment, &[0]);
        check(&Filter::selector("placementish", "preferred"), &segment, &[0, 1]);
    }
}
