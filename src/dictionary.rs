//! Dictionary encoding for dimension values: a mutable first-seen variant for
//! ingestion and a sorted, binary-searchable variant for immutable segments,
//! plus the permutation/merge machinery that converts between them.

use crate::types::DictId;
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::sync::Arc;

/// Growing dictionary assigning dense ids in first-seen order.
///
/// Ids are never reassigned or removed for the life of the segment.
#[derive(Debug, Clone, Default)]
pub struct MutableDictionary {
    values: Vec<Arc<str>>,
    index: HashMap<Arc<str>, DictId>,
}

impl MutableDictionary {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the id for `value`, inserting it with the next dense id if
    /// absent. Amortized O(1).
    pub fn add_or_get(&mut self, value: &str) -> DictId {
        if let Some(&id) = self.index.get(value) {
            return id;
        }
        let id = self.values.len() as DictId;
        let shared: Arc<str> = Arc::from(value);
        self.values.push(Arc::clone(&shared));
        self.index.insert(shared, id);
        id
    }

    pub fn lookup_id(&self, value: &str) -> Option<DictId> {
        self.index.get(value).copied()
    }

    /// Resolves an id to its value.
    ///
    /// # Panics
    /// An out-of-range id is an invariant violation, not a data error.
    pub fn lookup_value(&self, id: DictId) -> &Arc<str> {
        &self.values[id as usize]
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Builds the lexicographically sorted dictionary over the same value set
    /// together with the old-id -> new-id permutation.
    pub fn sorted(&self) -> (SortedDictionary, Vec<DictId>) {
        let mut order: Vec<DictId> = (0..self.values.len() as DictId).collect();
        order.sort_unstable_by(|&a, &b| self.values[a as usize].cmp(&self.values[b as usize]));

        let mut sorted_values = Vec::with_capacity(self.values.len());
        let mut remap = vec![0 as DictId; self.values.len()];
        for (new_id, &old_id) in order.iter().enumerate() {
            sorted_values.push(Arc::clone(&self.values[old_id as usize]));
            remap[old_id as usize] = new_id as DictId;
        }
        (SortedDictionary { values: sorted_values }, remap)
    }
}

/// Frozen dictionary with values in strict lexicographic order, so id lookup
/// is a binary search and range filters resolve to a dense id range.
#[derive(Debug, Clone, Default)]
pub struct SortedDictionary {
    values: Vec<Arc<str>>,
}

impl SortedDictionary {
    /// Builds from already-sorted, deduplicated values.
    pub(crate) fn from_sorted_values(values: Vec<Arc<str>>) -> Self {
        debug_assert!(values.windows(2).all(|w| w[0] < w[1]));
        Self { values }
    }

    pub fn lookup_id(&self, value: &str) -> Option<DictId> {
        self.values
            .binary_search_by(|v| v.as_ref().cmp(value))
            .ok()
            .map(|i| i as DictId)
    }

    /// Resolves an id to its value.
    ///
    /// # Panics
    /// An out-of-range id is an invariant violation, not a data error.
    pub fn lookup_value(&self, id: DictId) -> &Arc<str> {
        &self.values[id as usize]
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn values(&self) -> &[Arc<str>] {
        &self.values
    }

    /// Dense id range holding every value in `[lower, upper)`; an unbounded
    /// side extends to the corresponding end of the dictionary.
    pub fn id_range(&self, lower: Option<&str>, upper: Option<&str>) -> std::ops::Range<DictId> {
        let lo = match lower {
            Some(l) => self.values.partition_point(|v| v.as_ref() < l),
            None => 0,
        };
        let hi = match upper {
            Some(u) => self.values.partition_point(|v| v.as_ref() < u),
            None => self.values.len(),
        };
        lo as DictId..hi.max(lo) as DictId
    }

    /// K-way merge-join of sorted dictionaries into one global sorted
    /// dictionary, deduplicating equal values.
    ///
    /// Returns the merged dictionary and, per input, the old-id -> new-id
    /// translation table used to remap that input's rows.
    pub fn merge(inputs: &[&SortedDictionary]) -> (SortedDictionary, Vec<Vec<DictId>>) {
        let mut remaps: Vec<Vec<DictId>> =
            inputs.iter().map(|d| vec![0 as DictId; d.len()]).collect();
        let mut merged: Vec<Arc<str>> = Vec::new();

        // Heap over (value, input, position); equal values across inputs are
        // drained together so they share one merged id.
        let mut heap: BinaryHeap<Reverse<(Arc<str>, usize, usize)>> = BinaryHeap::new();
        for (i, dict) in inputs.iter().enumerate() {
            if !dict.is_empty() {
                heap.push(Reverse((Arc::clone(&dict.values[0]), i, 0)));
            }
        }

        while let Some(Reverse((value, input, pos))) = heap.pop() {
            let new_id = match merged.last() {
                Some(last) if *last == value => merged.len() as DictId - 1,
                _ => {
                    merged.push(Arc::clone(&value));
                    merged.len() as DictId - 1
                }
            };
            remaps[input][pos] = new_id;

            let next = pos + 1;
            if next < inputs[input].len() {
                heap.push(Reverse((
                    Arc::clone(&inputs[input].values[next]),
                    input,
                    next,
                )));
            }
        }

        (SortedDictionary { values: merged }, remaps)
    }
}
