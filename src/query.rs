//! Query execution pipeline: a `Query` bound to one segment's
//! [`StorageAdapter`] by a [`SegmentQueryRunner`] yields a lazy, ordered
//! sequence of per-(bucket, group) result rows carrying *intermediate*
//! accumulator values; the [`Toolchest`] merges per-segment sequences under
//! the aggregation combine law; [`FinalizeResultsQueryRunner`] finalizes and
//! post-aggregates last — never before merging.

use crate::aggregation::{plan_post_aggregators, Aggregator, AggregatorFactory, PostAggregator};
use crate::error::{Error, Result};
use crate::filter::Filter;
use crate::granularity::Granularity;
use crate::segment::{Cursor, StorageAdapter};
use crate::types::{Interval, MetricValue, Timestamp};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::iter::Peekable;
use std::sync::Arc;

/// Declared query intervals, resolved against available segments by simple
/// interval overlap. Intervals are expected ascending and non-overlapping.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentSpec {
    intervals: Vec<Interval>,
}

impl SegmentSpec {
    pub fn new(intervals: Vec<Interval>) -> Self {
        SegmentSpec { intervals }
    }

    pub fn single(interval: Interval) -> Self {
        SegmentSpec {
            intervals: vec![interval],
        }
    }

    pub fn intervals(&self) -> &[Interval] {
        &self.intervals
    }

    pub fn overlaps(&self, interval: &Interval) -> bool {
        self.intervals.iter().any(|i| i.overlaps(interval))
    }

    /// The adapters whose data intersects the declared intervals.
    pub fn resolve(&self, adapters: &[Arc<dyn StorageAdapter>]) -> Vec<Arc<dyn StorageAdapter>> {
        adapters
            .iter()
            .filter(|a| a.interval().is_some_and(|i| self.overlaps(&i)))
            .cloned()
            .collect()
    }
}

/// An aggregation query. Immutable once constructed; built with the
/// chainable setters below.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Query {
    pub data_source: String,
    pub segment_spec: SegmentSpec,
    pub granularity: Granularity,
    #[serde(default)]
    pub filter: Option<Filter>,
    /// Grouping dimensions; empty means one result row per bucket.
    #[serde(default)]
    pub dimensions: Vec<String>,
    pub aggregators: Vec<AggregatorFactory>,
    #[serde(default)]
    pub post_aggregators: Vec<PostAggregator>,
}

impl Query {
    pub fn new(data_source: &str) -> Self {
        Query {
            data_source: data_source.to_string(),
            segment_spec: SegmentSpec::default(),
            granularity: Granularity::All,
            filter: None,
            dimensions: Vec::new(),
            aggregators: Vec::new(),
            post_aggregators: Vec::new(),
        }
    }

    pub fn over(mut self, interval: Interval) -> Self {
        self.segment_spec.intervals.push(interval);
        self
    }

    pub fn granularity(mut self, granularity: Granularity) -> Self {
        self.granularity = granularity;
        self
    }

    pub fn filter(mut self, filter: Filter) -> Self {
        self.filter = Some(filter);
        self
    }

    pub fn group_by(mut self, dimensions: &[&str]) -> Self {
        self.dimensions = dimensions.iter().map(|d| d.to_string()).collect();
        self
    }

    pub fn aggregate(mut self, factory: AggregatorFactory) -> Self {
        self.aggregators.push(factory);
        self
    }

    pub fn post_aggregate(mut self, post: PostAggregator) -> Self {
        self.post_aggregators.push(post);
        self
    }
}

/// One result row: a bucket timestamp, the grouping key (parallel to the
/// query's grouping dimensions), and named values — intermediate accumulator
/// values until finalized.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultRow {
    pub timestamp: Timestamp,
    pub dimensions: Vec<String>,
    pub values: BTreeMap<String, MetricValue>,
}

impl ResultRow {
    fn key(&self) -> (Timestamp, &[String]) {
        (self.timestamp, &self.dimensions)
    }

    pub fn get(&self, name: &str) -> Option<MetricValue> {
        self.values.get(name).copied()
    }

    pub fn get_long(&self, name: &str) -> i64 {
        self.get(name).map_or(0, |v| v.as_long())
    }

    pub fn get_double(&self, name: &str) -> f64 {
        self.get(name).map_or(0.0, |v| v.as_double())
    }
}

/// Lazy result sequence, ordered by (bucket timestamp, grouping key).
/// Dropping it mid-pull abandons the scan with no side effects.
pub type ResultSeq = Box<dyn Iterator<Item = ResultRow> + Send>;

/// Stateless executor of a query against some scope of data.
pub trait QueryRunner: Send + Sync {
    fn run(&self, query: &Query) -> Result<ResultSeq>;
}

/// Binds one segment's adapter; produces intermediate result rows, one per
/// (bucket, grouping key), lazily per bucket.
pub struct SegmentQueryRunner {
    adapter: Arc<dyn StorageAdapter>,
}

impl SegmentQueryRunner {
    pub fn new(adapter: Arc<dyn StorageAdapter>) -> Self {
        SegmentQueryRunner { adapter }
    }
}

impl QueryRunner for SegmentQueryRunner {
    fn run(&self, query: &Query) -> Result<ResultSeq> {
        for interval in query.segment_spec.intervals() {
            if interval.is_empty() {
                return Err(Error::InvalidTimeRange {
                    start: interval.start,
                    end: interval.end,
                });
            }
        }

        let query = Arc::new(query.clone());
        let adapter = Arc::clone(&self.adapter);
        let intervals: Vec<Interval> = query.segment_spec.intervals().to_vec();

        let cursors = {
            let query = Arc::clone(&query);
            intervals.into_iter().flat_map(move |interval| {
                adapter.make_cursors(interval, query.granularity, query.filter.as_ref())
            })
        };
        let rows = cursors.flat_map(move |cursor| aggregate_bucket(cursor, &query));
        Ok(Box::new(rows))
    }
}

/// Folds one bucket's rows into result rows.
///
/// Without grouping dimensions the bucket always emits exactly one row —
/// identity values when the bucket is empty. With grouping, one row per key
/// present, ascending; a multi-valued dimension contributes the row to each
/// of its values' groups, and an absent dimension contributes the empty
/// string.
fn aggregate_bucket(mut cursor: Box<dyn Cursor>, query: &Query) -> Vec<ResultRow> {
    let timestamp = cursor.bucket().start;

    if query.dimensions.is_empty() {
        let mut aggregators: Vec<Aggregator> =
            query.aggregators.iter().map(|f| f.create()).collect();
        while cursor.advance() {
            for aggregator in aggregators.iter_mut() {
                aggregator.aggregate(cursor.as_ref());
            }
        }
        return vec![ResultRow {
            timestamp,
            dimensions: Vec::new(),
            values: intermediate_values(&query.aggregators, &aggregators),
        }];
    }

    let mut groups: BTreeMap<Vec<String>, Vec<Aggregator>> = BTreeMap::new();
    while cursor.advance() {
        for key in group_keys(cursor.as_ref(), &query.dimensions) {
            let aggregators = groups
                .entry(key)
                .or_insert_with(|| query.aggregators.iter().map(|f| f.create()).collect());
            for aggregator in aggregators.iter_mut() {
                aggregator.aggregate(cursor.as_ref());
            }
        }
    }
    groups
        .into_iter()
        .map(|(dimensions, aggregators)| ResultRow {
            timestamp,
            dimensions,
            values: intermediate_values(&query.aggregators, &aggregators),
        })
        .collect()
}

fn intermediate_values(
    factories: &[AggregatorFactory],
    aggregators: &[Aggregator],
) -> BTreeMap<String, MetricValue> {
    factories
        .iter()
        .zip(aggregators)
        .map(|(factory, aggregator)| (factory.name().to_string(), aggregator.get()))
        .collect()
}

/// Cartesian grouping keys for the cursor's current row.
fn group_keys(cursor: &dyn Cursor, dimensions: &[String]) -> Vec<Vec<String>> {
    let mut keys: Vec<Vec<String>> = vec![Vec::with_capacity(dimensions.len())];
    for dimension in dimensions {
        let values = cursor.dimension_values(dimension);
        let values: Vec<String> = if values.is_empty() {
            vec![String::new()]
        } else {
            values.iter().map(|v| v.to_string()).collect()
        };
        keys = keys
            .into_iter()
            .flat_map(|key| {
                values.iter().map(move |v| {
                    let mut next = key.clone();
                    next.push(v.clone());
                    next
                })
            })
            .collect();
    }
    keys
}

/// Merge/combine policy binding per-segment result sequences together.
#[derive(Debug, Clone, Default)]
pub struct Toolchest;

impl Toolchest {
    /// Ordered k-way merge of per-segment sequences, applying each factory's
    /// `combine` to rows sharing a (bucket, grouping key) — partials are
    /// combined, never re-scanned. Inputs must be internally ordered by that
    /// key, which per-segment runners guarantee.
    pub fn merge_results(&self, query: &Query, inputs: Vec<ResultSeq>) -> ResultSeq {
        Box::new(MergeIter {
            heads: inputs.into_iter().map(|seq| seq.peekable()).collect(),
            aggregators: query.aggregators.clone(),
        })
    }
}

struct MergeIter {
    heads: Vec<Peekable<ResultSeq>>,
    aggregators: Vec<AggregatorFactory>,
}

impl Iterator for MergeIter {
    type Item = ResultRow;

    fn next(&mut self) -> Option<ResultRow> {
        let mut min_key: Option<(Timestamp, Vec<String>)> = None;
        for head in self.heads.iter_mut() {
            if let Some(row) = head.peek() {
                let key = row.key();
                if min_key
                    .as_ref()
                    .map_or(true, |(ts, dims)| key < (*ts, dims.as_slice()))
                {
                    min_key = Some((key.0, key.1.to_vec()));
                }
            }
        }
        let (timestamp, dimensions) = min_key?;

        let mut merged: Option<ResultRow> = None;
        for head in self.heads.iter_mut() {
            let matches = head
                .peek()
                .is_some_and(|row| row.key() == (timestamp, dimensions.as_slice()));
            if !matches {
                continue;
            }
            let row = head.next().expect("peeked row");
            merged = Some(match merged {
                None => row,
                Some(acc) => combine_rows(&self.aggregators, acc, row),
            });
        }
        merged
    }
}

fn combine_rows(
    aggregators: &[AggregatorFactory],
    mut acc: ResultRow,
    other: ResultRow,
) -> ResultRow {
    for factory in aggregators {
        let a = acc
            .values
            .get(factory.name())
            .copied()
            .unwrap_or_else(|| factory.identity());
        let b = other
            .values
            .get(factory.name())
            .copied()
            .unwrap_or_else(|| factory.identity());
        acc.values
            .insert(factory.name().to_string(), factory.combine(a, b));
    }
    acc
}

/// Runs many per-segment runners and merges their sequences through the
/// toolchest. `run` pulls inputs lazily on the calling thread; `run_parallel`
/// executes the per-segment runners on the rayon pool first (the
/// caller-chosen parallelism model) and merges the collected outputs.
pub struct MergingQueryRunner {
    runners: Vec<Arc<dyn QueryRunner>>,
    toolchest: Toolchest,
}

impl MergingQueryRunner {
    pub fn new(runners: Vec<Arc<dyn QueryRunner>>, toolchest: Toolchest) -> Self {
        MergingQueryRunner { runners, toolchest }
    }

    pub fn run_parallel(&self, query: &Query) -> Result<ResultSeq> {
        let collected: Result<Vec<Vec<ResultRow>>> = self
            .runners
            .par_iter()
            .map(|runner| Ok(runner.run(query)?.collect()))
            .collect();
        let inputs = collected?
            .into_iter()
            .map(|rows| Box::new(rows.into_iter()) as ResultSeq)
            .collect();
        Ok(self.toolchest.merge_results(query, inputs))
    }
}

impl QueryRunner for MergingQueryRunner {
    fn run(&self, query: &Query) -> Result<ResultSeq> {
        let inputs: Result<Vec<ResultSeq>> = self
            .runners
            .iter()
            .map(|runner| runner.run(query))
            .collect();
        Ok(self.toolchest.merge_results(query, inputs?))
    }
}

/// Wraps a runner so callers receive externally meaningful values: each
/// factory's finalize, then post-aggregators in dependency order. Planning
/// runs before execution, so configuration errors surface before any row.
///
/// Finalize-after-merge ordering is mandatory: finalizing before combining
/// would break the combine law for aggregators whose intermediate and
/// finalized representations differ.
pub struct FinalizeResultsQueryRunner {
    inner: Box<dyn QueryRunner>,
}

impl FinalizeResultsQueryRunner {
    pub fn new(inner: Box<dyn QueryRunner>) -> Self {
        FinalizeResultsQueryRunner { inner }
    }
}

impl QueryRunner for FinalizeResultsQueryRunner {
    fn run(&self, query: &Query) -> Result<ResultSeq> {
        let order: Vec<PostAggregator> =
            plan_post_aggregators(&query.aggregators, &query.post_aggregators)?
                .into_iter()
                .cloned()
                .collect();
        let aggregators = query.aggregators.clone();
        let inner = self.inner.run(query)?;
        Ok(Box::new(
            inner.map(move |row| finalize_row(row, &aggregators, &order)),
        ))
    }
}

fn finalize_row(
    mut row: ResultRow,
    aggregators: &[AggregatorFactory],
    post_order: &[PostAggregator],
) -> ResultRow {
    for factory in aggregators {
        let value = row
            .values
            .get(factory.name())
            .copied()
            .unwrap_or_else(|| factory.identity());
        row.values
            .insert(factory.name().to_string(), factory.finalize(value));
    }

    let mut scalars: BTreeMap<String, f64> = row
        .values
        .iter()
        .map(|(name, value)| (name.clone(), value.as_double()))
        .collect();
    for post in post_order {
        let value = post.compute(&scalars);
        scalars.insert(post.name().to_string(), value);
        row.values
            .insert(post.name().to_string(), MetricValue::Double(value));
    }
    row
}

/// Builds runners for one query shape: per-segment runners, the shared
/// toolchest, and the fully assembled merge-then-finalize stack.
#[derive(Debug, Clone, Default)]
pub struct QueryRunnerFactory {
    toolchest: Toolchest,
}

impl QueryRunnerFactory {
    pub fn new() -> Self {
        QueryRunnerFactory {
            toolchest: Toolchest,
        }
    }

    pub fn create_runner(&self, adapter: Arc<dyn StorageAdapter>) -> SegmentQueryRunner {
        SegmentQueryRunner::new(adapter)
    }

    pub fn toolchest(&self) -> Toolchest {
        self.toolchest.clone()
    }

    /// The full stack over a set of segments: per-segment runners, ordered
    /// combine-merge, finalize last.
    pub fn finalized_runner(
        &self,
        adapters: Vec<Arc<dyn StorageAdapter>>,
    ) -> FinalizeResultsQueryRunner {
        let runners: Vec<Arc<dyn QueryRunner>> = adapters
            .into_iter()
            .map(|adapter| Arc::new(self.create_runner(adapter)) as Arc<dyn QueryRunner>)
            .collect();
        FinalizeResultsQueryRunner::new(Box::new(MergingQueryRunner::new(
            runners,
            self.toolchest(),
        )))
    }
}
