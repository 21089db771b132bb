#![doc = include_str!("../README.md")]
// Declare modules
pub mod adapter;
pub mod aggregation;
pub mod column;
pub mod dictionary;
pub mod error;
pub mod filter;
pub mod granularity;
pub mod immutable;
pub mod mutable;
pub mod persistence;
pub mod query;
pub mod segment;
pub mod telemetry;
pub mod types;

/// Storage adapters over the two segment variants.
pub use crate::adapter::{ImmutableStorageAdapter, MutableStorageAdapter};
/// Aggregation framework: factories, accumulators, and post-aggregators.
pub use crate::aggregation::{
    plan_post_aggregators, Aggregator, AggregatorFactory, ArithmeticOp, PostAggregator,
};
/// Error type for core operations.
pub use crate::error::{Error, Result};
/// Boolean predicate trees over dimension values.
pub use crate::filter::Filter;
/// Time-bucketing function.
pub use crate::granularity::Granularity;
/// Frozen columnar segment with sorted dictionaries and bitmap indexes.
pub use crate::immutable::ImmutableSegment;
/// Append-only ingestion segment.
pub use crate::mutable::MutableSegment;
/// Segment file reader/writer.
pub use crate::persistence::{read_segment, write_segment};
/// Query model and execution pipeline.
pub use crate::query::{
    FinalizeResultsQueryRunner, MergingQueryRunner, Query, QueryRunner, QueryRunnerFactory,
    ResultRow, ResultSeq, SegmentQueryRunner, SegmentSpec, Toolchest,
};
/// Read contracts shared by both segment variants.
pub use crate::segment::{ColumnAccess, Cursor, CursorSeq, StorageAdapter};
/// Structured event hook for observability.
pub use crate::telemetry::{CoreEvent, CoreEventListener, NoopEventListener};
/// Core data model.
pub use crate::types::{DictId, Interval, MetricValue, NumericKind, Row, Timestamp};
