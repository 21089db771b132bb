//! Structured, in-process observability hooks.
//!
//! This crate is a library; emitting logs directly (e.g. `println!`) is not
//! acceptable for production. Callers install a [`CoreEventListener`] that
//! forwards structured events to `tracing`, `log`, metrics, or custom sinks.
//! Counter recording goes through the `metrics` facade and is a no-op until
//! the embedder installs a recorder.

use crate::types::NumericKind;
use std::sync::Arc;

/// Structured events emitted by the core.
#[derive(Debug, Clone)]
pub enum CoreEvent {
    /// A row was rejected at ingestion because a metric's numeric kind
    /// conflicted with the existing column.
    RowRejected {
        metric: String,
        expected: NumericKind,
        actual: NumericKind,
    },
    /// A mutable segment was frozen into an immutable one.
    SegmentFlushed { rows: usize, dimensions: usize },
    /// Several immutable segments were merged into one.
    SegmentsMerged { inputs: usize, rows: usize },
}

/// Structured event hook for observability.
pub trait CoreEventListener: std::fmt::Debug + Send + Sync + 'static {
    fn on_event(&self, event: CoreEvent);
}

#[derive(Debug)]
pub struct NoopEventListener;

impl CoreEventListener for NoopEventListener {
    #[inline]
    fn on_event(&self, _event: CoreEvent) {}
}

pub fn noop_event_listener() -> Arc<dyn CoreEventListener> {
    Arc::new(NoopEventListener)
}

/// Counter names recorded through the `metrics` facade.
///
/// Counters are exposed as `<name>_total` by typical Prometheus exporters.
pub mod core_metrics {
    pub const INGEST_ROWS: &str = "strata_ingest_rows";
    pub const INGEST_REJECTED_ROWS: &str = "strata_ingest_rejected_rows";
    pub const SEGMENTS_FLUSHED: &str = "strata_segments_flushed";
    pub const SEGMENTS_MERGED: &str = "strata_segments_merged";
    pub const SEGMENT_FILES_WRITTEN: &str = "strata_segment_files_written";
    pub const SEGMENT_FILES_READ: &str = "strata_segment_files_read";

    #[inline]
    pub(crate) fn increment(name: &'static str, by: u64) {
        metrics::counter!(name).increment(by);
    }
}
