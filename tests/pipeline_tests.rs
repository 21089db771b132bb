//! End-to-end query pipeline tests: ingestion through runners, merge, and
//! finalization, against mutable, flushed, and merged segments alike.

use std::sync::Arc;
use strata::granularity::MS_PER_DAY;
use strata::*;

fn day(n: u64) -> Timestamp {
    n * MS_PER_DAY
}

fn full_interval() -> Interval {
    Interval::new(0, day(10))
}

/// The three-row fixture: two providers on day 1, one on day 2.
fn fixture_rows() -> Vec<Row> {
    vec![
        Row::new(day(1)).dim("provider", "a").metric("index", 100i64),
        Row::new(day(1)).dim("provider", "b").metric("index", 200i64),
        Row::new(day(2)).dim("provider", "a").metric("index", 50i64),
    ]
}

fn mutable_segment(rows: &[Row]) -> Arc<MutableSegment> {
    let segment = MutableSegment::new();
    for row in rows {
        segment.add(row).unwrap();
    }
    Arc::new(segment)
}

fn common_query() -> Query {
    Query::new("testing")
        .over(full_interval())
        .aggregate(AggregatorFactory::count("rows"))
        .aggregate(AggregatorFactory::long_sum("index", "index"))
}

/// Adapters over every storage form of the same rows: the mutable segment,
/// its flushed form, and a merge of single-day flushed segments.
fn all_adapters() -> Vec<(&'static str, Arc<dyn StorageAdapter>)> {
    let mutable = mutable_segment(&fixture_rows());
    let flushed = Arc::new(ImmutableSegment::flush(&mutable));

    let day1 = ImmutableSegment::flush(&mutable_segment(&fixture_rows()[..2]));
    let day2 = ImmutableSegment::flush(&mutable_segment(&fixture_rows()[2..]));
    let merged = Arc::new(ImmutableSegment::merge(&[&day1, &day2]).unwrap());

    vec![
        (
            "mutable",
            Arc::new(MutableStorageAdapter::new(mutable)) as Arc<dyn StorageAdapter>,
        ),
        (
            "flushed",
            Arc::new(ImmutableStorageAdapter::new(flushed)) as Arc<dyn StorageAdapter>,
        ),
        (
            "merged",
            Arc::new(ImmutableStorageAdapter::new(merged)) as Arc<dyn StorageAdapter>,
        ),
    ]
}

fn run_finalized(adapters: Vec<Arc<dyn StorageAdapter>>, query: &Query) -> Vec<ResultRow> {
    QueryRunnerFactory::new()
        .finalized_runner(adapters)
        .run(query)
        .unwrap()
        .collect()
}

#[test]
fn day_granularity_buckets_rows_per_day() {
    let query = common_query().granularity(Granularity::Day);
    for (label, adapter) in all_adapters() {
        let rows = run_finalized(vec![adapter], &query);
        assert_eq!(rows.len(), 2, "storage form: {}", label);

        assert_eq!(rows[0].timestamp, day(1));
        assert_eq!(rows[0].get_long("rows"), 2);
        assert_eq!(rows[0].get_long("index"), 300);

        assert_eq!(rows[1].timestamp, day(2));
        assert_eq!(rows[1].get_long("rows"), 1);
        assert_eq!(rows[1].get_long("index"), 50);
    }
}

#[test]
fn all_granularity_collapses_to_one_row() {
    let query = common_query().granularity(Granularity::All);
    for (label, adapter) in all_adapters() {
        let rows = run_finalized(vec![adapter], &query);
        assert_eq!(rows.len(), 1, "storage form: {}", label);
        assert_eq!(rows[0].timestamp, full_interval().start);
        assert_eq!(rows[0].get_long("rows"), 3);
        assert_eq!(rows[0].get_long("index"), 350);
    }
}

#[test]
fn add_rows_index_constant_post_aggregator() {
    let query = common_query()
        .granularity(Granularity::Day)
        .post_aggregate(PostAggregator::arithmetic(
            "add_rows_index_constant",
            ArithmeticOp::Add,
            vec![
                PostAggregator::constant("const", 1.0),
                PostAggregator::field_access("rows", "rows"),
                PostAggregator::field_access("index", "index"),
            ],
        ));
    for (label, adapter) in all_adapters() {
        let rows = run_finalized(vec![adapter], &query);
        assert_eq!(
            rows[0].get_double("add_rows_index_constant"),
            303.0,
            "storage form: {}",
            label
        );
        assert_eq!(rows[1].get_double("add_rows_index_constant"), 52.0);
    }
}

#[test]
fn flush_and_query_is_equivalent_to_querying_mutable() {
    for granularity in [Granularity::Day, Granularity::All, Granularity::Hour] {
        let query = common_query().granularity(granularity);
        let mutable = mutable_segment(&fixture_rows());
        let flushed = Arc::new(ImmutableSegment::flush(&mutable));

        let from_mutable = run_finalized(
            vec![Arc::new(MutableStorageAdapter::new(mutable))],
            &query,
        );
        let from_flushed = run_finalized(
            vec![Arc::new(ImmutableStorageAdapter::new(flushed))],
            &query,
        );
        assert_eq!(from_mutable, from_flushed);
    }
}

#[test]
fn per_segment_combine_matches_merged_segment() {
    let query = common_query().granularity(Granularity::All);

    // One runner per single-day segment, combined by the toolchest merge.
    let day1 = ImmutableSegment::flush(&mutable_segment(&fixture_rows()[..2]));
    let day2 = ImmutableSegment::flush(&mutable_segment(&fixture_rows()[2..]));
    let per_segment = run_finalized(
        vec![
            Arc::new(ImmutableStorageAdapter::new(Arc::new(day1.clone()))),
            Arc::new(ImmutableStorageAdapter::new(Arc::new(day2.clone()))),
        ],
        &query,
    );

    // One merged segment queried directly.
    let merged = Arc::new(ImmutableSegment::merge(&[&day1, &day2]).unwrap());
    let from_merged = run_finalized(
        vec![Arc::new(ImmutableStorageAdapter::new(merged))],
        &query,
    );

    assert_eq!(per_segment, from_merged);
    assert_eq!(per_segment[0].get_long("rows"), 3);
    assert_eq!(per_segment[0].get_long("index"), 350);
}

#[test]
fn grouped_query_by_provider() {
    let query = common_query()
        .granularity(Granularity::Day)
        .group_by(&["provider"]);
    for (label, adapter) in all_adapters() {
        let rows = run_finalized(vec![adapter], &query);
        let summary: Vec<(Timestamp, &str, i64)> = rows
            .iter()
            .map(|r| (r.timestamp, r.dimensions[0].as_str(), r.get_long("index")))
            .collect();
        assert_eq!(
            summary,
            vec![(day(1), "a", 100), (day(1), "b", 200), (day(2), "a", 50)],
            "storage form: {}",
            label
        );
    }
}

#[test]
fn grouped_query_combines_across_segments() {
    let query = common_query()
        .granularity(Granularity::All)
        .group_by(&["provider"]);

    let day1 = ImmutableSegment::flush(&mutable_segment(&fixture_rows()[..2]));
    let day2 = ImmutableSegment::flush(&mutable_segment(&fixture_rows()[2..]));
    let rows = run_finalized(
        vec![
            Arc::new(ImmutableStorageAdapter::new(Arc::new(day1))),
            Arc::new(ImmutableStorageAdapter::new(Arc::new(day2))),
        ],
        &query,
    );

    // Provider "a" appears in both segments; its partials must combine.
    let summary: Vec<(&str, i64, i64)> = rows
        .iter()
        .map(|r| (r.dimensions[0].as_str(), r.get_long("rows"), r.get_long("index")))
        .collect();
    assert_eq!(summary, vec![("a", 2, 150), ("b", 1, 200)]);
}

#[test]
fn filtered_query_agrees_across_storage_forms() {
    let query = common_query()
        .granularity(Granularity::All)
        .filter(Filter::selector("provider", "a"));
    let mut outcomes = Vec::new();
    for (_, adapter) in all_adapters() {
        let rows = run_finalized(vec![adapter], &query);
        outcomes.push((rows[0].get_long("rows"), rows[0].get_long("index")));
    }
    assert!(outcomes.iter().all(|&o| o == (2, 150)), "{:?}", outcomes);
}

#[test]
fn filter_on_missing_dimension_matches_nothing() {
    let query = common_query()
        .granularity(Granularity::All)
        .filter(Filter::selector("country", "us"));
    for (_, adapter) in all_adapters() {
        let rows = run_finalized(vec![adapter], &query);
        // Timeseries still emits the bucket, with identity values.
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get_long("rows"), 0);
        assert_eq!(rows[0].get_long("index"), 0);
    }
}

#[test]
fn empty_day_between_data_emits_identity_row() {
    let rows = vec![
        Row::new(day(1)).dim("provider", "a").metric("index", 1i64),
        Row::new(day(3)).dim("provider", "a").metric("index", 3i64),
    ];
    let adapter: Arc<dyn StorageAdapter> =
        Arc::new(MutableStorageAdapter::new(mutable_segment(&rows)));
    let query = common_query().granularity(Granularity::Day);
    let out = run_finalized(vec![adapter], &query);
    assert_eq!(out.len(), 3);
    assert_eq!(out[1].timestamp, day(2));
    assert_eq!(out[1].get_long("rows"), 0);
}

#[test]
fn parallel_and_sequential_merge_agree() {
    let query = common_query().granularity(Granularity::Day);

    let day1 = ImmutableSegment::flush(&mutable_segment(&fixture_rows()[..2]));
    let day2 = ImmutableSegment::flush(&mutable_segment(&fixture_rows()[2..]));
    let factory = QueryRunnerFactory::new();
    let runners: Vec<Arc<dyn QueryRunner>> = vec![
        Arc::new(factory.create_runner(Arc::new(ImmutableStorageAdapter::new(Arc::new(day1))))),
        Arc::new(factory.create_runner(Arc::new(ImmutableStorageAdapter::new(Arc::new(day2))))),
    ];
    let merging = MergingQueryRunner::new(runners, factory.toolchest());

    let sequential: Vec<ResultRow> = merging.run(&query).unwrap().collect();
    let parallel: Vec<ResultRow> = merging.run_parallel(&query).unwrap().collect();
    assert_eq!(sequential, parallel);
}

#[test]
fn segment_spec_resolves_overlapping_segments() {
    let day1 = Arc::new(ImmutableSegment::flush(&mutable_segment(
        &fixture_rows()[..2],
    )));
    let day2 = Arc::new(ImmutableSegment::flush(&mutable_segment(
        &fixture_rows()[2..],
    )));
    let adapters: Vec<Arc<dyn StorageAdapter>> = vec![
        Arc::new(ImmutableStorageAdapter::new(day1)),
        Arc::new(ImmutableStorageAdapter::new(day2)),
    ];

    let spec = SegmentSpec::single(Interval::new(day(1), day(2)));
    let resolved = spec.resolve(&adapters);
    assert_eq!(resolved.len(), 1);
    assert_eq!(resolved[0].interval(), adapters[0].interval());

    let everything = SegmentSpec::single(full_interval());
    assert_eq!(everything.resolve(&adapters).len(), 2);
}

#[test]
fn query_model_round_trips_through_json() {
    // The external query-ingestion boundary hands the core a validated
    // structure; the serde model must survive a round trip.
    let query = common_query()
        .granularity(Granularity::Day)
        .filter(Filter::and(vec![
            Filter::selector("provider", "a"),
            Filter::not(Filter::selector("quality", "low")),
        ]))
        .group_by(&["provider"])
        .post_aggregate(PostAggregator::constant("const", 1.0));

    let encoded = serde_json::to_string(&query).unwrap();
    let decoded: Query = serde_json::from_str(&encoded).unwrap();
    assert_eq!(decoded.data_source, query.data_source);
    assert_eq!(decoded.segment_spec, query.segment_spec);
    assert_eq!(decoded.granularity, query.granularity);
    assert_eq!(decoded.filter, query.filter);
    assert_eq!(decoded.dimensions, query.dimensions);
    assert_eq!(decoded.aggregators, query.aggregators);
    assert_eq!(decoded.post_aggregators, query.post_aggregators);
}

#[test]
fn multi_valued_dimension_contributes_to_each_group() {
    let rows = vec![
        Row::new(day(1))
            .dims("placementish", &["a", "preferred"])
            .metric("index", 10i64),
        Row::new(day(1))
            .dims("placementish", &["b", "preferred"])
            .metric("index", 20i64),
    ];
    let query = Query::new("testing")
        .over(full_interval())
        .granularity(Granularity::All)
        .group_by(&["placementish"])
        .aggregate(AggregatorFactory::count("rows"))
        .aggregate(AggregatorFactory::long_sum("index", "index"));

    let mutable = mutable_segment(&rows);
    let flushed: Arc<dyn StorageAdapter> = Arc::new(ImmutableStorageAdapter::new(Arc::new(
        ImmutableSegment::flush(&mutable),
    )));
    let out = run_finalized(vec![flushed], &query);

    let summary: Vec<(&str, i64, i64)> = out
        .iter()
        .map(|r| (r.dimensions[0].as_str(), r.get_long("rows"), r.get_long("index")))
        .collect();
    assert_eq!(
        summary,
        vec![("a", 1, 10), ("b", 1, 20), ("preferred", 2, 30)]
    );
}
