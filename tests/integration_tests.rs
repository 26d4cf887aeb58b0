//! Integration tests for the columnar engine.
//!
//! These run whole pipelines against the simulated device: no accelerator
//! is required.

use gpu_columnar_engine::core::{CancellationToken, Placement, TaskContext};
use gpu_columnar_engine::memory::{DevicePool, MemoryError, PoolConfig};
use gpu_columnar_engine::model::{decimal, BatchSource, MemorySource};
use gpu_columnar_engine::prelude::*;
use gpu_columnar_engine::{collect, collect_batch, reduce, AggregateStrategy};
use std::sync::Arc;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn make_engine() -> ColumnarEngine {
    ColumnarEngine::new(EngineConfig {
        device_memory_budget_bytes: 16 << 20,
        arena_bytes: 1 << 20,
        batch_size_rows: 4,
        ..EngineConfig::default()
    })
    .unwrap()
}

fn sales() -> Batch {
    Batch::from_columns([
        ("region", Column::utf8(vec![Some("east"), Some("west"), Some("east"), None, Some("west"), Some("east")])),
        ("qty", Column::int64(vec![Some(3), Some(5), None, Some(2), Some(1), Some(4)])),
        ("price", Column::float64(vec![Some(2.5), Some(1.0), Some(4.0), Some(3.0), None, Some(2.0)])),
    ])
    .unwrap()
}

fn source(batch: &Batch, rows: usize) -> Box<MemorySource> {
    Box::new(MemorySource::chunked(batch, rows).unwrap())
}

fn column_values(batch: &Batch, i: usize) -> Vec<ScalarValue> {
    batch.column(i).unwrap().values().unwrap()
}

fn ints(values: &[Option<i64>]) -> Vec<ScalarValue> {
    values.iter().map(|v| v.map_or(ScalarValue::Null, ScalarValue::Int64)).collect()
}

// ---------------------------------------------------------------------------
// Expression evaluation
// ---------------------------------------------------------------------------

#[test]
fn test_null_propagating_add() {
    let engine = make_engine();
    let batch = Batch::from_columns([
        ("a", Column::int64(vec![Some(1), None, Some(4)])),
        ("b", Column::int64(vec![Some(2), Some(3), None])),
    ])
    .unwrap();
    let mut pipeline = engine
        .pipeline(source(&batch, 3))
        .project([("sum", col("a").add(col("b")))])
        .unwrap()
        .build();
    let out = collect_batch(pipeline.as_mut()).unwrap();
    assert_eq!(column_values(&out, 0), ints(&[Some(3), None, None]));
}

#[test]
fn test_decimal_multiply_adds_scales() {
    let engine = make_engine();
    let batch = Batch::from_columns([
        ("x", Column::decimal(10, 2, vec![Some(123), None]).unwrap()),
        ("y", Column::decimal(10, 3, vec![Some(500), Some(1)]).unwrap()),
    ])
    .unwrap();
    let expr = col("x").mul(col("y"));
    let planned = engine.plan(&expr, batch.schema()).unwrap();
    assert_eq!(planned.data_type.decimal_params().map(|(_, s)| s), Some(5));

    let out = engine.evaluate(&expr, &batch).unwrap();
    assert_eq!(
        out.as_column().unwrap().values().unwrap(),
        vec![ScalarValue::Decimal(61500), ScalarValue::Null]
    );
}

#[test]
fn test_decimal_rescale_half_up() {
    assert_eq!(decimal::rescale(12344, 3, 2), Some(1234));
    assert_eq!(decimal::rescale(12345, 3, 2), Some(1235));
    assert_eq!(decimal::rescale(-12345, 3, 2), Some(-1235));
}

#[test]
fn test_strict_and_permissive_overflow() {
    let batch = Batch::from_columns([("a", Column::int64(vec![Some(i64::MAX), Some(1)]))]).unwrap();
    let expr = col("a").add(lit(1i64));

    let permissive = make_engine();
    let out = permissive.evaluate(&expr, &batch).unwrap();
    assert_eq!(out.as_column().unwrap().values().unwrap(), ints(&[None, Some(2)]));

    let strict = ColumnarEngine::new(EngineConfig {
        strict_arithmetic_mode: true,
        ..EngineConfig::default()
    })
    .unwrap();
    let err = strict.evaluate(&expr, &batch).unwrap_err();
    assert!(matches!(err, EngineError::ArithmeticOverflow(_)), "got {err:?}");
}

#[test]
fn test_whole_stream_reduction() {
    let engine = make_engine();
    let mut pipeline = engine
        .pipeline(source(&sales(), 2))
        .aggregate(Vec::<(&str, Expr)>::new(), [("total", sum(col("qty")))], AggregateMode::Single, None)
        .unwrap()
        .build();
    let total = reduce(pipeline.as_mut()).unwrap();
    assert_eq!(total.value().unwrap(), &ScalarValue::Int64(15));
}

// ---------------------------------------------------------------------------
// Pipelines
// ---------------------------------------------------------------------------

#[test]
fn test_filter_project_commute() {
    let engine = make_engine();
    let predicate = col("qty").gt(lit(1i64));
    let projection = || {
        [
            ("qty", col("qty")),
            ("revenue", col("qty").cast(LogicalType::Float64).mul(col("price"))),
        ]
    };

    let mut filter_first = engine
        .pipeline(source(&sales(), 4))
        .filter(&predicate)
        .unwrap()
        .project(projection())
        .unwrap()
        .build();
    let mut project_first = engine
        .pipeline(source(&sales(), 4))
        .project(projection())
        .unwrap()
        .filter(&predicate)
        .unwrap()
        .build();

    let a = collect_batch(filter_first.as_mut()).unwrap();
    let b = collect_batch(project_first.as_mut()).unwrap();
    assert_eq!(a.num_rows(), 4);
    assert_eq!(a.rows().unwrap(), b.rows().unwrap());
}

#[test]
fn test_sort_then_limit() {
    let engine = make_engine();
    let mut pipeline = engine
        .pipeline(source(&sales(), 2))
        .sort([(col("qty"), SortOptions::desc())])
        .unwrap()
        .limit(1, Some(2))
        .unwrap()
        .build();
    let out = collect_batch(pipeline.as_mut()).unwrap();
    assert_eq!(column_values(&out, 1), ints(&[Some(4), Some(3)]));
}

#[test]
fn test_grouped_aggregate() {
    let engine = make_engine();
    let mut pipeline = engine
        .pipeline(source(&sales(), 4))
        .aggregate(
            [("region", col("region"))],
            [
                ("qty", sum(col("qty"))),
                ("orders", count_star()),
                ("cheapest", min(col("price"))),
            ],
            AggregateMode::Single,
            Some(AggregateStrategy::Sort),
        )
        .unwrap()
        .build();
    let out = collect_batch(pipeline.as_mut()).unwrap();
    assert_eq!(
        out.rows().unwrap(),
        vec![
            vec!["east".into(), ScalarValue::Int64(7), ScalarValue::Int64(3), ScalarValue::Float64(2.0)],
            vec!["west".into(), ScalarValue::Int64(6), ScalarValue::Int64(2), ScalarValue::Float64(1.0)],
            vec![ScalarValue::Null, ScalarValue::Int64(2), ScalarValue::Int64(1), ScalarValue::Float64(3.0)],
        ]
    );
}

#[tokio::test]
async fn test_partitioned_aggregate_matches_single_pass() {
    let engine = make_engine();
    let all = sales();
    let sources: Vec<Box<dyn BatchSource>> = vec![
        source(&all.slice(0, 2).unwrap(), 2) as Box<dyn BatchSource>,
        source(&all.slice(2, 4).unwrap(), 2),
    ];
    let aggregates = vec![("qty", sum(col("qty"))), ("hi", max(col("price"))), ("n", count(col("qty")))];

    let merged = engine
        .aggregate_partitions(sources, vec![("region", col("region"))], aggregates.clone())
        .await
        .unwrap();
    let mut single = engine
        .pipeline(source(&all, 3))
        .aggregate([("region", col("region"))], aggregates, AggregateMode::Single, None)
        .unwrap()
        .build();
    let single = collect_batch(single.as_mut()).unwrap();

    let sorted = |b: &Batch| {
        let mut rows = b.rows().unwrap();
        rows.sort_by_key(|r| format!("{:?}", r[0]));
        rows
    };
    assert_eq!(sorted(&merged), sorted(&single));
}

#[test]
fn test_window_rank() {
    let engine = make_engine();
    let batch = Batch::from_columns([
        ("g", Column::int64(vec![Some(1), Some(1), Some(2), Some(1)])),
        ("v", Column::int64(vec![Some(10), Some(20), Some(5), Some(10)])),
    ])
    .unwrap();
    let mut pipeline = engine
        .pipeline(source(&batch, 2))
        .window([("r", rank().over(vec![col("g")], vec![(col("v"), SortOptions::asc())]))])
        .unwrap()
        .build();
    let out = collect_batch(pipeline.as_mut()).unwrap();
    assert_eq!(out.num_columns(), 3);
    assert_eq!(column_values(&out, 2), ints(&[Some(1), Some(3), Some(1), Some(1)]));
}

#[test]
fn test_aggregate_rejected_in_projection() {
    let engine = make_engine();
    let result = engine.pipeline(source(&sales(), 2)).project([("s", sum(col("qty")))]);
    assert!(matches!(result.err(), Some(EngineError::InvalidArgument(_))));
}

// ---------------------------------------------------------------------------
// Catalog
// ---------------------------------------------------------------------------

#[test]
fn test_catalog_parquet_pipeline() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("sales.parquet");
    let batch = sales();
    gpu_columnar_engine::interop::write_parquet(&path, batch.schema(), &[batch.clone()]).unwrap();

    let engine = make_engine();
    engine.catalog().load_parquet("sales", &path, 4).unwrap();
    assert_eq!(engine.catalog().list_tables(), vec!["sales".to_string()]);

    let mut pipeline = engine
        .table("sales")
        .unwrap()
        .filter(&col("region").eq(lit("east")))
        .unwrap()
        .build();
    let out = collect_batch(pipeline.as_mut()).unwrap();
    assert_eq!(out.num_rows(), 3);
    assert!(engine.table("missing").is_err());
}

// ---------------------------------------------------------------------------
// Cancellation, timeouts and errors
// ---------------------------------------------------------------------------

#[test]
fn test_cancellation_stops_pipeline() {
    let engine = make_engine();
    let token = CancellationToken::new();
    let ctx = TaskContext::new(*engine.options()).with_cancellation(token.clone());
    let mut pipeline = engine
        .pipeline_with(source(&sales(), 2), ctx)
        .filter(&col("qty").is_not_null())
        .unwrap()
        .build();

    assert!(pipeline.next().unwrap().is_some());
    token.cancel();
    assert_eq!(pipeline.next().unwrap_err(), EngineError::Cancelled);
    // The error is latched.
    assert_eq!(pipeline.next().unwrap_err(), EngineError::Cancelled);
}

#[test]
fn test_timeout_at_batch_boundary() {
    let engine = ColumnarEngine::new(EngineConfig {
        timeout_ms: Some(0),
        ..EngineConfig::default()
    })
    .unwrap();
    let mut pipeline = engine.pipeline(source(&sales(), 2)).build();
    let err = collect(pipeline.as_mut()).unwrap_err();
    assert!(matches!(err, EngineError::Timeout(_)));
}

#[test]
fn test_oversized_allocation_reports_oom() {
    let pool = DevicePool::simulated(PoolConfig {
        budget_bytes: 64 << 10,
        arena_bytes: 64 << 10,
        ..PoolConfig::default()
    });
    match pool.allocate(1 << 20) {
        Err(MemoryError::OutOfMemory { requested, budget, .. }) => {
            assert_eq!(requested, 1 << 20);
            assert_eq!(budget, 64 << 10);
        }
        other => panic!("expected OutOfMemory, got {:?}", other.map(|b| b.len())),
    }
    assert_eq!(pool.stats().oom_count, 1);

    let engine = ColumnarEngine::with_pool(EngineConfig::default(), Arc::clone(&pool)).unwrap();
    let big = Arc::new(Column::int64((0..100_000).map(Some).collect()));
    let err = big.to_device(engine.pool()).unwrap_err();
    assert!(matches!(err, EngineError::OutOfMemory { .. }));
    assert!(err.is_retryable());
}

#[test]
fn test_device_fault_reroutes_future_plans() {
    let engine = make_engine();
    let batch = Batch::from_columns([
        ("a", Column::int64(vec![Some(1), Some(2)])),
        ("b", Column::int64(vec![Some(3), Some(4)])),
    ])
    .unwrap();
    let expr = col("a").add(col("b"));
    assert_eq!(engine.plan(&expr, batch.schema()).unwrap().placement, Placement::Gpu);

    engine.launcher().fail_next_launches(1);
    let err = engine.evaluate(&expr, &batch).unwrap_err();
    assert!(matches!(err, EngineError::DeviceFault(_)));
    assert!(!engine.dispatcher().is_healthy());

    let replanned = engine.plan(&expr, batch.schema()).unwrap();
    assert_eq!(replanned.placement, Placement::HostFallback);
    let out = engine.evaluate(&expr, &batch).unwrap();
    assert_eq!(out.as_column().unwrap().values().unwrap(), ints(&[Some(4), Some(6)]));
}

// ---------------------------------------------------------------------------
// Arrow interop
// ---------------------------------------------------------------------------

#[test]
fn test_arrow_record_batch_round_trip() {
    use arrow_array::{ArrayRef, Int32Array, RecordBatch, StringArray};
    use arrow_schema::{DataType, Field as ArrowField, Schema as ArrowSchema};
    use gpu_columnar_engine::interop::{batch_to_record_batch, record_batch_to_batch};

    let schema = Arc::new(ArrowSchema::new(vec![
        ArrowField::new("id", DataType::Int32, false),
        ArrowField::new("tag", DataType::Utf8, true),
    ]));
    let columns: Vec<ArrayRef> = vec![
        Arc::new(Int32Array::from(vec![1, 2, 3])),
        Arc::new(StringArray::from(vec![Some("x"), None, Some("z")])),
    ];
    let record_batch = RecordBatch::try_new(schema, columns).unwrap();

    let engine = make_engine();
    let batch = record_batch_to_batch(&record_batch).unwrap();
    let doubled = engine
        .evaluate(&col("id").mul(lit(2i32)), &batch)
        .unwrap()
        .into_column(batch.num_rows())
        .unwrap();
    assert_eq!(
        doubled.values().unwrap(),
        vec![ScalarValue::Int32(2), ScalarValue::Int32(4), ScalarValue::Int32(6)]
    );

    let back = batch_to_record_batch(&batch).unwrap();
    assert_eq!(back.num_rows(), 3);
    assert_eq!(back.column(1).null_count(), 1);
}
