//! Property tests over randomly generated columns and values.

use gpu_columnar_engine::model::{decimal, resolve_cast, CastOptions, MemorySource};
use gpu_columnar_engine::prelude::*;
use gpu_columnar_engine::{collect, collect_batch};
use proptest::prelude::*;
use std::sync::Arc;

fn engine() -> ColumnarEngine {
    ColumnarEngine::new(EngineConfig {
        device_memory_budget_bytes: 16 << 20,
        arena_bytes: 1 << 20,
        ..EngineConfig::default()
    })
    .unwrap()
}

fn nullable_ints(len: usize) -> impl Strategy<Value = Vec<Option<i64>>> {
    prop::collection::vec(prop::option::of(-1000i64..1000), len)
}

fn paired_columns() -> impl Strategy<Value = (Vec<Option<i64>>, Vec<Option<i64>>)> {
    (1usize..40).prop_flat_map(|len| (nullable_ints(len), nullable_ints(len)))
}

fn sorted_rows(batch: &Batch) -> Vec<Vec<ScalarValue>> {
    let mut rows = batch.rows().unwrap();
    rows.sort_by_key(|r| r[0].as_i64());
    rows
}

proptest! {
    #[test]
    fn arithmetic_and_comparison_propagate_nulls((a, b) in paired_columns()) {
        let engine = engine();
        let batch = Batch::from_columns([
            ("a", Column::int64(a.clone())),
            ("b", Column::int64(b.clone())),
        ])
        .unwrap();
        let exprs = [
            col("a").add(col("b")),
            col("a").sub(col("b")),
            col("a").mul(col("b")),
            col("a").lt(col("b")),
            col("a").eq(col("b")),
        ];
        for expr in &exprs {
            let out = engine.evaluate(expr, &batch).unwrap().into_column(batch.num_rows()).unwrap();
            for i in 0..batch.num_rows() {
                prop_assert_eq!(out.is_null(i), a[i].is_none() || b[i].is_none(), "{} row {}", expr, i);
            }
        }
    }

    #[test]
    fn decimal_result_scales(p1 in 1u8..=18, p2 in 1u8..=18, s1 in 0u8..=6, s2 in 0u8..=6) {
        let (s1, s2) = (s1.min(p1), s2.min(p2));
        let (_, mul_scale) = decimal::mul_result_type(p1, s1, p2, s2).unwrap();
        prop_assert_eq!(mul_scale, s1 + s2);
        let (_, add_scale) = decimal::add_result_type(p1, s1, p2.max(s1), s1);
        prop_assert_eq!(add_scale, s1);
    }

    #[test]
    fn rescale_is_idempotent_and_rounds_half_up(v in -1_000_000_000i128..1_000_000_000, from in 0u8..10, to in 0u8..10) {
        let once = decimal::rescale(v, from, to).unwrap();
        prop_assert_eq!(decimal::rescale(once, to, to), Some(once));
        if to < from {
            // Within half a unit of the target scale.
            let back = once * decimal::pow10(from - to);
            prop_assert!((back - v).abs() * 2 <= decimal::pow10(from - to));
        } else {
            prop_assert_eq!(decimal::rescale(once, to, from), Some(v));
        }
    }

    #[test]
    fn lossless_casts_round_trip(v in any::<i32>(), days in -100_000i32..100_000) {
        let cases = [
            (LogicalType::Int32, LogicalType::Int64, ScalarValue::Int32(v)),
            (LogicalType::Int32, LogicalType::Float64, ScalarValue::Int32(v)),
            (LogicalType::Int32, LogicalType::Utf8, ScalarValue::Int32(v)),
            (LogicalType::Int64, LogicalType::Utf8, ScalarValue::Int64(i64::from(v) * 7)),
        ];
        for (from, to, value) in cases {
            let forward = resolve_cast(&from, &to, CastOptions::default()).unwrap();
            prop_assert!(forward.lossless, "{} -> {}", from, to);
            let back = resolve_cast(&to, &from, CastOptions::default()).unwrap();
            let cast = forward.apply_value(&value).unwrap();
            prop_assert_eq!(back.apply_value(&cast).unwrap(), value);
        }

        // Not lossless over the whole Date32 domain, but exact within range.
        let to_ts = resolve_cast(&LogicalType::Date32, &LogicalType::Timestamp, CastOptions::default()).unwrap();
        let to_date = resolve_cast(&LogicalType::Timestamp, &LogicalType::Date32, CastOptions::default()).unwrap();
        let ts = to_ts.apply_value(&ScalarValue::Date32(days)).unwrap();
        prop_assert_eq!(to_date.apply_value(&ts).unwrap(), ScalarValue::Date32(days));
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn split_aggregation_matches_single_pass(
        rows in prop::collection::vec((0i64..5, prop::option::of(-100i64..100)), 0..60),
        split in 0usize..60,
    ) {
        let engine = engine();
        let split = split.min(rows.len());
        let batch = Batch::from_columns([
            ("g", Column::int64(rows.iter().map(|(g, _)| Some(*g)).collect())),
            ("v", Column::int64(rows.iter().map(|(_, v)| *v).collect())),
        ])
        .unwrap();
        let aggregates = || {
            vec![
                ("s", sum(col("v"))),
                ("c", count(col("v"))),
                ("lo", min(col("v"))),
                ("hi", max(col("v"))),
            ]
        };

        let mut partials = Vec::new();
        let mut layout = None;
        for (offset, len) in [(0, split), (split, rows.len() - split)] {
            let part = batch.slice(offset, len).unwrap();
            let source = MemorySource::new(Arc::clone(part.schema()), vec![part]).unwrap();
            let builder = engine
                .pipeline(Box::new(source))
                .aggregate([("g", col("g"))], aggregates(), AggregateMode::Partial, None)
                .unwrap();
            layout = builder.partial_layout().cloned();
            partials.extend(collect(builder.build().as_mut()).unwrap());
        }
        let layout = layout.unwrap();
        let merge_source =
            MemorySource::new(Arc::new(layout.partial_schema().unwrap()), partials).unwrap();
        let mut merged = engine
            .pipeline(Box::new(merge_source))
            .merge_aggregate(layout)
            .unwrap()
            .build();

        let single_source = MemorySource::new(Arc::clone(batch.schema()), vec![batch.clone()]).unwrap();
        let mut single = engine
            .pipeline(Box::new(single_source))
            .aggregate([("g", col("g"))], aggregates(), AggregateMode::Single, None)
            .unwrap()
            .build();

        let merged = collect_batch(merged.as_mut()).unwrap();
        let single = collect_batch(single.as_mut()).unwrap();
        prop_assert_eq!(sorted_rows(&merged), sorted_rows(&single));
    }
}
