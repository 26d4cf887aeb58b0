use anyhow::Result;
use gpu_columnar_engine::model::{BatchSource, MemorySource};
use gpu_columnar_engine::prelude::*;
use gpu_columnar_engine::{collect_batch, reduce, HostFallbackPolicy};
use tracing::{info, Level};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_max_level(Level::INFO)
        .init();

    info!("GPU Columnar Engine - Rust Examples");

    // Example 1: Expression evaluation
    expression_example()?;

    // Example 2: Filter, project, sort and limit
    pipeline_example()?;

    // Example 3: Partitioned aggregation
    aggregation_example().await?;

    // Example 4: Configuration from string options
    config_example()?;

    Ok(())
}

fn orders() -> Result<Batch> {
    Ok(Batch::from_columns([
        ("region", Column::utf8(vec![Some("north"), Some("south"), Some("north"), Some("east"), None, Some("south")])),
        ("units", Column::int64(vec![Some(12), Some(3), None, Some(7), Some(1), Some(20)])),
        ("unit_price", Column::decimal(10, 2, vec![Some(1999), Some(4550), Some(1000), Some(250), Some(899), Some(1250)])?),
    ])?)
}

fn expression_example() -> Result<()> {
    info!("=== Example 1: Expressions ===");

    let engine = ColumnarEngine::new(EngineConfig::default())?;
    let batch = orders()?;

    // Decimal arithmetic keeps exact scale: units are cast to decimal(20, 0).
    let total = col("units")
        .cast(LogicalType::decimal(20, 0)?)
        .mul(col("unit_price"));
    let planned = engine.plan(&total, batch.schema())?;
    info!("units * unit_price: {} on {}", planned.data_type, planned.placement);

    let values = engine.evaluate(&total, &batch)?;
    if let Some(column) = values.as_column() {
        for (i, v) in column.values()?.iter().enumerate() {
            info!("  row {}: {:?}", i, v);
        }
    }

    Ok(())
}

fn pipeline_example() -> Result<()> {
    info!("=== Example 2: Pipeline ===");

    let engine = ColumnarEngine::new(EngineConfig {
        batch_size_rows: 2,
        ..EngineConfig::default()
    })?;
    let batch = orders()?;
    engine
        .catalog()
        .register("orders", std::sync::Arc::clone(batch.schema()), vec![batch])?;

    let mut pipeline = engine
        .table("orders")?
        .filter(&col("units").gt(lit(2i64)))?
        .project([
            ("region", col("region")),
            ("units", col("units")),
        ])?
        .sort([(col("units"), SortOptions::desc())])?
        .limit(0, Some(3))?
        .build();

    let result = collect_batch(pipeline.as_mut())?;
    info!("Top orders: {} rows", result.num_rows());
    for row in result.rows()? {
        info!("  {:?}", row);
    }

    Ok(())
}

async fn aggregation_example() -> Result<()> {
    info!("=== Example 3: Partitioned Aggregation ===");

    let engine = ColumnarEngine::new(EngineConfig::default())?;
    let batch = orders()?;
    let partitions: Vec<Box<dyn BatchSource>> = vec![
        Box::new(MemorySource::chunked(&batch.slice(0, 3)?, 2)?),
        Box::new(MemorySource::chunked(&batch.slice(3, 3)?, 2)?),
    ];

    let per_region = engine
        .aggregate_partitions(
            partitions,
            vec![("region", col("region"))],
            vec![
                ("units", sum(col("units"))),
                ("avg_price", avg(col("unit_price"))),
                ("orders", count_star()),
            ],
        )
        .await?;
    for row in per_region.rows()? {
        info!("  {:?}", row);
    }

    // Whole-stream reduction to a single value.
    let mut total = engine
        .pipeline(Box::new(MemorySource::chunked(&batch, 4)?))
        .aggregate(Vec::<(&str, Expr)>::new(), [("units", sum(col("units")))], AggregateMode::Single, None)?
        .build();
    info!("Total units: {:?}", reduce(total.as_mut())?.value()?);

    Ok(())
}

fn config_example() -> Result<()> {
    info!("=== Example 4: Configuration ===");

    let config = EngineConfig::from_options([
        ("strict-arithmetic-mode", "true"),
        ("decimal-overflow-policy", "fail"),
        ("device-memory-budget-bytes", "268435456"), // 256MB
        ("host-fallback-policy", "cast,is-null,is-not-null"),
        ("spill-enabled", "true"),
    ])?;
    info!("Strict: {}", config.strict_arithmetic_mode);
    info!("Fallback: {}", config.host_fallback_policy);

    let engine = ColumnarEngine::new(config)?;
    let batch = Batch::from_columns([("x", Column::int64(vec![Some(i64::MAX)]))])?;
    match engine.evaluate(&col("x").add(lit(1i64)), &batch) {
        Ok(_) => info!("Unexpected success"),
        Err(e) => info!("Strict mode rejected overflow: {}", e),
    }

    let permissive = ColumnarEngine::new(EngineConfig {
        host_fallback_policy: HostFallbackPolicy::All,
        ..EngineConfig::default()
    })?;
    let out = permissive.evaluate(&col("x").add(lit(1i64)), &batch)?;
    info!("Permissive mode: {:?}", out.as_column().map(|c| c.values()));

    Ok(())
}
