//! GPU columnar expression engine core.
//!
//! An embedding query engine hands the core an expression tree plus a stream
//! of batches and gets back batches, or a single scalar for whole-stream
//! reductions. Expressions are planned once ([`physical_plan::Planner`]):
//! types, nullability, error behaviour and device placement are fixed before
//! the first batch. Pipelines of pull-based operators then evaluate them
//! batch by batch, offloading to the device where the kernel table allows
//! and falling back to the host where it does not.

pub mod catalog;
pub mod config;
pub mod context;
pub mod dispatcher;
pub mod evaluator;
pub mod executor;
pub mod expr;
pub mod operators;
pub mod physical_plan;
pub mod pipeline;

pub use catalog::Catalog;
pub use config::{EngineConfig, ExecutionOptions, HostFallbackPolicy};
pub use context::{CancellationToken, TaskContext};
pub use dispatcher::{OffloadDispatcher, Placement};
pub use evaluator::Evaluator;
pub use executor::{collect, collect_batch, execute_partitions, reduce};
pub use expr::Expr;
pub use operators::{
    AggregateLayout, AggregateMode, AggregateStrategy, BoxedOperator, Operator, OperatorState,
};
pub use physical_plan::{AggregateSpec, PhysicalExpr, Planner};
pub use pipeline::PipelineBuilder;

use columnar_model::{Batch, BatchSource, Datum, MemorySource, Result, Schema};
use gpu_kernels::{DeviceLauncher, KernelRegistry};
use gpu_memory_manager::DevicePool;
use std::sync::Arc;
use tracing::info;

/// Main engine: owns the device pool, kernel table, dispatcher and catalog,
/// and the options resolved from its configuration.
pub struct ColumnarEngine {
    config: EngineConfig,
    options: ExecutionOptions,
    pool: Arc<DevicePool>,
    dispatcher: Arc<OffloadDispatcher>,
    launcher: Arc<DeviceLauncher>,
    catalog: Arc<Catalog>,
}

impl ColumnarEngine {
    /// Engine on the simulated device.
    pub fn new(config: EngineConfig) -> Result<Self> {
        config.validate()?;
        let pool = DevicePool::simulated(config.pool_config());
        Self::with_pool(config, pool)
    }

    /// Engine on an existing pool, e.g. one backed by a real device.
    pub fn with_pool(config: EngineConfig, pool: Arc<DevicePool>) -> Result<Self> {
        let options = config.resolve()?;
        let registry = Arc::new(KernelRegistry::with_builtins());
        let dispatcher = Arc::new(OffloadDispatcher::from_config(registry, &config));
        let launcher = Arc::new(DeviceLauncher::new(Arc::clone(&pool)));
        info!(
            "Engine ready: budget={} bytes, strict={}, fallback={}",
            pool.budget(),
            config.strict_arithmetic_mode,
            config.host_fallback_policy
        );
        Ok(Self {
            config,
            options,
            pool,
            dispatcher,
            launcher,
            catalog: Arc::new(Catalog::new()),
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn options(&self) -> &ExecutionOptions {
        &self.options
    }

    pub fn pool(&self) -> &Arc<DevicePool> {
        &self.pool
    }

    pub fn registry(&self) -> &Arc<KernelRegistry> {
        self.dispatcher.registry()
    }

    pub fn dispatcher(&self) -> &Arc<OffloadDispatcher> {
        &self.dispatcher
    }

    pub fn launcher(&self) -> &Arc<DeviceLauncher> {
        &self.launcher
    }

    pub fn catalog(&self) -> &Arc<Catalog> {
        &self.catalog
    }

    pub fn evaluator(&self) -> Evaluator {
        Evaluator::new(
            Arc::clone(&self.launcher),
            Arc::clone(&self.dispatcher),
            self.options.numeric,
        )
    }

    /// Fresh task state; the timeout starts now.
    pub fn task_context(&self) -> TaskContext {
        TaskContext::new(self.options)
    }

    pub fn plan(&self, expr: &Expr, schema: &Schema) -> Result<PhysicalExpr> {
        Planner::new(&self.dispatcher, self.options.numeric).plan(expr, schema)
    }

    /// Plan and evaluate one expression over one batch.
    pub fn evaluate(&self, expr: &Expr, batch: &Batch) -> Result<Datum> {
        let planned = self.plan(expr, batch.schema())?;
        self.evaluator().evaluate(&planned, batch)
    }

    pub fn pipeline(&self, source: Box<dyn BatchSource>) -> PipelineBuilder {
        self.pipeline_with(source, self.task_context())
    }

    pub fn pipeline_with(&self, source: Box<dyn BatchSource>, ctx: TaskContext) -> PipelineBuilder {
        PipelineBuilder::new(source, self.evaluator(), ctx)
    }

    /// Pipeline scanning a catalog table.
    pub fn table(&self, name: &str) -> anyhow::Result<PipelineBuilder> {
        Ok(self.pipeline(self.catalog.scan(name)?))
    }

    /// Aggregate each source in its own partition, then merge the partial
    /// states into one result.
    pub async fn aggregate_partitions<N, M>(
        &self,
        sources: Vec<Box<dyn BatchSource>>,
        group_by: Vec<(N, Expr)>,
        aggregates: Vec<(M, Expr)>,
    ) -> Result<Batch>
    where
        N: Into<String> + Clone,
        M: Into<String> + Clone,
    {
        let mut layout = None;
        let mut pipelines = Vec::with_capacity(sources.len());
        for source in sources {
            let builder = self.pipeline(source).aggregate(
                group_by.clone(),
                aggregates.clone(),
                AggregateMode::Partial,
                None,
            )?;
            layout = builder.partial_layout().cloned();
            pipelines.push(builder.build());
        }
        let Some(layout) = layout else {
            return Err(columnar_model::EngineError::InvalidArgument(
                "no partitions to aggregate".into(),
            ));
        };

        let partials: Vec<Batch> = execute_partitions(pipelines)
            .await?
            .into_iter()
            .flatten()
            .collect();
        let schema = Arc::new(layout.partial_schema()?);
        let source = MemorySource::new(schema, partials)?;
        let mut merged = self
            .pipeline(Box::new(source))
            .merge_aggregate(layout)?
            .build();
        collect_batch(merged.as_mut())
    }
}

impl std::fmt::Debug for ColumnarEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ColumnarEngine")
            .field("config", &self.config)
            .field("dispatcher", &self.dispatcher)
            .field("tables", &self.catalog.list_tables())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::*;
    use columnar_model::{Column, ScalarValue};

    #[test]
    fn engine_evaluates_expressions() {
        let engine = ColumnarEngine::new(EngineConfig::default()).unwrap();
        let batch = Batch::from_columns([
            ("a", Column::int64(vec![Some(1), None, Some(4)])),
            ("b", Column::int64(vec![Some(2), Some(3), None])),
        ])
        .unwrap();
        let out = engine.evaluate(&col("a").add(col("b")), &batch).unwrap();
        assert_eq!(
            out.as_column().unwrap().values().unwrap(),
            vec![ScalarValue::Int64(3), ScalarValue::Null, ScalarValue::Null]
        );
    }

    #[test]
    fn invalid_config_is_rejected() {
        let config = EngineConfig {
            batch_size_rows: 0,
            ..EngineConfig::default()
        };
        assert!(ColumnarEngine::new(config).is_err());
    }
}
