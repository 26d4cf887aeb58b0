//! Pipeline construction.
//!
//! [`PipelineBuilder`] plans every expression against the schema of the
//! operator it is attached to, so types and placements are fixed before the
//! first batch is pulled.

use columnar_model::{BatchSource, EngineError, Result, SchemaRef};
use gpu_kernels::SortOptions;

use crate::context::TaskContext;
use crate::evaluator::Evaluator;
use crate::expr::Expr;
use crate::operators::{
    AggregateExec, AggregateLayout, AggregateMode, AggregateStrategy, BoxedOperator, FilterExec,
    LimitExec, OperatorNode, ProjectExec, ScanExec, SortExec, Stage, WindowExec,
};
use crate::physical_plan::{PhysicalExpr, Planner};

pub struct PipelineBuilder {
    evaluator: Evaluator,
    ctx: TaskContext,
    root: BoxedOperator,
    layout: Option<AggregateLayout>,
}

impl PipelineBuilder {
    pub fn new(source: Box<dyn BatchSource>, evaluator: Evaluator, ctx: TaskContext) -> Self {
        let root = OperatorNode::boxed(ScanExec::new(source), ctx.clone());
        Self {
            evaluator,
            ctx,
            root,
            layout: None,
        }
    }

    pub fn schema(&self) -> &SchemaRef {
        self.root.schema()
    }

    pub fn context(&self) -> &TaskContext {
        &self.ctx
    }

    /// Layout of the most recent partial aggregate, for merging its output.
    pub fn partial_layout(&self) -> Option<&AggregateLayout> {
        self.layout.as_ref()
    }

    fn planner(&self) -> Planner<'_> {
        Planner::new(self.evaluator.dispatcher(), self.evaluator.numeric())
    }

    fn plan_row_wise(&self, expr: &Expr) -> Result<PhysicalExpr> {
        if expr.contains_aggregate() || expr.contains_window() {
            return Err(EngineError::InvalidArgument(format!(
                "{} needs an aggregate or window operator",
                expr
            )));
        }
        self.planner().plan(expr, self.schema())
    }

    fn plan_named<N, I>(&self, exprs: I) -> Result<Vec<(String, PhysicalExpr)>>
    where
        N: Into<String>,
        I: IntoIterator<Item = (N, Expr)>,
    {
        exprs
            .into_iter()
            .map(|(name, e)| Ok((name.into(), self.plan_row_wise(&e)?)))
            .collect()
    }

    fn then<S, F>(self, build: F) -> Result<Self>
    where
        S: Stage + 'static,
        F: FnOnce(BoxedOperator, Evaluator) -> Result<S>,
    {
        let Self {
            evaluator,
            ctx,
            root,
            layout,
        } = self;
        let stage = build(root, evaluator.clone())?;
        Ok(Self {
            root: OperatorNode::boxed(stage, ctx.clone()),
            evaluator,
            ctx,
            layout,
        })
    }

    pub fn filter(self, predicate: &Expr) -> Result<Self> {
        let predicate = self.plan_row_wise(predicate)?;
        self.then(|input, evaluator| FilterExec::new(input, predicate, evaluator))
    }

    pub fn project<N, I>(self, exprs: I) -> Result<Self>
    where
        N: Into<String>,
        I: IntoIterator<Item = (N, Expr)>,
    {
        let exprs = self.plan_named(exprs)?;
        self.then(|input, evaluator| Ok(ProjectExec::new(input, exprs, evaluator)))
    }

    /// Group by `group_by` and compute `aggregates`, each a top-level
    /// aggregate call such as `sum(col("x"))`.
    pub fn aggregate<N, G, M, A>(
        self,
        group_by: G,
        aggregates: A,
        mode: AggregateMode,
        strategy: Option<AggregateStrategy>,
    ) -> Result<Self>
    where
        N: Into<String>,
        M: Into<String>,
        G: IntoIterator<Item = (N, Expr)>,
        A: IntoIterator<Item = (M, Expr)>,
    {
        let group_by = self.plan_named(group_by)?;
        let specs = {
            let planner = self.planner();
            aggregates
                .into_iter()
                .map(|(name, e)| {
                    let name: String = name.into();
                    planner.plan_aggregate(&name, &e, self.schema())
                })
                .collect::<Result<Vec<_>>>()?
        };
        let mut layout = None;
        let mut builder = self.then(|input, evaluator| {
            let mut exec = AggregateExec::new(input, group_by, specs, mode, evaluator)?;
            if let Some(strategy) = strategy {
                exec = exec.with_strategy(strategy);
            }
            layout = Some(exec.layout().clone());
            Ok(exec)
        })?;
        builder.layout = if mode == AggregateMode::Partial { layout } else { None };
        Ok(builder)
    }

    /// Merge partial aggregate batches produced with `layout`.
    pub fn merge_aggregate(self, layout: AggregateLayout) -> Result<Self> {
        let mut builder =
            self.then(|input, evaluator| AggregateExec::merge(input, layout, evaluator))?;
        builder.layout = None;
        Ok(builder)
    }

    pub fn sort<I>(self, keys: I) -> Result<Self>
    where
        I: IntoIterator<Item = (Expr, SortOptions)>,
    {
        let keys = keys
            .into_iter()
            .map(|(e, o)| Ok((self.plan_row_wise(&e)?, o)))
            .collect::<Result<Vec<_>>>()?;
        self.then(|input, evaluator| Ok(SortExec::new(input, keys, evaluator)))
    }

    pub fn limit(self, skip: usize, fetch: Option<usize>) -> Result<Self> {
        self.then(|input, _| Ok(LimitExec::new(input, skip, fetch)))
    }

    /// Append window function columns, e.g. `rank().over(...)`.
    pub fn window<N, I>(self, exprs: I) -> Result<Self>
    where
        N: Into<String>,
        I: IntoIterator<Item = (N, Expr)>,
    {
        let exprs = {
            let planner = self.planner();
            exprs
                .into_iter()
                .map(|(name, e)| Ok((name.into(), planner.plan(&e, self.schema())?)))
                .collect::<Result<Vec<(String, PhysicalExpr)>>>()?
        };
        self.then(|input, evaluator| WindowExec::new(input, exprs, evaluator))
    }

    pub fn build(self) -> BoxedOperator {
        self.root
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HostFallbackPolicy;
    use crate::dispatcher::OffloadDispatcher;
    use crate::executor::collect_batch;
    use crate::expr::*;
    use columnar_model::{Batch, Column, MemorySource, NumericOptions, ScalarValue};
    use gpu_kernels::{DeviceLauncher, KernelRegistry};
    use gpu_memory_manager::{DevicePool, PoolConfig};
    use std::sync::Arc;

    fn builder(batch: &Batch) -> PipelineBuilder {
        builder_with(batch, NumericOptions::permissive())
    }

    fn builder_with(batch: &Batch, numeric: NumericOptions) -> PipelineBuilder {
        let pool = DevicePool::simulated(PoolConfig {
            budget_bytes: 4 << 20,
            arena_bytes: 256 << 10,
            ..PoolConfig::default()
        });
        let dispatcher = OffloadDispatcher::new(
            Arc::new(KernelRegistry::with_builtins()),
            HostFallbackPolicy::All,
            Default::default(),
        );
        let evaluator = Evaluator::new(
            Arc::new(DeviceLauncher::new(pool)),
            Arc::new(dispatcher),
            numeric,
        );
        let source = MemorySource::chunked(batch, 2).unwrap();
        PipelineBuilder::new(Box::new(source), evaluator, TaskContext::default())
    }

    fn column(builder: PipelineBuilder, name: &str) -> Vec<ScalarValue> {
        let out = collect_batch(builder.build().as_mut()).unwrap();
        out.column_by_name(name).unwrap().values().unwrap()
    }

    fn tags(values: &[&str]) -> Vec<ScalarValue> {
        values.iter().map(|s| ScalarValue::Utf8(s.to_string())).collect()
    }

    fn ints(values: &[Option<i64>]) -> Vec<ScalarValue> {
        values
            .iter()
            .map(|v| v.map_or(ScalarValue::Null, ScalarValue::Int64))
            .collect()
    }

    fn keyed() -> Batch {
        Batch::from_columns([
            ("k", Column::int64(vec![Some(2), None, Some(1), Some(2)])),
            ("tag", Column::utf8(vec![Some("a"), Some("b"), Some("c"), Some("d")])),
        ])
        .unwrap()
    }

    #[test]
    fn sort_is_stable_with_nulls_last() {
        let asc = builder(&keyed()).sort([(col("k"), SortOptions::asc())]).unwrap();
        assert_eq!(column(asc, "tag"), tags(&["c", "a", "d", "b"]));
        let desc = builder(&keyed()).sort([(col("k"), SortOptions::desc())]).unwrap();
        assert_eq!(column(desc, "tag"), tags(&["a", "d", "c", "b"]));
    }

    #[test]
    fn limit_skips_across_batches() {
        let batch = Batch::from_columns([("x", Column::int64((0..6).map(Some).collect()))]).unwrap();
        let limited = builder(&batch).limit(3, Some(2)).unwrap();
        assert_eq!(column(limited, "x"), ints(&[Some(3), Some(4)]));
        let tail = builder(&batch).limit(5, None).unwrap();
        assert_eq!(column(tail, "x"), ints(&[Some(5)]));
        let none = builder(&batch).limit(0, Some(0)).unwrap();
        assert!(column(none, "x").is_empty());
    }

    #[test]
    fn filter_requires_boolean_predicate() {
        let err = builder(&keyed()).filter(&col("k")).err().unwrap();
        assert!(matches!(err, EngineError::TypeMismatch(_)));
        let kept = builder(&keyed()).filter(&col("k").gt(lit(1i64))).unwrap();
        assert_eq!(column(kept, "tag"), tags(&["a", "d"]));
    }

    #[test]
    fn window_columns_keep_input_order() {
        let batch = Batch::from_columns([
            ("g", Column::int64(vec![Some(1), Some(2), Some(1), Some(1), Some(2)])),
            ("v", Column::int64(vec![Some(10), Some(5), Some(10), Some(30), Some(7)])),
        ])
        .unwrap();
        let window = || {
            (
                vec![col("g")],
                vec![(col("v"), SortOptions::asc())],
            )
        };
        let (p1, o1) = window();
        let (p2, o2) = window();
        let windowed = builder(&batch)
            .window([
                ("running", sum(col("v")).over(p1, o1)),
                ("previous", lag(col("v"), 1, None).over(p2, o2)),
            ])
            .unwrap();
        let out = collect_batch(windowed.build().as_mut()).unwrap();
        assert_eq!(out.num_columns(), 4);
        assert_eq!(
            out.column_by_name("running").unwrap().values().unwrap(),
            ints(&[Some(20), Some(5), Some(20), Some(50), Some(12)])
        );
        assert_eq!(
            out.column_by_name("previous").unwrap().values().unwrap(),
            ints(&[None, None, Some(10), Some(10), Some(5)])
        );
    }

    #[test]
    fn window_rejects_plain_expressions() {
        let err = builder(&keyed()).window([("k2", col("k"))]).err().unwrap();
        assert!(matches!(err, EngineError::InvalidArgument(_)));
    }

    #[test]
    fn raising_column_is_evaluated_even_when_dropped() {
        let batch = Batch::from_columns([
            ("a", Column::int64(vec![Some(1), Some(2), Some(3)])),
            ("b", Column::int64(vec![Some(4), Some(5), Some(6)])),
        ])
        .unwrap();
        let plan = |numeric| {
            builder_with(&batch, numeric)
                .project([("x", col("a").div(lit(0i64))), ("b", col("b"))])
                .unwrap()
                .filter(&col("b").gt(lit(100i64)))
                .unwrap()
                .project([("b", col("b"))])
                .unwrap()
        };
        let err = collect_batch(plan(NumericOptions::strict()).build().as_mut()).unwrap_err();
        assert_eq!(err, EngineError::DivideByZero);
        let out = collect_batch(plan(NumericOptions::permissive()).build().as_mut()).unwrap();
        assert_eq!(out.num_rows(), 0);
    }
}
