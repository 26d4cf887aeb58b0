//! Physical expression evaluation over batches.
//!
//! Each node runs where the planner placed it. Device nodes go through the
//! [`DeviceLauncher`], which stages host inputs and leaves fixed-width results
//! device-resident; host nodes download their inputs first. Moving data
//! across the boundary is therefore only ever done at a placement change, and
//! every such move is counted by the pool.
//!
//! Scalars are never expanded to full columns on the way into a kernel: they
//! travel as one-row columns and the kernels broadcast them.

use columnar_model::{
    Batch, CastPlan, Column, ColumnRef, Datum, EngineError, LogicalType, NumericOptions, Result,
    Scalar,
};
use gpu_kernels::{
    aggregate, evaluate_window, AggFunc, DeviceLauncher, KernelArgs, KernelRegistry, OpKind,
    SortOptions, WindowArgs,
};
use gpu_memory_manager::DevicePool;
use std::fmt;
use std::sync::Arc;
use tracing::trace;

use crate::dispatcher::{OffloadDispatcher, Placement};
use crate::physical_plan::{FusedProgram, PhysicalExpr, PhysicalNode, PhysicalWindow};

#[derive(Clone)]
pub struct Evaluator {
    registry: Arc<KernelRegistry>,
    launcher: Arc<DeviceLauncher>,
    dispatcher: Arc<OffloadDispatcher>,
    numeric: NumericOptions,
}

impl Evaluator {
    pub fn new(
        launcher: Arc<DeviceLauncher>,
        dispatcher: Arc<OffloadDispatcher>,
        numeric: NumericOptions,
    ) -> Self {
        Self {
            registry: Arc::clone(dispatcher.registry()),
            launcher,
            dispatcher,
            numeric,
        }
    }

    pub fn pool(&self) -> &Arc<DevicePool> {
        self.launcher.pool()
    }

    pub fn launcher(&self) -> &Arc<DeviceLauncher> {
        &self.launcher
    }

    pub fn dispatcher(&self) -> &Arc<OffloadDispatcher> {
        &self.dispatcher
    }

    pub fn numeric(&self) -> NumericOptions {
        self.numeric
    }

    /// Evaluate `expr` against `batch`.
    ///
    /// A device fault marks the dispatcher unhealthy before the error is
    /// returned, so plans built afterwards stay on the host.
    pub fn evaluate(&self, expr: &PhysicalExpr, batch: &Batch) -> Result<Datum> {
        let result = self.eval(expr, batch);
        if let Err(e @ EngineError::DeviceFault(_)) = &result {
            self.dispatcher.record_fault(e);
        }
        result
    }

    /// Evaluate to a column of `batch.num_rows()` rows.
    pub fn evaluate_column(&self, expr: &PhysicalExpr, batch: &Batch) -> Result<ColumnRef> {
        self.evaluate(expr, batch)?.into_column(batch.num_rows())
    }

    /// Evaluate a boolean predicate.
    pub fn evaluate_predicate(&self, expr: &PhysicalExpr, batch: &Batch) -> Result<ColumnRef> {
        if expr.data_type != LogicalType::Boolean {
            return Err(EngineError::TypeMismatch(format!(
                "predicate {} has type {}, expected boolean",
                expr, expr.data_type
            )));
        }
        self.evaluate_column(expr, batch)
    }

    /// Move `column` to where a consumer with `placement` reads it.
    pub fn place(&self, column: &ColumnRef, placement: Placement) -> Result<ColumnRef> {
        match placement {
            Placement::Gpu => self.launcher.stage(column),
            Placement::HostFallback => column.to_host(),
        }
    }

    fn eval(&self, expr: &PhysicalExpr, batch: &Batch) -> Result<Datum> {
        if let Some(fused) = &expr.fused {
            return self.run_fused(fused, batch);
        }
        match &expr.node {
            PhysicalNode::Literal(scalar) => Ok(Datum::Scalar(Arc::clone(scalar))),
            PhysicalNode::Column(i) => Ok(Datum::Column(Arc::clone(batch.column(*i)?))),
            PhysicalNode::Unary { op, input } => {
                let arg = self.eval(input, batch)?;
                self.elementwise(expr, *op, vec![arg], None)
            }
            PhysicalNode::Binary { op, left, right } => {
                let l = self.eval(left, batch)?;
                let r = self.eval(right, batch)?;
                self.elementwise(expr, *op, vec![l, r], None)
            }
            PhysicalNode::Cast { input, plan } => {
                let arg = self.eval(input, batch)?;
                self.elementwise(expr, OpKind::Cast, vec![arg], Some(plan))
            }
            PhysicalNode::Aggregate { func, input } => {
                self.reduce(expr, *func, input.as_deref(), batch)
            }
            PhysicalNode::Window(window) => self.window(expr, window, batch),
        }
    }

    fn column(&self, expr: &PhysicalExpr, batch: &Batch) -> Result<ColumnRef> {
        self.eval(expr, batch)?.into_column(batch.num_rows())
    }

    fn operand(&self, arg: &Datum, placement: Placement) -> Result<ColumnRef> {
        match (arg, placement) {
            (Datum::Column(c), Placement::Gpu) => Ok(Arc::clone(c)),
            (Datum::Column(c), Placement::HostFallback) => c.to_host(),
            (Datum::Scalar(s), Placement::Gpu) if s.data_type().is_fixed_width() => {
                s.to_device(self.launcher.pool())
            }
            (Datum::Scalar(s), _) => Ok(Arc::new(s.to_column(1)?)),
        }
    }

    fn elementwise(
        &self,
        expr: &PhysicalExpr,
        op: OpKind,
        args: Vec<Datum>,
        cast: Option<&CastPlan>,
    ) -> Result<Datum> {
        let scalar = args.iter().all(Datum::is_scalar);
        let inputs = args
            .iter()
            .map(|a| self.operand(a, expr.placement))
            .collect::<Result<Vec<_>>>()?;
        let output_type = &expr.data_type;
        let options = self.numeric;
        let registry = &self.registry;
        let run = |cols: &[&Column]| {
            registry.invoke(
                op,
                &KernelArgs {
                    inputs: cols,
                    output_type,
                    options,
                    cast,
                },
            )
        };
        trace!("Evaluating {} on {}", op, expr.placement);
        let column = match expr.placement {
            Placement::Gpu => self.launcher.launch(op.name(), &inputs, run)?,
            Placement::HostFallback => {
                let refs: Vec<&Column> = inputs.iter().map(|c| c.as_ref()).collect();
                Arc::new(run(&refs)?)
            }
        };
        finish(column, scalar)
    }

    fn run_fused(&self, fused: &FusedProgram, batch: &Batch) -> Result<Datum> {
        let inputs = fused
            .columns
            .iter()
            .map(|&i| batch.column(i).cloned())
            .collect::<Result<Vec<_>>>()?;
        let options = self.numeric;
        let program = &fused.program;
        let column = self
            .launcher
            .launch("fused", &inputs, |cols| program.execute(cols, &options))?;
        finish(column, inputs.is_empty())
    }

    fn reduce(
        &self,
        expr: &PhysicalExpr,
        func: AggFunc,
        input: Option<&PhysicalExpr>,
        batch: &Batch,
    ) -> Result<Datum> {
        let rows = batch.num_rows();
        let values = input.map(|i| self.column(i, batch)).transpose()?;
        let input_type = input.map_or(LogicalType::Int64, |i| i.data_type.clone());
        let output_type = &expr.data_type;
        let options = self.numeric;
        let run = |col: Option<&Column>| -> Result<Column> {
            let value = aggregate(func, col, rows, &input_type, options)?;
            Column::from_scalars(output_type.clone(), &[value])
        };
        let column = match expr.placement {
            Placement::Gpu => {
                let inputs: Vec<ColumnRef> = values.into_iter().collect();
                self.launcher
                    .launch(func.op_kind().name(), &inputs, |cols| run(cols.first().copied()))?
            }
            Placement::HostFallback => {
                let host = values.map(|c| c.to_host()).transpose()?;
                Arc::new(run(host.as_deref())?)
            }
        };
        finish(column, true)
    }

    fn window(&self, expr: &PhysicalExpr, window: &PhysicalWindow, batch: &Batch) -> Result<Datum> {
        let mut inputs: Vec<ColumnRef> = Vec::new();
        if let Some(input) = &window.input {
            inputs.push(self.column(input, batch)?);
        }
        let mut partitions = window.partition_by.len();
        for p in &window.partition_by {
            inputs.push(self.column(p, batch)?);
        }
        for (o, _) in &window.order_by {
            inputs.push(self.column(o, batch)?);
        }
        if inputs.is_empty() {
            // Nothing carries the row count: use a single constant partition.
            inputs.push(Arc::new(Column::int32(vec![Some(0); batch.num_rows()])));
            partitions = 1;
        }

        let has_input = window.input.is_some();
        let orders: Vec<SortOptions> = window.order_by.iter().map(|(_, o)| *o).collect();
        let options = self.numeric;
        let run = |cols: &[&Column]| -> Result<Column> {
            let (input, rest) = match cols.split_first() {
                Some((first, rest)) if has_input => (Some(*first), rest),
                _ => (None, cols),
            };
            let (partition_by, order_cols) = rest.split_at(partitions.min(rest.len()));
            let order_by: Vec<(&Column, SortOptions)> =
                order_cols.iter().copied().zip(orders.iter().copied()).collect();
            evaluate_window(
                window.func,
                &WindowArgs {
                    input,
                    partition_by,
                    order_by: &order_by,
                    offset: window.offset,
                    default: window.default.as_ref(),
                    options,
                },
            )
        };
        let column = match expr.placement {
            Placement::Gpu => self
                .launcher
                .launch(window.func.op_kind().name(), &inputs, run)?,
            Placement::HostFallback => {
                let host = inputs
                    .iter()
                    .map(|c| c.to_host())
                    .collect::<Result<Vec<_>>>()?;
                let refs: Vec<&Column> = host.iter().map(|c| c.as_ref()).collect();
                Arc::new(run(&refs)?)
            }
        };
        Ok(Datum::Column(column))
    }
}

/// Wrap a kernel result; scalar-only inputs yield a scalar.
fn finish(column: ColumnRef, scalar: bool) -> Result<Datum> {
    if !scalar {
        return Ok(Datum::Column(column));
    }
    let scalar = if column.is_device_backed() {
        Scalar::from_device(column)?
    } else {
        Scalar::new(column.data_type().clone(), column.value(0)?)?
    };
    Ok(Datum::Scalar(Arc::new(scalar)))
}

impl fmt::Debug for Evaluator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Evaluator")
            .field("numeric", &self.numeric)
            .field("launcher", &self.launcher)
            .field("dispatcher", &self.dispatcher)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HostFallbackPolicy;
    use crate::expr::*;
    use crate::physical_plan::Planner;
    use columnar_model::{Field, ScalarValue, Schema};
    use gpu_memory_manager::PoolConfig;

    struct Fixture {
        evaluator: Evaluator,
        dispatcher: Arc<OffloadDispatcher>,
    }

    fn fixture(numeric: NumericOptions) -> Fixture {
        let pool = DevicePool::simulated(PoolConfig {
            budget_bytes: 4 << 20,
            arena_bytes: 256 << 10,
            ..PoolConfig::default()
        });
        let dispatcher = Arc::new(OffloadDispatcher::new(
            Arc::new(KernelRegistry::with_builtins()),
            HostFallbackPolicy::All,
            Default::default(),
        ));
        let launcher = Arc::new(DeviceLauncher::new(pool));
        Fixture {
            evaluator: Evaluator::new(launcher, Arc::clone(&dispatcher), numeric),
            dispatcher,
        }
    }

    fn batch() -> Batch {
        Batch::try_new(
            Arc::new(Schema::new(vec![
                Field::new("a", LogicalType::Int64, true),
                Field::new("b", LogicalType::Int64, true),
                Field::new("s", LogicalType::Utf8, true),
            ])),
            vec![
                Arc::new(Column::int64(vec![Some(1), Some(2), None])),
                Arc::new(Column::int64(vec![Some(2), None, Some(4)])),
                Arc::new(Column::utf8(vec![Some("7"), Some("x"), None])),
            ],
        )
        .unwrap()
    }

    fn run(f: &Fixture, e: &Expr, batch: &Batch) -> Result<Datum> {
        let planned = Planner::new(&f.dispatcher, f.evaluator.numeric()).plan(e, batch.schema())?;
        f.evaluator.evaluate(&planned, batch)
    }

    #[test]
    fn add_propagates_nulls() {
        let f = fixture(NumericOptions::permissive());
        let out = run(&f, &col("a").add(col("b")), &batch()).unwrap();
        let out = out.as_column().unwrap();
        assert!(out.is_device_backed());
        assert_eq!(
            out.values().unwrap(),
            vec![ScalarValue::Int64(3), ScalarValue::Null, ScalarValue::Null]
        );
    }

    #[test]
    fn scalar_operands_broadcast() {
        let f = fixture(NumericOptions::permissive());
        let out = run(&f, &col("a").mul(lit(10i64)).gt(lit(15i64)), &batch()).unwrap();
        assert_eq!(
            out.as_column().unwrap().values().unwrap(),
            vec![
                ScalarValue::Boolean(false),
                ScalarValue::Boolean(true),
                ScalarValue::Null
            ]
        );

        let folded = run(&f, &lit(2i64).add(lit(3i64)), &batch()).unwrap();
        match folded {
            Datum::Scalar(s) => assert_eq!(s.value().unwrap(), &ScalarValue::Int64(5)),
            other => panic!("expected a scalar, got {:?}", other),
        }
    }

    #[test]
    fn host_fallback_result_is_uploaded_once() {
        let f = fixture(NumericOptions::permissive());
        let b = batch().to_device(f.evaluator.pool()).unwrap();
        let before = f.evaluator.pool().stats();
        // utf8 -> int64 runs on the host; the add consumes it on the device.
        let out = run(&f, &col("s").cast(LogicalType::Int64).add(col("b")), &b).unwrap();
        let after = f.evaluator.pool().stats();
        assert_eq!(after.host_to_device_copies - before.host_to_device_copies, 1);
        assert_eq!(after.device_to_host_copies, before.device_to_host_copies);
        assert_eq!(
            out.as_column().unwrap().values().unwrap(),
            vec![ScalarValue::Int64(9), ScalarValue::Null, ScalarValue::Null]
        );
    }

    #[test]
    fn strict_division_by_zero_raises() {
        let f = fixture(NumericOptions::strict());
        let err = run(&f, &col("a").div(lit(0i64)), &batch()).unwrap_err();
        assert!(matches!(err, EngineError::DivideByZero));

        let lenient = fixture(NumericOptions::permissive());
        let out = run(&lenient, &col("a").div(lit(0i64)), &batch()).unwrap();
        assert_eq!(out.as_column().unwrap().null_count(), 3);
    }

    #[test]
    fn reductions_yield_scalars() {
        let f = fixture(NumericOptions::permissive());
        let out = run(&f, &sum(col("a")), &batch()).unwrap();
        match out {
            Datum::Scalar(s) => {
                assert!(s.has_device_value());
                assert_eq!(s.value().unwrap(), &ScalarValue::Int64(3));
            }
            other => panic!("expected a scalar, got {:?}", other),
        }
        let count = run(&f, &count_star(), &batch()).unwrap();
        match count {
            Datum::Scalar(s) => assert_eq!(s.value().unwrap(), &ScalarValue::Int64(3)),
            other => panic!("expected a scalar, got {:?}", other),
        }
    }

    #[test]
    fn window_without_inputs_numbers_rows() {
        let f = fixture(NumericOptions::permissive());
        let out = run(&f, &row_number().over(vec![], vec![]), &batch()).unwrap();
        assert_eq!(
            out.as_column().unwrap().values().unwrap(),
            vec![
                ScalarValue::Int64(1),
                ScalarValue::Int64(2),
                ScalarValue::Int64(3)
            ]
        );
    }

    #[test]
    fn device_fault_marks_dispatcher_unhealthy() {
        let f = fixture(NumericOptions::permissive());
        f.evaluator.launcher().fail_next_launches(1);
        let err = run(&f, &col("a").add(col("b")), &batch()).unwrap_err();
        assert!(matches!(err, EngineError::DeviceFault(_)));
        assert!(!f.dispatcher.is_healthy());
        // Replanned work runs on the host.
        let out = run(&f, &col("a").add(col("b")), &batch()).unwrap();
        assert!(!out.as_column().unwrap().is_device_backed());
    }
}
