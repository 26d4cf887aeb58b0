//! Grouped aggregation.
//!
//! The operator is blocking: it consumes its whole input before emitting.
//! Two strategies produce the same groups and values:
//!
//! - `Hash` assigns group ids through a hash table as batches arrive and
//!   keeps only the accumulators; groups come out in order of first
//!   appearance.
//! - `Sort` buffers the input, sorts it by the group keys and assigns ids by
//!   runs; groups come out in key order. It is chosen when the estimated
//!   state size exceeds the aggregate memory budget.
//!
//! `Partial` emits the group keys followed by each aggregate's state
//! columns; `Final` merges such batches. Splitting a stream, aggregating
//! the parts partially and merging yields the single-pass result.

use columnar_model::{
    Batch, Column, ColumnRef, EngineError, Field, LogicalType, Result, ScalarValue, Schema,
    SchemaRef,
};
use gpu_kernels::{sort_indices, Accumulator, AggFunc, SortOptions};
use rustc_hash::FxHashMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::{drain, BoxedOperator, Chunker, Stage};
use crate::context::TaskContext;
use crate::evaluator::Evaluator;
use crate::physical_plan::{AggregateSpec, PhysicalExpr};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregateMode {
    Single,
    Partial,
    Final,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregateStrategy {
    Hash,
    Sort,
}

impl fmt::Display for AggregateStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AggregateStrategy::Hash => f.write_str("hash"),
            AggregateStrategy::Sort => f.write_str("sort"),
        }
    }
}

/// Group keys and aggregates of a partial aggregate, as needed to merge it.
#[derive(Debug, Clone)]
pub struct AggregateLayout {
    pub group_fields: Vec<Field>,
    pub aggregates: Vec<AggregateSpec>,
}

impl AggregateLayout {
    pub fn state_types(spec: &AggregateSpec) -> Result<Vec<LogicalType>> {
        spec.func.state_types(&spec.input_type)
    }

    /// Keys followed by every aggregate's state columns.
    pub fn partial_schema(&self) -> Result<Schema> {
        let mut fields = self.group_fields.clone();
        for spec in &self.aggregates {
            for (i, t) in Self::state_types(spec)?.into_iter().enumerate() {
                fields.push(Field::new(format!("{}.{}", spec.name, i), t, true));
            }
        }
        Ok(Schema::new(fields))
    }

    /// Keys followed by every aggregate's result.
    pub fn final_schema(&self) -> Schema {
        let mut fields = self.group_fields.clone();
        fields.extend(self.aggregates.iter().map(|spec| {
            let nullable = !matches!(spec.func, AggFunc::Count | AggFunc::CountStar);
            Field::new(spec.name.clone(), spec.output_type.clone(), nullable)
        }));
        Schema::new(fields)
    }

    /// Rough per-group state footprint, used to pick a strategy.
    fn group_bytes(&self) -> Result<usize> {
        let width = |t: &LogicalType| t.byte_width().unwrap_or(32);
        let keys: usize = self.group_fields.iter().map(|f| width(&f.data_type)).sum();
        let mut states = 0;
        for spec in &self.aggregates {
            states += Self::state_types(spec)?.iter().map(width).sum::<usize>();
        }
        // Hash table entry overhead.
        Ok(keys + states + 16)
    }
}

pub fn choose_strategy(
    estimated_rows: Option<usize>,
    group_bytes: usize,
    budget: usize,
) -> AggregateStrategy {
    match estimated_rows {
        Some(rows) if rows.saturating_mul(group_bytes) > budget => AggregateStrategy::Sort,
        _ => AggregateStrategy::Hash,
    }
}

pub struct AggregateExec {
    input: BoxedOperator,
    mode: AggregateMode,
    strategy: Option<AggregateStrategy>,
    group_by: Vec<PhysicalExpr>,
    layout: AggregateLayout,
    evaluator: Evaluator,
    schema: SchemaRef,
    accumulators: Vec<Accumulator>,
    index: FxHashMap<Vec<ScalarValue>, usize>,
    group_keys: Vec<Vec<ScalarValue>>,
    output: Chunker,
}

impl AggregateExec {
    /// Aggregate `input` grouped by `group_by`, in `Single` or `Partial` mode.
    pub fn new(
        input: BoxedOperator,
        group_by: Vec<(String, PhysicalExpr)>,
        aggregates: Vec<AggregateSpec>,
        mode: AggregateMode,
        evaluator: Evaluator,
    ) -> Result<Self> {
        if mode == AggregateMode::Final {
            return Err(EngineError::InvalidArgument(
                "final aggregates are built with AggregateExec::merge".into(),
            ));
        }
        let layout = AggregateLayout {
            group_fields: group_by
                .iter()
                .map(|(name, e)| Field::new(name.clone(), e.data_type.clone(), e.nullable))
                .collect(),
            aggregates,
        };
        let group_by = group_by.into_iter().map(|(_, e)| e).collect();
        Self::build(input, mode, group_by, layout, evaluator)
    }

    /// Merge the output of partial aggregates described by `layout`.
    pub fn merge(input: BoxedOperator, layout: AggregateLayout, evaluator: Evaluator) -> Result<Self> {
        let expected = layout.partial_schema()?;
        if input.schema().fields() != expected.fields() {
            return Err(EngineError::TypeMismatch(format!(
                "merge input has {} columns, partial layout expects {}",
                input.schema().len(),
                expected.len()
            )));
        }
        Self::build(input, AggregateMode::Final, Vec::new(), layout, evaluator)
    }

    fn build(
        input: BoxedOperator,
        mode: AggregateMode,
        group_by: Vec<PhysicalExpr>,
        layout: AggregateLayout,
        evaluator: Evaluator,
    ) -> Result<Self> {
        let numeric = evaluator.numeric();
        let accumulators = layout
            .aggregates
            .iter()
            .map(|spec| Accumulator::try_new(spec.func, &spec.input_type, numeric))
            .collect::<Result<Vec<_>>>()?;
        let schema = match mode {
            AggregateMode::Partial => layout.partial_schema()?,
            AggregateMode::Single | AggregateMode::Final => layout.final_schema(),
        };
        Ok(Self {
            input,
            mode,
            strategy: None,
            group_by,
            layout,
            evaluator,
            schema: Arc::new(schema),
            accumulators,
            index: FxHashMap::default(),
            group_keys: Vec::new(),
            output: Chunker::default(),
        })
    }

    /// Force a strategy instead of choosing one from the row estimate.
    pub fn with_strategy(mut self, strategy: AggregateStrategy) -> Self {
        self.strategy = Some(strategy);
        self
    }

    pub fn layout(&self) -> &AggregateLayout {
        &self.layout
    }

    pub fn mode(&self) -> AggregateMode {
        self.mode
    }

    /// The strategy in use, once execution has started.
    pub fn strategy(&self) -> Option<AggregateStrategy> {
        self.strategy
    }

    fn key_columns(&self, batch: &Batch) -> Result<Vec<ColumnRef>> {
        match self.mode {
            AggregateMode::Final => Ok(batch.columns()[..self.layout.group_fields.len()].to_vec()),
            AggregateMode::Single | AggregateMode::Partial => self
                .group_by
                .iter()
                .map(|e| self.evaluator.evaluate_column(e, batch))
                .collect(),
        }
    }

    fn group_id(&mut self, key: Vec<ScalarValue>) -> usize {
        if let Some(&id) = self.index.get(&key) {
            return id;
        }
        let id = self.group_keys.len();
        self.group_keys.push(key.clone());
        self.index.insert(key, id);
        id
    }

    fn hash_ids(&mut self, keys: &[ColumnRef], rows: usize) -> Result<Vec<usize>> {
        let values = keys.iter().map(|c| c.values()).collect::<Result<Vec<_>>>()?;
        let mut ids = Vec::with_capacity(rows);
        for row in 0..rows {
            let key: Vec<ScalarValue> = values.iter().map(|v| v[row].clone()).collect();
            ids.push(self.group_id(key));
        }
        Ok(ids)
    }

    /// Group ids for key-sorted rows: a new group starts where the key changes.
    fn run_ids(&mut self, keys: &[ColumnRef], rows: usize) -> Result<Vec<usize>> {
        let values = keys.iter().map(|c| c.values()).collect::<Result<Vec<_>>>()?;
        let mut ids = Vec::with_capacity(rows);
        let mut previous: Option<Vec<ScalarValue>> = None;
        for row in 0..rows {
            let key: Vec<ScalarValue> = values.iter().map(|v| v[row].clone()).collect();
            if previous.as_ref() != Some(&key) {
                self.group_keys.push(key.clone());
                previous = Some(key);
            }
            ids.push(self.group_keys.len() - 1);
        }
        Ok(ids)
    }

    fn accumulate(&mut self, batch: &Batch, ids: &[usize]) -> Result<()> {
        let groups = self.group_keys.len();
        for acc in &mut self.accumulators {
            acc.resize(groups);
        }
        match self.mode {
            AggregateMode::Final => {
                let mut offset = self.layout.group_fields.len();
                for (acc, spec) in self.accumulators.iter_mut().zip(&self.layout.aggregates) {
                    let width = AggregateLayout::state_types(spec)?.len();
                    let states: Vec<&Column> = batch.columns()[offset..offset + width]
                        .iter()
                        .map(|c| c.as_ref())
                        .collect();
                    acc.merge_state(&states, ids)?;
                    offset += width;
                }
            }
            AggregateMode::Single | AggregateMode::Partial => {
                for (acc, spec) in self.accumulators.iter_mut().zip(&self.layout.aggregates) {
                    let values = match &spec.input {
                        Some(e) => {
                            let column = self.evaluator.evaluate_column(e, batch)?;
                            Some(self.evaluator.place(&column, spec.placement)?)
                        }
                        None => None,
                    };
                    acc.update(values.as_deref(), ids)?;
                }
            }
        }
        Ok(())
    }

    fn consume_hashed(&mut self, group_bytes: usize, budget: usize) -> Result<()> {
        let mut warned = false;
        while let Some(batch) = self.input.next()? {
            let keys = self.key_columns(&batch)?;
            let ids = self.hash_ids(&keys, batch.num_rows())?;
            self.accumulate(&batch, &ids)?;
            if !warned && self.group_keys.len().saturating_mul(group_bytes) > budget {
                warn!(
                    "Hash aggregate holds {} groups, above the {} byte budget",
                    self.group_keys.len(),
                    budget
                );
                warned = true;
            }
        }
        Ok(())
    }

    fn consume_sorted(&mut self) -> Result<()> {
        let batches = drain(&mut self.input)?;
        let all = Batch::concat(self.input.schema().clone(), &batches)?;
        drop(batches);
        let keys = self.key_columns(&all)?;
        let (sorted, keys) = if keys.is_empty() || all.num_rows() == 0 {
            (all, keys)
        } else {
            let order = {
                let sort_keys: Vec<(&Column, SortOptions)> = keys
                    .iter()
                    .map(|c| (c.as_ref(), SortOptions::asc()))
                    .collect();
                sort_indices(&sort_keys)?
            };
            let sorted_keys = keys
                .iter()
                .map(|c| c.take(&order).map(Arc::new))
                .collect::<Result<Vec<_>>>()?;
            (all.take(&order)?, sorted_keys)
        };
        let ids = self.run_ids(&keys, sorted.num_rows())?;
        self.accumulate(&sorted, &ids)
    }

    fn finish(&mut self, budget: usize) -> Result<Batch> {
        let group_bytes = self.layout.group_bytes()?;
        let strategy = self.strategy.unwrap_or_else(|| {
            choose_strategy(self.input.estimated_rows(), group_bytes, budget)
        });
        self.strategy = Some(strategy);
        info!(
            "Aggregating {} keys / {} aggregates ({:?}, {} strategy)",
            self.layout.group_fields.len(),
            self.layout.aggregates.len(),
            self.mode,
            strategy
        );
        match strategy {
            AggregateStrategy::Hash => self.consume_hashed(group_bytes, budget)?,
            AggregateStrategy::Sort => self.consume_sorted()?,
        }

        // Without grouping there is always exactly one output row.
        if self.layout.group_fields.is_empty() && self.group_keys.is_empty() {
            self.group_keys.push(Vec::new());
        }
        let groups = self.group_keys.len();
        debug!("Aggregate produced {} groups", groups);

        let mut columns: Vec<ColumnRef> = Vec::with_capacity(self.schema.len());
        for (j, field) in self.layout.group_fields.iter().enumerate() {
            let values: Vec<ScalarValue> = self.group_keys.iter().map(|k| k[j].clone()).collect();
            columns.push(Arc::new(Column::from_scalars(field.data_type.clone(), &values)?));
        }
        for acc in &mut self.accumulators {
            acc.resize(groups);
            match self.mode {
                AggregateMode::Partial => {
                    columns.extend(acc.state()?.into_iter().map(Arc::new));
                }
                AggregateMode::Single | AggregateMode::Final => {
                    columns.push(Arc::new(acc.evaluate()?));
                }
            }
        }
        self.index.clear();
        Batch::try_new(Arc::clone(&self.schema), columns)
    }
}

impl Stage for AggregateExec {
    fn name(&self) -> &'static str {
        "aggregate"
    }

    fn schema(&self) -> &SchemaRef {
        &self.schema
    }

    fn poll(&mut self, ctx: &TaskContext) -> Result<Option<Batch>> {
        if !self.output.is_loaded() {
            let result = self.finish(ctx.options().aggregate_memory_budget)?;
            self.output.load(result);
        }
        self.output.next_chunk(ctx.options().batch_size)
    }

    fn release(&mut self) {
        self.output.clear();
        self.index.clear();
        self.group_keys.clear();
        self.accumulators.clear();
        self.input.close();
    }

    fn draining(&self) -> bool {
        self.output.is_loaded()
    }

    fn estimated_rows(&self) -> Option<usize> {
        if self.layout.group_fields.is_empty() {
            Some(1)
        } else {
            self.input.estimated_rows()
        }
    }
}
