use columnar_model::{Batch, Column, Result, SchemaRef};
use gpu_kernels::{sort_indices, SortOptions};
use std::sync::Arc;
use tracing::debug;

use super::{drain, BoxedOperator, Chunker, Stage};
use crate::context::TaskContext;
use crate::evaluator::Evaluator;
use crate::physical_plan::PhysicalExpr;

/// Blocking sort over the whole input. Equal keys keep their input order.
pub struct SortExec {
    input: BoxedOperator,
    keys: Vec<(PhysicalExpr, SortOptions)>,
    evaluator: Evaluator,
    schema: SchemaRef,
    output: Chunker,
}

impl SortExec {
    pub fn new(input: BoxedOperator, keys: Vec<(PhysicalExpr, SortOptions)>, evaluator: Evaluator) -> Self {
        let schema = input.schema().clone();
        Self {
            input,
            keys,
            evaluator,
            schema,
            output: Chunker::default(),
        }
    }

    fn sort_all(&mut self) -> Result<Batch> {
        let batches = drain(&mut self.input)?;
        let all = Batch::concat(Arc::clone(&self.schema), &batches)?;
        if all.num_rows() == 0 || self.keys.is_empty() {
            return Ok(all);
        }
        let key_columns = self
            .keys
            .iter()
            .map(|(e, _)| self.evaluator.evaluate_column(e, &all))
            .collect::<Result<Vec<_>>>()?;
        let keys: Vec<(&Column, SortOptions)> = key_columns
            .iter()
            .zip(&self.keys)
            .map(|(c, (_, o))| (c.as_ref(), *o))
            .collect();
        let order = sort_indices(&keys)?;
        debug!("Sorted {} rows on {} keys", all.num_rows(), keys.len());
        all.take(&order)
    }
}

impl Stage for SortExec {
    fn name(&self) -> &'static str {
        "sort"
    }

    fn schema(&self) -> &SchemaRef {
        &self.schema
    }

    fn poll(&mut self, ctx: &TaskContext) -> Result<Option<Batch>> {
        if !self.output.is_loaded() {
            let sorted = self.sort_all()?;
            self.output.load(sorted);
        }
        self.output.next_chunk(ctx.options().batch_size)
    }

    fn release(&mut self) {
        self.output.clear();
        self.input.close();
    }

    fn draining(&self) -> bool {
        self.output.is_loaded()
    }

    fn estimated_rows(&self) -> Option<usize> {
        self.input.estimated_rows()
    }
}
