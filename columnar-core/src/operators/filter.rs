use columnar_model::{Batch, EngineError, LogicalType, Result, SchemaRef};
use gpu_kernels::filter_batch;

use super::{BoxedOperator, Stage};
use crate::context::TaskContext;
use crate::evaluator::Evaluator;
use crate::physical_plan::PhysicalExpr;

/// Keeps the rows where the predicate is true; null counts as false.
pub struct FilterExec {
    input: BoxedOperator,
    predicate: PhysicalExpr,
    evaluator: Evaluator,
    schema: SchemaRef,
}

impl FilterExec {
    pub fn new(input: BoxedOperator, predicate: PhysicalExpr, evaluator: Evaluator) -> Result<Self> {
        if predicate.data_type != LogicalType::Boolean {
            return Err(EngineError::TypeMismatch(format!(
                "filter predicate {} is {}, expected boolean",
                predicate, predicate.data_type
            )));
        }
        let schema = input.schema().clone();
        Ok(Self {
            input,
            predicate,
            evaluator,
            schema,
        })
    }
}

impl Stage for FilterExec {
    fn name(&self) -> &'static str {
        "filter"
    }

    fn schema(&self) -> &SchemaRef {
        &self.schema
    }

    fn poll(&mut self, _ctx: &TaskContext) -> Result<Option<Batch>> {
        while let Some(batch) = self.input.next()? {
            let mask = self.evaluator.evaluate_predicate(&self.predicate, &batch)?;
            let selected = filter_batch(&batch, &mask)?;
            if selected.num_rows() > 0 {
                return Ok(Some(selected));
            }
        }
        Ok(None)
    }

    fn release(&mut self) {
        self.input.close();
    }

    fn estimated_rows(&self) -> Option<usize> {
        self.input.estimated_rows()
    }
}
