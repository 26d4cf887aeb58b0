use columnar_model::{Batch, Field, Result, Schema, SchemaRef};
use std::sync::Arc;

use super::{BoxedOperator, Stage};
use crate::context::TaskContext;
use crate::evaluator::Evaluator;
use crate::physical_plan::PhysicalExpr;

/// Evaluates one expression per output column.
pub struct ProjectExec {
    input: BoxedOperator,
    exprs: Vec<PhysicalExpr>,
    evaluator: Evaluator,
    schema: SchemaRef,
}

impl ProjectExec {
    pub fn new(input: BoxedOperator, exprs: Vec<(String, PhysicalExpr)>, evaluator: Evaluator) -> Self {
        let fields = exprs
            .iter()
            .map(|(name, e)| Field::new(name.clone(), e.data_type.clone(), e.nullable))
            .collect();
        Self {
            input,
            exprs: exprs.into_iter().map(|(_, e)| e).collect(),
            evaluator,
            schema: Arc::new(Schema::new(fields)),
        }
    }
}

impl Stage for ProjectExec {
    fn name(&self) -> &'static str {
        "project"
    }

    fn schema(&self) -> &SchemaRef {
        &self.schema
    }

    fn poll(&mut self, _ctx: &TaskContext) -> Result<Option<Batch>> {
        let Some(batch) = self.input.next()? else {
            return Ok(None);
        };
        let columns = self
            .exprs
            .iter()
            .map(|e| self.evaluator.evaluate_column(e, &batch))
            .collect::<Result<Vec<_>>>()?;
        Batch::try_new(Arc::clone(&self.schema), columns).map(Some)
    }

    fn release(&mut self) {
        self.input.close();
    }

    fn estimated_rows(&self) -> Option<usize> {
        self.input.estimated_rows()
    }
}
