use columnar_model::{Batch, EngineError, Field, Result, Schema, SchemaRef};
use std::sync::Arc;
use tracing::debug;

use super::{drain, BoxedOperator, Chunker, Stage};
use crate::context::TaskContext;
use crate::evaluator::Evaluator;
use crate::physical_plan::{PhysicalExpr, PhysicalNode};

/// Appends window function columns. Partitions may span input batches, so
/// the whole input is buffered before anything is emitted.
pub struct WindowExec {
    input: BoxedOperator,
    exprs: Vec<PhysicalExpr>,
    evaluator: Evaluator,
    input_schema: SchemaRef,
    schema: SchemaRef,
    output: Chunker,
}

impl WindowExec {
    pub fn new(
        input: BoxedOperator,
        exprs: Vec<(String, PhysicalExpr)>,
        evaluator: Evaluator,
    ) -> Result<Self> {
        if let Some((name, _)) = exprs
            .iter()
            .find(|(_, e)| !matches!(e.node, PhysicalNode::Window(_)))
        {
            return Err(EngineError::InvalidArgument(format!(
                "{} is not a window function call",
                name
            )));
        }
        let input_schema = input.schema().clone();
        let mut fields = input_schema.fields().to_vec();
        fields.extend(
            exprs
                .iter()
                .map(|(name, e)| Field::new(name.clone(), e.data_type.clone(), e.nullable)),
        );
        Ok(Self {
            input,
            exprs: exprs.into_iter().map(|(_, e)| e).collect(),
            evaluator,
            input_schema,
            schema: Arc::new(Schema::new(fields)),
            output: Chunker::default(),
        })
    }

    fn evaluate_all(&mut self) -> Result<Batch> {
        let batches = drain(&mut self.input)?;
        let all = Batch::concat(Arc::clone(&self.input_schema), &batches)?;
        let mut columns = all.columns().to_vec();
        for e in &self.exprs {
            columns.push(self.evaluator.evaluate_column(e, &all)?);
        }
        debug!(
            "Evaluated {} window functions over {} rows",
            self.exprs.len(),
            all.num_rows()
        );
        Batch::try_new(Arc::clone(&self.schema), columns)
    }
}

impl Stage for WindowExec {
    fn name(&self) -> &'static str {
        "window"
    }

    fn schema(&self) -> &SchemaRef {
        &self.schema
    }

    fn poll(&mut self, ctx: &TaskContext) -> Result<Option<Batch>> {
        if !self.output.is_loaded() {
            let result = self.evaluate_all()?;
            self.output.load(result);
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
