use columnar_model::{Batch, BatchSource, Result, SchemaRef};
use std::collections::VecDeque;
use tracing::trace;

use super::Stage;
use crate::context::TaskContext;

/// Pipeline source: pulls from a [`BatchSource`] and re-chunks to the
/// configured batch size.
pub struct ScanExec {
    source: Option<Box<dyn BatchSource>>,
    schema: SchemaRef,
    estimated_rows: Option<usize>,
    pending: VecDeque<Batch>,
}

impl ScanExec {
    pub fn new(source: Box<dyn BatchSource>) -> Self {
        let schema = source.schema();
        let estimated_rows = source.estimated_rows();
        Self {
            source: Some(source),
            schema,
            estimated_rows,
            pending: VecDeque::new(),
        }
    }
}

impl Stage for ScanExec {
    fn name(&self) -> &'static str {
        "scan"
    }

    fn schema(&self) -> &SchemaRef {
        &self.schema
    }

    fn poll(&mut self, ctx: &TaskContext) -> Result<Option<Batch>> {
        if let Some(batch) = self.pending.pop_front() {
            return Ok(Some(batch));
        }
        let Some(source) = self.source.as_mut() else {
            return Ok(None);
        };
        let batch_size = ctx.options().batch_size.max(1);
        loop {
            match source.next_batch()? {
                None => return Ok(None),
                Some(batch) if batch.num_rows() == 0 => continue,
                Some(batch) if batch.num_rows() <= batch_size => return Ok(Some(batch)),
                Some(batch) => {
                    trace!("Splitting {} rows into {}-row batches", batch.num_rows(), batch_size);
                    let mut offset = 0;
                    while offset < batch.num_rows() {
                        let len = batch_size.min(batch.num_rows() - offset);
                        self.pending.push_back(batch.slice(offset, len)?);
                        offset += len;
                    }
                    return Ok(self.pending.pop_front());
                }
            }
        }
    }

    fn release(&mut self) {
        self.pending.clear();
        self.source = None;
    }

    fn estimated_rows(&self) -> Option<usize> {
        self.estimated_rows
    }
}
